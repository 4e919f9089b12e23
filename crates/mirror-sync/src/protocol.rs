//! Version service request and response formats.

use crate::{Error, Result};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Operation code of the version check.
pub const VERSION_CHECK_OPCODE: &str = "100101";

/// Response status for an unknown client version.
pub const STATUS_VERSION_NOT_FOUND: i64 = 10001;

/// Platform key selecting the 64-bit file lists.
const PLATFORM: &str = "64";

/// Server disposition returned by a version check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// `0`: a patch may be available.
    Patch,
    /// `1`: update packages may be available.
    Update,
    /// `2`: the service is down for maintenance.
    Maintenance,
    /// `3`: the client binary must be replaced.
    ForceUpdate,
    /// Any other return code.
    Unknown(i64),
}

impl Directive {
    /// Map the response's `ret` code.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Directive::Patch,
            1 => Directive::Update,
            2 => Directive::Maintenance,
            3 => Directive::ForceUpdate,
            other => Directive::Unknown(other),
        }
    }
}

/// Render a string the way a Python `repr` does.
fn python_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// A version check for one device at one game version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRequest<'a> {
    /// Sent as both `pass` and `did`.
    pub device_id: &'a str,
    pub user_agent: &'a str,
    /// Version the client currently runs.
    pub game_version: u64,
}

impl VersionRequest<'_> {
    /// Request headers, including the configured user agent.
    pub fn headers(&self) -> Vec<(&str, &str)> {
        vec![
            ("Accept-Encoding", "identity"),
            ("Content-Type", "application/x-www-form-urlencoded"),
            ("User-Agent", self.user_agent),
        ]
    }

    /// The `params` query value, a Python dict literal.
    pub fn params_literal(&self) -> String {
        let device = python_str(self.device_id);
        format!(
            "{{'pass': {}, 'channel': '', 'version': {}, 'did': {}}}",
            device, self.game_version, device
        )
    }
}

/// Accept a version as a JSON number or a numeric string.
pub(crate) fn flexible_version<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid version {}", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid version {:?}", s))),
        Some(other) => Err(de::Error::custom(format!("invalid version {}", other))),
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    status: i64,
    #[serde(default)]
    data: Option<RawHttpData>,
}

#[derive(Debug, Deserialize)]
struct RawHttpData {
    #[serde(default)]
    ret: Option<i64>,
    #[serde(default)]
    data: Option<RawVersionData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVersionData {
    #[serde(rename = "targetV", default, deserialize_with = "flexible_version")]
    target_v: Option<u64>,
    #[serde(default)]
    cdn_url: Option<String>,
    #[serde(default)]
    extra_cdn_url: Option<String>,
    #[serde(default)]
    notice: Option<Value>,
    #[serde(default)]
    pack: PackList,
    #[serde(default)]
    patch_info: Option<RawPatchInfo>,
}

#[derive(Debug, Deserialize)]
struct RawPart {
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawPack {
    #[serde(rename = "64", default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPatchInfo {
    #[serde(default, deserialize_with = "flexible_version")]
    patch_version: Option<u64>,
    #[serde(default)]
    patch: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawPatchFile {
    url: String,
    logic: String,
}

/// Update packs in the order the server listed them.
#[derive(Debug, Default)]
struct PackList(Vec<(String, RawPack)>);

impl<'de> Deserialize<'de> for PackList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PackListVisitor;

        impl<'de> Visitor<'de> for PackListVisitor {
            type Value = PackList;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object or list of update packs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<PackList, A::Error> {
                let mut packs = Vec::new();
                while let Some((key, pack)) = map.next_entry::<String, RawPack>()? {
                    packs.push((key, pack));
                }
                Ok(PackList(packs))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<PackList, A::Error> {
                let mut packs = Vec::new();
                while let Some(pack) = seq.next_element::<RawPack>()? {
                    packs.push((packs.len().to_string(), pack));
                }
                Ok(PackList(packs))
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<PackList, E> {
                Ok(PackList::default())
            }
        }

        deserializer.deserialize_any(PackListVisitor)
    }
}

/// One downloadable update package, split into archive parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackDescriptor {
    /// Key the server listed the pack under.
    pub key: String,
    /// Part URLs relative to the CDN, in application order.
    pub part_urls: Vec<String>,
}

/// One patched file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PatchFile {
    /// Download URL relative to the CDN.
    pub url: String,
    /// Logical path below the asset directory.
    pub logic: String,
}

/// The patch offered by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchDescriptor {
    /// Patch version reached once every file is written.
    pub version: u64,
    /// Files to download, for the 64-bit platform.
    pub files: Vec<PatchFile>,
}

/// Validated version check response.
#[derive(Debug, Clone)]
pub struct VersionCheck {
    /// What the server wants the client to do.
    pub directive: Directive,
    /// Newest game version on the server (`targetV`).
    pub latest_version: u64,
    /// CDN used for downloads.
    pub cdn_url: String,
    /// Update packs in server order.
    pub packs: Vec<PackDescriptor>,
    notice: Option<Value>,
    patch: Option<RawPatchSummary>,
}

#[derive(Debug, Clone)]
struct RawPatchSummary {
    version: Option<u64>,
    files: Option<Value>,
}

fn present(url: Option<String>) -> Option<String> {
    url.filter(|u| !u.is_empty())
}

impl VersionCheck {
    /// Parse a version check response body.
    pub fn parse(body: &[u8], game_version: u64) -> Result<Self> {
        let raw: RawResponse = serde_json::from_slice(body)
            .map_err(|e| Error::Protocol(format!("invalid version check response: {}", e)))?;

        match raw.status {
            0 => {}
            STATUS_VERSION_NOT_FOUND => return Err(Error::VersionNotFound(game_version)),
            other => {
                return Err(Error::Protocol(format!(
                    "version check failed with status {}",
                    other
                )))
            }
        }

        let http = raw
            .data
            .ok_or_else(|| Error::Protocol("response has no data".into()))?;
        let ret = http
            .ret
            .ok_or_else(|| Error::Protocol("response has no ret".into()))?;
        let data = http
            .data
            .ok_or_else(|| Error::Protocol("response has no version data".into()))?;
        let latest_version = data
            .target_v
            .ok_or_else(|| Error::Protocol("response has no targetV".into()))?;

        let cdn = present(data.cdn_url);
        let extra = present(data.extra_cdn_url);
        if cdn.is_none() {
            log::warn!("Response has no cdnUrl");
        }
        if extra.is_none() {
            log::warn!("Response has no extraCdnUrl");
        }
        let cdn_url = cdn
            .or(extra)
            .ok_or_else(|| Error::Protocol("response has no CDN url".into()))?;

        let packs = data
            .pack
            .0
            .into_iter()
            .map(|(key, pack)| PackDescriptor {
                key,
                part_urls: pack.parts.into_iter().map(|p| p.url).collect(),
            })
            .collect();

        let patch = data.patch_info.map(|info| RawPatchSummary {
            version: info.patch_version,
            files: info.patch.get(PLATFORM).cloned(),
        });

        Ok(Self {
            directive: Directive::from_code(ret),
            latest_version,
            cdn_url,
            packs,
            notice: data.notice,
            patch,
        })
    }

    /// English maintenance notice. A plain string notice is returned as is.
    pub fn maintenance_notice(&self) -> Result<String> {
        match &self.notice {
            None | Some(Value::Null) => Err(Error::Protocol("response has no notice".into())),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Object(localized)) => match localized.get("en") {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(other) => Ok(other.to_string()),
                None => Err(Error::Protocol("notice has no english text".into())),
            },
            Some(other) => Err(Error::Protocol(format!("unexpected notice {}", other))),
        }
    }

    /// Patch offered with a patch directive.
    pub fn patch(&self) -> Result<PatchDescriptor> {
        let patch = self
            .patch
            .as_ref()
            .ok_or_else(|| Error::Protocol("response has no patchInfo".into()))?;
        let version = patch
            .version
            .ok_or_else(|| Error::Protocol("patchInfo has no patchVersion".into()))?;
        let files = match &patch.files {
            Some(files) => Vec::<PatchFile>::deserialize(files)
                .map_err(|e| Error::Protocol(format!("invalid patch file list: {}", e)))?,
            None => Vec::new(),
        };
        Ok(PatchDescriptor { version, files })
    }
}

/// File name of a downloaded part: the last path segment of its URL.
pub fn part_file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_params_literal() {
        let request = VersionRequest {
            device_id: "abc",
            user_agent: "UA",
            game_version: 1040,
        };
        assert_eq!(
            request.params_literal(),
            "{'pass': 'abc', 'channel': '', 'version': 1040, 'did': 'abc'}"
        );
        assert_eq!(python_str("it's"), "\"it's\"");
        assert_eq!(python_str("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_pack_order_is_preserved() {
        let text = br#"{"status":0,"data":{"ret":1,"data":{"targetV":"1050","cdnUrl":"http://cdn",
            "pack":{"z":{"64":[{"url":"p/1049.zip"}]},"a":{"64":[{"url":"p/1050-1.zip"},{"url":"p/1050-2.zip"}]}}}}}"#;
        let check = VersionCheck::parse(text, 1048).unwrap();
        assert_eq!(check.directive, Directive::Update);
        assert_eq!(check.latest_version, 1050);
        let keys: Vec<&str> = check.packs.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert_eq!(check.packs[1].part_urls.len(), 2);
    }

    #[test]
    fn test_status_codes() {
        let err = VersionCheck::parse(&body(json!({"status": 10001})), 7).unwrap_err();
        assert!(matches!(err, Error::VersionNotFound(7)));
        let err = VersionCheck::parse(&body(json!({"status": 5})), 7).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_cdn_fallback_and_missing() {
        let check = VersionCheck::parse(
            &body(json!({"status":0,"data":{"ret":9,"data":{"targetV":1,"extraCdnUrl":"http://b"}}})),
            1,
        )
        .unwrap();
        assert_eq!(check.cdn_url, "http://b");
        assert_eq!(check.directive, Directive::Unknown(9));

        let err = VersionCheck::parse(
            &body(json!({"status":0,"data":{"ret":0,"data":{"targetV":1,"cdnUrl":""}}})),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_patch_and_notice() {
        let check = VersionCheck::parse(
            &body(json!({"status":0,"data":{"ret":0,"data":{
                "targetV":1,"cdnUrl":"http://a",
                "notice":{"en":"Back soon"},
                "patchInfo":{"patchVersion":12,"patch":{"64":[{"url":"x/1","logic":"ui/a.png"}]}}
            }}})),
            1,
        )
        .unwrap();
        assert_eq!(check.maintenance_notice().unwrap(), "Back soon");
        let patch = check.patch().unwrap();
        assert_eq!(patch.version, 12);
        assert_eq!(patch.files[0].logic, "ui/a.png");
    }

    #[test]
    fn test_notice_may_be_string_or_null() {
        let parse = |notice: Value| {
            VersionCheck::parse(
                &body(json!({"status":0,"data":{"ret":2,"data":{
                    "targetV":1,"cdnUrl":"http://a","notice":notice
                }}})),
                1,
            )
            .unwrap()
        };

        let check = parse(json!("Down until 10:00"));
        assert_eq!(check.maintenance_notice().unwrap(), "Down until 10:00");

        let check = parse(Value::Null);
        assert_eq!(check.directive, Directive::Maintenance);
        assert!(matches!(check.maintenance_notice(), Err(Error::Protocol(_))));

        let check = parse(json!({"ko": "..."}));
        assert!(matches!(check.maintenance_notice(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_part_file_name() {
        assert_eq!(part_file_name("http://cdn/p/1050-1.zip"), "1050-1.zip");
        assert_eq!(part_file_name("/p/1050.zip?sig=1"), "1050.zip");
    }
}
