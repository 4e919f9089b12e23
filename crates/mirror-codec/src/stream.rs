//! Signature-tagged asset containers.
//!
//! A container starts with a signature, followed by two key bytes. Script
//! containers encrypt everything after the key bytes. Generic containers
//! carry a big-endian region length after the key bytes; bytes past the
//! region (typically raw audio or video) are stored in the clear.

use crate::xxtea;
use crate::{Error, Result};
use std::borrow::Cow;
use std::fs;
use std::path::Path;

/// Signature of compiled script containers.
pub const SCRIPT_SIGNATURE: &[u8] = b"dpsxxtea.lua";

/// Signature of all other asset containers.
pub const GENERIC_SIGNATURE: &[u8] = b"dpsxxtea";

/// Seed expanded into the per-container key.
pub const KEY_SEED: &[u8] = b"dpstorm.xxtea";

/// Width of the XXTEA key in bytes.
pub const KEY_LEN: usize = 16;

const SCRIPT_HEADER_LEN: usize = 2;
const GENERIC_HEADER_LEN: usize = 6;

/// Payload kind selected by the container signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Compiled script: the whole remainder is encrypted.
    Script,
    /// Any other asset: an explicit region length follows the key bytes.
    Generic,
}

impl PayloadKind {
    fn header_len(self) -> usize {
        match self {
            PayloadKind::Script => SCRIPT_HEADER_LEN,
            PayloadKind::Generic => GENERIC_HEADER_LEN,
        }
    }
}

/// Signatures and key seed used to recognise and decrypt containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherProfile {
    signatures: Vec<(PayloadKind, Vec<u8>)>,
    key_seed: Vec<u8>,
}

impl CipherProfile {
    /// Create a profile from explicit signatures and key seed.
    pub fn new(
        script_signature: impl Into<Vec<u8>>,
        generic_signature: impl Into<Vec<u8>>,
        key_seed: impl Into<Vec<u8>>,
    ) -> Self {
        let mut signatures = vec![
            (PayloadKind::Script, script_signature.into()),
            (PayloadKind::Generic, generic_signature.into()),
        ];
        // most specific first
        signatures.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        Self {
            signatures,
            key_seed: key_seed.into(),
        }
    }

    /// The profile used by the shipped clients.
    pub fn standard() -> Self {
        Self::new(SCRIPT_SIGNATURE, GENERIC_SIGNATURE, KEY_SEED)
    }

    /// Signature bytes for the given kind.
    pub fn signature(&self, kind: PayloadKind) -> &[u8] {
        self.signatures
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, sig)| sig.as_slice())
            .unwrap_or_default()
    }

    /// Match the start of `buffer` against the known signatures.
    pub fn detect(&self, buffer: &[u8]) -> Option<(PayloadKind, usize)> {
        self.signatures
            .iter()
            .find(|(_, sig)| !sig.is_empty() && buffer.starts_with(sig))
            .map(|(kind, sig)| (*kind, sig.len()))
    }

    /// Expand the two header bytes into a 16-byte key.
    pub fn derive_key(&self, b0: u8, b1: u8) -> Result<[u8; KEY_LEN]> {
        if self.key_seed.len() > KEY_LEN {
            return Err(Error::MalformedKey(self.key_seed.len()));
        }

        let mut key = [0u8; KEY_LEN];
        for (i, seed) in self.key_seed.iter().enumerate() {
            let spread = b1.wrapping_mul(i as u8 + 1);
            key[i] = seed ^ b0.rotate_left(i as u32 % 8) ^ spread;
        }
        Ok(key)
    }
}

impl Default for CipherProfile {
    fn default() -> Self {
        Self::standard()
    }
}

/// Decoder for signature-tagged asset containers.
#[derive(Debug, Clone, Default)]
pub struct StreamCodec {
    profile: CipherProfile,
}

impl StreamCodec {
    /// Create a codec for the given profile.
    pub fn new(profile: CipherProfile) -> Self {
        Self { profile }
    }

    /// Get the cipher profile.
    pub fn profile(&self) -> &CipherProfile {
        &self.profile
    }

    /// Decode a container.
    ///
    /// Buffers without a known signature are returned unchanged, so this is
    /// safe to apply to a mix of encrypted and plain assets.
    pub fn decode<'a>(&self, buffer: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let Some((kind, sign_len)) = self.profile.detect(buffer) else {
            return Ok(Cow::Borrowed(buffer));
        };

        let body = &buffer[sign_len..];
        let header_len = kind.header_len();
        if body.len() < header_len {
            return Err(Error::CorruptContainer(format!(
                "{:?} header needs {} bytes, {} available",
                kind,
                header_len,
                body.len()
            )));
        }

        let key = self.profile.derive_key(body[0], body[1])?;
        let data = &body[header_len..];

        let region_len = match kind {
            PayloadKind::Script => data.len(),
            PayloadKind::Generic => {
                let declared = i32::from_be_bytes([body[2], body[3], body[4], body[5]]);
                if declared < 0 {
                    return Err(Error::CorruptContainer(format!(
                        "negative region length {}",
                        declared
                    )));
                }
                declared as usize
            }
        };

        if region_len > data.len() {
            return Err(Error::CorruptContainer(format!(
                "region length {} exceeds remaining {} bytes",
                region_len,
                data.len()
            )));
        }

        let (region, trailing) = data.split_at(region_len);
        let mut out = xxtea::decrypt(region, &key);
        out.extend_from_slice(trailing);
        Ok(Cow::Owned(out))
    }

    /// Build a container from plaintext; the inverse of [`StreamCodec::decode`].
    ///
    /// `trailing` is appended in the clear and must be empty for scripts.
    pub fn encode(
        &self,
        kind: PayloadKind,
        key_bytes: [u8; 2],
        plain: &[u8],
        trailing: &[u8],
    ) -> Result<Vec<u8>> {
        if kind == PayloadKind::Script && !trailing.is_empty() {
            return Err(Error::CorruptContainer(
                "script containers cannot carry trailing bytes".to_string(),
            ));
        }

        let key = self.profile.derive_key(key_bytes[0], key_bytes[1])?;
        let region = xxtea::encrypt(plain, &key);

        let mut out = self.profile.signature(kind).to_vec();
        out.extend_from_slice(&key_bytes);
        if kind == PayloadKind::Generic {
            let len = i32::try_from(region.len()).map_err(|_| {
                Error::CorruptContainer(format!("region of {} bytes is too large", region.len()))
            })?;
            out.extend_from_slice(&len.to_be_bytes());
        }
        out.extend_from_slice(&region);
        out.extend_from_slice(trailing);
        Ok(out)
    }

    /// Decode `src` and write the result to `dst`.
    pub fn decode_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let bytes = fs::read(src)?;
        let decoded = self.decode(&bytes)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dst, &decoded)?;
        Ok(())
    }

    /// Decode a file in place. Returns `false` when it was not a container.
    pub fn decode_in_place(&self, path: &Path) -> Result<bool> {
        let bytes = fs::read(path)?;
        match self.decode(&bytes)? {
            Cow::Borrowed(_) => Ok(false),
            Cow::Owned(decoded) => {
                fs::write(path, decoded)?;
                Ok(true)
            }
        }
    }
}

/// Decode a container with the standard profile.
pub fn decode_asset(buffer: &[u8]) -> Result<Cow<'_, [u8]>> {
    StreamCodec::default().decode(buffer)
}
