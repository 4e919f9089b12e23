//! Blocking HTTP access to the version service and the CDN.

use crate::Result;
use std::time::Duration;

/// Minimal HTTP surface the synchronizer needs.
pub trait HttpTransport: Sync {
    /// POST with the given headers and query parameters; returns the body.
    fn post(&self, url: &str, headers: &[(&str, &str)], params: &[(&str, &str)])
        -> Result<Vec<u8>>;

    /// GET a file.
    fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`HttpTransport`] over a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        params: &[(&str, &str)],
    ) -> Result<Vec<u8>> {
        let mut request = self.client.post(url).query(params);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send()?;
        log::debug!("POST {} -> {}", url, response.status());
        Ok(response.bytes()?.to_vec())
    }

    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send()?.error_for_status()?;
        log::debug!("GET {} -> {}", url, response.status());
        Ok(response.bytes()?.to_vec())
    }
}

/// Join a CDN base and a file path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://cdn/", "/a/b.zip"), "http://cdn/a/b.zip");
        assert_eq!(join_url("http://cdn", "a/b.zip"), "http://cdn/a/b.zip");
    }
}
