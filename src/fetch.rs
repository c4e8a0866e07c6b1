//! Network access for trust artifacts.

use crate::error::Error;

/// Fetch raw artifact bytes from an issuer endpoint.
///
/// Implementations must treat any non-success response as an error. The
/// manager bounds every call with its own timeout.
#[async_trait::async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, Error>;
}

/// A fetcher for deployments without network access. Every fetch fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

#[async_trait::async_trait]
impl ArtifactFetcher for OfflineFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, Error> {
        Err(Error::TrustFetch(format!(
            "network access is disabled; cannot fetch {}",
            url
        )))
    }
}

/// Plain HTTP GET fetcher. Redirects are refused.
#[cfg(feature = "fetch")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "fetch")]
impl HttpFetcher {
    pub fn new(timeout: std::time::Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| Error::TrustFetch(e.to_string()))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "fetch")]
#[async_trait::async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, Error> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::TrustFetch(format!("Failed to fetch {}: {}", url, e)))?;

        if resp.status().is_redirection() {
            return Err(Error::TrustFetch(format!(
                "Redirect detected fetching {} (status {}). Redirects are not allowed.",
                url,
                resp.status()
            )));
        }

        if !resp.status().is_success() {
            return Err(Error::TrustFetch(format!(
                "HTTP {} fetching {}",
                resp.status(),
                url
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::TrustFetch(format!("Failed to read body from {}: {}", url, e)))?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_fetcher_fails() {
        let err = OfflineFetcher
            .fetch("https://dgc-trust.qr.gv.at/trustlist")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TrustFetch(_)));
    }

    #[cfg(feature = "fetch")]
    #[test]
    fn test_http_fetcher_builds() {
        assert!(HttpFetcher::new(std::time::Duration::from_secs(5)).is_ok());
    }

    #[cfg(feature = "fetch")]
    #[tokio::test]
    async fn test_http_transport_errors_are_trust_fetch() {
        let fetcher = HttpFetcher::new(std::time::Duration::from_secs(5)).unwrap();
        // Port 9 (discard) is closed on test hosts.
        let err = fetcher.fetch("http://127.0.0.1:9/trustlist").await.unwrap_err();
        assert!(matches!(err, Error::TrustFetch(ref m) if m.contains("127.0.0.1:9")));
    }
}
