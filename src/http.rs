//! HTTP client abstraction for whole-tile downloads
//!
//! Elevation tiles and land-cover files are fetched with plain GETs. A 404 is
//! an answer, not a failure: the tile simply does not exist upstream.

use reqwest::StatusCode;
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::{GeoDataError, Result};

/// Fetches complete objects by URL.
///
/// Abstracted so sources can be exercised without a network.
pub trait TileFetcher: Send + Sync {
    /// `Ok(None)` when the server reports the object does not exist.
    fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>>;
}

/// Blocking `reqwest` client with the configured timeouts and User-Agent.
pub fn build_client(http: &HttpConfig) -> Result<reqwest::blocking::Client> {
    let http = http.clamped();
    Ok(reqwest::blocking::Client::builder()
        .connect_timeout(http.connect_timeout)
        .timeout(http.read_timeout)
        .user_agent(http.user_agent)
        .build()?)
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(http)?,
        })
    }

    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl TileFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let response = self.client.get(url).send()?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.bytes()?.to_vec())),
            StatusCode::NOT_FOUND => {
                debug!(url, "tile does not exist upstream");
                Ok(None)
            }
            status => Err(GeoDataError::Http {
                status: status.as_u16(),
            }),
        }
    }
}

/// Substitutes `{key}` placeholders in a URL template.
#[must_use]
pub fn expand_template(template: &str, replacements: &[(&str, &str)]) -> String {
    let mut url = template.to_string();
    for (key, value) in replacements {
        url = url.replace(&format!("{{{key}}}"), value);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{TestServer, loopback_client};

    #[test]
    fn test_expand_template() {
        let url = expand_template(
            "https://tiles.example/{z}/{x}/{y}.png",
            &[("z", "3"), ("x", "4"), ("y", "5")],
        );
        assert_eq!(url, "https://tiles.example/3/4/5.png");

        let url = expand_template("https://files.example/{tile}_Map.tif", &[("tile", "N03E006")]);
        assert_eq!(url, "https://files.example/N03E006_Map.tif");
    }

    #[test]
    fn test_fetch_status_handling() {
        let server = TestServer::serve(vec![
            (200, b"tile bytes".to_vec()),
            (404, b"no such tile".to_vec()),
            (500, Vec::new()),
        ]);
        let fetcher = HttpFetcher::with_client(loopback_client());

        assert_eq!(fetcher.fetch(&server.url).unwrap(), Some(b"tile bytes".to_vec()));
        assert_eq!(fetcher.fetch(&server.url).unwrap(), None);
        assert!(matches!(
            fetcher.fetch(&server.url),
            Err(GeoDataError::Http { status: 500 })
        ));
        assert_eq!(server.finish().len(), 3);
    }

    #[test]
    fn test_client_builds_with_defaults() {
        assert!(build_client(&HttpConfig::default()).is_ok());
    }
}
