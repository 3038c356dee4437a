use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::FetchError;

pub const COUNTRY_NAME_PARAM: &str = "countryName";

/// Resolves a country name to the locator of its flag image.
#[async_trait]
pub trait FlagFetcher: Send + Sync {
    async fn fetch_flag(&self, country_name: &str) -> Result<String, FetchError>;
}

/// Queries `GET {endpoint}?countryName={name}` and hands back the URL the
/// request finally landed on, so redirecting endpoints resolve to the image.
pub struct HttpFlagFetcher {
    http: Client,
    endpoint: Url,
}

impl HttpFlagFetcher {
    pub fn new(endpoint: &str) -> Result<Self, url::ParseError> {
        Ok(Self::with_client(Client::new(), Url::parse(endpoint)?))
    }

    pub fn with_client(http: Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn request_url(&self, country_name: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair(COUNTRY_NAME_PARAM, country_name);
        url
    }
}

#[async_trait]
impl FlagFetcher for HttpFlagFetcher {
    async fn fetch_flag(&self, country_name: &str) -> Result<String, FetchError> {
        let url = self.request_url(country_name);
        debug!(%url, "fetching flag");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::new(country_name, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                country_name,
                format!("unexpected status {status}"),
            ));
        }

        Ok(response.url().to_string())
    }
}

#[cfg(test)]
#[path = "tests/fetcher_tests.rs"]
mod tests;
