use std::future::Future;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::ServiceOptions;
use crate::error::{Error, Result};
use crate::settings::Credentials;

/// Metadata the service advertises for one edition.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct EditionMetadata {
    pub edition_id: String,
    /// Build date, `YYYY-MM-DD`.
    pub date: String,
    /// Hex MD5 of the uncompressed database file.
    pub md5: String,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    databases: Vec<EditionMetadata>,
}

/// Remote side of an update run.
pub trait DistributionService: Send + Sync + 'static {
    /// Latest metadata for every requested edition, in one exchange.
    /// Editions the service does not know are simply absent.
    fn metadata(
        &self,
        edition_ids: &[String],
    ) -> impl Future<Output = Result<Vec<EditionMetadata>>> + Send;

    /// The gzip-compressed tar archive for one edition.
    fn download(&self, metadata: &EditionMetadata) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// MaxMind update service over HTTPS with basic auth.
#[derive(Clone, Debug)]
pub struct HttpService {
    client: Client,
    host: String,
    account_id: u64,
    license_key: String,
}

impl HttpService {
    pub fn new(credentials: &Credentials, options: &ServiceOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            host: options.host.trim_end_matches('/').to_string(),
            account_id: credentials.account_id,
            license_key: credentials.license_key.clone(),
        })
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .basic_auth(self.account_id, Some(&self.license_key))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Authentication {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(response)
    }
}

impl DistributionService for HttpService {
    async fn metadata(&self, edition_ids: &[String]) -> Result<Vec<EditionMetadata>> {
        let url = format!("{}/geoip/updates/metadata", self.host);
        let query: Vec<(&str, &str)> = edition_ids
            .iter()
            .map(|id| ("edition_id", id.as_str()))
            .collect();
        debug!(url = %url, editions = edition_ids.len(), "requesting metadata");

        let response: MetadataResponse = self.get(&url, &query).await?.json().await?;
        Ok(response.databases)
    }

    async fn download(&self, metadata: &EditionMetadata) -> Result<Vec<u8>> {
        let url = format!(
            "{}/geoip/databases/{}/download",
            self.host, metadata.edition_id
        );
        let date = metadata.date.replace('-', "");
        debug!(url = %url, date = %date, "downloading edition");

        let bytes = self
            .get(&url, &[("date", date.as_str()), ("suffix", "tar.gz")])
            .await?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}
