use crate::config::toml_config::DataSource;
use crate::core::Storage;
use crate::utils::error::Result;
use crate::utils::validation::{validate_relative_path, validate_url};
use reqwest::Client;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub name: String,
    pub destination: String,
    pub bytes: usize,
}

/// Downloads configured datasets into the project tree.
pub struct DatasetFetcher<S: Storage> {
    client: Client,
    storage: S,
}

impl<S: Storage> DatasetFetcher<S> {
    pub fn new(storage: S) -> Self {
        Self {
            client: Client::new(),
            storage,
        }
    }

    pub fn with_timeout(storage: S, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, storage })
    }

    pub async fn fetch(&self, source: &DataSource) -> Result<FetchOutcome> {
        validate_url(&format!("sources.{}.url", source.name), &source.url)?;
        validate_relative_path(&format!("sources.{}.destination", source.name), &source.destination)?;

        tracing::info!("🌐 Downloading {} from {}", source.name, source.url);
        let response = self.client.get(&source.url).send().await?;
        tracing::debug!("Response status: {}", response.status());

        let body = response.error_for_status()?.bytes().await?;
        self.storage.write_file(&source.destination, &body).await?;

        tracing::info!("📁 Saved {} ({} bytes) to {}", source.name, body.len(), source.destination);
        Ok(FetchOutcome {
            name: source.name.clone(),
            destination: source.destination.clone(),
            bytes: body.len(),
        })
    }

    /// Stops at the first failing source.
    pub async fn fetch_all(&self, sources: &[DataSource]) -> Result<Vec<FetchOutcome>> {
        let mut outcomes = Vec::with_capacity(sources.len());
        for source in sources {
            outcomes.push(self.fetch(source).await?);
        }
        Ok(outcomes)
    }
}
