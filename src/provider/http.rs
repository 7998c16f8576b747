use super::{EtaEntry, EtaProvider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// ETA provider backed by the upstream HTTP aggregation endpoint.
pub struct HttpEtaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl HttpEtaProvider {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { base_url, client })
    }
}

#[async_trait]
impl EtaProvider for HttpEtaProvider {
    async fn etas(
        &self,
        route_id: &str,
        position: usize,
        language: &str,
    ) -> Result<Vec<EtaEntry>> {
        let url = format!(
            "{}/etas/{}/{}?language={}",
            self.base_url, route_id, position, language
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch ETAs from {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("ETA request returned status {}", response.status());
        }

        let entries: Vec<EtaEntry> = response
            .json()
            .await
            .context("Failed to decode ETA response")?;

        Ok(entries)
    }
}
