mod http;

pub use http::HttpEtaProvider;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// One arrival prediction from the upstream feed.
///
/// Entries are ordered by vehicle arrival order; `eta` is null when the slot
/// carries no live prediction (e.g. service not yet running).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EtaEntry {
    pub eta: Option<String>,
}

impl EtaEntry {
    pub fn at(text: &str) -> Self {
        Self {
            eta: Some(text.to_string()),
        }
    }

    pub fn empty() -> Self {
        Self { eta: None }
    }
}

/// Abstraction over the upstream ETA feed.
#[async_trait]
pub trait EtaProvider: Send + Sync {
    /// Returns the ordered predictions for one stop position on a route.
    async fn etas(&self, route_id: &str, position: usize, language: &str)
    -> Result<Vec<EtaEntry>>;
}
