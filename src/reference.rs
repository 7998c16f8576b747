//! Static route/stop reference data.
//!
//! Loaded once at startup from the upstream database document and read-only
//! for the rest of the process lifetime.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::warn;

/// Company tag for the green-minibus operator, which is rate limited upstream.
pub const MINIBUS_TAG: &str = "gmb";
/// Company tag for light-rail services, which carry a minimum segment time.
pub const LIGHT_RAIL_TAG: &str = "lightRail";

/// One route as described by the reference database.
#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    /// Display number, e.g. `N122` or `6X`.
    pub route: String,
    /// Operating company tags, e.g. `["kmb", "ctb"]`.
    pub co: Vec<String>,
    /// Ordered stop-identifier sequence per operating company.
    #[serde(default)]
    pub stops: HashMap<String, Vec<String>>,
}

impl Route {
    pub fn is_minibus(&self) -> bool {
        self.co.iter().any(|tag| tag == MINIBUS_TAG)
    }

    pub fn is_light_rail(&self) -> bool {
        self.co.iter().any(|tag| tag == LIGHT_RAIL_TAG)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Stop {
    pub location: Location,
}

/// Uppercased company code for log lines, with two readability aliases.
pub fn company_display(tag: &str) -> String {
    if tag.eq_ignore_ascii_case("lightrail") {
        "LRT".to_string()
    } else if tag.eq_ignore_ascii_case("lrtfeeder") {
        "MTR-BUS".to_string()
    } else {
        tag.to_uppercase()
    }
}

/// In-memory reference data: routes, stop coordinates, holiday calendar.
pub struct RouteDb {
    /// Indexable for uniform random selection.
    pub routes: Vec<(String, Route)>,
    pub stops: HashMap<String, Stop>,
    pub holidays: HashSet<NaiveDate>,
}

impl RouteDb {
    pub fn stop(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.get(stop_id)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DbDocument {
    route_list: HashMap<String, Route>,
    stop_list: HashMap<String, Stop>,
    #[serde(default)]
    holidays: Vec<String>,
}

impl From<DbDocument> for RouteDb {
    fn from(doc: DbDocument) -> Self {
        let holidays = doc
            .holidays
            .iter()
            .filter_map(|s| match NaiveDate::parse_from_str(s, "%Y%m%d") {
                Ok(date) => Some(date),
                Err(_) => {
                    warn!(date = %s, "Skipping unparseable holiday entry");
                    None
                }
            })
            .collect();

        RouteDb {
            routes: doc.route_list.into_iter().collect(),
            stops: doc.stop_list,
            holidays,
        }
    }
}

/// Fetches and decodes the combined route/stop/holiday document.
pub async fn load(base_url: &str) -> Result<RouteDb> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let url = format!("{base_url}/routeFeDb.json");
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch reference data from {url}"))?;

    if !response.status().is_success() {
        anyhow::bail!("Reference data request returned status {}", response.status());
    }

    let doc: DbDocument = response
        .json()
        .await
        .context("Failed to decode reference data document")?;

    Ok(doc.into())
}
