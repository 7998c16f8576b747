//! End-to-end test of one sampling iteration: fake ETA feed in, shard files
//! on disk out.

use anyhow::Result;
use async_trait::async_trait;
use chrono::TimeZone;
use chrono_tz::Asia::Hong_Kong;
use eta_segment_sampler::governor::Governor;
use eta_segment_sampler::provider::{EtaEntry, EtaProvider};
use eta_segment_sampler::reference::{Location, Route, RouteDb, Stop};
use eta_segment_sampler::store::{EstimateStore, Shard};
use eta_segment_sampler::worker::{self, SamplerContext};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct FakeProvider {
    by_position: HashMap<usize, Vec<EtaEntry>>,
}

#[async_trait]
impl EtaProvider for FakeProvider {
    async fn etas(&self, _route: &str, position: usize, _lang: &str) -> Result<Vec<EtaEntry>> {
        Ok(self.by_position.get(&position).cloned().unwrap_or_default())
    }
}

/// One digitless route (so the governor always accepts), one company, two
/// stops. Position 0 anchors at 08:00, position 1 offers arrivals 90 s and
/// 300 s later plus a stale one.
fn fixture_db() -> RouteDb {
    let mut stops = HashMap::new();
    stops.insert(
        "ferry".to_string(),
        vec!["PIER0001".to_string(), "PIER0002".to_string()],
    );

    let route = Route {
        route: "HKI".to_string(),
        co: vec!["ferry".to_string()],
        stops,
    };

    let mut stop_list = HashMap::new();
    stop_list.insert(
        "PIER0001".to_string(),
        Stop {
            location: Location {
                lat: 22.2938,
                lng: 114.1694,
            },
        },
    );
    stop_list.insert(
        "PIER0002".to_string(),
        Stop {
            location: Location {
                lat: 22.2872,
                lng: 114.1610,
            },
        },
    );

    RouteDb {
        routes: vec![("HKI+1+O+I".to_string(), route)],
        stops: stop_list,
        holidays: HashSet::new(),
    }
}

fn fixture_provider() -> FakeProvider {
    let mut by_position = HashMap::new();
    by_position.insert(0, vec![EtaEntry::at("2024-01-02T08:00:00+0800")]);
    by_position.insert(
        1,
        vec![
            EtaEntry::at("2024-01-02T07:55:00+0800"),
            EtaEntry::at("2024-01-02T08:05:00+0800"),
            EtaEntry::at("2024-01-02T08:01:30+0800"),
        ],
    );
    FakeProvider { by_position }
}

fn temp_root(name: &str) -> std::path::PathBuf {
    let root = std::env::temp_dir().join(format!("eta_segment_sampler_it_{name}"));
    let _ = std::fs::remove_dir_all(&root);
    root
}

#[tokio::test]
async fn test_sample_once_writes_both_primary_shards() {
    let root = temp_root("primary");
    let ctx = SamplerContext {
        db: Arc::new(fixture_db()),
        provider: Arc::new(fixture_provider()),
        store: Arc::new(EstimateStore::new(&root)),
        governor: Arc::new(Governor::new()),
    };

    // Tuesday 2024-01-02, 08:00 local
    let now = Hong_Kong.with_ymd_and_hms(2024, 1, 2, 8, 0, 30).unwrap();
    worker::sample_once(&ctx, now).await.unwrap();

    // Best match is the 90 s arrival; the 07:55 entry precedes the anchor
    let all_time = ctx.store.read(Shard::AllTime, "PIER0001", "PIER0002");
    assert_eq!(all_time, Some(90.0));

    let hourly = ctx
        .store
        .read(Shard::Hourly { weekday: 2, hour: 8 }, "PIER0001", "PIER0002");
    assert_eq!(hourly, Some(90.0));

    // Shard files land under prefix "PI"
    assert!(root.join("times/PI.json").exists());
    assert!(root.join("times_hourly/2/8/PI.json").exists());
}

#[tokio::test]
async fn test_repeated_iterations_blend() {
    let root = temp_root("blend");
    let ctx = SamplerContext {
        db: Arc::new(fixture_db()),
        provider: Arc::new(fixture_provider()),
        store: Arc::new(EstimateStore::new(&root)),
        governor: Arc::new(Governor::new()),
    };

    let now = Hong_Kong.with_ymd_and_hms(2024, 1, 2, 8, 0, 30).unwrap();
    worker::sample_once(&ctx, now).await.unwrap();
    worker::sample_once(&ctx, now).await.unwrap();

    // Same sample twice: the moving average stays put
    let stored = ctx
        .store
        .read(Shard::AllTime, "PIER0001", "PIER0002")
        .unwrap();
    assert!((stored - 90.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_sample_once_without_etas_writes_nothing() {
    let root = temp_root("quiet");
    let ctx = SamplerContext {
        db: Arc::new(fixture_db()),
        provider: Arc::new(FakeProvider {
            by_position: HashMap::new(),
        }),
        store: Arc::new(EstimateStore::new(&root)),
        governor: Arc::new(Governor::new()),
    };

    let now = Hong_Kong.with_ymd_and_hms(2024, 1, 2, 8, 0, 30).unwrap();
    worker::sample_once(&ctx, now).await.unwrap();

    assert_eq!(ctx.store.read(Shard::AllTime, "PIER0001", "PIER0002"), None);
    assert!(!root.join("times").exists());
}
