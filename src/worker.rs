//! Sampling worker: one iteration of the estimation loop, and the
//! long-running task wrapper the pool driver spawns.

use crate::geo::distance_km;
use crate::governor::Governor;
use crate::provider::EtaProvider;
use crate::reference::{Route, RouteDb, company_display};
use crate::resolver::{self, MatchError, SegmentMatch};
use crate::store::{EstimateStore, Shard};
use crate::temporal::{self, parse_instant};
use anyhow::{Context, Result};
use chrono::DateTime;
use chrono_tz::Tz;
use rand::Rng;
use rand::seq::IndexedRandom;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Fixed minimum dwell+transit assumption for light-rail segments, seconds.
pub const LIGHT_RAIL_FLOOR_SECONDS: f64 = 120.0;

/// Shared collaborators for the sampling loop.
pub struct SamplerContext {
    pub db: Arc<RouteDb>,
    pub provider: Arc<dyn EtaProvider>,
    pub store: Arc<EstimateStore>,
    pub governor: Arc<Governor>,
}

/// Floors light-rail samples at the fixed minimum; other modes pass through.
pub fn floor_for_mode(route: &Route, seconds: f64) -> f64 {
    if route.is_light_rail() {
        seconds.max(LIGHT_RAIL_FLOOR_SECONDS)
    } else {
        seconds
    }
}

struct PickedSegment<'a> {
    route_id: &'a str,
    route: &'a Route,
    probability: f64,
    company: &'a str,
    position: usize,
    stop_a: &'a str,
    stop_b: &'a str,
}

/// Draws a governor-accepted route and a random adjacent stop-pair on it.
/// Returns `None` when the accepted route has no usable stop sequence.
fn pick_segment<'a>(ctx: &'a SamplerContext, now: DateTime<Tz>) -> Option<PickedSegment<'a>> {
    let mut rng = rand::rng();

    let (route_id, route, probability) = loop {
        let (id, route) = ctx.db.routes.choose(&mut rng)?;
        let decision = ctx.governor.decide(route, now);
        if decision.accepted {
            break (id, route, decision.probability);
        }
    };

    let sequences: Vec<_> = route.stops.iter().collect();
    let &(company, stop_ids) = sequences.choose(&mut rng)?;
    if stop_ids.len() < 2 {
        return None;
    }
    let position = rng.random_range(0..stop_ids.len() - 1);

    Some(PickedSegment {
        route_id,
        route,
        probability,
        company,
        position,
        stop_a: &stop_ids[position],
        stop_b: &stop_ids[position + 1],
    })
}

fn segment_distance_km(ctx: &SamplerContext, stop_a: &str, stop_b: &str) -> Option<f64> {
    let a = ctx.db.stop(stop_a)?.location;
    let b = ctx.db.stop(stop_b)?.location;
    Some(distance_km(a.lat, a.lng, b.lat, b.lng))
}

fn log_sample(
    tag: &str,
    weekday: u32,
    hour: u32,
    picked: &PickedSegment<'_>,
    km: f64,
    seconds: f64,
) {
    info!(
        "[{tag}] WD{weekday} H{hour:02}: {co:<7} {route:<4} [{p:.2}] {a:<16} > {b:<16} {km:>5.2}km {mins:>5.2}mins",
        co = company_display(picked.company),
        route = picked.route.route,
        p = picked.probability,
        a = picked.stop_a,
        b = picked.stop_b,
        mins = seconds / 60.0,
    );
}

/// Persists one matched sample and logs it. `shards` lists every target the
/// sample blends into independently.
fn record_sample(
    ctx: &SamplerContext,
    tag: &str,
    now: DateTime<Tz>,
    picked: &PickedSegment<'_>,
    matched: SegmentMatch,
    shards: &[Shard],
) -> Result<()> {
    let Some(km) = segment_distance_km(ctx, picked.stop_a, picked.stop_b) else {
        return Ok(());
    };
    let seconds = floor_for_mode(picked.route, matched.seconds);

    for &shard in shards {
        ctx.store
            .write(shard, picked.stop_a, picked.stop_b, seconds, km)?;
    }

    let weekday = temporal::weekday_of(now, &ctx.db.holidays);
    let hour = temporal::hour_of(now);
    log_sample(tag, weekday, hour, picked, km, seconds);
    Ok(())
}

/// One sampling iteration. Every disqualification returns `Ok(())` without
/// writing; only unexpected faults surface as errors.
pub async fn sample_once(ctx: &SamplerContext, now: DateTime<Tz>) -> Result<()> {
    let Some(picked) = pick_segment(ctx, now) else {
        return Ok(());
    };

    let anchor_etas = ctx
        .provider
        .etas(picked.route_id, picked.position, "en")
        .await
        .unwrap_or_default();
    let Some(anchor_text) = anchor_etas.first().and_then(|e| e.eta.as_deref()) else {
        return Ok(());
    };
    let anchor = parse_instant(anchor_text)
        .with_context(|| format!("anchor at {} ({})", picked.stop_a, picked.company))?;

    // Quiet-neighbour matches seed the historical window bounds.
    match resolver::first_bus_match(ctx.provider.as_ref(), picked.route_id, picked.position, anchor)
        .await
    {
        Ok(matched) => record_sample(ctx, "F", now, &picked, matched, &[Shard::FirstBus])?,
        Err(MatchError::NoData | MatchError::NoMatch) => {}
        Err(e) => return Err(e).context("first-bus match"),
    }

    match resolver::last_bus_match(ctx.provider.as_ref(), picked.route_id, picked.position, anchor)
        .await
    {
        Ok(matched) => record_sample(ctx, "L", now, &picked, matched, &[Shard::LastBus])?,
        Err(MatchError::NoData | MatchError::NoMatch) => {}
        Err(e) => return Err(e).context("last-bus match"),
    }

    let matched = match resolver::best_match(
        ctx.provider.as_ref(),
        &ctx.store,
        picked.route_id,
        picked.position,
        picked.stop_a,
        picked.stop_b,
        anchor,
    )
    .await
    {
        Ok(matched) => matched,
        Err(MatchError::NoData | MatchError::NoMatch) => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| {
                format!(
                    "resolving {} > {} ({})",
                    picked.stop_a, picked.stop_b, picked.company
                )
            });
        }
    };

    let hourly = Shard::Hourly {
        weekday: temporal::weekday_of(now, &ctx.db.holidays),
        hour: temporal::hour_of(now),
    };
    record_sample(ctx, "R", now, &picked, matched, &[Shard::AllTime, hourly])
}

/// Unbounded sampling loop; a failed iteration is logged and the loop
/// resumes. Exits when the shutdown flag flips.
pub async fn run(ctx: SamplerContext, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = sample_once(&ctx, temporal::hk_now()) => {
                if let Err(e) = result {
                    warn!(error = %format!("{e:#}"), "Sampling iteration failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn route(number: &str, companies: &[&str]) -> Route {
        Route {
            route: number.to_string(),
            co: companies.iter().map(|s| s.to_string()).collect(),
            stops: HashMap::new(),
        }
    }

    #[test]
    fn test_light_rail_floor() {
        let lrt = route("610", &["lightRail"]);
        assert_eq!(floor_for_mode(&lrt, 45.0), 120.0);
        assert_eq!(floor_for_mode(&lrt, 300.0), 300.0);
    }

    #[test]
    fn test_other_modes_not_floored() {
        let bus = route("118", &["kmb"]);
        assert_eq!(floor_for_mode(&bus, 45.0), 45.0);
    }
}
