//! Segment-match resolver.
//!
//! Turns the noisy ETA feed into a single travel-time sample for one
//! stop-pair: the arrival predicted at the next stop closest after the anchor
//! arrival, inside a plausibility window. Historical first-bus/last-bus
//! extremes, when present, tighten the window over time; the absolute
//! 5 s - 3600 s sanity bounds are never exceeded.

use crate::provider::{EtaEntry, EtaProvider};
use crate::store::{EstimateStore, Shard};
use crate::temporal::{ParseInstantError, parse_instant};
use chrono::{DateTime, FixedOffset};
use thiserror::Error;

pub const MIN_SEGMENT_SECONDS: f64 = 5.0;
pub const MAX_SEGMENT_SECONDS: f64 = 3600.0;

const LANGUAGE: &str = "en";

#[derive(Debug, Error)]
pub enum MatchError {
    /// Feed unavailable, empty, or missing the queried position.
    #[error("no ETA data for the queried position")]
    NoData,
    /// Data present but nothing plausible inside the window.
    #[error("no plausible arrival inside the acceptance window")]
    NoMatch,
    #[error(transparent)]
    Parse(#[from] ParseInstantError),
}

/// A resolved travel-time sample.
#[derive(Debug, Clone, Copy)]
pub struct SegmentMatch {
    pub arrival: DateTime<FixedOffset>,
    pub seconds: f64,
}

/// Lower acceptance bound: historical extremes may raise it, never below the default.
fn min_diff(first: Option<f64>, last: Option<f64>, default: f64) -> f64 {
    match (first, last) {
        (None, None) => default,
        (Some(f), Some(l)) => default.max(f.min(l) * 0.75),
        (Some(only), None) | (None, Some(only)) => default.max(only * 0.75),
    }
}

/// Upper acceptance bound: historical extremes may lower it, never above the default.
fn max_diff(first: Option<f64>, last: Option<f64>, default: f64) -> f64 {
    match (first, last) {
        (None, None) => default,
        (Some(f), Some(l)) => default.min(f.max(l) * 1.25),
        (Some(only), None) | (None, Some(only)) => default.min(only * 1.25),
    }
}

/// Scans entries for the smallest plausible `eta - anchor`, first in feed
/// order on ties. Entries with no arrival or earlier than the anchor are
/// skipped; a malformed timestamp aborts the scan.
fn best_in_window(
    entries: &[EtaEntry],
    anchor: DateTime<FixedOffset>,
    window: (f64, f64),
) -> Result<SegmentMatch, MatchError> {
    let (lo, hi) = window;
    let mut best: Option<SegmentMatch> = None;

    for entry in entries {
        let Some(text) = entry.eta.as_deref() else {
            continue;
        };
        let arrival = parse_instant(text)?;
        if arrival < anchor {
            continue;
        }

        let seconds = (arrival - anchor).num_milliseconds() as f64 / 1000.0;
        if seconds < lo || seconds > hi {
            continue;
        }
        if best.is_none_or(|b| seconds < b.seconds) {
            best = Some(SegmentMatch { arrival, seconds });
        }
    }

    best.ok_or(MatchError::NoMatch)
}

/// Whether the first feed entry carries a live arrival.
fn leads_with_arrival(entries: &[EtaEntry]) -> bool {
    entries.first().is_some_and(|e| e.eta.is_some())
}

/// Resolves the travel time from stop `position` to `position + 1` given the
/// arrival instant observed at `position`.
pub async fn best_match(
    provider: &dyn EtaProvider,
    store: &EstimateStore,
    route_id: &str,
    position: usize,
    stop_a: &str,
    stop_b: &str,
    anchor: DateTime<FixedOffset>,
) -> Result<SegmentMatch, MatchError> {
    let entries = provider
        .etas(route_id, position + 1, LANGUAGE)
        .await
        .map_err(|_| MatchError::NoData)?;
    if entries.is_empty() {
        return Err(MatchError::NoData);
    }

    let first = store.read(Shard::FirstBus, stop_a, stop_b);
    let last = store.read(Shard::LastBus, stop_a, stop_b);
    let window = (
        min_diff(first, last, MIN_SEGMENT_SECONDS),
        max_diff(first, last, MAX_SEGMENT_SECONDS),
    );

    best_in_window(&entries, anchor, window)
}

/// Matches the first vehicle of the day: exactly one live arrival at the next
/// stop and none at the stop after it, so the single candidate is very likely
/// the same vehicle observed at the anchor.
pub async fn first_bus_match(
    provider: &dyn EtaProvider,
    route_id: &str,
    position: usize,
    anchor: DateTime<FixedOffset>,
) -> Result<SegmentMatch, MatchError> {
    let next = provider
        .etas(route_id, position + 1, LANGUAGE)
        .await
        .map_err(|_| MatchError::NoData)?;
    if !leads_with_arrival(&next) {
        return Err(MatchError::NoData);
    }
    if next.len() > 1 && next[1].eta.is_some() {
        return Err(MatchError::NoMatch);
    }

    let one_after = provider
        .etas(route_id, position + 2, LANGUAGE)
        .await
        .unwrap_or_default();
    if leads_with_arrival(&one_after) {
        return Err(MatchError::NoMatch);
    }

    best_in_window(&next[..1], anchor, (MIN_SEGMENT_SECONDS, MAX_SEGMENT_SECONDS))
}

/// Matches the last vehicle of the day: exactly one live arrival at the
/// anchor stop and none at the stop before it.
pub async fn last_bus_match(
    provider: &dyn EtaProvider,
    route_id: &str,
    position: usize,
    anchor: DateTime<FixedOffset>,
) -> Result<SegmentMatch, MatchError> {
    let this = provider
        .etas(route_id, position, LANGUAGE)
        .await
        .map_err(|_| MatchError::NoData)?;
    if !leads_with_arrival(&this) {
        return Err(MatchError::NoData);
    }
    if this.len() > 1 && this[1].eta.is_some() {
        return Err(MatchError::NoMatch);
    }

    let next = provider
        .etas(route_id, position + 1, LANGUAGE)
        .await
        .map_err(|_| MatchError::NoData)?;
    if next.is_empty() {
        return Err(MatchError::NoData);
    }

    // Position 0 has no earlier stop to disqualify on.
    if position > 0 {
        let previous = provider
            .etas(route_id, position - 1, LANGUAGE)
            .await
            .unwrap_or_default();
        if leads_with_arrival(&previous) {
            return Err(MatchError::NoMatch);
        }
    }

    best_in_window(&next, anchor, (MIN_SEGMENT_SECONDS, MAX_SEGMENT_SECONDS))
}
