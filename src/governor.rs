//! Sampling-rate governor.
//!
//! Decides whether a randomly drawn route is polled this cycle. Night hours
//! are damped heavily except for night routes, and the minibus provider gets
//! a global minimum spacing between queries.

use crate::reference::Route;
use chrono::DateTime;
use chrono_tz::Tz;
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};

/// Sampling probability during the night window for non-night routes.
pub const NIGHT_DAMPING: f64 = 0.01;
const NIGHT_HOURS: std::ops::Range<u32> = 2..5;
/// Minimum wall-clock spacing between any two minibus-provider queries.
pub const MINIBUS_SPACING_SECONDS: i64 = 5;

/// Outcome of one governor roll, with the probability used for logging.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub accepted: bool,
    pub probability: f64,
}

/// Holds the shared last-minibus-query timestamp. Races on the timestamp are
/// tolerated; its only effect is a soft rate limit.
pub struct Governor {
    last_minibus_query: AtomicI64,
}

impl Governor {
    pub fn new() -> Self {
        Self {
            last_minibus_query: AtomicI64::new(0),
        }
    }

    /// Rolls the sampling decision for one route at one instant. The caller
    /// re-draws routes until a roll accepts.
    pub fn decide(&self, route: &Route, now: DateTime<Tz>) -> Decision {
        // Numbers without a digit (peak trams, ferries) bypass every gate.
        if !route.route.chars().any(|c| c.is_ascii_digit()) {
            return Decision {
                accepted: true,
                probability: 1.0,
            };
        }

        let mut probability = base_chance(&route.route, crate::temporal::hour_of(now));

        if route.is_minibus() {
            let now_unix = now.timestamp();
            let last = self.last_minibus_query.load(Ordering::Relaxed);
            if now_unix - last < MINIBUS_SPACING_SECONDS {
                probability = 0.0;
            } else {
                self.last_minibus_query.store(now_unix, Ordering::Relaxed);
            }
        }

        let accepted = if probability <= 0.0 {
            false
        } else if probability >= 1.0 {
            true
        } else {
            rand::rng().random::<f64>() < probability
        };

        Decision {
            accepted,
            probability,
        }
    }
}

impl Default for Governor {
    fn default() -> Self {
        Self::new()
    }
}

/// Base probability from the route number and local hour. Night buses
/// (N prefix, S suffix) are exempt from the night damping.
fn base_chance(route_number: &str, hour: u32) -> f64 {
    if NIGHT_HOURS.contains(&hour)
        && !(route_number.starts_with('N') || route_number.ends_with('S'))
    {
        return NIGHT_DAMPING;
    }
    1.0
}
