//! Rolling-window helpers shared by ingestion and risk-assessment.
//!
//! CodeRisk never retains data beyond a 90-day rolling window unless it has
//! been explicitly materialized (coupling edges, which use their own
//! 12-month window). These helpers centralize the arithmetic so every
//! caller agrees on what "within N days" means at a boundary.

use chrono::{DateTime, Duration, Utc};

pub const RETENTION_DAYS: i64 = 90;
pub const COUPLING_WINDOW_MONTHS_AS_DAYS: i64 = 365;

/// The earliest instant still inside the 90-day retention window, relative
/// to `now`. Issues/PRs/ownership-churn queries use this as their cutoff.
pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(RETENTION_DAYS)
}

/// An issue/PR is kept iff it is still open, or was closed within the
/// 90-day retention window (§3 Issue / PullRequest).
pub fn within_retention(closed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match closed_at {
        None => true,
        Some(closed) => closed >= retention_cutoff(now),
    }
}

/// Start of the 12-month rolling window the coupling synthesizer aggregates
/// co-change counts over, ending at `now`.
pub fn coupling_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(COUPLING_WINDOW_MONTHS_AS_DAYS)
}

/// The dynamic recency multiplier applied to a coupling score at query time
/// (§4.7): 1.5 within 90 days of the more recent incident, 1.0 within 180
/// days, else 0.5. `last_incident` is the later of the two endpoints'
/// `last_incident_date`.
pub fn recency_multiplier(last_incident: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(last) = last_incident else {
        return 0.5;
    };
    let age = now - last;
    if age <= Duration::days(90) {
        1.5
    } else if age <= Duration::days(180) {
        1.0
    } else {
        0.5
    }
}
