use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coderisk_core::RepoId;

/// identity: (repo, block_a, block_b) with `block_a_id < block_b_id`.
/// §3 CouplingEdge. Only rows meeting the ultra-strict filter of §4.7 are
/// ever constructed through [`CouplingEdge::try_new`] — there is no
/// constructor that skips the filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplingEdge {
    pub repo_id: RepoId,
    pub block_a_id: String,
    pub block_b_id: String,
    pub co_change_count: u32,
    pub co_change_percentage: f64,
    pub first_co_change: DateTime<Utc>,
    pub last_co_change: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
}

/// Ultra-strict filter thresholds (§4.7), all required.
pub const MIN_CO_CHANGE_PERCENTAGE: f64 = 0.95;
pub const MIN_CO_CHANGE_COUNT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    PercentageTooLow,
    CountTooLow,
    NeitherBlockIncidentProne,
}

impl CouplingEdge {
    /// Normalizes `(id_a, id_b)` into ascending order and applies the
    /// ultra-strict filter. Returns the rejection reason rather than
    /// constructing a half-valid edge when any criterion fails.
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        repo_id: RepoId,
        id_a: String,
        id_b: String,
        co_change_count: u32,
        co_change_percentage: f64,
        incident_count_a: u32,
        incident_count_b: u32,
        first_co_change: DateTime<Utc>,
        last_co_change: DateTime<Utc>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Self, RejectReason> {
        if co_change_percentage < MIN_CO_CHANGE_PERCENTAGE {
            return Err(RejectReason::PercentageTooLow);
        }
        if co_change_count < MIN_CO_CHANGE_COUNT {
            return Err(RejectReason::CountTooLow);
        }
        if incident_count_a == 0 || incident_count_b == 0 {
            return Err(RejectReason::NeitherBlockIncidentProne);
        }
        let (block_a_id, block_b_id) = if id_a < id_b { (id_a, id_b) } else { (id_b, id_a) };
        Ok(Self {
            repo_id,
            block_a_id,
            block_b_id,
            co_change_count,
            co_change_percentage,
            first_co_change,
            last_co_change,
            window_start,
            window_end,
            computed_at: Utc::now(),
        })
    }
}

/// `co_change_percentage = co_change_count / max(changes_of_a, changes_of_b)`
/// (§4.7 step 2).
pub fn co_change_percentage(co_change_count: u32, changes_of_a: u32, changes_of_b: u32) -> f64 {
    let denom = changes_of_a.max(changes_of_b);
    if denom == 0 {
        0.0
    } else {
        co_change_count as f64 / denom as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(percentage: f64, count: u32, incidents_a: u32, incidents_b: u32) -> Result<CouplingEdge, RejectReason> {
        let now = Utc::now();
        CouplingEdge::try_new(
            RepoId::from("r"),
            "b".into(),
            "a".into(),
            count,
            percentage,
            incidents_a,
            incidents_b,
            now,
            now,
            now,
            now,
        )
    }

    #[test]
    fn ids_are_normalized_ascending_regardless_of_call_order() {
        let e = edge(0.96, 12, 1, 2).unwrap();
        assert_eq!(e.block_a_id, "a");
        assert_eq!(e.block_b_id, "b");
    }

    #[test]
    fn spec_scenario_6_rejected_when_one_block_not_incident_prone() {
        // co_change_count=12, percentage=0.96, A.incident_count=0, B.incident_count=2
        let result = edge(0.96, 12, 0, 2);
        assert_eq!(result.unwrap_err(), RejectReason::NeitherBlockIncidentProne);
    }

    #[test]
    fn rejects_below_percentage_threshold() {
        assert_eq!(edge(0.94, 50, 1, 1).unwrap_err(), RejectReason::PercentageTooLow);
    }

    #[test]
    fn rejects_below_count_threshold() {
        assert_eq!(edge(0.99, 9, 1, 1).unwrap_err(), RejectReason::CountTooLow);
    }

    #[test]
    fn accepts_edge_meeting_all_three_criteria() {
        assert!(edge(0.95, 10, 1, 1).is_ok());
    }

    #[test]
    fn co_change_percentage_uses_max_of_the_two_totals() {
        assert_eq!(co_change_percentage(8, 10, 16), 0.5);
    }

    #[test]
    fn co_change_percentage_zero_totals_does_not_divide_by_zero() {
        assert_eq!(co_change_percentage(0, 0, 0), 0.0);
    }
}
