use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Assignment id recorded when an executable bid has no assignment yet.
pub const UNKNOWN_ASSIGNMENT: &str = "unknown";

/// Render a timestamp the way every persisted autopilot value does:
/// RFC 3339, millisecond precision, `Z` suffix.
pub fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// MarketJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[default]
    Standard,
    /// Entries are submitted directly instead of proposing a bid.
    Competition,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Standard => "standard",
            JobType::Competition => "competition",
        }
    }
}

/// One of this agent's assignments on a job. `status` is free-form text as
/// reported by the market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: String,
    pub status: String,
}

impl Assignment {
    /// `in_progress` or `submitted`, compared case-insensitively.
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("in_progress")
            || self.status.eq_ignore_ascii_case("submitted")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketJob {
    pub job_id: String,
    #[serde(default)]
    pub job_type: JobType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub budget_amount: f64,
    /// Raw update timestamp; not guaranteed to parse.
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub my_assignments: Vec<Assignment>,
}

impl MarketJob {
    /// Prefer an active assignment, otherwise the first one listed.
    pub fn pick_assignment(&self) -> Option<&Assignment> {
        self.my_assignments
            .iter()
            .find(|a| a.is_active())
            .or_else(|| self.my_assignments.first())
    }

    pub fn updated_at_parsed(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
    }
}

// ---------------------------------------------------------------------------
// Bids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Pending,
    Accepted,
    InProgress,
    Submitted,
    Withdrawn,
    Rejected,
    Completed,
}

impl BidStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BidStatus::Pending => "pending",
            BidStatus::Accepted => "accepted",
            BidStatus::InProgress => "in_progress",
            BidStatus::Submitted => "submitted",
            BidStatus::Withdrawn => "withdrawn",
            BidStatus::Rejected => "rejected",
            BidStatus::Completed => "completed",
        }
    }

    /// Whether a bid in this status is eligible for submission work.
    pub fn is_executable(self) -> bool {
        matches!(
            self,
            BidStatus::Accepted | BidStatus::InProgress | BidStatus::Submitted
        )
    }
}

impl fmt::Display for BidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bid as returned by the per-job bid listing (any bidder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBid {
    pub bid_id: String,
    pub job_id: String,
    #[serde(default)]
    pub bidder_id: Option<String>,
    #[serde(default)]
    pub amount: f64,
    pub status: BidStatus,
}

/// A bid this agent placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedBid {
    pub bid_id: String,
    pub job_id: String,
    pub status: BidStatus,
    #[serde(default)]
    pub amount: f64,
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidAction {
    Skip,
    /// Standard proposal, matched to an assignment later.
    Bid,
    /// Competition entry: the artifact is submitted as the "bid".
    Entry,
}

impl BidAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BidAction::Skip => "skip",
            BidAction::Bid => "bid",
            BidAction::Entry => "entry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidDecision {
    pub job_id: String,
    pub action: BidAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAction {
    Submit,
    Skip,
}

/// What the orchestrator did for one executable bid during a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDecision {
    pub bid: TrackedBid,
    pub assignment_id: String,
    pub action: ExecutionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub job_id: String,
    #[serde(default)]
    pub bid_id: Option<String>,
    pub amount_near: f64,
    pub amount_usd: f64,
    #[serde(default)]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub records: Vec<SettlementRecord>,
    pub total_near: f64,
    pub total_usd: f64,
    pub scanned_jobs: usize,
}

// ---------------------------------------------------------------------------
// TickResult
// ---------------------------------------------------------------------------

/// Audit record of one tick. Never persisted by the orchestrator itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickResult {
    pub tick_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub decisions: Vec<BidDecision>,
    pub execution_decisions: Vec<ExecutionDecision>,
    /// Empty when reconciliation failed; the failure is in `errors`.
    pub settlements: SettlementReport,
    pub errors: Vec<String>,
    pub halted: bool,
}

impl TickResult {
    pub fn submitted_count(&self) -> usize {
        self.execution_decisions
            .iter()
            .filter(|d| d.action == ExecutionAction::Submit)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(statuses: &[&str]) -> MarketJob {
        MarketJob {
            job_id: "job-1".into(),
            job_type: JobType::Standard,
            title: None,
            budget_amount: 1.0,
            updated_at: None,
            my_assignments: statuses
                .iter()
                .enumerate()
                .map(|(i, s)| Assignment {
                    assignment_id: format!("a{i}"),
                    status: s.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn executable_statuses() {
        assert!(BidStatus::Accepted.is_executable());
        assert!(BidStatus::InProgress.is_executable());
        assert!(BidStatus::Submitted.is_executable());
        assert!(!BidStatus::Pending.is_executable());
        assert!(!BidStatus::Withdrawn.is_executable());
        assert!(!BidStatus::Rejected.is_executable());
        assert!(!BidStatus::Completed.is_executable());
    }

    #[test]
    fn pick_assignment_prefers_active_case_insensitive() {
        let job = job_with(&["cancelled", "IN_PROGRESS"]);
        assert_eq!(job.pick_assignment().unwrap().assignment_id, "a1");
    }

    #[test]
    fn pick_assignment_falls_back_to_first() {
        let job = job_with(&["disputed", "cancelled"]);
        assert_eq!(job.pick_assignment().unwrap().assignment_id, "a0");
    }

    #[test]
    fn pick_assignment_none_when_empty() {
        assert!(job_with(&[]).pick_assignment().is_none());
    }

    #[test]
    fn bid_status_serializes_snake_case() {
        let json = serde_json::to_string(&BidStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn updated_at_parsed_ignores_garbage() {
        let mut job = job_with(&[]);
        job.updated_at = Some("yesterday-ish".into());
        assert!(job.updated_at_parsed().is_none());
        job.updated_at = Some("2026-03-01T12:00:00Z".into());
        assert!(job.updated_at_parsed().is_some());
    }

    #[test]
    fn iso_uses_millis_and_z() {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(iso(ts), "2026-03-01T12:00:00.000Z");
    }
}
