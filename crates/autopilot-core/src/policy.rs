//! Decision-making collaborators injected into the orchestrator.
//!
//! The orchestrator sequences market calls and persistence; every judgement
//! call (which jobs to bid on, when to retry a submission, which bids have
//! gone stale, how completed work is priced) is delegated to one of the
//! traits below. Implementations are supplied by the embedding application.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::PolicyConfig;
use crate::error::Result;
use crate::types::{
    Assignment, BidDecision, ExecutionAction, ExecutionDecision, MarketBid, MarketJob,
    SettlementReport, TrackedBid, UNKNOWN_ASSIGNMENT,
};

// ---------------------------------------------------------------------------
// Bidding
// ---------------------------------------------------------------------------

pub struct RankInput<'a> {
    pub jobs: &'a [MarketJob],
    pub bids_by_job_id: &'a HashMap<String, Vec<MarketBid>>,
    pub policy: &'a PolicyConfig,
}

pub trait BiddingPolicy: Send + Sync {
    /// Ordered decisions; the orchestrator acts on them in this order.
    fn rank_jobs_for_bidding(&self, input: &RankInput<'_>) -> Result<Vec<BidDecision>>;
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Retry bookkeeping for one (job, bid) pair. Produced only by
/// [`LifecyclePolicy`] transitions; persisted by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitState {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub succeeded_at: Option<DateTime<Utc>>,
}

pub struct AttemptInput<'a> {
    pub bid: &'a TrackedBid,
    pub now: DateTime<Utc>,
    pub policy: &'a PolicyConfig,
    pub state: Option<&'a SubmitState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionGate {
    pub should_attempt: bool,
    pub reason: Option<String>,
    pub next_state: SubmitState,
}

pub struct FailureInput<'a> {
    pub state: SubmitState,
    pub now: DateTime<Utc>,
    pub policy: &'a PolicyConfig,
    pub error: &'a str,
}

pub struct StaleBidInput<'a> {
    pub tracked_bids: &'a [TrackedBid],
    pub now: DateTime<Utc>,
    pub bid_marker_by_job_id: &'a HashMap<String, String>,
    pub policy: &'a PolicyConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerUpdate {
    pub job_id: String,
    pub marker: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WithdrawalPlan {
    pub to_withdraw: Vec<TrackedBid>,
    pub marker_updates: Vec<MarkerUpdate>,
}

pub trait LifecyclePolicy: Send + Sync {
    fn next_submission_attempt(&self, input: &AttemptInput<'_>) -> Result<SubmissionGate>;

    fn mark_submission_succeeded(&self, state: SubmitState, now: DateTime<Utc>) -> SubmitState;

    /// Must schedule the next attempt in the state it returns.
    fn apply_submission_failure(&self, input: FailureInput<'_>) -> SubmitState;

    fn plan_stale_bid_withdrawals(&self, input: &StaleBidInput<'_>) -> Result<WithdrawalPlan>;

    fn to_execution_decision(
        &self,
        bid: &TrackedBid,
        assignment_id: Option<&str>,
        action: ExecutionAction,
        reason: Option<String>,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> ExecutionDecision {
        ExecutionDecision {
            bid: bid.clone(),
            assignment_id: assignment_id.unwrap_or(UNKNOWN_ASSIGNMENT).to_string(),
            action,
            reason,
            next_attempt_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

pub struct SettlementInput<'a> {
    pub jobs: &'a [MarketJob],
    pub bids_by_job_id: &'a HashMap<String, Vec<MarketBid>>,
    pub agent_id: &'a str,
    pub near_price_usd: f64,
}

pub trait SettlementBuilder: Send + Sync {
    fn build_settlement_report(&self, input: &SettlementInput<'_>) -> Result<SettlementReport>;
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub deliverable_url: String,
    pub artifact_hash: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Produces the deliverable for an assignment. `Ok(None)` means "nothing to
/// submit yet" and is not a failure.
#[async_trait]
pub trait ArtifactProvider: Send + Sync {
    async fn provide(
        &self,
        job: &MarketJob,
        bid: &TrackedBid,
        assignment: &Assignment,
    ) -> Result<Option<Artifact>>;
}
