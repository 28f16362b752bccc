//! Contract for the marketplace client.
//!
//! The HTTP implementation lives outside this crate; the orchestrator only
//! sees [`MarketClient`]. Implementations map their transport errors into
//! [`AutopilotError::Market`](crate::error::AutopilotError::Market).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{BidStatus, MarketBid, MarketJob, TrackedBid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatusFilter {
    Open,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSort {
    BudgetDesc,
    UpdatedDesc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobQuery {
    pub status: Option<JobStatusFilter>,
    pub sort: Option<JobSort>,
    pub limit: usize,
}

impl JobQuery {
    pub fn open_by_budget(limit: usize) -> Self {
        Self {
            status: Some(JobStatusFilter::Open),
            sort: Some(JobSort::BudgetDesc),
            limit,
        }
    }
}

/// `status: None` lists bids in every status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidQuery {
    pub status: Option<BidStatus>,
    pub limit: usize,
}

impl BidQuery {
    pub fn all(limit: usize) -> Self {
        Self {
            status: None,
            limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceBidRequest {
    /// Decimal string produced by [`to_near_amount`].
    pub amount: String,
    pub eta_seconds: u64,
    pub proposal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub deliverable: String,
    pub deliverable_hash: String,
}

#[async_trait]
pub trait MarketClient: Send + Sync {
    async fn list_jobs(&self, query: &JobQuery) -> Result<Vec<MarketJob>>;

    async fn list_job_bids(&self, job_id: &str, query: &BidQuery) -> Result<Vec<MarketBid>>;

    /// Bids placed by this agent.
    async fn list_my_bids(&self, query: &BidQuery) -> Result<Vec<TrackedBid>>;

    async fn get_job(&self, job_id: &str) -> Result<MarketJob>;

    async fn place_bid(&self, job_id: &str, request: &PlaceBidRequest) -> Result<()>;

    async fn withdraw_bid(&self, bid_id: &str) -> Result<()>;

    async fn submit_entry(&self, job_id: &str, request: &SubmissionRequest) -> Result<()>;

    async fn submit_work(&self, job_id: &str, request: &SubmissionRequest) -> Result<()>;

    async fn list_completed_jobs_for_worker(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<MarketJob>>;
}

/// Format an amount with four decimals, then strip trailing zeros and a
/// dangling decimal point: `1.2 → "1.2"`, `1.0 → "1"`.
pub fn to_near_amount(amount: f64) -> String {
    let fixed = format!("{amount:.4}");
    let trimmed = if fixed.contains('.') {
        fixed.trim_end_matches('0').trim_end_matches('.')
    } else {
        fixed.as_str()
    };
    match trimmed {
        "-0" | "" => "0".to_string(),
        s => s.to_string(),
    }
}
