use tracing::debug;

use super::{fanout, Autopilot, FETCH_CONCURRENCY, JOB_BID_LIMIT};
use crate::error::Result;
use crate::policy::SettlementInput;
use crate::types::{iso, SettlementReport};

impl Autopilot {
    /// Build a settlement report over this agent's completed jobs and advance
    /// the persisted settlement cursor to the newest parseable update time.
    pub async fn reconcile_settlements(
        &self,
        limit: usize,
        near_price_usd: f64,
    ) -> Result<SettlementReport> {
        let jobs = self
            .market
            .list_completed_jobs_for_worker(&self.agent_id, limit)
            .await?;
        let job_ids: Vec<String> = jobs.iter().map(|j| j.job_id.clone()).collect();
        let bids_by_job_id =
            fanout::bids_by_job(self.market.as_ref(), &job_ids, JOB_BID_LIMIT, FETCH_CONCURRENCY)
                .await?;

        let report = self.settlement.build_settlement_report(&SettlementInput {
            jobs: &jobs,
            bids_by_job_id: &bids_by_job_id,
            agent_id: &self.agent_id,
            near_price_usd,
        })?;

        if let Some(latest) = jobs.iter().filter_map(|j| j.updated_at_parsed()).max() {
            self.store.set_settlement_cursor(&iso(latest)).await?;
        }
        debug!(
            jobs = jobs.len(),
            records = report.records.len(),
            "settlement reconciled"
        );
        Ok(report)
    }
}
