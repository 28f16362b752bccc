use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::try_join_all;

use crate::error::Result;
use crate::market::{BidQuery, MarketClient};
use crate::types::MarketBid;

/// List bids for every job with at most `concurrency` requests in flight.
///
/// A fixed set of workers pulls the next index from a shared counter, so the
/// number of futures never grows with the job list. Each result is paired
/// with its job id by the worker that fetched it. The first failure cancels
/// the remaining fetches.
pub(crate) async fn bids_by_job(
    market: &dyn MarketClient,
    job_ids: &[String],
    limit: usize,
    concurrency: usize,
) -> Result<HashMap<String, Vec<MarketBid>>> {
    let workers = concurrency.max(1).min(job_ids.len());
    if workers == 0 {
        return Ok(HashMap::new());
    }

    let next = AtomicUsize::new(0);
    let query = BidQuery::all(limit);
    let (next, query) = (&next, &query);

    let worker = || async move {
        let mut fetched = Vec::new();
        loop {
            let i = next.fetch_add(1, Ordering::Relaxed);
            let Some(job_id) = job_ids.get(i) else {
                break;
            };
            let bids = market.list_job_bids(job_id, query).await?;
            fetched.push((job_id.clone(), bids));
        }
        Ok::<_, crate::error::AutopilotError>(fetched)
    };

    let batches = try_join_all((0..workers).map(|_| worker())).await?;
    Ok(batches.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AutopilotError;
    use crate::market::{JobQuery, PlaceBidRequest, SubmissionRequest};
    use crate::types::{BidStatus, MarketJob, TrackedBid};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct SlowBids {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketClient for SlowBids {
        async fn list_jobs(&self, _q: &JobQuery) -> Result<Vec<MarketJob>> {
            Ok(vec![])
        }

        async fn list_job_bids(&self, job_id: &str, _q: &BidQuery) -> Result<Vec<MarketBid>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if job_id == "fail" {
                return Err(AutopilotError::Market("bids unavailable".into()));
            }
            Ok(vec![MarketBid {
                bid_id: format!("bid-{job_id}"),
                job_id: job_id.to_string(),
                bidder_id: None,
                amount: 1.0,
                status: BidStatus::Pending,
            }])
        }

        async fn list_my_bids(&self, _q: &BidQuery) -> Result<Vec<TrackedBid>> {
            Ok(vec![])
        }

        async fn get_job(&self, job_id: &str) -> Result<MarketJob> {
            Err(AutopilotError::Market(format!("no job {job_id}")))
        }

        async fn place_bid(&self, _job_id: &str, _r: &PlaceBidRequest) -> Result<()> {
            Ok(())
        }

        async fn withdraw_bid(&self, _bid_id: &str) -> Result<()> {
            Ok(())
        }

        async fn submit_entry(&self, _job_id: &str, _r: &SubmissionRequest) -> Result<()> {
            Ok(())
        }

        async fn submit_work(&self, _job_id: &str, _r: &SubmissionRequest) -> Result<()> {
            Ok(())
        }

        async fn list_completed_jobs_for_worker(
            &self,
            _agent_id: &str,
            _limit: usize,
        ) -> Result<Vec<MarketJob>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn pairs_each_result_with_its_job() {
        let market = SlowBids::default();
        let ids: Vec<String> = (0..25).map(|i| format!("job-{i}")).collect();
        let map = bids_by_job(&market, &ids, 100, 10).await.unwrap();
        assert_eq!(map.len(), 25);
        for id in &ids {
            assert_eq!(map[id][0].bid_id, format!("bid-{id}"));
        }
        assert_eq!(market.calls.load(Ordering::SeqCst), 25);
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_bound() {
        let market = SlowBids::default();
        let ids: Vec<String> = (0..40).map(|i| format!("job-{i}")).collect();
        bids_by_job(&market, &ids, 100, 10).await.unwrap();
        assert!(market.peak.load(Ordering::SeqCst) <= 10);
    }

    #[tokio::test]
    async fn empty_job_list_makes_no_calls() {
        let market = SlowBids::default();
        let map = bids_by_job(&market, &[], 100, 10).await.unwrap();
        assert!(map.is_empty());
        assert_eq!(market.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_propagates() {
        let market = SlowBids::default();
        let ids = vec!["a".to_string(), "fail".to_string(), "b".to_string()];
        let err = bids_by_job(&market, &ids, 100, 2).await.unwrap_err();
        assert!(matches!(err, AutopilotError::Market(_)));
    }
}
