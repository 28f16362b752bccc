use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{
    fanout, Autopilot, DISCOVERY_JOB_LIMIT, FETCH_CONCURRENCY, JOB_BID_LIMIT, TRACKED_BID_LIMIT,
};
use crate::error::{AutopilotError, Result};
use crate::manifest::{commitment_of, DeliverableManifest, SignedDeliverableManifest};
use crate::market::{to_near_amount, BidQuery, JobQuery, PlaceBidRequest, SubmissionRequest};
use crate::policy::{Artifact, AttemptInput, FailureInput, RankInput, StaleBidInput, SubmitState};
use crate::telemetry::EventType;
use crate::types::{
    iso, Assignment, BidAction, BidDecision, BidStatus, ExecutionAction, ExecutionDecision,
    JobType, MarketBid, MarketJob, SettlementReport, TickResult, TrackedBid,
};

/// Why a phase stopped early.
enum Abort {
    /// A per-item failure was already written to `errors` and the policy is
    /// fail-closed.
    Halted,
    /// Anything else; recorded as `tick:<message>` at the outer boundary.
    Failed(AutopilotError),
}

impl From<AutopilotError> for Abort {
    fn from(e: AutopilotError) -> Self {
        Abort::Failed(e)
    }
}

type Phase = std::result::Result<(), Abort>;

/// Mutable record of the tick in progress.
struct TickRecord {
    tick_id: String,
    started_at: DateTime<Utc>,
    decisions: Vec<BidDecision>,
    executions: Vec<ExecutionDecision>,
    errors: Vec<String>,
    halted: bool,
}

/// Result of preparing and sending one submission.
enum SubmitOutcome {
    Submitted {
        assignment_id: String,
        deliverable_hash: String,
        signed: Option<SignedDeliverableManifest>,
    },
    Skipped {
        assignment_id: Option<String>,
        reason: &'static str,
    },
}

impl Autopilot {
    /// Run one full tick. Never fails: errors are collected on the result.
    pub async fn run_tick(&self) -> TickResult {
        let started_at = Utc::now();
        let mut tick = TickRecord {
            tick_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            decisions: Vec::new(),
            executions: Vec::new(),
            errors: Vec::new(),
            halted: false,
        };
        info!(tick_id = %tick.tick_id, "tick started");

        if let Err(abort) = self.run_phases(&mut tick).await {
            let message = match abort {
                Abort::Halted => tick.errors.last().cloned().unwrap_or_default(),
                Abort::Failed(e) => {
                    let message = format!("tick:{e}");
                    tick.errors.push(message.clone());
                    message
                }
            };
            warn!(tick_id = %tick.tick_id, error = %message, "tick aborted");
            self.emit(
                EventType::TickError,
                json!({ "tickId": tick.tick_id, "stage": "tick", "error": message }),
            );
            if self.policy.fail_closed {
                tick.halted = true;
            }
        }

        let (limit, price) = (
            self.settlement_config.limit,
            self.settlement_config.near_price_usd,
        );
        let settlements = match self.reconcile_settlements(limit, price).await {
            Ok(report) => {
                self.emit(
                    EventType::SettlementReconciled,
                    json!({
                        "tickId": tick.tick_id,
                        "records": report.records.len(),
                        "totalNear": report.total_near,
                        "totalUsd": report.total_usd,
                        "scannedJobs": report.scanned_jobs,
                    }),
                );
                report
            }
            Err(e) => {
                let message = format!("settlement:{e}");
                warn!(tick_id = %tick.tick_id, error = %message, "settlement failed");
                tick.errors.push(message.clone());
                self.emit(
                    EventType::TickError,
                    json!({ "tickId": tick.tick_id, "stage": "settlement", "error": message }),
                );
                if self.policy.fail_closed {
                    tick.halted = true;
                }
                SettlementReport::default()
            }
        };

        let result = TickResult {
            tick_id: tick.tick_id,
            started_at,
            completed_at: Utc::now(),
            decisions: tick.decisions,
            execution_decisions: tick.executions,
            settlements,
            errors: tick.errors,
            halted: tick.halted,
        };
        self.emit(
            EventType::TickCompleted,
            json!({
                "tickId": result.tick_id,
                "decisions": result.decisions.len(),
                "submitted": result.submitted_count(),
                "errors": result.errors.len(),
                "halted": result.halted,
            }),
        );
        info!(
            tick_id = %result.tick_id,
            decisions = result.decisions.len(),
            submitted = result.submitted_count(),
            errors = result.errors.len(),
            halted = result.halted,
            "tick completed"
        );
        result
    }

    async fn run_phases(&self, tick: &mut TickRecord) -> Phase {
        let jobs = self
            .market
            .list_jobs(&JobQuery::open_by_budget(DISCOVERY_JOB_LIMIT))
            .await?;
        let job_ids: Vec<String> = jobs.iter().map(|j| j.job_id.clone()).collect();
        let bids_by_job_id =
            fanout::bids_by_job(self.market.as_ref(), &job_ids, JOB_BID_LIMIT, FETCH_CONCURRENCY)
                .await?;
        debug!(jobs = jobs.len(), "discovery complete");

        self.bidding_phase(tick, &jobs, &bids_by_job_id).await?;

        let tracked = self
            .market
            .list_my_bids(&BidQuery::all(TRACKED_BID_LIMIT))
            .await?;
        let markers: HashMap<String, String> =
            self.store.bid_markers().await?.into_iter().collect();

        self.withdrawal_phase(tick, &tracked, &markers).await?;
        self.submission_phase(tick, &tracked).await
    }

    /// Record the failure; under fail-closed, halt the tick.
    fn item_failed(&self, tick: &mut TickRecord, message: String) -> Phase {
        warn!(tick_id = %tick.tick_id, error = %message, "item failed");
        tick.errors.push(message);
        if self.policy.fail_closed {
            tick.halted = true;
            return Err(Abort::Halted);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bidding
    // -----------------------------------------------------------------------

    async fn bidding_phase(
        &self,
        tick: &mut TickRecord,
        jobs: &[MarketJob],
        bids_by_job_id: &HashMap<String, Vec<MarketBid>>,
    ) -> Phase {
        let decisions = self.bidding.rank_jobs_for_bidding(&RankInput {
            jobs,
            bids_by_job_id,
            policy: &self.policy,
        })?;

        for decision in &decisions {
            tick.decisions.push(decision.clone());
            self.emit(
                EventType::BidDecision,
                json!({
                    "tickId": tick.tick_id,
                    "jobId": decision.job_id,
                    "action": decision.action.as_str(),
                    "amount": decision.amount,
                }),
            );
        }

        let jobs_by_id: HashMap<&str, &MarketJob> =
            jobs.iter().map(|j| (j.job_id.as_str(), j)).collect();

        for decision in &decisions {
            let job = jobs_by_id.get(decision.job_id.as_str()).copied();
            let acted = self.act_on_decision(tick, decision, job).await;
            if let Err(e) = acted {
                self.item_failed(tick, format!("bid:{}:{e}", decision.job_id))?;
            }
        }
        Ok(())
    }

    async fn act_on_decision(
        &self,
        tick: &TickRecord,
        decision: &BidDecision,
        job: Option<&MarketJob>,
    ) -> Result<()> {
        let amount = match (decision.action, decision.amount) {
            (BidAction::Skip, _) | (_, None) => return Ok(()),
            (_, Some(amount)) => amount,
        };

        if let Some(at) = self.store.bid_marker(&decision.job_id).await? {
            debug!(job_id = %decision.job_id, marker = %at, "already bid, skipping");
            return Ok(());
        }

        let placed = match decision.action {
            BidAction::Entry => self.submit_entry(tick, &decision.job_id, job, amount).await?,
            _ => {
                self.place_bid(tick, &decision.job_id, job, amount).await?;
                true
            }
        };
        if !placed {
            return Ok(());
        }

        self.store
            .set_bid_marker(&decision.job_id, &iso(tick.started_at))
            .await?;
        self.emit(
            EventType::BidSubmitted,
            json!({
                "tickId": tick.tick_id,
                "jobId": decision.job_id,
                "action": decision.action.as_str(),
                "amount": to_near_amount(amount),
            }),
        );
        Ok(())
    }

    async fn place_bid(
        &self,
        tick: &TickRecord,
        job_id: &str,
        job: Option<&MarketJob>,
        amount: f64,
    ) -> Result<()> {
        let request = PlaceBidRequest {
            amount: to_near_amount(amount),
            eta_seconds: self.policy.bid_eta_seconds,
            proposal: proposal_text(job_id, job, amount, self.policy.bid_eta_seconds),
        };
        self.market.place_bid(job_id, &request).await?;
        info!(job_id, amount = %request.amount, "bid placed");
        self.emit(
            EventType::BidPlaced,
            json!({ "tickId": tick.tick_id, "jobId": job_id, "amount": request.amount }),
        );
        Ok(())
    }

    /// Competition entry. Returns `false` when there is nothing to enter yet.
    async fn submit_entry(
        &self,
        tick: &TickRecord,
        job_id: &str,
        job: Option<&MarketJob>,
        amount: f64,
    ) -> Result<bool> {
        let (Some(provider), Some(job)) = (self.artifacts.as_ref(), job) else {
            debug!(job_id, "no artifact provider or job, skipping entry");
            return Ok(false);
        };

        let entry_id = format!("entry-{job_id}");
        let bid = TrackedBid {
            bid_id: entry_id.clone(),
            job_id: job_id.to_string(),
            status: BidStatus::InProgress,
            amount,
        };
        let assignment = Assignment {
            assignment_id: entry_id,
            status: "in_progress".to_string(),
        };

        let Some(artifact) = provider.provide(job, &bid, &assignment).await? else {
            debug!(job_id, "artifact not ready, skipping entry");
            return Ok(false);
        };

        let manifest = self.build_manifest(&bid, &assignment.assignment_id, artifact);
        let (deliverable_hash, signed) = self.commit(&manifest)?;
        let request = SubmissionRequest {
            deliverable: manifest.deliverable_url.clone(),
            deliverable_hash: deliverable_hash.clone(),
        };
        self.market.submit_entry(job_id, &request).await?;

        if let Some(signed) = &signed {
            self.emit(
                EventType::DeliverableSigned,
                json!({
                    "tickId": tick.tick_id,
                    "jobId": job_id,
                    "bidId": bid.bid_id,
                    "manifestHash": signed.manifest_hash,
                    "signerId": signed.signature.signer_id,
                    "deliverableHash": deliverable_hash,
                }),
            );
        }
        self.emit(
            EventType::EntrySubmitted,
            json!({ "tickId": tick.tick_id, "jobId": job_id, "deliverableHash": deliverable_hash }),
        );
        info!(job_id, "competition entry submitted");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Withdrawal
    // -----------------------------------------------------------------------

    async fn withdrawal_phase(
        &self,
        tick: &mut TickRecord,
        tracked: &[TrackedBid],
        markers: &HashMap<String, String>,
    ) -> Phase {
        let plan = self.lifecycle.plan_stale_bid_withdrawals(&StaleBidInput {
            tracked_bids: tracked,
            now: tick.started_at,
            bid_marker_by_job_id: markers,
            policy: &self.policy,
        })?;

        for update in &plan.marker_updates {
            self.store.set_bid_marker(&update.job_id, &update.marker).await?;
        }

        for bid in &plan.to_withdraw {
            let withdrawn = self.withdraw(tick, bid).await;
            if let Err(e) = withdrawn {
                self.item_failed(tick, format!("withdraw:{}:{e}", bid.bid_id))?;
            }
        }
        Ok(())
    }

    async fn withdraw(&self, tick: &TickRecord, bid: &TrackedBid) -> Result<()> {
        self.market.withdraw_bid(&bid.bid_id).await?;
        let now = iso(Utc::now());
        self.store.mark_bid_withdrawn(&bid.bid_id, &now).await?;
        self.store.clear_bid_marker(&bid.job_id).await?;
        info!(bid_id = %bid.bid_id, job_id = %bid.job_id, "stale bid withdrawn");
        self.emit(
            EventType::BidWithdrawn,
            json!({ "tickId": tick.tick_id, "bidId": bid.bid_id, "jobId": bid.job_id }),
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    async fn submission_phase(&self, tick: &mut TickRecord, tracked: &[TrackedBid]) -> Phase {
        let mut jobs: HashMap<String, MarketJob> = HashMap::new();

        for bid in tracked.iter().filter(|b| b.status.is_executable()) {
            let now = Utc::now();
            let prior = self.store.submit_state(&bid.job_id, &bid.bid_id).await?;
            let gate = self.lifecycle.next_submission_attempt(&AttemptInput {
                bid,
                now,
                policy: &self.policy,
                state: prior.as_ref(),
            })?;

            if !gate.should_attempt {
                if prior.is_some() {
                    self.store
                        .set_submit_state(&bid.job_id, &bid.bid_id, &gate.next_state)
                        .await?;
                }
                let next_attempt_at = gate.next_state.next_attempt_at;
                tick.executions.push(self.lifecycle.to_execution_decision(
                    bid,
                    None,
                    ExecutionAction::Skip,
                    gate.reason,
                    next_attempt_at,
                ));
                continue;
            }

            let mut assignment_id = None;
            let outcome = self.try_submit(bid, &mut jobs, &mut assignment_id).await;
            self.record_submission(tick, bid, gate.next_state, assignment_id, outcome)
                .await?;
        }
        Ok(())
    }

    /// Resolve job and assignment, obtain the artifact, commit, and submit.
    /// `assignment_id` is filled in as soon as it is known so a later
    /// failure can still report it.
    async fn try_submit(
        &self,
        bid: &TrackedBid,
        jobs: &mut HashMap<String, MarketJob>,
        assignment_id: &mut Option<String>,
    ) -> Result<SubmitOutcome> {
        if !jobs.contains_key(&bid.job_id) {
            let job = self.market.get_job(&bid.job_id).await?;
            jobs.insert(bid.job_id.clone(), job);
        }
        let Some(job) = jobs.get(&bid.job_id) else {
            return Err(AutopilotError::Market(format!("job {} not resolved", bid.job_id)));
        };

        let Some(assignment) = job.pick_assignment() else {
            return Ok(SubmitOutcome::Skipped {
                assignment_id: None,
                reason: "missing_assignment",
            });
        };
        *assignment_id = Some(assignment.assignment_id.clone());

        let Some(provider) = self.artifacts.as_ref() else {
            return Ok(SubmitOutcome::Skipped {
                assignment_id: assignment_id.clone(),
                reason: "artifact_provider_missing",
            });
        };
        let Some(artifact) = provider.provide(job, bid, assignment).await? else {
            return Ok(SubmitOutcome::Skipped {
                assignment_id: assignment_id.clone(),
                reason: "artifact_provider_returned_null",
            });
        };

        let manifest = self.build_manifest(bid, &assignment.assignment_id, artifact);
        let (deliverable_hash, signed) = self.commit(&manifest)?;
        let request = SubmissionRequest {
            deliverable: manifest.deliverable_url.clone(),
            deliverable_hash: deliverable_hash.clone(),
        };
        match job.job_type {
            JobType::Competition => self.market.submit_entry(&bid.job_id, &request).await?,
            JobType::Standard => self.market.submit_work(&bid.job_id, &request).await?,
        }

        Ok(SubmitOutcome::Submitted {
            assignment_id: assignment.assignment_id.clone(),
            deliverable_hash,
            signed,
        })
    }

    async fn record_submission(
        &self,
        tick: &mut TickRecord,
        bid: &TrackedBid,
        state: SubmitState,
        assignment_id: Option<String>,
        outcome: Result<SubmitOutcome>,
    ) -> Phase {
        match outcome {
            Ok(SubmitOutcome::Skipped { assignment_id, reason }) => {
                debug!(bid_id = %bid.bid_id, reason, "submission skipped");
                tick.executions.push(self.lifecycle.to_execution_decision(
                    bid,
                    assignment_id.as_deref(),
                    ExecutionAction::Skip,
                    Some(reason.to_string()),
                    None,
                ));
                Ok(())
            }
            Ok(SubmitOutcome::Submitted {
                assignment_id,
                deliverable_hash,
                signed,
            }) => {
                let next = self.lifecycle.mark_submission_succeeded(state, Utc::now());
                self.store
                    .set_submit_state(&bid.job_id, &bid.bid_id, &next)
                    .await?;
                tick.executions.push(self.lifecycle.to_execution_decision(
                    bid,
                    Some(assignment_id.as_str()),
                    ExecutionAction::Submit,
                    None,
                    None,
                ));
                if let Some(signed) = &signed {
                    self.emit(
                        EventType::SubmissionAttempt,
                        json!({
                            "tickId": tick.tick_id,
                            "bidId": bid.bid_id,
                            "jobId": bid.job_id,
                            "manifestHash": signed.manifest_hash,
                            "signerId": signed.signature.signer_id,
                        }),
                    );
                }
                self.emit(
                    EventType::SubmissionSucceeded,
                    json!({
                        "tickId": tick.tick_id,
                        "bidId": bid.bid_id,
                        "jobId": bid.job_id,
                        "assignmentId": assignment_id,
                        "deliverableHash": deliverable_hash,
                    }),
                );
                info!(bid_id = %bid.bid_id, job_id = %bid.job_id, "work submitted");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let next = self.lifecycle.apply_submission_failure(FailureInput {
                    state,
                    now: Utc::now(),
                    policy: &self.policy,
                    error: &message,
                });
                let next_attempt_at = next.next_attempt_at;
                self.store
                    .set_submit_state(&bid.job_id, &bid.bid_id, &next)
                    .await?;
                tick.executions.push(self.lifecycle.to_execution_decision(
                    bid,
                    assignment_id.as_deref(),
                    ExecutionAction::Skip,
                    Some(message.clone()),
                    next_attempt_at,
                ));
                self.emit(
                    EventType::SubmissionFailed,
                    json!({
                        "tickId": tick.tick_id,
                        "bidId": bid.bid_id,
                        "jobId": bid.job_id,
                        "error": message,
                        "attempts": next.attempts,
                        "nextAttemptAt": next_attempt_at.map(iso),
                    }),
                );
                self.item_failed(tick, format!("submit:{}:{message}", bid.bid_id))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Manifests
    // -----------------------------------------------------------------------

    fn build_manifest(
        &self,
        bid: &TrackedBid,
        assignment_id: &str,
        artifact: Artifact,
    ) -> DeliverableManifest {
        DeliverableManifest {
            job_id: bid.job_id.clone(),
            assignment_id: assignment_id.to_string(),
            bid_id: bid.bid_id.clone(),
            agent_id: self.agent_id.clone(),
            deliverable_url: artifact.deliverable_url,
            artifact_hash: artifact.artifact_hash,
            created_at: iso(Utc::now()),
            metadata: artifact.metadata,
        }
    }

    /// The hash sent to the market: the signed commitment when a signer is
    /// configured, the raw artifact hash otherwise.
    fn commit(
        &self,
        manifest: &DeliverableManifest,
    ) -> Result<(String, Option<SignedDeliverableManifest>)> {
        match &self.signer {
            Some(signer) => {
                let signed = signer.sign(manifest)?;
                Ok((commitment_of(&signed), Some(signed)))
            }
            None => Ok((manifest.artifact_hash.clone(), None)),
        }
    }
}

fn proposal_text(job_id: &str, job: Option<&MarketJob>, amount: f64, eta_seconds: u64) -> String {
    let hours = eta_seconds.div_ceil(3_600);
    let subject = match job.and_then(|j| j.title.as_deref()) {
        Some(title) => format!("\"{title}\""),
        None => format!("job {job_id}"),
    };
    format!(
        "Autonomous agent bid for {subject}: delivery within {hours}h for {} NEAR.",
        to_near_amount(amount)
    )
}
