//! Tick orchestrator.
//!
//! One tick runs five phases in order, each issuing its market mutations
//! sequentially:
//!
//! ```text
//! discovery ─▶ bidding ─▶ tracked-bid snapshot ─▶ stale withdrawal ─▶ submission
//!                                                                        │
//!                       (always, in its own boundary)  settlement ◀──────┘
//! ```
//!
//! Failures never escape [`Autopilot::run_tick`]; they are recorded on the
//! returned [`TickResult`](crate::types::TickResult) as `errors` plus the
//! `halted` flag. With `policy.fail_closed` the first per-item failure halts
//! the rest of its phase and every later phase except settlement.

mod fanout;
mod run_loop;
mod settlement;
mod tick;

pub use run_loop::{RunLoopOptions, RunSummary, StopReason};

use std::sync::Arc;

use serde_json::Value;

use crate::config::{AutopilotConfig, PolicyConfig, SettlementConfig};
use crate::manifest::ManifestSigner;
use crate::market::MarketClient;
use crate::policy::{ArtifactProvider, BiddingPolicy, LifecyclePolicy, SettlementBuilder};
use crate::store::{AutopilotStore, StateStore};
use crate::telemetry::{EventType, TelemetryEvent, TelemetrySink};

/// Open jobs fetched per tick, highest budget first.
pub const DISCOVERY_JOB_LIMIT: usize = 100;
/// Bids fetched per job during discovery and settlement.
pub const JOB_BID_LIMIT: usize = 100;
/// Own bids fetched for the withdrawal and submission phases.
pub const TRACKED_BID_LIMIT: usize = 300;
/// Maximum in-flight per-job bid listings.
pub const FETCH_CONCURRENCY: usize = 10;

/// External collaborators, constructed once at startup.
pub struct Collaborators {
    pub market: Arc<dyn MarketClient>,
    pub bidding: Arc<dyn BiddingPolicy>,
    pub lifecycle: Arc<dyn LifecyclePolicy>,
    pub settlement: Arc<dyn SettlementBuilder>,
    pub artifacts: Option<Arc<dyn ArtifactProvider>>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

pub struct Autopilot {
    agent_id: String,
    market: Arc<dyn MarketClient>,
    bidding: Arc<dyn BiddingPolicy>,
    lifecycle: Arc<dyn LifecyclePolicy>,
    settlement: Arc<dyn SettlementBuilder>,
    artifacts: Option<Arc<dyn ArtifactProvider>>,
    telemetry: Arc<dyn TelemetrySink>,
    store: AutopilotStore,
    signer: Option<ManifestSigner>,
    policy: PolicyConfig,
    settlement_config: SettlementConfig,
}

impl Autopilot {
    pub fn new(
        config: &AutopilotConfig,
        collaborators: Collaborators,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let Collaborators {
            market,
            bidding,
            lifecycle,
            settlement,
            artifacts,
            telemetry,
        } = collaborators;
        Self {
            agent_id: config.agent_id.clone(),
            market,
            bidding,
            lifecycle,
            settlement,
            artifacts,
            telemetry,
            store: AutopilotStore::new(store),
            signer: None,
            policy: config.policy.clone(),
            settlement_config: config.settlement.clone(),
        }
    }

    /// Enable signed deliverable commitments.
    pub fn with_signer(mut self, signer: ManifestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn store(&self) -> &AutopilotStore {
        &self.store
    }

    fn emit(&self, event_type: EventType, payload: Value) {
        self.telemetry.emit(TelemetryEvent::now(event_type, payload));
    }
}
