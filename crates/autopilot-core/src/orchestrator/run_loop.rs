use std::future::Future;
use std::time::Duration;

use tracing::info;

use super::Autopilot;
use crate::config::AutopilotConfig;
use crate::types::TickResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLoopOptions {
    pub interval: Duration,
    /// Stop after this many ticks. `None` runs until halted or shut down.
    pub max_ticks: Option<u64>,
}

impl Default for RunLoopOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            max_ticks: None,
        }
    }
}

impl From<&AutopilotConfig> for RunLoopOptions {
    fn from(config: &AutopilotConfig) -> Self {
        Self {
            interval: config.tick_interval(),
            max_ticks: config.max_ticks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxTicks,
    /// A tick halted under a fail-closed policy.
    Halted,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub stop: StopReason,
}

impl Autopilot {
    /// Tick forever (or until `max_ticks`), sleeping `interval` between ticks.
    pub async fn run_loop(&self, options: RunLoopOptions) -> RunSummary {
        self.run_loop_until(options, |_| {}, std::future::pending())
            .await
    }

    /// Like [`run_loop`](Self::run_loop), calling `on_tick` after every tick
    /// and stopping early when `shutdown` resolves. Shutdown is only observed
    /// between ticks; an in-flight tick always runs to completion.
    pub async fn run_loop_until<F, S>(
        &self,
        options: RunLoopOptions,
        mut on_tick: F,
        shutdown: S,
    ) -> RunSummary
    where
        F: FnMut(&TickResult),
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticks = 0u64;

        loop {
            let result = self.run_tick().await;
            ticks += 1;
            on_tick(&result);

            if result.halted && self.policy.fail_closed {
                info!(ticks, tick_id = %result.tick_id, "run loop stopped: tick halted");
                return RunSummary {
                    ticks,
                    stop: StopReason::Halted,
                };
            }
            if options.max_ticks.is_some_and(|max| ticks >= max) {
                info!(ticks, "run loop stopped: max ticks reached");
                return RunSummary {
                    ticks,
                    stop: StopReason::MaxTicks,
                };
            }

            tokio::select! {
                _ = tokio::time::sleep(options.interval) => {}
                _ = &mut shutdown => {
                    info!(ticks, "run loop stopped: shutdown requested");
                    return RunSummary { ticks, stop: StopReason::Shutdown };
                }
            }
        }
    }
}
