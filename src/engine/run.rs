//! Engine loop.
//!
//! One cooperative loop drives the whole engine: wait on the bus for up to
//! a second (or the next internal deadline, whichever is sooner), feed
//! each message to the state machine, then re-evaluate timers. There is no
//! internal parallelism; every component is invoked from this loop, which
//! is what keeps the cross-component invariants cheap to hold.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{Bus, BusEvent, MessageSource};
use crate::config::defaults::BUS_WAIT_MAX_S;

use super::PlanEngine;

/// Owns the engine for the duration of the run.
pub struct EngineLoop {
    engine: PlanEngine,
    cancel_token: CancellationToken,
}

impl EngineLoop {
    pub fn new(engine: PlanEngine, cancel_token: CancellationToken) -> Self {
        Self {
            engine,
            cancel_token,
        }
    }

    /// Run until the source is exhausted or cancellation. Returns the
    /// engine so callers can inspect final state.
    pub async fn run<S: MessageSource, B: Bus>(mut self, source: &mut S, bus: &mut B) -> PlanEngine {
        let origin = Instant::now();
        let now = || origin.elapsed().as_secs_f64();

        info!(source = source.source_name(), "Engine loop starting");
        self.engine.initialize(bus, now());

        loop {
            let wait = self
                .engine
                .seconds_to_deadline(now())
                .clamp(0.001, BUS_WAIT_MAX_S);

            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("[EngineLoop] Shutdown signal received");
                    break;
                }
                event = tokio::time::timeout(Duration::from_secs_f64(wait), source.next_event()) => {
                    match event {
                        // Deadline reached with a silent bus; fall through to tick
                        Err(_) => {}
                        Ok(Ok(BusEvent::Message(msg))) => {
                            self.engine.consume(msg, bus, now());
                        }
                        Ok(Ok(BusEvent::Eof)) => {
                            info!("[EngineLoop] Source reached end of data");
                            break;
                        }
                        Ok(Err(e)) => {
                            warn!("[EngineLoop] Source error: {}", e);
                            break;
                        }
                    }
                }
            }

            self.engine.tick(bus, now());
        }

        self.engine.shutdown();
        info!("Engine loop stopped");
        self.engine
    }
}
