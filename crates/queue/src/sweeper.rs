//! Background lease sweeper.
//!
//! Periodically reclaims expired leases and promotes due retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Dispatcher;

pub struct LeaseSweeper {
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
}

impl LeaseSweeper {
    /// Sweep on the dispatcher's configured interval.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let interval = dispatcher.config().sweep_interval();
        Self {
            dispatcher,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run the sweep loop until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis(), "lease sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("lease sweeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(err) = self.dispatcher.sweep().await {
                        error!(error = %err, "lease sweep failed");
                    }
                }
            }
        }
    }
}
