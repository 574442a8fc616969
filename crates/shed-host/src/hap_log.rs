//! Hap → log bridge.
//!
//! Subscribes to the hap bus and writes every hap to the log, mapping the
//! severity tiers onto tracing levels. This is the minimum useful consumer;
//! richer ones (status page, remote event sender) hang off the same bus.

use heater_control::hap::{HapBus, Severity};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub fn spawn(haps: &HapBus) -> JoinHandle<()> {
    let mut rx = haps.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(hap) => match hap.severity() {
                    Severity::Info => info!(?hap, "hap"),
                    Severity::Warning => warn!(?hap, "hap"),
                    Severity::Fault | Severity::Critical => error!(?hap, "hap"),
                },
                Err(RecvError::Lagged(missed)) => warn!(missed, "hap log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
