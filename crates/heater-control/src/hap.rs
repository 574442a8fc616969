//! Diagnostic events ("haps") and the process-wide bus they travel on.
//!
//! A hap is a fact about the heater hardware worth telling somebody about:
//! the heater started, the SSR looks dead, there is no usable outside
//! temperature. Controllers post haps at state-machine decision points;
//! consumers (log writers, status surfaces) subscribe and decide for
//! themselves what each kind means to them.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Depth of the bus queue per subscriber. A subscriber that falls further
/// behind than this loses the oldest haps, never the newest.
pub const HAP_QUEUE_DEPTH: usize = 100;

/// Everything the heater subsystem can report. Closed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Hap {
    /// The heater output was asserted.
    HeaterOn,
    /// The heater output was deasserted.
    HeaterOff,
    /// Temperature rose after turn-on; the heating element works.
    HeaterWorking,
    /// The SSR demonstrably switched power.
    SsrWorking,
    /// The sense relay agreed with the commanded output.
    SenseRelayWorking,
    /// The heater was commanded on but temperature did not rise in time.
    /// Retried with a cooldown in between.
    HeaterNoStart,
    /// Repeated no-starts while the sense relay reported power flowing.
    PossibleHeaterFailure,
    /// The SSR appears not to switch (no power sensed on turn-on, or power
    /// still sensed after turn-off).
    PossibleSsrFailure,
    /// Temperature rose but the sense relay never reported power.
    PossibleSenseRelayFailure,
    /// No power sensed after turn-on and no temperature feedback exists to
    /// say which of the two is lying.
    PossibleSsrOrSenseRelayFailure,
    /// Neither ambient nor outside temperature is available while the
    /// control strategy depends on one. The heater is held off.
    NoTemperatureOutsideTheBox,
}

/// Coarse grading used by consumers that map haps onto another severity
/// scheme (log levels, LED patterns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Fault,
    Critical,
}

impl Hap {
    pub fn severity(self) -> Severity {
        match self {
            Hap::HeaterOn
            | Hap::HeaterOff
            | Hap::HeaterWorking
            | Hap::SsrWorking
            | Hap::SenseRelayWorking => Severity::Info,
            Hap::HeaterNoStart => Severity::Warning,
            Hap::PossibleHeaterFailure
            | Hap::PossibleSsrFailure
            | Hap::PossibleSenseRelayFailure
            | Hap::PossibleSsrOrSenseRelayFailure => Severity::Fault,
            Hap::NoTemperatureOutsideTheBox => Severity::Critical,
        }
    }
}

/// Multi-producer multi-subscriber hap channel.
///
/// Posting never blocks and never fails; a post with no subscribers is
/// simply dropped.
#[derive(Debug, Clone)]
pub struct HapBus {
    tx: broadcast::Sender<Hap>,
}

impl HapBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HAP_QUEUE_DEPTH);
        Self { tx }
    }

    /// Posts a hap to every current subscriber.
    pub fn post(&self, hap: Hap) {
        trace!(?hap, "hap posted");
        if self.tx.send(hap).is_err() {
            trace!(?hap, "no hap subscribers");
        }
    }

    /// Opens a subscription that sees every hap posted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Hap> {
        self.tx.subscribe()
    }
}

impl Default for HapBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_tiers() {
        assert_eq!(Hap::HeaterOn.severity(), Severity::Info);
        assert_eq!(Hap::HeaterNoStart.severity(), Severity::Warning);
        assert_eq!(Hap::PossibleSsrFailure.severity(), Severity::Fault);
        assert_eq!(Hap::NoTemperatureOutsideTheBox.severity(), Severity::Critical);
    }

    #[tokio::test]
    async fn posted_haps_reach_every_subscriber() {
        let bus = HapBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.post(Hap::HeaterOn);
        assert_eq!(a.recv().await.unwrap(), Hap::HeaterOn);
        assert_eq!(b.recv().await.unwrap(), Hap::HeaterOn);
    }

    #[test]
    fn posting_without_subscribers_is_fine() {
        let bus = HapBus::new();
        bus.post(Hap::HeaterOff);
    }
}
