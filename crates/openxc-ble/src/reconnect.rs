use std::time::{Duration, Instant};

use tracing::debug;

use crate::address::PeerAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    /// Connect to a configured or remembered address only.
    Explicit,
    /// Rank candidates and try them in order.
    Automatic,
}

/// What the next connection attempt should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPlan {
    Target(PeerAddress),
    Rank,
    /// Explicit mode with nothing configured or remembered.
    Idle,
}

/// Decides when and towards what the transport reconnects.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    explicit_target: Option<PeerAddress>,
    automatic_scan: bool,
    fast_polling: bool,
    poll_interval: Duration,
    fast_poll_interval: Duration,
    last_attempt: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn new(
        explicit_target: Option<PeerAddress>,
        automatic_scan: bool,
        poll_interval: Duration,
        fast_poll_interval: Duration,
    ) -> Self {
        Self {
            explicit_target,
            automatic_scan,
            fast_polling: false,
            poll_interval,
            fast_poll_interval,
            last_attempt: None,
        }
    }

    pub fn mode(&self) -> ReconnectMode {
        if self.explicit_target.is_some() || !self.automatic_scan {
            ReconnectMode::Explicit
        } else {
            ReconnectMode::Automatic
        }
    }

    pub fn target(&self) -> Option<PeerAddress> {
        self.explicit_target
    }

    pub fn fast_polling(&self) -> bool {
        self.fast_polling
    }

    pub fn set_fast_polling(&mut self, enabled: bool) {
        if self.fast_polling != enabled {
            debug!("fast polling {}", if enabled { "enabled" } else { "disabled" });
        }
        self.fast_polling = enabled;
    }

    /// Replaces the explicit target. Returns true when the current link
    /// points somewhere other than the new target. Switching to automatic
    /// mode or targeting while disconnected never forces a reconnect; later
    /// attempts simply follow the new target.
    pub fn set_target(
        &mut self,
        target: Option<PeerAddress>,
        connected_to: Option<PeerAddress>,
    ) -> bool {
        let reconnect = match (connected_to, target) {
            (Some(current), Some(next)) => current != next,
            _ => false,
        };
        let changed = self.explicit_target != target;
        self.explicit_target = target;
        if reconnect || (changed && target.is_some()) {
            self.set_fast_polling(true);
        }
        reconnect
    }

    pub fn plan(&self, last_connected: Option<PeerAddress>) -> ConnectPlan {
        match self.mode() {
            ReconnectMode::Automatic => ConnectPlan::Rank,
            ReconnectMode::Explicit => match self.explicit_target.or(last_connected) {
                Some(addr) => ConnectPlan::Target(addr),
                None => ConnectPlan::Idle,
            },
        }
    }

    pub fn current_interval(&self) -> Duration {
        if self.fast_polling {
            self.fast_poll_interval
        } else {
            self.poll_interval
        }
    }

    /// Whether enough time has passed since the last attempt.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.current_interval(),
        }
    }

    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a() -> PeerAddress {
        PeerAddress::from_octets([0xA0; 6])
    }

    fn b() -> PeerAddress {
        PeerAddress::from_octets([0xB0; 6])
    }

    fn policy(target: Option<PeerAddress>) -> ReconnectPolicy {
        ReconnectPolicy::new(target, true, Duration::from_secs(5), Duration::from_secs(1))
    }

    #[test]
    fn reconnect_required_matrix() {
        assert!(!policy(Some(a())).set_target(Some(a()), Some(a())));
        assert!(policy(Some(a())).set_target(Some(b()), Some(a())));
        assert!(!policy(Some(a())).set_target(None, Some(a())));
        assert!(!policy(None).set_target(Some(b()), None));
    }

    #[test]
    fn new_target_enables_fast_polling() {
        let mut p = policy(None);
        p.set_target(Some(b()), None);
        assert!(p.fast_polling());
        assert_eq!(p.target(), Some(b()));

        let mut unchanged = policy(Some(a()));
        unchanged.set_target(Some(a()), Some(a()));
        assert!(!unchanged.fast_polling());
    }

    #[test]
    fn plan_follows_mode() {
        assert_eq!(policy(None).mode(), ReconnectMode::Automatic);
        assert_eq!(policy(None).plan(Some(a())), ConnectPlan::Rank);

        assert_eq!(policy(Some(b())).plan(Some(a())), ConnectPlan::Target(b()));

        let manual = ReconnectPolicy::new(None, false, Duration::ZERO, Duration::ZERO);
        assert_eq!(manual.mode(), ReconnectMode::Explicit);
        assert_eq!(manual.plan(Some(a())), ConnectPlan::Target(a()));
        assert_eq!(manual.plan(None), ConnectPlan::Idle);
    }

    #[test]
    fn polling_cadence_uses_fast_interval_when_enabled() {
        let mut p = policy(None);
        let start = Instant::now();
        assert!(p.is_due(start));
        p.record_attempt(start);
        assert!(!p.is_due(start + Duration::from_secs(2)));
        p.set_fast_polling(true);
        assert!(p.is_due(start + Duration::from_secs(2)));
        assert!(!p.is_due(start + Duration::from_millis(500)));
    }
}
