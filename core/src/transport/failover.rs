//! Failover state — primary exchange channel vs. degraded "hide" channel
//!
//! One-way transition: `Normal` → `Degraded`. Once degraded, every send
//! targets the hide channel until the process restarts. The transition
//! is a compare-and-set so concurrent hard failures elect exactly one
//! winner, and only the winner notifies peers.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tracing::warn;

use super::abstraction::ChannelId;

/// Which channel family sends currently use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMode {
    /// Primary exchange channel
    Normal,
    /// Hide channel after the exchange channel failed
    Degraded,
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelMode::Normal => write!(f, "Normal"),
            ChannelMode::Degraded => write!(f, "Degraded"),
        }
    }
}

/// The two channels peers exchange data in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeChannels {
    pub primary: ChannelId,
    pub degraded: ChannelId,
}

impl ExchangeChannels {
    pub fn new(primary: ChannelId, degraded: ChannelId) -> Self {
        Self { primary, degraded }
    }

    /// Channel for the given mode
    pub fn select(&self, mode: ChannelMode) -> ChannelId {
        match mode {
            ChannelMode::Normal => self.primary,
            ChannelMode::Degraded => self.degraded,
        }
    }
}

/// Failover flag shared by everything that sends on the exchange channel.
///
/// Starts `Normal`; the only transition is to `Degraded`.
#[derive(Debug, Default)]
pub struct FailoverState {
    degraded: AtomicBool,
    degraded_at: Mutex<Option<SystemTime>>,
}

impl FailoverState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ChannelMode {
        if self.is_degraded() {
            ChannelMode::Degraded
        } else {
            ChannelMode::Normal
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Flip to `Degraded`. Returns true only for the caller that
    /// performed the transition.
    pub fn try_degrade(&self) -> bool {
        let won = self
            .degraded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if won {
            *self.degraded_at.lock() = Some(SystemTime::now());
            warn!("Exchange channel judged unusable, switching to hide channel");
        }

        won
    }

    /// When the transition happened, if it did
    pub fn degraded_at(&self) -> Option<SystemTime> {
        *self.degraded_at.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_starts_normal() {
        let state = FailoverState::new();
        assert_eq!(state.mode(), ChannelMode::Normal);
        assert!(state.degraded_at().is_none());
    }

    #[test]
    fn test_degrade_is_one_way() {
        let state = FailoverState::new();
        assert!(state.try_degrade());
        assert!(!state.try_degrade());
        assert_eq!(state.mode(), ChannelMode::Degraded);
        assert!(state.degraded_at().is_some());
    }

    #[test]
    fn test_concurrent_degrade_single_winner() {
        let state = Arc::new(FailoverState::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let state = state.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    if state.try_degrade() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(state.is_degraded());
    }

    #[test]
    fn test_channel_selection() {
        let channels = ExchangeChannels::new(ChannelId(-1001), ChannelId(-1002));
        assert_eq!(channels.select(ChannelMode::Normal), ChannelId(-1001));
        assert_eq!(channels.select(ChannelMode::Degraded), ChannelId(-1002));
    }
}
