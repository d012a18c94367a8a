//! Process-wide sync state: the non-reentrancy gate and connectivity flag.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether a sync cycle is currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
}

/// Guards against overlapping sync cycles.
///
/// The only transition into [`SyncState::Syncing`] is a successful
/// [`SyncGate::try_acquire`]; the returned permit moves the gate back to
/// [`SyncState::Idle`] when dropped, including on early return or panic.
#[derive(Debug, Clone, Default)]
pub struct SyncGate {
    syncing: Arc<AtomicBool>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `Syncing`, or `None` if a cycle is already running
    pub fn try_acquire(&self) -> Option<SyncPermit> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncPermit {
                syncing: self.syncing.clone(),
            })
    }

    pub fn state(&self) -> SyncState {
        if self.syncing.load(Ordering::Acquire) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }
}

/// Held for the duration of one sync cycle
#[derive(Debug)]
pub struct SyncPermit {
    syncing: Arc<AtomicBool>,
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        self.syncing.store(false, Ordering::Release);
    }
}

/// Last known reachability of the remote store.
///
/// Updated after every sync cycle; write paths consult it to skip the network
/// entirely while the device is known to be offline.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self {
            online: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl Connectivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn is_offline(&self) -> bool {
        !self.is_online()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_is_not_reentrant() {
        let gate = SyncGate::new();
        assert_eq!(gate.state(), SyncState::Idle);

        let permit = gate.try_acquire().unwrap();
        assert_eq!(gate.state(), SyncState::Syncing);
        assert!(gate.try_acquire().is_none());

        drop(permit);
        assert_eq!(gate.state(), SyncState::Idle);
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_gate_clones_share_state() {
        let gate = SyncGate::new();
        let other = gate.clone();

        let _permit = gate.try_acquire().unwrap();
        assert_eq!(other.state(), SyncState::Syncing);
        assert!(other.try_acquire().is_none());
    }

    #[test]
    fn test_connectivity_starts_online() {
        let connectivity = Connectivity::new();
        assert!(connectivity.is_online());

        let shared = connectivity.clone();
        shared.set_online(false);
        assert!(connectivity.is_offline());
    }
}
