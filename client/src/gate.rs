use std::sync::atomic::{AtomicU8, Ordering};

/// Where the in-flight action is. `Idle` means nothing is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ActionPhase {
    #[default]
    Idle = 0,
    Submitting = 1,
    Confirming = 2,
    Syncing = 3,
}

impl ActionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ActionPhase::Submitting,
            2 => ActionPhase::Confirming,
            3 => ActionPhase::Syncing,
            _ => ActionPhase::Idle,
        }
    }
}

/// Single pending flag shared by all mutating actions of a session.
#[derive(Debug, Default)]
pub struct PendingGate {
    phase: AtomicU8,
}

impl PendingGate {
    /// `None` while another action holds the gate.
    pub fn try_begin(&self) -> Option<PendingGuard<'_>> {
        self.phase
            .compare_exchange(
                ActionPhase::Idle as u8,
                ActionPhase::Submitting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| PendingGuard { gate: self })
    }

    pub fn phase(&self) -> ActionPhase {
        ActionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_pending(&self) -> bool {
        self.phase() != ActionPhase::Idle
    }
}

/// Returns the gate to `Idle` when dropped, on every exit path.
#[derive(Debug)]
pub struct PendingGuard<'a> {
    gate: &'a PendingGate,
}

impl PendingGuard<'_> {
    pub fn advance(&self, phase: ActionPhase) {
        self.gate.phase.store(phase as u8, Ordering::Release);
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.gate.phase.store(ActionPhase::Idle as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_action_is_rejected() {
        let gate = PendingGate::default();
        let guard = gate.try_begin().unwrap();
        assert!(gate.is_pending());
        assert!(gate.try_begin().is_none());

        guard.advance(ActionPhase::Confirming);
        assert_eq!(gate.phase(), ActionPhase::Confirming);

        drop(guard);
        assert_eq!(gate.phase(), ActionPhase::Idle);
        assert!(gate.try_begin().is_some());
    }

    #[test]
    fn released_on_early_return() {
        fn fails(gate: &PendingGate) -> Result<(), ()> {
            let guard = gate.try_begin().ok_or(())?;
            guard.advance(ActionPhase::Syncing);
            Err(())
        }

        let gate = PendingGate::default();
        assert!(fails(&gate).is_err());
        assert!(!gate.is_pending());
    }
}
