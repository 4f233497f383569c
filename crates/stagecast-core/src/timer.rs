use tokio::time::{Duration, Instant};

/// The single outstanding deadline of an overlay state machine.
///
/// Arming always replaces whatever was pending, so a machine that owns one
/// of these can never have two timers in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayTimer {
    deadline: Option<Instant>,
}

impl OverlayTimer {
    pub fn arm_at(&mut self, at: Instant) {
        self.deadline = Some(at);
    }

    pub fn arm_after(&mut self, now: Instant, delay: Duration) {
        self.arm_at(now + delay);
    }

    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarms and returns the deadline if it has been reached.
    pub fn take_due(&mut self, now: Instant) -> Option<Instant> {
        match self.deadline {
            Some(at) if at <= now => self.deadline.take(),
            _ => None,
        }
    }
}
