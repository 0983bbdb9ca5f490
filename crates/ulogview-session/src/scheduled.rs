use std::time::Duration;

use tokio::time::Instant;

/// Deadline of a deferred action run by the session owner
///
/// The owner polls [`ScheduledAction::take_due`] from its event loop and runs
/// the action itself, so actions always execute on the owner side.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScheduledAction {
    deadline: Option<Instant>,
}

impl ScheduledAction {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Schedule after `delay` unless already scheduled
    pub fn schedule(&mut self, delay: Duration) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + delay);
        }
    }

    /// Schedule after `delay`, replacing any previous deadline
    pub fn reschedule(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_scheduled(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Clear the deadline if it has passed, returns whether to run now
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_keeps_first_deadline() {
        let mut action = ScheduledAction::new();
        action.schedule(Duration::ZERO);
        let first = action.deadline();
        action.schedule(Duration::from_secs(60));
        assert_eq!(action.deadline(), first);
        assert!(action.take_due(Instant::now()));
        assert!(!action.is_scheduled());
    }

    #[test]
    fn test_reschedule_and_cancel() {
        let mut action = ScheduledAction::new();
        action.schedule(Duration::ZERO);
        action.reschedule(Duration::from_secs(60));
        assert!(!action.take_due(Instant::now()));
        assert!(action.cancel());
        assert!(!action.cancel());
    }
}
