use core::ops::Add;
use core::time::Duration;

/// The engine's single retriggerable timer.
///
/// Holds at most one deadline. Arming replaces whatever was pending.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StateTimer<I> {
    deadline: Option<I>,
    armed_for: Option<Duration>,
}

impl<I> StateTimer<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            deadline: None,
            armed_for: None,
        }
    }

    pub fn arm(&mut self, now: I, duration: Duration) {
        self.deadline = Some(now + duration);
        self.armed_for = Some(duration);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
        self.armed_for = None;
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<I> {
        self.deadline
    }

    /// Duration passed to the most recent [`arm`](Self::arm), while armed.
    #[must_use]
    pub const fn armed_for(&self) -> Option<Duration> {
        self.armed_for
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consumes the deadline if it has passed.
    pub fn expire(&mut self, now: I) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.disarm();
                true
            }
            _ => false,
        }
    }
}

impl<I> Default for StateTimer<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    fn default() -> Self {
        Self::new()
    }
}
