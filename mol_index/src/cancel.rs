//! Cooperative cancellation and per-match deadlines.
//!
//! The flag is set from outside the search (a timer task, a dropped client) and polled by
//! the matcher on every candidate pair. The deadline is armed per match call, so a slow
//! target only exhausts its own budget.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::Interrupt;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: CancelFlag,
    match_timeout: Option<Duration>,
}

impl Cancellation {

    pub fn new(flag: CancelFlag, match_timeout: Option<Duration>) -> Self {
        Self { flag, match_timeout }
    }

    /// Never cancelled, no deadline.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn flag(&self) -> &CancelFlag {
        &self.flag
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }

    pub fn match_timeout(&self) -> Option<Duration> {
        self.match_timeout
    }

    pub fn start_match(&self) -> MatchClock<'_> {
        MatchClock {
            flag: &self.flag.0,
            deadline: self.match_timeout.map(|t| Instant::now() + t),
        }
    }
}

/// Armed deadline for a single match call.
#[derive(Debug)]
pub struct MatchClock<'a> {
    flag: &'a AtomicBool,
    deadline: Option<Instant>,
}

impl<'a> MatchClock<'a> {

    #[inline]
    pub fn poll(&self) -> Option<Interrupt> {

        if self.flag.load(Ordering::Relaxed) {
            return Some(Interrupt::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupt::TimedOut),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn flag_is_shared_between_clones() {

        let cancellation = Cancellation::new(CancelFlag::new(), None);
        let remote = cancellation.flag().clone();

        assert_eq!(cancellation.start_match().poll(), None);
        remote.cancel();
        assert!(cancellation.is_cancelled());
        assert_eq!(cancellation.start_match().poll(), Some(Interrupt::Cancelled));
    }

    #[test]
    fn zero_budget_times_out() {

        let cancellation = Cancellation::new(CancelFlag::new(), Some(Duration::ZERO));
        assert_eq!(cancellation.start_match().poll(), Some(Interrupt::TimedOut));
    }
}
