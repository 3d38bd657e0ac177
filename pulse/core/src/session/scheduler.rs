//! Session Timers
//!
//! One optional deadline per [`TimerKind`]. The session actor sleeps until
//! [`Scheduler::next_deadline`] and then fires whatever is due; cancelling a
//! timer just forgets its deadline, so a cancelled timer can never fire.

use std::time::Instant;

/// Timers a session owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Open did not complete in time
    ConnectTimeout,
    /// Backoff elapsed, try again
    Reconnect,
    /// Time to ping
    Heartbeat,
}

impl TimerKind {
    const ALL: [TimerKind; 3] = [Self::ConnectTimeout, Self::Reconnect, Self::Heartbeat];

    fn slot(self) -> usize {
        match self {
            Self::ConnectTimeout => 0,
            Self::Reconnect => 1,
            Self::Heartbeat => 2,
        }
    }
}

/// Cancellable deadlines, at most one per kind
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    deadlines: [Option<Instant>; 3],
}

impl Scheduler {
    /// Arm `kind`, replacing any earlier deadline for it
    pub fn schedule(&mut self, kind: TimerKind, at: Instant) {
        self.deadlines[kind.slot()] = Some(at);
    }

    /// Disarm `kind`
    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines[kind.slot()] = None;
    }

    /// Disarm everything
    pub fn cancel_all(&mut self) {
        self.deadlines = [None; 3];
    }

    /// Whether `kind` is armed
    #[must_use]
    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.deadlines[kind.slot()].is_some()
    }

    /// Number of armed timers
    #[must_use]
    pub fn pending(&self) -> usize {
        self.deadlines.iter().filter(|d| d.is_some()).count()
    }

    /// Earliest armed deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Disarm and return every timer due at `now`, earliest first
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = TimerKind::ALL
            .iter()
            .filter_map(|&kind| match self.deadlines[kind.slot()] {
                Some(at) if at <= now => Some((at, kind)),
                _ => None,
            })
            .collect();
        due.sort_by_key(|(at, _)| *at);
        for (_, kind) in &due {
            self.cancel(*kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }
}
