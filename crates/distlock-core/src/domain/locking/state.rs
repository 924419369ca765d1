//! Per-resource synchronization record
//!
//! A `LockState` tracks the shared and exclusive holders of one resource and
//! wakes waiters when the picture changes. All counter mutation happens under
//! the state's own mutex; the table that owns the states is never involved.
//!
//! Wake policy is phase-fair: queued writers hold back newly arriving readers,
//! and when a writer releases, the readers queued at that moment are admitted
//! before the next writer.

use super::types::{LockMode, LockStatus};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

#[derive(Debug, Default)]
struct Counts {
    active_readers: u32,
    has_writer: bool,
    waiting_readers: u32,
    waiting_writers: u32,
    /// Queued readers still admitted ahead of queued writers after the last write release
    reader_turn: u32,
    /// Number of write releases so far
    write_releases: u64,
}

impl Counts {
    fn can_enter(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Read => !self.has_writer && self.waiting_writers == 0,
            LockMode::Write => {
                !self.has_writer && self.active_readers == 0 && self.reader_turn == 0
            }
        }
    }

    /// Whether a reader was already queued at the last write release
    fn has_turn(&self, waiter: &Waiter) -> bool {
        waiter.mode == LockMode::Read && waiter.queued_at < self.write_releases
    }

    fn can_grant_waiting(&self, waiter: &Waiter) -> bool {
        match waiter.mode {
            LockMode::Read => {
                !self.has_writer
                    && (self.waiting_writers == 0
                        || (self.reader_turn > 0 && self.has_turn(waiter)))
            }
            LockMode::Write => self.can_enter(LockMode::Write),
        }
    }

    fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.active_readers += 1,
            LockMode::Write => self.has_writer = true,
        }
        debug_assert!(!(self.has_writer && self.active_readers > 0));
    }

    /// Remove a waiter registration, handing back its reader turn if it had one
    fn dequeue(&mut self, waiter: &Waiter) {
        if self.has_turn(waiter) {
            self.reader_turn = self.reader_turn.saturating_sub(1);
        }
        let waiting = self.waiting_mut(waiter.mode);
        debug_assert!(*waiting > 0, "{} waiter was never registered", waiter.mode);
        *waiting = waiting.saturating_sub(1);
    }

    fn waiting_mut(&mut self, mode: LockMode) -> &mut u32 {
        match mode {
            LockMode::Read => &mut self.waiting_readers,
            LockMode::Write => &mut self.waiting_writers,
        }
    }

    fn status(&self) -> LockStatus {
        LockStatus {
            active_readers: self.active_readers,
            has_writer: self.has_writer,
            waiting_readers: self.waiting_readers,
            waiting_writers: self.waiting_writers,
        }
    }
}

/// Registration of a caller queued for a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    mode: LockMode,
    queued_at: u64,
}

impl Waiter {
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

/// Outcome of a first acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Granted,
    Queued(Waiter),
}

impl Entry {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Lock state of a single resource
#[derive(Debug, Default)]
pub struct LockState {
    counts: Mutex<Counts>,
    notify: Notify,
}

impl LockState {
    pub fn new() -> Self {
        Self::default()
    }

    fn counts(&self) -> MutexGuard<'_, Counts> {
        // Counts are always left consistent, a poisoned guard is still usable.
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First attempt of an acquisition.
    ///
    /// Grants immediately when possible, otherwise registers the caller as a
    /// waiter of `mode`. Readers arriving here never use a reader turn.
    pub fn try_enter(&self, mode: LockMode) -> Entry {
        let mut counts = self.counts();
        if counts.can_enter(mode) {
            counts.grant(mode);
            Entry::Granted
        } else {
            *counts.waiting_mut(mode) += 1;
            Entry::Queued(Waiter {
                mode,
                queued_at: counts.write_releases,
            })
        }
    }

    /// Retry of a registered waiter. On success the registration is consumed.
    pub fn try_grant_waiting(&self, waiter: &Waiter) -> bool {
        let mut counts = self.counts();
        if counts.can_grant_waiting(waiter) {
            counts.dequeue(waiter);
            counts.grant(waiter.mode);
            true
        } else {
            false
        }
    }

    /// Withdraw a registered waiter that gave up (timeout or cancellation).
    ///
    /// Leaves the holder counts exactly as they were.
    pub fn abandon(&self, waiter: &Waiter) {
        self.counts().dequeue(waiter);
        // A departed writer may unblock readers, a departed reader may end a reader turn.
        self.notify.notify_waiters();
    }

    /// Release one granted acquisition of `mode` and wake waiters when useful.
    pub fn release(&self, mode: LockMode) {
        let wake = {
            let mut counts = self.counts();
            match mode {
                LockMode::Read => {
                    debug_assert!(counts.active_readers > 0, "read lock released twice");
                    counts.active_readers = counts.active_readers.saturating_sub(1);
                    counts.active_readers == 0
                }
                LockMode::Write => {
                    debug_assert!(counts.has_writer, "write lock released while not held");
                    counts.has_writer = false;
                    counts.write_releases += 1;
                    counts.reader_turn = counts.waiting_readers;
                    true
                }
            }
        };
        if wake {
            self.notify.notify_waiters();
        }
    }

    /// Future that completes on the next wake-up.
    ///
    /// Callers must `enable` it before re-checking their condition so that a
    /// release in between is not missed.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Snapshot of the counters
    pub fn status(&self) -> LockStatus {
        self.counts().status()
    }
}
