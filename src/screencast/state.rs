//! Recording state register
//!
//! A bit-flag register shared by the capture thread and the control thread.
//! It only changes through the five transition operations below, each of
//! which runs under one mutex; transitions that release a paused capture
//! thread also broadcast on the companion condition variable.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateFlags(u32);

impl StateFlags {
    pub const STOPPED: Self = Self(1 << 0);
    pub const STARTING: Self = Self(1 << 1);
    pub const RECORDING: Self = Self(1 << 2);
    pub const PAUSED: Self = Self(1 << 3);
    pub const SINGLE_STEP: Self = Self(1 << 4);
    pub const READY: Self = Self(1 << 5);
    pub const AUTO_CONTINUE: Self = Self(1 << 6);

    const NAMES: [(StateFlags, &'static str); 7] = [
        (Self::STOPPED, "STOPPED"),
        (Self::STARTING, "STARTING"),
        (Self::RECORDING, "RECORDING"),
        (Self::PAUSED, "PAUSED"),
        (Self::SINGLE_STEP, "SINGLE_STEP"),
        (Self::READY, "READY"),
        (Self::AUTO_CONTINUE, "AUTO_CONTINUE"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All of `other`'s bits are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// A thread waiting on the resume condition should keep waiting.
    pub const fn is_held(self) -> bool {
        self.contains(Self::PAUSED) && !self.intersects(Self(Self::SINGLE_STEP.0 | Self::STOPPED.0))
    }
}

impl BitOr for StateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for StateFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for StateFlags {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Debug for StateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(empty)");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

struct Inner {
    flags: StateFlags,
    subscribers: Vec<Sender<StateFlags>>,
}

/// The shared register. Starts out `STOPPED|READY`.
pub struct RecordingState {
    inner: Mutex<Inner>,
    resume: Condvar,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                flags: StateFlags::STOPPED | StateFlags::READY,
                subscribers: Vec::new(),
            }),
            resume: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one transition and return the prior value.
    fn transition(&self, apply: impl FnOnce(StateFlags) -> StateFlags) -> StateFlags {
        let mut inner = self.lock();
        let prior = inner.flags;
        self.commit(&mut inner, apply(prior));
        prior
    }

    fn commit(&self, inner: &mut Inner, next: StateFlags) {
        let prior = inner.flags;
        inner.flags = next;

        let cleared_pause = prior.contains(StateFlags::PAUSED) && !next.contains(StateFlags::PAUSED);
        let set_stop = !prior.contains(StateFlags::STOPPED) && next.contains(StateFlags::STOPPED);
        let set_step =
            !prior.contains(StateFlags::SINGLE_STEP) && next.contains(StateFlags::SINGLE_STEP);
        if cleared_pause || set_stop || set_step {
            self.resume.notify_all();
        }

        if next != prior {
            log::debug!("State {:?} -> {:?}", prior, next);
            inner.subscribers.retain(|tx| tx.send(next).is_ok());
        }
    }

    /// Replace the whole register.
    pub fn set_state(&self, flags: StateFlags) -> StateFlags {
        self.transition(|_| flags)
    }

    pub fn merge(&self, flags: StateFlags) -> StateFlags {
        self.transition(|prior| prior | flags)
    }

    pub fn remove(&self, flags: StateFlags) -> StateFlags {
        self.transition(|prior| prior & !flags)
    }

    pub fn merge_and_remove(&self, merge: StateFlags, remove: StateFlags) -> StateFlags {
        self.transition(|prior| (prior | merge) & !remove)
    }

    /// Keep only the bits in `keep`, then add `merge`.
    pub fn keep_and_merge(&self, keep: StateFlags, merge: StateFlags) -> StateFlags {
        self.transition(|prior| (prior & keep) | merge)
    }

    /// Replace the register only if all of `required` is set, checked under
    /// the same lock. `Err` carries the register as found.
    pub fn set_state_if(
        &self,
        required: StateFlags,
        flags: StateFlags,
    ) -> Result<StateFlags, StateFlags> {
        let mut inner = self.lock();
        let prior = inner.flags;
        if !prior.contains(required) {
            return Err(prior);
        }
        self.commit(&mut inner, flags);
        Ok(prior)
    }

    pub fn snapshot(&self) -> StateFlags {
        self.lock().flags
    }

    /// Block while PAUSED is set and neither SINGLE_STEP nor STOPPED is,
    /// for at most `timeout`. Returns the register as last seen.
    pub fn wait_while_paused(&self, timeout: Duration) -> StateFlags {
        let guard = self.lock();
        let (guard, _) = self
            .resume
            .wait_timeout_while(guard, timeout, |inner| inner.flags.is_held())
            .unwrap_or_else(PoisonError::into_inner);
        guard.flags
    }

    /// A channel that receives the register after every change.
    pub fn subscribe(&self) -> Receiver<StateFlags> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.lock().subscribers.push(tx);
        rx
    }
}

/// Control surface for whoever drives the recorder (CLI, GUI).
#[derive(Clone, Default)]
pub struct Controller {
    state: Arc<RecordingState>,
}

impl Controller {
    pub fn new(state: Arc<RecordingState>) -> Self {
        Self { state }
    }

    pub fn recording_state(&self) -> &Arc<RecordingState> {
        &self.state
    }

    /// Begin a new run. Ignored unless the recorder is idle.
    pub fn start(&self) -> bool {
        match self
            .state
            .set_state_if(StateFlags::READY, StateFlags::RECORDING | StateFlags::STARTING)
        {
            Ok(_) => true,
            Err(flags) => {
                log::warn!("Start ignored, recorder is not idle ({:?})", flags);
                false
            }
        }
    }

    pub fn stop(&self) {
        self.state.merge_and_remove(
            StateFlags::STOPPED,
            StateFlags::RECORDING
                | StateFlags::STARTING
                | StateFlags::PAUSED
                | StateFlags::SINGLE_STEP,
        );
    }

    pub fn pause(&self) {
        self.state.merge(StateFlags::PAUSED);
    }

    pub fn resume(&self) {
        self.state.remove(StateFlags::PAUSED);
    }

    /// Capture exactly one frame while paused.
    pub fn step(&self) {
        self.state.merge(StateFlags::SINGLE_STEP);
    }

    pub fn toggle_pause(&self) {
        if self.state().contains(StateFlags::PAUSED) {
            self.resume();
        } else {
            self.pause();
        }
    }

    pub fn state(&self) -> StateFlags {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> Receiver<StateFlags> {
        self.state.subscribe()
    }
}
