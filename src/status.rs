//! Shared status of the active run.
//!
//! The store has a single writer (the running [`ControlRun`]) and any number
//! of readers. Readers either poll [`StatusStore::state`] and
//! [`StatusStore::records_since`] or await state changes through
//! [`StatusStore::subscribe`].
//!
//! [`ControlRun`]: crate::reflow_controller::ControlRun

use core::cell::RefCell;
use core::fmt::{self, Write};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::watch::{Receiver, Watch};
use portable_atomic::{AtomicU32, Ordering};
use serde::{Serialize, Serializer};

use crate::log::*;
use crate::pid::PidParams;
use crate::profile::{AnchorPoint, Setpoint};
use crate::{round2, Error};

/// Number of concurrent [`StatusStore::subscribe`] receivers.
pub const STATUS_OBSERVERS: usize = 4;

pub type ErrorMessage = heapless::String<128>;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RunState {
    #[default]
    NotRunning,
    Running,
    Finished,
    Killed,
    Error(ErrorMessage),
}

impl RunState {
    /// Build an `Error` state, truncating the message to fit.
    pub fn error(message: impl fmt::Display) -> Self {
        let text = message.to_string();
        let mut msg = ErrorMessage::new();
        for c in text.chars() {
            if msg.push(c).is_err() {
                break;
            }
        }
        RunState::Error(msg)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Finished | RunState::Killed | RunState::Error(_)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotRunning => write!(f, "not running"),
            RunState::Running => write!(f, "running"),
            RunState::Finished => write!(f, "finished"),
            RunState::Killed => write!(f, "killed"),
            RunState::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl Serialize for RunState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut text = heapless::String::<160>::new();
        let _ = write!(text, "{}", self);
        serializer.serialize_str(&text)
    }
}

/// One tick of a run. Written once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    /// Seconds since the run started.
    pub elapsed_time: f32,
    pub target_temp: f32,
    pub current_temp: f32,
    /// Milliseconds on the embassy clock when the tick began.
    pub timestamp: u64,
    /// Seconds the heater is switched on during this tick.
    pub power_on_time: f32,
    pub run_state: RunState,
    pub mv: f32,
    pub proportional_term: f32,
    pub integral_term: f32,
    pub derivative_term: f32,
    pub accumulated_integral: f32,
}

impl StatusRecord {
    /// Copy with every float rounded to two decimals for display.
    pub fn rounded(&self) -> Self {
        Self {
            elapsed_time: round2(self.elapsed_time),
            target_temp: round2(self.target_temp),
            current_temp: round2(self.current_temp),
            timestamp: self.timestamp,
            power_on_time: round2(self.power_on_time),
            run_state: self.run_state.clone(),
            mv: round2(self.mv),
            proportional_term: round2(self.proportional_term),
            integral_term: round2(self.integral_term),
            derivative_term: round2(self.derivative_term),
            accumulated_integral: round2(self.accumulated_integral),
        }
    }
}

/// What the most recent run was started with.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub anchors: Vec<AnchorPoint>,
    pub params: PidParams,
    pub setpoints: Vec<Setpoint>,
}

struct Inner {
    state: RunState,
    records: Vec<StatusRecord>,
    recipe: Option<Recipe>,
}

pub struct StatusStore {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner>>,
    changes: Watch<CriticalSectionRawMutex, RunState, STATUS_OBSERVERS>,
    run_id: AtomicU32,
    /// Run the pending cancel request targets; 0 when there is none.
    cancel_for: AtomicU32,
}

impl StatusStore {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                state: RunState::NotRunning,
                records: Vec::new(),
                recipe: None,
            })),
            changes: Watch::new(),
            run_id: AtomicU32::new(0),
            cancel_for: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> RunState {
        self.inner.lock(|inner| inner.borrow().state.clone())
    }

    /// Publish a terminal state for the active run.
    ///
    /// Only `Running -> {Finished, Killed, Error}` is accepted; `Running` is
    /// entered through `start_run`. Returns whether the state changed.
    pub fn publish_state(&self, state: RunState) -> bool {
        let applied = self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.state.is_running() && state.is_terminal() {
                inner.state = state.clone();
                true
            } else {
                false
            }
        });

        if applied {
            self.changes.sender().send(state);
        } else {
            warn!("Ignoring state change to '{}'", state);
        }
        applied
    }

    pub fn append_record(&self, record: StatusRecord) {
        self.inner
            .lock(|inner| inner.borrow_mut().records.push(record));
    }

    pub fn records(&self) -> Vec<StatusRecord> {
        self.records_since(0)
    }

    /// Records from index `from` onwards, for incremental polling.
    pub fn records_since(&self, from: usize) -> Vec<StatusRecord> {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            inner.records.get(from..).map(<[_]>::to_vec).unwrap_or_default()
        })
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock(|inner| inner.borrow().records.len())
    }

    pub fn recipe(&self) -> Option<Recipe> {
        self.inner.lock(|inner| inner.borrow().recipe.clone())
    }

    /// Await state changes. `None` once all observer slots are taken.
    pub fn subscribe(
        &self,
    ) -> Option<Receiver<'_, CriticalSectionRawMutex, RunState, STATUS_OBSERVERS>> {
        self.changes.receiver()
    }

    /// Forget the last run: back to `NotRunning` with no records or recipe.
    pub fn clear(&self) -> Result<(), Error> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.state.is_running() {
                return Err(Error::RunInProgress);
            }
            inner.state = RunState::NotRunning;
            inner.records.clear();
            inner.recipe = None;
            Ok(())
        })?;
        self.changes.sender().send(RunState::NotRunning);
        Ok(())
    }

    /// Atomically claim the store for a new run.
    pub(crate) fn begin_run(&self, recipe: Recipe) -> Result<u32, Error> {
        let run_id = self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.state.is_running() {
                return Err(Error::AlreadyRunning);
            }
            inner.state = RunState::Running;
            inner.records.clear();
            inner.recipe = Some(recipe);
            self.cancel_for.store(0, Ordering::Release);
            Ok(self.run_id.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
        })?;
        self.changes.sender().send(RunState::Running);
        Ok(run_id)
    }

    pub(crate) fn current_run(&self) -> u32 {
        self.run_id.load(Ordering::Acquire)
    }

    /// Refused unless `run_id` is the active run and still `Running`.
    pub(crate) fn request_cancel(&self, run_id: u32) -> bool {
        self.inner.lock(|inner| {
            if self.current_run() != run_id || !inner.borrow().state.is_running() {
                return false;
            }
            self.cancel_for.store(run_id, Ordering::Release);
            true
        })
    }

    pub(crate) fn cancel_requested(&self, run_id: u32) -> bool {
        run_id != 0 && self.cancel_for.load(Ordering::Acquire) == run_id
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}
