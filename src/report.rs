//! JSON status lines for observers.

use heapless::String;
use serde::Serialize;

use crate::status::{RunState, StatusRecord};

pub const LINE_CAPACITY: usize = 512;

pub type StatusLine = String<LINE_CAPACITY>;

#[derive(Debug, Serialize)]
struct StateSummary<'a> {
    run_state: &'a RunState,
    records: usize,
}

/// One record as a JSON object, values rounded to two decimals.
pub fn record_line(record: &StatusRecord) -> Result<StatusLine, serde_json_core::ser::Error> {
    serde_json_core::to_string(&record.rounded())
}

/// Current state and how many records the run has produced.
pub fn state_line(state: &RunState, records: usize) -> Result<StatusLine, serde_json_core::ser::Error> {
    serde_json_core::to_string(&StateSummary {
        run_state: state,
        records,
    })
}
