/*!
 * Per-device operation journal.
 *
 * A journal holds two append-only sequences: states, which span an interval,
 * and instant events. At most one state is open at any time.
 */
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::trace;

use labflow_core::types::{Params, Timestamp};

use crate::device::Result;

/// A named interval in the journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// State name
    pub name: String,
    /// State parameters
    pub params: Params,
    /// When the state was opened
    pub started_at: Timestamp,
    /// When the state was closed, if it has been
    pub ended_at: Option<Timestamp>,
}

impl StateRecord {
    /// Whether the state has not been closed yet
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// How long the state lasted, if it is closed
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// A named point in time in the journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantEvent {
    /// Event name
    pub name: String,
    /// Event parameters
    pub params: Params,
    /// When the event was recorded
    pub timestamp: Timestamp,
}

/// Structured snapshot of a journal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalExport {
    /// All states in insertion order
    pub states: Vec<StateRecord>,
    /// All events in insertion order
    pub events: Vec<InstantEvent>,
}

#[derive(Debug, Default)]
struct Journal {
    states: Vec<StateRecord>,
    events: Vec<InstantEvent>,
    // index into `states` of the open record
    current: Option<usize>,
}

impl Journal {
    fn close_current(&mut self, at: Timestamp) -> Option<StateRecord> {
        let index = self.current.take()?;
        let state = self.states.get_mut(index)?;
        state.ended_at = Some(at);
        Some(state.clone())
    }
}

/// Journal of one driver
#[derive(Debug, Default)]
pub struct History {
    journal: RwLock<Journal>,
}

impl History {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Journal> {
        self.journal.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Journal> {
        self.journal.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close any open state, then open a new one
    pub fn start_state(&self, name: impl Into<String>, params: Params) {
        let name = name.into();
        let now = Utc::now();
        let mut journal = self.write();

        if let Some(previous) = journal.close_current(now) {
            trace!(state = %previous.name, "Closed state");
        }

        journal.states.push(StateRecord {
            name: name.clone(),
            params,
            started_at: now,
            ended_at: None,
        });
        journal.current = Some(journal.states.len() - 1);
        trace!(state = %name, "Opened state");
    }

    /// Close the open state, if any, and return it
    pub fn end_current_state(&self) -> Option<StateRecord> {
        let closed = self.write().close_current(Utc::now());
        if let Some(state) = &closed {
            trace!(state = %state.name, "Closed state");
        }
        closed
    }

    /// Append an instant event
    pub fn record_event(&self, name: impl Into<String>, params: Params) {
        let event = InstantEvent {
            name: name.into(),
            params,
            timestamp: Utc::now(),
        };
        trace!(event = %event.name, "Recorded event");
        self.write().events.push(event);
    }

    /// The open state, if any
    pub fn current_state(&self) -> Option<StateRecord> {
        let journal = self.read();
        journal
            .current
            .and_then(|index| journal.states.get(index).cloned())
    }

    /// States in insertion order, optionally only those named `name`
    pub fn get_states(&self, name: Option<&str>) -> Vec<StateRecord> {
        self.read()
            .states
            .iter()
            .filter(|state| name.map_or(true, |n| state.name == n))
            .cloned()
            .collect()
    }

    /// Events in insertion order, optionally only those named `name`
    pub fn get_events(&self, name: Option<&str>) -> Vec<InstantEvent> {
        self.read()
            .events
            .iter()
            .filter(|event| name.map_or(true, |n| event.name == n))
            .cloned()
            .collect()
    }

    /// Snapshot both sequences
    pub fn export(&self) -> JournalExport {
        let journal = self.read();
        JournalExport {
            states: journal.states.clone(),
            events: journal.events.clone(),
        }
    }

    /// Render the snapshot as JSON
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let value = serde_json::to_value(self.export())
            .map_err(labflow_core::error::Error::from)?;
        Ok(value)
    }
}
