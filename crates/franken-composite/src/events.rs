//! Structured audit events for composite operations.
//!
//! Events accumulate on the composite and are drained by the caller; nothing
//! is written anywhere on its own.  Every event carries the composite's
//! `trace_id`, the emitting component, and an outcome.
//!
//! The log retains at most `max_retained` events.  Once full, the oldest
//! event is dropped for each new one; per-event counters keep counting.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::object_model::PropertyKey;
use crate::trap::TrapKind;

pub const COMPONENT_DISPATCHER: &str = "composite_dispatcher";
pub const COMPONENT_MODIFIER: &str = "composite_modifier";
pub const COMPONENT_BUILDER: &str = "composite_builder";

pub const OUTCOME_PASS: &str = "pass";
pub const OUTCOME_OVERRIDE: &str = "override";
pub const OUTCOME_DEFAULT: &str = "default";
pub const OUTCOME_REFUSED: &str = "refused";
pub const OUTCOME_MISS: &str = "miss";
pub const OUTCOME_FAIL: &str = "fail";

/// Default bound on events retained between drains.
pub const DEFAULT_MAX_RETAINED_EVENTS: usize = 1024;

// ---------------------------------------------------------------------------
// CompositeEvent
// ---------------------------------------------------------------------------

/// One structured audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeEvent {
    pub trace_id: String,
    pub component: String,
    pub event: String,
    /// Trap name at the interception boundary, for dispatcher events.
    pub trap: Option<String>,
    pub key: Option<String>,
    pub outcome: String,
    pub error_code: Option<String>,
}

impl CompositeEvent {
    pub fn new(trace_id: &str, component: &str, event: &str, outcome: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            component: component.to_string(),
            event: event.to_string(),
            trap: None,
            key: None,
            outcome: outcome.to_string(),
            error_code: None,
        }
    }

    pub fn with_trap(mut self, trap: TrapKind) -> Self {
        self.trap = Some(trap.as_str().to_string());
        self
    }

    pub fn with_key(mut self, key: Option<&PropertyKey>) -> Self {
        self.key = key.map(ToString::to_string);
        self
    }

    pub fn with_error_code(mut self, code: &str) -> Self {
        self.error_code = Some(code.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// Bounded event buffer plus per-event counters.
#[derive(Debug, Clone)]
pub(crate) struct EventLog {
    trace_id: String,
    events: VecDeque<CompositeEvent>,
    max_retained: usize,
    dropped: u64,
    event_counts: BTreeMap<String, u64>,
}

impl EventLog {
    pub(crate) fn new(trace_id: &str, max_retained: usize) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            events: VecDeque::new(),
            max_retained: max_retained.max(1),
            dropped: 0,
            event_counts: BTreeMap::new(),
        }
    }

    pub(crate) fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Start an event stamped with this log's trace id.
    pub(crate) fn event(&self, component: &str, event: &str, outcome: &str) -> CompositeEvent {
        CompositeEvent::new(&self.trace_id, component, event, outcome)
    }

    pub(crate) fn emit(&mut self, event: CompositeEvent) {
        *self.event_counts.entry(event.event.clone()).or_insert(0) += 1;
        if self.events.len() >= self.max_retained {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub(crate) fn drain(&mut self) -> Vec<CompositeEvent> {
        self.events.drain(..).collect()
    }

    /// Events evicted before anyone drained them.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn counts(&self) -> &BTreeMap<String, u64> {
        &self.event_counts
    }
}
