//! Construction options and the builder that assembles a composite.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::dispatcher::{Composite, CompositeState};
use crate::error::CompositeError;
use crate::events::{COMPONENT_BUILDER, DEFAULT_MAX_RETAINED_EVENTS, OUTCOME_PASS};
use crate::modifier::CompositeModifier;
use crate::object_model::Target;

pub const DEFAULT_TRACE_ID: &str = "composite";

/// Options accepted when building a composite. Missing JSON fields take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeOptions {
    pub is_callable: bool,
    pub is_not_extensible: bool,
    pub trace_id: String,
    /// Bound on audit events kept between drains.
    pub max_retained_events: usize,
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            is_callable: false,
            is_not_extensible: false,
            trace_id: DEFAULT_TRACE_ID.to_string(),
            max_retained_events: DEFAULT_MAX_RETAINED_EVENTS,
        }
    }
}

impl CompositeOptions {
    pub fn callable() -> Self {
        Self {
            is_callable: true,
            ..Self::default()
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn from_json(json: &str) -> Result<Self, CompositeError> {
        let options: Self =
            serde_json::from_str(json).map_err(|err| CompositeError::InvalidOptions {
                reason: err.to_string(),
            })?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), CompositeError> {
        if self.trace_id.trim().is_empty() {
            return Err(CompositeError::InvalidOptions {
                reason: "trace_id must not be empty".to_string(),
            });
        }
        if self.max_retained_events == 0 {
            return Err(CompositeError::InvalidOptions {
                reason: "max_retained_events must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CompositeBuilder
// ---------------------------------------------------------------------------

/// Single construction path for a `(Composite, CompositeModifier)` pair.
#[derive(Debug, Clone)]
pub struct CompositeBuilder {
    options: CompositeOptions,
    initial_target: Option<Target>,
    initial_targets: Option<Vec<Target>>,
}

impl CompositeBuilder {
    pub fn new(options: CompositeOptions) -> Self {
        Self {
            options,
            initial_target: None,
            initial_targets: None,
        }
    }

    /// Start from one partial source.
    pub fn initial_target(mut self, target: Target) -> Self {
        self.initial_target = Some(target);
        self
    }

    /// Start from an ordered list; earlier elements take priority over later
    /// ones, all behind the primary target.
    pub fn initial_targets(mut self, targets: impl IntoIterator<Item = Target>) -> Self {
        self.initial_targets = Some(targets.into_iter().collect());
        self
    }

    /// Fails with `ConflictingInitialTargets` when both initial forms were
    /// supplied. Supplying neither builds an empty composite.
    pub fn build(self) -> Result<(Composite, CompositeModifier), CompositeError> {
        self.options.validate()?;
        let initial = match (self.initial_target, self.initial_targets) {
            (Some(_), Some(_)) => return Err(CompositeError::ConflictingInitialTargets),
            (Some(target), None) => vec![target],
            (None, Some(targets)) => targets,
            (None, None) => Vec::new(),
        };

        let mut state = CompositeState::new(&self.options, initial)?;
        let event = state.log.event(COMPONENT_BUILDER, "build", OUTCOME_PASS);
        state.log.emit(event);

        let state = Rc::new(RefCell::new(state));
        Ok((
            Composite::from_state(Rc::clone(&state)),
            CompositeModifier::from_state(state),
        ))
    }
}
