//! Restructuring handle for a live composite.
//!
//! `CompositeModifier` shares state with the `Composite` it was built with.
//! Each mutation reorders one of the two merge engines and recomputes its view
//! before returning, so the next operation on the composite already sees it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::dispatcher::{Composite, CompositeState};
use crate::error::REFUSED_PRIMARY_REMOVAL;
use crate::events::{COMPONENT_MODIFIER, OUTCOME_MISS, OUTCOME_PASS, OUTCOME_REFUSED};
use crate::object_model::Target;
use crate::trap::TrapTable;

#[derive(Clone)]
pub struct CompositeModifier {
    state: Rc<RefCell<CompositeState>>,
}

impl CompositeModifier {
    pub(crate) fn from_state(state: Rc<RefCell<CompositeState>>) -> Self {
        Self { state }
    }

    /// Handle to the composite this modifier restructures.
    pub fn composite(&self) -> Composite {
        Composite::from_state(Rc::clone(&self.state))
    }

    // -- data targets ---------------------------------------------------------

    /// Lowest priority: contributes only keys nothing else defines.
    pub fn add_fallback_target(&self, target: Target) {
        let mut state = self.state.borrow_mut();
        state.data.add_fallback(target);
        record(&mut state, "add_fallback", OUTCOME_PASS, None);
    }

    /// Highest priority after the primary target.
    pub fn add_override_target(&self, target: Target) {
        let mut state = self.state.borrow_mut();
        state.data.add_override(target);
        record(&mut state, "add_override", OUTCOME_PASS, None);
    }

    /// Remove one occurrence of `target`, matched by identity.
    ///
    /// Returns `false` when the target is not registered. The primary target
    /// is never removable.
    pub fn remove_target(&self, target: &Target) -> bool {
        let mut state = self.state.borrow_mut();
        if target.ptr_eq(&state.primary) {
            record(
                &mut state,
                "remove",
                OUTCOME_REFUSED,
                Some(REFUSED_PRIMARY_REMOVAL),
            );
            return false;
        }
        let removed = state.data.remove_entry(target);
        if removed {
            record(&mut state, "remove", OUTCOME_PASS, None);
        } else {
            record(&mut state, "remove_miss", OUTCOME_MISS, None);
        }
        removed
    }

    /// Priority-ordered copy of the target list, primary first.
    pub fn get_all_targets(&self) -> Vec<Target> {
        self.state.borrow().data.current_list()
    }

    // -- trap tables ----------------------------------------------------------

    pub fn add_proxy_handler_override(&self, table: TrapTable) {
        let mut state = self.state.borrow_mut();
        state.traps.add_override(table);
        record(&mut state, "add_trap_override", OUTCOME_PASS, None);
    }

    pub fn add_proxy_handler_fallback(&self, table: TrapTable) {
        let mut state = self.state.borrow_mut();
        state.traps.add_fallback(table);
        record(&mut state, "add_trap_fallback", OUTCOME_PASS, None);
    }

    /// Remove one occurrence of `table`, matched by identity.
    pub fn remove_proxy_override(&self, table: &TrapTable) -> bool {
        let mut state = self.state.borrow_mut();
        let removed = state.traps.remove_entry(table);
        if removed {
            record(&mut state, "remove_trap", OUTCOME_PASS, None);
        } else {
            record(&mut state, "remove_trap_miss", OUTCOME_MISS, None);
        }
        removed
    }

    pub fn get_all_trap_tables(&self) -> Vec<TrapTable> {
        self.state.borrow().traps.current_list()
    }

    /// Re-merge after targets were mutated directly rather than through the
    /// composite.
    pub fn force_update(&self) {
        let mut state = self.state.borrow_mut();
        state.data.force_update();
        state.traps.force_update();
        record(&mut state, "force_update", OUTCOME_PASS, None);
    }
}

fn record(state: &mut CompositeState, event: &str, outcome: &str, error_code: Option<&str>) {
    let mut entry = state.log.event(COMPONENT_MODIFIER, event, outcome);
    if let Some(code) = error_code {
        entry = entry.with_error_code(code);
    }
    state.log.emit(entry);
}

impl fmt::Debug for CompositeModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeModifier")
            .field("composite", &self.composite())
            .finish()
    }
}
