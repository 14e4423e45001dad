//! Interception dispatcher: the virtual object callers interact with.
//!
//! A `Composite` owns two merge engines.  The data engine merges `Target`s
//! with index 0 reserved for the primary target, which receives every write
//! and define made through the composite.  The trap engine merges `TrapTable`s
//! with no reserved slot.
//!
//! Every operation first consults the merged trap table.  A registered
//! override runs and its result is returned verbatim; otherwise the default
//! behavior in [`Reflect`] runs against the merged data, honoring the
//! tombstone set, the extensibility flag and the prototype reference kept by
//! [`Bookkeeping`].
//!
//! Mutating defaults on a non-extensible composite return `false` rather than
//! erroring.  The default `apply` never forwards call arguments or a receiver.
//!
//! No internal borrow is held while caller code (trap overrides, getters,
//! native functions) runs, so such code may call back into the composite.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use crate::config::CompositeOptions;
use crate::error::{CompositeError, REFUSED_NOT_EXTENSIBLE};
use crate::events::{
    COMPONENT_DISPATCHER, CompositeEvent, EventLog, OUTCOME_DEFAULT, OUTCOME_FAIL,
    OUTCOME_OVERRIDE, OUTCOME_REFUSED,
};
use crate::merge_engine::{CombinedView, MergeEngine, MergeEntry, NoHook, RecomputeHook};
use crate::object_model::{
    NativeFunction, PropertyDescriptor, PropertyKey, Target, Value, canonical_key_order,
    lookup_in_chain,
};
use crate::snapshot::CompositeSnapshot;
use crate::trap::{TrapFn, TrapKind, TrapTable};

/// Data overrides are inserted behind the primary target.
pub const DATA_RESERVED_INSERT_AT: usize = 1;
/// Trap overrides have no pinned prefix.
pub const TRAP_RESERVED_INSERT_AT: usize = 0;

// ---------------------------------------------------------------------------
// Target as a merge entry
// ---------------------------------------------------------------------------

impl MergeEntry for Target {
    type Key = PropertyKey;
    type Value = PropertyDescriptor;

    fn same_entry(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }

    fn merge_pairs(&self) -> Vec<(PropertyKey, PropertyDescriptor)> {
        self.own_properties()
    }
}

// ---------------------------------------------------------------------------
// Bookkeeping — state kept beside the data merge
// ---------------------------------------------------------------------------

/// Shape stamped onto the combined data view after every recompute.
#[derive(Debug, Clone, Default)]
pub struct ObjectShape {
    pub prototype: Option<Target>,
    pub extensible: bool,
    pub deleted: BTreeSet<PropertyKey>,
}

/// Dispatcher state that lives outside the entry list.
#[derive(Debug, Clone)]
pub struct Bookkeeping {
    deleted: BTreeSet<PropertyKey>,
    extensible: bool,
    prototype: Option<Target>,
}

impl Bookkeeping {
    pub fn new(extensible: bool, prototype: Option<Target>) -> Self {
        Self {
            deleted: BTreeSet::new(),
            extensible,
            prototype,
        }
    }

    pub fn is_deleted(&self, key: &PropertyKey) -> bool {
        self.deleted.contains(key)
    }

    pub fn deleted(&self) -> &BTreeSet<PropertyKey> {
        &self.deleted
    }

    pub fn extensible(&self) -> bool {
        self.extensible
    }

    pub fn prototype(&self) -> Option<&Target> {
        self.prototype.as_ref()
    }
}

impl RecomputeHook<PropertyKey, PropertyDescriptor> for Bookkeeping {
    type Shape = ObjectShape;

    fn on_recompute(&mut self, view: &mut CombinedView<PropertyKey, PropertyDescriptor, ObjectShape>) {
        let shape = view.shape_mut();
        shape.prototype = self.prototype.clone();
        shape.extensible = self.extensible;
        shape.deleted = self.deleted.clone();
    }
}

/// Materialized data view of a composite.
pub type DataView = CombinedView<PropertyKey, PropertyDescriptor, ObjectShape>;

// ---------------------------------------------------------------------------
// CompositeState — everything one composite owns
// ---------------------------------------------------------------------------

pub(crate) struct CompositeState {
    pub(crate) data: MergeEngine<Target, Bookkeeping>,
    pub(crate) traps: MergeEngine<TrapTable>,
    pub(crate) primary: Target,
    pub(crate) callable: bool,
    pub(crate) log: EventLog,
}

impl CompositeState {
    /// `initial` follows the primary in order, so its last element has the
    /// lowest priority.
    pub(crate) fn new(
        options: &CompositeOptions,
        initial: Vec<Target>,
    ) -> Result<Self, CompositeError> {
        let primary = if options.is_callable {
            Target::function(NativeFunction::new("composite", |_| Value::Undefined))
        } else {
            Target::new()
        };
        let bookkeeping = Bookkeeping::new(!options.is_not_extensible, primary.prototype());

        let mut entries = Vec::with_capacity(initial.len() + 1);
        entries.push(primary.clone());
        entries.extend(initial);

        Ok(Self {
            data: MergeEngine::new(entries, DATA_RESERVED_INSERT_AT, bookkeeping)?,
            traps: MergeEngine::new(Vec::new(), TRAP_RESERVED_INSERT_AT, NoHook)?,
            primary,
            callable: options.is_callable,
            log: EventLog::new(&options.trace_id, options.max_retained_events),
        })
    }

    pub(crate) fn extensible(&self) -> bool {
        self.data.hook().extensible
    }
}

// ---------------------------------------------------------------------------
// Composite — the virtual object
// ---------------------------------------------------------------------------

/// The composed object (or function, when built callable).
///
/// Clones are further handles to the same composite.
#[derive(Clone)]
pub struct Composite {
    state: Rc<RefCell<CompositeState>>,
}

impl Composite {
    pub(crate) fn from_state(state: Rc<RefCell<CompositeState>>) -> Self {
        Self { state }
    }

    pub fn is_callable(&self) -> bool {
        self.state.borrow().callable
    }

    /// The pinned target that receives writes and defines.
    pub fn primary_target(&self) -> Target {
        self.state.borrow().primary.clone()
    }

    pub fn trace_id(&self) -> String {
        self.state.borrow().log.trace_id().to_string()
    }

    /// Read-only copy of the materialized data view.
    pub fn combined_view(&self) -> DataView {
        self.state.borrow().data.combined().clone()
    }

    // -- operation table ----------------------------------------------------

    pub fn get(&self, key: impl Into<PropertyKey>) -> Value {
        let key = key.into().normalized();
        match self.trap(TrapKind::Get, Some(&key)) {
            Some(TrapFn::Get(trap)) => trap(self, &key),
            _ => Reflect::get(self, &key),
        }
    }

    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> bool {
        let key = key.into().normalized();
        let value = value.into();
        match self.trap(TrapKind::Set, Some(&key)) {
            Some(TrapFn::Set(trap)) => trap(self, &key, &value),
            _ => Reflect::set(self, &key, value),
        }
    }

    pub fn delete_property(&self, key: impl Into<PropertyKey>) -> bool {
        let key = key.into().normalized();
        match self.trap(TrapKind::DeleteProperty, Some(&key)) {
            Some(TrapFn::DeleteProperty(trap)) => trap(self, &key),
            _ => Reflect::delete_property(self, &key),
        }
    }

    pub fn has(&self, key: impl Into<PropertyKey>) -> bool {
        let key = key.into().normalized();
        match self.trap(TrapKind::Has, Some(&key)) {
            Some(TrapFn::Has(trap)) => trap(self, &key),
            _ => Reflect::has(self, &key),
        }
    }

    pub fn own_keys(&self) -> Vec<PropertyKey> {
        match self.trap(TrapKind::OwnKeys, None) {
            Some(TrapFn::OwnKeys(trap)) => trap(self),
            _ => Reflect::own_keys(self),
        }
    }

    pub fn get_own_property_descriptor(
        &self,
        key: impl Into<PropertyKey>,
    ) -> Option<PropertyDescriptor> {
        let key = key.into().normalized();
        match self.trap(TrapKind::GetOwnPropertyDescriptor, Some(&key)) {
            Some(TrapFn::GetOwnPropertyDescriptor(trap)) => trap(self, &key),
            _ => Reflect::get_own_property_descriptor(self, &key),
        }
    }

    pub fn define_property(&self, key: impl Into<PropertyKey>, desc: PropertyDescriptor) -> bool {
        let key = key.into().normalized();
        match self.trap(TrapKind::DefineProperty, Some(&key)) {
            Some(TrapFn::DefineProperty(trap)) => trap(self, &key, &desc),
            _ => Reflect::define_property(self, &key, desc),
        }
    }

    pub fn get_prototype_of(&self) -> Option<Target> {
        match self.trap(TrapKind::GetPrototypeOf, None) {
            Some(TrapFn::GetPrototypeOf(trap)) => trap(self),
            _ => Reflect::get_prototype_of(self),
        }
    }

    pub fn set_prototype_of(&self, proto: Option<Target>) -> bool {
        match self.trap(TrapKind::SetPrototypeOf, None) {
            Some(TrapFn::SetPrototypeOf(trap)) => trap(self, proto.as_ref()),
            _ => Reflect::set_prototype_of(self, proto.as_ref()),
        }
    }

    pub fn is_extensible(&self) -> bool {
        match self.trap(TrapKind::IsExtensible, None) {
            Some(TrapFn::IsExtensible(trap)) => trap(self),
            _ => Reflect::is_extensible(self),
        }
    }

    pub fn prevent_extensions(&self) -> bool {
        match self.trap(TrapKind::PreventExtensions, None) {
            Some(TrapFn::PreventExtensions(trap)) => trap(self),
            _ => Reflect::prevent_extensions(self),
        }
    }

    /// Invoke a callable composite. `args` reach an `apply` override only;
    /// the default invocation passes none.
    pub fn call(&self, args: &[Value]) -> Result<Value, CompositeError> {
        if !self.is_callable() {
            let err = CompositeError::NotCallable;
            let mut state = self.state.borrow_mut();
            let record = state
                .log
                .event(COMPONENT_DISPATCHER, "trap_default", OUTCOME_FAIL)
                .with_trap(TrapKind::Apply)
                .with_error_code(err.error_code());
            state.log.emit(record);
            return Err(err);
        }
        match self.trap(TrapKind::Apply, None) {
            Some(TrapFn::Apply(trap)) => Ok(trap(self, args)),
            _ => Reflect::apply(self),
        }
    }

    // -- introspection --------------------------------------------------------

    pub fn snapshot(&self) -> CompositeSnapshot {
        CompositeSnapshot::capture(&self.state.borrow())
    }

    /// Drain retained events, oldest first.
    pub fn drain_events(&self) -> Vec<CompositeEvent> {
        self.state.borrow_mut().log.drain()
    }

    /// Events evicted from the bounded log without being drained.
    pub fn dropped_events(&self) -> u64 {
        self.state.borrow().log.dropped()
    }

    /// Event counters.
    pub fn event_counts(&self) -> BTreeMap<String, u64> {
        self.state.borrow().log.counts().clone()
    }

    // -- internal -------------------------------------------------------------

    /// Look up the effective override for `kind` and record the dispatch.
    /// The state borrow ends before the caller runs the trap.
    fn trap(&self, kind: TrapKind, key: Option<&PropertyKey>) -> Option<TrapFn> {
        let mut state = self.state.borrow_mut();
        let trap = state.traps.combined().get(&kind).cloned();
        let record = match &trap {
            Some(_) => state
                .log
                .event(COMPONENT_DISPATCHER, "trap_override", OUTCOME_OVERRIDE),
            None if kind.refused_when_sealed() && !state.extensible() => state
                .log
                .event(COMPONENT_DISPATCHER, "trap_default", OUTCOME_REFUSED)
                .with_error_code(REFUSED_NOT_EXTENSIBLE),
            None => state
                .log
                .event(COMPONENT_DISPATCHER, "trap_default", OUTCOME_DEFAULT),
        };
        state.log.emit(record.with_trap(kind).with_key(key));
        trap
    }
}

impl fmt::Debug for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_borrow() {
            Ok(state) => f
                .debug_struct("Composite")
                .field("trace_id", &state.log.trace_id())
                .field("targets", &state.data.entry_count())
                .field("trap_tables", &state.traps.entry_count())
                .field("callable", &state.callable)
                .finish(),
            Err(_) => f.write_str("Composite { <busy> }"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reflect — default behavior of every operation
// ---------------------------------------------------------------------------

/// Default semantics of each operation, bypassing trap overrides.
///
/// Overrides call these to fall through to the merge-aware behavior, the way
/// a handler calls `Reflect.get(target, key)`.
///
/// Callers may pass un-normalized keys, so each method normalizes its own.
pub struct Reflect;

impl Reflect {
    /// Tombstoned keys read as `Undefined`. Otherwise the merged value, then
    /// the prototype chain. Getters run with no arguments.
    pub fn get(composite: &Composite, key: &PropertyKey) -> Value {
        let key = key.clone().normalized();
        let descriptor = {
            let state = composite.state.borrow();
            let book = state.data.hook();
            if book.is_deleted(&key) {
                return Value::Undefined;
            }
            match state.data.combined().get(&key) {
                Some(desc) => Some(desc.clone()),
                None => lookup_in_chain(book.prototype.clone(), &key),
            }
        };
        match descriptor {
            Some(PropertyDescriptor::Data { value, .. }) => value,
            Some(PropertyDescriptor::Accessor {
                get: Some(getter), ..
            }) => getter.call(&[]),
            _ => Value::Undefined,
        }
    }

    /// Write into the primary target. A successful write clears any
    /// tombstone for `key`; a rejected one leaves it in place.
    pub fn set(composite: &Composite, key: &PropertyKey, value: Value) -> bool {
        let key = key.clone().normalized();
        let mut state = composite.state.borrow_mut();
        if !state.extensible() {
            return false;
        }
        let written = state.primary.set(key.clone(), value);
        if written {
            state.data.hook_mut().deleted.remove(&key);
        }
        state.data.force_update();
        written
    }

    /// Hide `key` without touching any target.
    pub fn delete_property(composite: &Composite, key: &PropertyKey) -> bool {
        let key = key.clone().normalized();
        let mut state = composite.state.borrow_mut();
        if !state.extensible() {
            return false;
        }
        state.data.hook_mut().deleted.insert(key);
        state.data.force_update();
        true
    }

    pub fn has(composite: &Composite, key: &PropertyKey) -> bool {
        let key = key.clone().normalized();
        let state = composite.state.borrow();
        let book = state.data.hook();
        if book.is_deleted(&key) {
            return false;
        }
        state.data.combined().contains_key(&key)
            || lookup_in_chain(book.prototype.clone(), &key).is_some()
    }

    /// Merged keys minus tombstones, in canonical order.
    pub fn own_keys(composite: &Composite) -> Vec<PropertyKey> {
        let state = composite.state.borrow();
        let book = state.data.hook();
        canonical_key_order(
            state
                .data
                .combined()
                .keys()
                .filter(|key| !book.is_deleted(key))
                .cloned(),
        )
    }

    pub fn get_own_property_descriptor(
        composite: &Composite,
        key: &PropertyKey,
    ) -> Option<PropertyDescriptor> {
        let key = key.clone().normalized();
        let state = composite.state.borrow();
        if state.data.hook().is_deleted(&key) {
            return None;
        }
        state.data.combined().get(&key).cloned()
    }

    /// Apply `desc` to the primary target under ordinary define rules.
    pub fn define_property(
        composite: &Composite,
        key: &PropertyKey,
        desc: PropertyDescriptor,
    ) -> bool {
        let key = key.clone().normalized();
        let mut state = composite.state.borrow_mut();
        if !state.extensible() {
            return false;
        }
        let accepted = state.primary.define_own_property(key.clone(), desc);
        if accepted {
            state.data.hook_mut().deleted.remove(&key);
        }
        state.data.force_update();
        accepted
    }

    pub fn get_prototype_of(composite: &Composite) -> Option<Target> {
        composite.state.borrow().data.hook().prototype.clone()
    }

    pub fn set_prototype_of(composite: &Composite, proto: Option<&Target>) -> bool {
        let mut state = composite.state.borrow_mut();
        if !state.extensible() {
            return false;
        }
        state.data.hook_mut().prototype = proto.cloned();
        state.data.force_update();
        true
    }

    pub fn is_extensible(composite: &Composite) -> bool {
        composite.state.borrow().extensible()
    }

    /// One-way: there is no operation that makes a composite extensible again.
    pub fn prevent_extensions(composite: &Composite) -> bool {
        let mut state = composite.state.borrow_mut();
        state.data.hook_mut().extensible = false;
        state.data.force_update();
        true
    }

    /// Invoke the first callable target after the primary, falling back to
    /// the primary. No arguments and no receiver are forwarded.
    pub fn apply(composite: &Composite) -> Result<Value, CompositeError> {
        let function = {
            let state = composite.state.borrow();
            if !state.callable {
                return Err(CompositeError::NotCallable);
            }
            state
                .data
                .entries()
                .iter()
                .filter(|target| !target.ptr_eq(&state.primary))
                .find_map(Target::callable)
                .or_else(|| state.primary.callable())
        };
        function
            .map(|f| f.call(&[]))
            .ok_or(CompositeError::NotCallable)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
