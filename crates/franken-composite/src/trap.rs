//! Interception traps: the operation set a composite exposes, and the
//! override tables callers stack on top of the default behavior.
//!
//! `TrapKind::as_str` yields the handler names used at the interception
//! boundary (`get`, `set`, `deleteProperty`, ...).  They are part of the wire
//! format and must not change.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::dispatcher::Composite;
use crate::merge_engine::MergeEntry;
use crate::object_model::{PropertyDescriptor, PropertyKey, Target, Value};

// ---------------------------------------------------------------------------
// TrapKind — the fundamental operations
// ---------------------------------------------------------------------------

/// Fundamental operations of a composite object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrapKind {
    Get,
    Set,
    DeleteProperty,
    Has,
    OwnKeys,
    GetOwnPropertyDescriptor,
    DefineProperty,
    GetPrototypeOf,
    SetPrototypeOf,
    IsExtensible,
    PreventExtensions,
    Apply,
}

impl TrapKind {
    pub const ALL: [TrapKind; 12] = [
        Self::Get,
        Self::Set,
        Self::DeleteProperty,
        Self::Has,
        Self::OwnKeys,
        Self::GetOwnPropertyDescriptor,
        Self::DefineProperty,
        Self::GetPrototypeOf,
        Self::SetPrototypeOf,
        Self::IsExtensible,
        Self::PreventExtensions,
        Self::Apply,
    ];

    /// Handler name at the interception boundary.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::DeleteProperty => "deleteProperty",
            Self::Has => "has",
            Self::OwnKeys => "ownKeys",
            Self::GetOwnPropertyDescriptor => "getOwnPropertyDescriptor",
            Self::DefineProperty => "defineProperty",
            Self::GetPrototypeOf => "getPrototypeOf",
            Self::SetPrototypeOf => "setPrototypeOf",
            Self::IsExtensible => "isExtensible",
            Self::PreventExtensions => "preventExtensions",
            Self::Apply => "apply",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Operations whose default path is refused on a non-extensible composite.
    pub fn refused_when_sealed(self) -> bool {
        matches!(
            self,
            Self::Set | Self::DeleteProperty | Self::DefineProperty | Self::SetPrototypeOf
        )
    }
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TrapFn — one override implementation
// ---------------------------------------------------------------------------

pub type GetTrap = dyn Fn(&Composite, &PropertyKey) -> Value;
pub type SetTrap = dyn Fn(&Composite, &PropertyKey, &Value) -> bool;
pub type KeyPredicateTrap = dyn Fn(&Composite, &PropertyKey) -> bool;
pub type OwnKeysTrap = dyn Fn(&Composite) -> Vec<PropertyKey>;
pub type DescribeTrap = dyn Fn(&Composite, &PropertyKey) -> Option<PropertyDescriptor>;
pub type DefineTrap = dyn Fn(&Composite, &PropertyKey, &PropertyDescriptor) -> bool;
pub type GetPrototypeTrap = dyn Fn(&Composite) -> Option<Target>;
pub type SetPrototypeTrap = dyn Fn(&Composite, Option<&Target>) -> bool;
pub type FlagTrap = dyn Fn(&Composite) -> bool;
pub type ApplyTrap = dyn Fn(&Composite, &[Value]) -> Value;

/// An override for a single operation. Every trap receives the composite it
/// serves; use [`Reflect`](crate::dispatcher::Reflect) from inside a trap to
/// reach the default behavior.
#[derive(Clone)]
pub enum TrapFn {
    Get(Rc<GetTrap>),
    Set(Rc<SetTrap>),
    DeleteProperty(Rc<KeyPredicateTrap>),
    Has(Rc<KeyPredicateTrap>),
    OwnKeys(Rc<OwnKeysTrap>),
    GetOwnPropertyDescriptor(Rc<DescribeTrap>),
    DefineProperty(Rc<DefineTrap>),
    GetPrototypeOf(Rc<GetPrototypeTrap>),
    SetPrototypeOf(Rc<SetPrototypeTrap>),
    IsExtensible(Rc<FlagTrap>),
    PreventExtensions(Rc<FlagTrap>),
    Apply(Rc<ApplyTrap>),
}

impl TrapFn {
    pub fn kind(&self) -> TrapKind {
        match self {
            Self::Get(_) => TrapKind::Get,
            Self::Set(_) => TrapKind::Set,
            Self::DeleteProperty(_) => TrapKind::DeleteProperty,
            Self::Has(_) => TrapKind::Has,
            Self::OwnKeys(_) => TrapKind::OwnKeys,
            Self::GetOwnPropertyDescriptor(_) => TrapKind::GetOwnPropertyDescriptor,
            Self::DefineProperty(_) => TrapKind::DefineProperty,
            Self::GetPrototypeOf(_) => TrapKind::GetPrototypeOf,
            Self::SetPrototypeOf(_) => TrapKind::SetPrototypeOf,
            Self::IsExtensible(_) => TrapKind::IsExtensible,
            Self::PreventExtensions(_) => TrapKind::PreventExtensions,
            Self::Apply(_) => TrapKind::Apply,
        }
    }
}

impl fmt::Debug for TrapFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrapFn({})", self.kind())
    }
}

// ---------------------------------------------------------------------------
// TrapTable — a partial handler, merged by priority
// ---------------------------------------------------------------------------

/// A partial set of trap overrides. Clones share identity, so the handle
/// passed to `add_proxy_handler_override` is the one to pass to
/// `remove_proxy_override`.
#[derive(Clone, Default)]
pub struct TrapTable {
    traps: Rc<BTreeMap<TrapKind, TrapFn>>,
}

impl TrapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the override for `trap.kind()`.
    ///
    /// Call while building the table; a table already shared with a composite
    /// is copied first and the copy is a different entry.
    pub fn with(mut self, trap: TrapFn) -> Self {
        Rc::make_mut(&mut self.traps).insert(trap.kind(), trap);
        self
    }

    pub fn on_get(self, f: impl Fn(&Composite, &PropertyKey) -> Value + 'static) -> Self {
        self.with(TrapFn::Get(Rc::new(f)))
    }

    pub fn on_set(
        self,
        f: impl Fn(&Composite, &PropertyKey, &Value) -> bool + 'static,
    ) -> Self {
        self.with(TrapFn::Set(Rc::new(f)))
    }

    pub fn on_delete_property(
        self,
        f: impl Fn(&Composite, &PropertyKey) -> bool + 'static,
    ) -> Self {
        self.with(TrapFn::DeleteProperty(Rc::new(f)))
    }

    pub fn on_has(self, f: impl Fn(&Composite, &PropertyKey) -> bool + 'static) -> Self {
        self.with(TrapFn::Has(Rc::new(f)))
    }

    pub fn on_own_keys(self, f: impl Fn(&Composite) -> Vec<PropertyKey> + 'static) -> Self {
        self.with(TrapFn::OwnKeys(Rc::new(f)))
    }

    pub fn on_get_own_property_descriptor(
        self,
        f: impl Fn(&Composite, &PropertyKey) -> Option<PropertyDescriptor> + 'static,
    ) -> Self {
        self.with(TrapFn::GetOwnPropertyDescriptor(Rc::new(f)))
    }

    pub fn on_define_property(
        self,
        f: impl Fn(&Composite, &PropertyKey, &PropertyDescriptor) -> bool + 'static,
    ) -> Self {
        self.with(TrapFn::DefineProperty(Rc::new(f)))
    }

    pub fn on_get_prototype_of(self, f: impl Fn(&Composite) -> Option<Target> + 'static) -> Self {
        self.with(TrapFn::GetPrototypeOf(Rc::new(f)))
    }

    pub fn on_set_prototype_of(
        self,
        f: impl Fn(&Composite, Option<&Target>) -> bool + 'static,
    ) -> Self {
        self.with(TrapFn::SetPrototypeOf(Rc::new(f)))
    }

    pub fn on_is_extensible(self, f: impl Fn(&Composite) -> bool + 'static) -> Self {
        self.with(TrapFn::IsExtensible(Rc::new(f)))
    }

    pub fn on_prevent_extensions(self, f: impl Fn(&Composite) -> bool + 'static) -> Self {
        self.with(TrapFn::PreventExtensions(Rc::new(f)))
    }

    pub fn on_apply(self, f: impl Fn(&Composite, &[Value]) -> Value + 'static) -> Self {
        self.with(TrapFn::Apply(Rc::new(f)))
    }

    pub fn get(&self, kind: TrapKind) -> Option<&TrapFn> {
        self.traps.get(&kind)
    }

    pub fn kinds(&self) -> Vec<TrapKind> {
        self.traps.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.traps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traps.is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.traps, &other.traps)
    }
}

impl fmt::Debug for TrapTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.traps.keys()).finish()
    }
}

impl MergeEntry for TrapTable {
    type Key = TrapKind;
    type Value = TrapFn;

    fn same_entry(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }

    fn merge_pairs(&self) -> Vec<(TrapKind, TrapFn)> {
        self.traps
            .iter()
            .map(|(kind, trap)| (*kind, trap.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
