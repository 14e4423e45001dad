//! Object model for composite targets: property keys, values, descriptors,
//! native functions, and the shared `Target` entries a composite merges.
//!
//! Key features:
//!
//! - **Property keys**: strings, numeric indices (normalized to strings before
//!   any lookup), and symbols
//! - **Property descriptors**: data vs accessor, configurable/enumerable/writable
//! - **Targets**: shared, identity-compared partial objects with ordinary
//!   `[[DefineOwnProperty]]`, `[[Set]]` and `[[Delete]]` semantics
//! - **Native functions**: callable values and callable targets
//!
//! `BTreeMap` for deterministic ordering.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PropertyKey — string, index or symbol
// ---------------------------------------------------------------------------

/// Unique symbol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// A property key.
///
/// `Index` exists so callers can address numeric-like properties directly;
/// every lookup normalizes it to the equivalent `String` key first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    /// String key.
    String(String),
    /// Numeric key.
    Index(u64),
    /// Symbol key.
    Symbol(SymbolId),
}

impl PropertyKey {
    /// Coerce numeric keys to their textual form. Symbols are left untouched.
    pub fn normalized(self) -> Self {
        match self {
            Self::Index(n) => Self::String(n.to_string()),
            other => other,
        }
    }

    /// Is this a symbol key?
    pub fn is_symbol(&self) -> bool {
        matches!(self, Self::Symbol(_))
    }

    /// Canonical array index, if this key is one (`"7"` yes, `"07"` no).
    pub fn array_index(&self) -> Option<u64> {
        match self {
            Self::Index(n) => Some(*n),
            Self::String(s) => s.parse::<u64>().ok().filter(|n| n.to_string() == *s),
            Self::Symbol(_) => None,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Index(n) => write!(f, "{n}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for PropertyKey {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<u64> for PropertyKey {
    fn from(n: u64) -> Self {
        Self::Index(n)
    }
}

impl From<u32> for PropertyKey {
    fn from(n: u32) -> Self {
        Self::Index(u64::from(n))
    }
}

impl From<SymbolId> for PropertyKey {
    fn from(id: SymbolId) -> Self {
        Self::Symbol(id)
    }
}

impl From<&PropertyKey> for PropertyKey {
    fn from(key: &PropertyKey) -> Self {
        key.clone()
    }
}

/// Order keys the way `[[OwnPropertyKeys]]` reports them: integer indices
/// (sorted numerically), then string keys (BTreeMap order), then symbols.
/// Keys are normalized on the way through.
pub fn canonical_key_order(keys: impl IntoIterator<Item = PropertyKey>) -> Vec<PropertyKey> {
    let mut int_keys: Vec<(u64, PropertyKey)> = Vec::new();
    let mut str_keys: BTreeSet<PropertyKey> = BTreeSet::new();
    let mut sym_keys: BTreeSet<PropertyKey> = BTreeSet::new();

    for key in keys {
        let key = key.normalized();
        if key.is_symbol() {
            sym_keys.insert(key);
        } else if let Some(n) = key.array_index() {
            int_keys.push((n, key));
        } else {
            str_keys.insert(key);
        }
    }

    int_keys.sort_by_key(|(n, _)| *n);
    int_keys.dedup_by_key(|(n, _)| *n);
    let mut result: Vec<PropertyKey> = int_keys.into_iter().map(|(_, k)| k).collect();
    result.extend(str_keys);
    result.extend(sym_keys);
    result
}

// ---------------------------------------------------------------------------
// NativeFunction — callable host value
// ---------------------------------------------------------------------------

type NativeFn = dyn Fn(&[Value]) -> Value;

/// A host function. Clones share the same function; equality is identity.
#[derive(Clone)]
pub struct NativeFunction {
    name: Rc<str>,
    func: Rc<NativeFn>,
}

impl NativeFunction {
    pub fn new(name: &str, func: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.func)(args)
    }

    /// Do both handles refer to the same function?
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl PartialEq for NativeFunction {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for NativeFunction {}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

// ---------------------------------------------------------------------------
// Value — runtime value stored in targets
// ---------------------------------------------------------------------------

/// Runtime value held by a property.
///
/// `Object` and `Function` compare by identity, everything else by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Symbol(SymbolId),
    Object(Target),
    Function(NativeFunction),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_callable(&self) -> bool {
        match self {
            Self::Function(_) => true,
            Self::Object(target) => target.is_callable(),
            _ => false,
        }
    }

    /// SameValue comparison.
    pub fn same_value(&self, other: &Self) -> bool {
        self == other
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
            Self::Object(_) => write!(f, "[object Object]"),
            Self::Function(func) => write!(f, "[function {}]", func.name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Target> for Value {
    fn from(target: Target) -> Self {
        Self::Object(target)
    }
}

impl From<NativeFunction> for Value {
    fn from(func: NativeFunction) -> Self {
        Self::Function(func)
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Property descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyDescriptor {
    /// Data descriptor: has `value` and `writable`.
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// Accessor descriptor: has `get` and/or `set`.
    Accessor {
        get: Option<NativeFunction>,
        set: Option<NativeFunction>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Create a default data descriptor (writable, enumerable, configurable).
    pub fn data(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Create a non-writable, non-enumerable, non-configurable data descriptor.
    pub fn data_frozen(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Create an enumerable, configurable accessor with only a getter.
    pub fn getter(get: NativeFunction) -> Self {
        Self::Accessor {
            get: Some(get),
            set: None,
            enumerable: true,
            configurable: true,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    /// Get the value if this is a data descriptor.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Is this a data descriptor with writable=true?
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// TargetData — the ordinary object behind a Target
// ---------------------------------------------------------------------------

/// Maximum prototype chain depth walked by lookups.
pub const MAX_PROTOTYPE_CHAIN_DEPTH: u32 = 1024;

/// Internal slots and own properties of a target.
#[derive(Debug, Clone)]
pub struct TargetData {
    /// `[[Prototype]]` internal slot (None means end of chain).
    pub prototype: Option<Target>,
    /// `[[Extensible]]` internal slot.
    pub extensible: bool,
    /// Own properties, keyed by normalized PropertyKey.
    pub properties: BTreeMap<PropertyKey, PropertyDescriptor>,
    /// `[[Call]]` behavior, present when the target is a function.
    pub call: Option<NativeFunction>,
}

impl Default for TargetData {
    fn default() -> Self {
        Self {
            prototype: None,
            extensible: true,
            properties: BTreeMap::new(),
            call: None,
        }
    }
}

impl TargetData {
    /// `[[DefineOwnProperty]](P, Desc)` — returns `false` when rejected.
    pub fn define_own_property(&mut self, key: PropertyKey, desc: PropertyDescriptor) -> bool {
        let Some(current) = self.properties.get(&key) else {
            if !self.extensible {
                return false;
            }
            self.properties.insert(key, desc);
            return true;
        };

        if !current.is_configurable() {
            if desc.is_configurable() {
                return false;
            }
            if desc.is_enumerable() != current.is_enumerable() {
                return false;
            }
            if current.is_data() != desc.is_data() {
                return false;
            }
            if let (
                PropertyDescriptor::Data {
                    writable: current_w,
                    value: current_v,
                    ..
                },
                PropertyDescriptor::Data {
                    writable: new_w,
                    value: new_v,
                    ..
                },
            ) = (current, &desc)
                && !current_w
                && (*new_w || !current_v.same_value(new_v))
            {
                return false;
            }
            if let (
                PropertyDescriptor::Accessor {
                    get: cur_get,
                    set: cur_set,
                    ..
                },
                PropertyDescriptor::Accessor {
                    get: new_get,
                    set: new_set,
                    ..
                },
            ) = (current, &desc)
                && (cur_get != new_get || cur_set != new_set)
            {
                return false;
            }
        }
        self.properties.insert(key, desc);
        true
    }

    /// `[[Set]]` restricted to own data properties.
    ///
    /// Accessors are never invoked here; a write to one is rejected.
    pub fn set(&mut self, key: PropertyKey, value: Value) -> bool {
        match self.properties.get_mut(&key) {
            Some(PropertyDescriptor::Data {
                value: slot,
                writable: true,
                ..
            }) => {
                *slot = value;
                true
            }
            Some(_) => false,
            None if self.extensible => {
                self.properties.insert(key, PropertyDescriptor::data(value));
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Target — shared partial property source
// ---------------------------------------------------------------------------

/// A partial property source. Cloning yields another handle to the same
/// object; equality is identity, so two structurally equal targets are still
/// distinct.
#[derive(Clone, Default)]
pub struct Target(Rc<RefCell<TargetData>>);

impl Target {
    /// Create an empty ordinary target.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a target with data properties from `(key, value)` pairs.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<PropertyKey>,
        V: Into<Value>,
    {
        let target = Self::new();
        {
            let mut data = target.0.borrow_mut();
            for (key, value) in entries {
                data.properties.insert(
                    key.into().normalized(),
                    PropertyDescriptor::data(value.into()),
                );
            }
        }
        target
    }

    /// Create a callable target.
    pub fn function(func: NativeFunction) -> Self {
        Self(Rc::new(RefCell::new(TargetData {
            call: Some(func),
            ..TargetData::default()
        })))
    }

    /// Create an empty target with the given prototype.
    pub fn with_prototype(proto: Option<Target>) -> Self {
        Self(Rc::new(RefCell::new(TargetData {
            prototype: proto,
            ..TargetData::default()
        })))
    }

    /// Do both handles refer to the same target?
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity for the lifetime of the target.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn is_callable(&self) -> bool {
        self.0.borrow().call.is_some()
    }

    pub fn callable(&self) -> Option<NativeFunction> {
        self.0.borrow().call.clone()
    }

    pub fn prototype(&self) -> Option<Target> {
        self.0.borrow().prototype.clone()
    }

    /// Own data value for `key` (accessors report `None`).
    pub fn get(&self, key: impl Into<PropertyKey>) -> Option<Value> {
        let key = key.into().normalized();
        self.0
            .borrow()
            .properties
            .get(&key)
            .and_then(|desc| desc.value().cloned())
    }

    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> bool {
        self.0
            .borrow_mut()
            .set(key.into().normalized(), value.into())
    }

    pub fn define_own_property(
        &self,
        key: impl Into<PropertyKey>,
        desc: PropertyDescriptor,
    ) -> bool {
        self.0
            .borrow_mut()
            .define_own_property(key.into().normalized(), desc)
    }

    pub fn get_own_property(&self, key: impl Into<PropertyKey>) -> Option<PropertyDescriptor> {
        self.0
            .borrow()
            .properties
            .get(&key.into().normalized())
            .cloned()
    }

    pub fn has_own_property(&self, key: impl Into<PropertyKey>) -> bool {
        self.0
            .borrow()
            .properties
            .contains_key(&key.into().normalized())
    }

    /// Snapshot of every own `(key, descriptor)` pair.
    pub fn own_properties(&self) -> Vec<(PropertyKey, PropertyDescriptor)> {
        self.0
            .borrow()
            .properties
            .iter()
            .map(|(k, d)| (k.clone(), d.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().properties.is_empty()
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Target {}

impl fmt::Debug for Target {
    // Keys only: values may point back at this target.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.borrow();
        f.debug_struct("Target")
            .field("keys", &data.properties.keys().collect::<Vec<_>>())
            .field("callable", &data.call.is_some())
            .field("extensible", &data.extensible)
            .finish()
    }
}

/// Walk the prototype chain starting at `start`, returning the first own
/// descriptor found for `key`.
pub fn lookup_in_chain(start: Option<Target>, key: &PropertyKey) -> Option<PropertyDescriptor> {
    let mut current = start;
    let mut depth: u32 = 0;
    let mut visited = BTreeSet::new();

    while let Some(target) = current {
        if depth > MAX_PROTOTYPE_CHAIN_DEPTH || !visited.insert(target.identity()) {
            return None;
        }
        if let Some(desc) = target.get_own_property(key) {
            return Some(desc);
        }
        current = target.prototype();
        depth += 1;
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
