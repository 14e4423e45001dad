#![forbid(unsafe_code)]

//! Composite objects: one virtual object assembled from a prioritized stack
//! of partial targets, with a second prioritized stack of trap overrides that
//! can intercept any fundamental operation.
//!
//! Build a composite with [`CompositeBuilder`]; restructure it afterwards
//! through the [`CompositeModifier`] returned alongside it.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod merge_engine;
pub mod modifier;
pub mod object_model;
pub mod snapshot;
pub mod trap;

pub use config::{CompositeBuilder, CompositeOptions};
pub use dispatcher::{Composite, Reflect};
pub use error::CompositeError;
pub use events::CompositeEvent;
pub use modifier::CompositeModifier;
pub use object_model::{NativeFunction, PropertyDescriptor, PropertyKey, SymbolId, Target, Value};
pub use snapshot::CompositeSnapshot;
pub use trap::{TrapFn, TrapKind, TrapTable};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composed_reads_follow_priority() {
        let (composite, modifier) = CompositeBuilder::new(CompositeOptions::default())
            .initial_target(Target::from_entries([("a", "here"), ("b", "there")]))
            .build()
            .expect("build");
        modifier.add_fallback_target(Target::from_entries([("b", "yo")]));
        modifier.add_override_target(Target::from_entries([("a", "yo2")]));
        assert_eq!(composite.get("a"), Value::from("yo2"));
        assert_eq!(composite.get("b"), Value::from("there"));
    }
}
