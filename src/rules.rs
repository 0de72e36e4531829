use crate::{ComponentInfo, Engine, RawName};
use std::fmt::Display;
use std::sync::Arc;

mod single_name;
mod singleton;

pub use single_name::*;
pub use singleton::*;

/// A named producer of engines for a set of component names (a "factory
/// machine").
///
/// Rules are the unit of registration: a factory holds an ordered list of
/// rules and, for any requested name, the first rule in priority order able
/// to build it wins; the others remain visible for diagnostics only.
/// Priorities are ascending (smaller runs first); ties are broken by stable
/// insertion order.
pub trait Rule: Send + Sync + Display {
    /// This rule's position among rules able to build the same name;
    /// smaller wins.
    fn priority(&self) -> i32 {
        0
    }

    /// Every name this rule can build.
    fn produced_names(&self) -> Vec<RawName>;

    /// The names this rule can build whose component class is `class`.
    fn names_for_class(&self, class: ComponentInfo) -> Vec<RawName> {
        self.produced_names()
            .into_iter()
            .filter(|name| name.class() == class)
            .collect()
    }

    /// Whether this rule can build the given name.
    fn can_build(&self, name: &RawName) -> bool {
        self.produced_names().iter().any(|n| n == name)
    }

    /// The engine building the given name, or `None` when this rule never
    /// declared it.
    fn engine_for(&self, name: &RawName) -> Option<Arc<dyn Engine>>;
}
