use crate::{Engine, RawName, Rule};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// A rule exposing exactly one engine for exactly one name.
///
/// Most application rules are of this shape: one component, one build
/// procedure, one priority.
pub struct SingleNameRule {
    priority: i32,
    engine: Arc<dyn Engine>,
}

impl SingleNameRule {
    /// Wraps an engine at the given priority.
    #[must_use]
    pub fn new(priority: i32, engine: Arc<dyn Engine>) -> Self {
        SingleNameRule { priority, engine }
    }

    /// The engine this rule exposes.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }
}

impl Rule for SingleNameRule {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn produced_names(&self) -> Vec<RawName> {
        vec![self.engine.name().clone()]
    }

    fn can_build(&self, name: &RawName) -> bool {
        name == self.engine.name()
    }

    fn engine_for(&self, name: &RawName) -> Option<Arc<dyn Engine>> {
        (name == self.engine.name()).then(|| Arc::clone(&self.engine))
    }
}

impl Display for SingleNameRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SingleNameRule{{priority={}, engine={}}}",
            self.priority, self.engine
        )
    }
}
