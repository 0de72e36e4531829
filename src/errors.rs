use crate::{RawName, RawQuery};
use std::fmt::{self, Display, Formatter, Write};
use thiserror::Error;

/// A result from resolving or building components.
pub type FactoryResult<T> = Result<T, FactoryError>;

/// An error raised while building a factory or resolving components.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FactoryError {
    /// One or more dependency paths could not be satisfied.
    #[error("{0}")]
    Unsatisfied(#[from] UnsatisfiedDependencies),

    /// A single-result lookup matched more than one component.
    #[error(
        "more than one component is available for {query}. \
         Please select which one you want with a more specific query. \
         Available components are: [{}]",
        .candidates.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )]
    Ambiguous {
        /// Rendering of the offending query.
        query: String,
        /// The names that matched.
        candidates: Vec<RawName>,
    },

    /// The resolution graph contains a dependency cycle.
    #[error(
        "dependency cycle detected involving [{}]",
        .names.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )]
    Cycle {
        /// The names whose builds are mutually blocked.
        names: Vec<RawName>,
    },

    /// Two distinct rules in the same bucket declare the same name at the
    /// same priority, leaving no way to pick a winner.
    #[error(
        "duplicate name {name} declared by several rules at priority {priority} in bucket '{bucket}'"
    )]
    DuplicateName {
        /// The bucket the conflicting rules live in.
        bucket: String,
        /// The conflicting name.
        name: RawName,
        /// The shared priority.
        priority: i32,
    },

    /// An unexpected internal state, indicating a bug in this crate.
    #[error("internal factory error: {0}")]
    Internal(String),
}

/// A single dependency path, from the root query down to the query that
/// could not be satisfied.
#[derive(Debug, Clone)]
pub struct UnsatisfiedDependency {
    path: Vec<RawQuery>,
    root_cause: String,
}

impl UnsatisfiedDependency {
    /// Records an unsatisfied path with the default cause naming its last
    /// query.
    #[must_use]
    pub fn on(path: Vec<RawQuery>) -> Self {
        let root_cause = match path.last() {
            Some(query) => format!("component satisfying {query} not found."),
            None => "component not found.".to_owned(),
        };
        UnsatisfiedDependency { path, root_cause }
    }

    /// Replaces the root cause with a more specific message.
    #[must_use]
    pub fn caused_by(mut self, cause: impl Into<String>) -> Self {
        self.root_cause = cause.into();
        self
    }

    /// The query path, outermost first.
    #[must_use]
    pub fn path(&self) -> &[RawQuery] {
        &self.path
    }

    /// The message describing why the innermost query failed.
    #[must_use]
    pub fn cause(&self) -> &str {
        &self.root_cause
    }

    /// Prefixes the path with an outer query.
    #[must_use]
    pub fn prepend(mut self, query: RawQuery) -> Self {
        self.path.insert(0, query);
        self
    }

    /// Wraps this single path into a [`FactoryError`].
    #[must_use]
    pub fn raise(self) -> FactoryError {
        FactoryError::Unsatisfied(UnsatisfiedDependencies::of(self))
    }
}

impl Display for UnsatisfiedDependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut indent = String::from("  ");
        if self.path.len() > 1 {
            for query in &self.path[..self.path.len() - 1] {
                write!(f, "{query}\n{indent}-> ")?;
                indent.push_str("  ");
            }
        }
        f.write_str(&self.root_cause)
    }
}

/// An aggregate of unsatisfied dependency paths, reported together so one
/// failure lists every missing leaf.
#[derive(Debug, Clone, Default)]
pub struct UnsatisfiedDependencies {
    dependencies: Vec<UnsatisfiedDependency>,
}

impl UnsatisfiedDependencies {
    /// An empty aggregate.
    #[must_use]
    pub fn none() -> Self {
        UnsatisfiedDependencies::default()
    }

    /// An aggregate holding a single path.
    #[must_use]
    pub fn of(dependency: UnsatisfiedDependency) -> Self {
        UnsatisfiedDependencies {
            dependencies: vec![dependency],
        }
    }

    /// Whether no path has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// The recorded paths.
    #[must_use]
    pub fn dependencies(&self) -> &[UnsatisfiedDependency] {
        &self.dependencies
    }

    /// Records one more path.
    pub fn push(&mut self, dependency: UnsatisfiedDependency) {
        self.dependencies.push(dependency);
    }

    /// Merges two aggregates, preserving order.
    #[must_use]
    pub fn concat(mut self, other: UnsatisfiedDependencies) -> Self {
        self.dependencies.extend(other.dependencies);
        self
    }

    /// Prefixes every recorded path with an outer query.
    #[must_use]
    pub fn prepend(self, query: RawQuery) -> Self {
        UnsatisfiedDependencies {
            dependencies: self
                .dependencies
                .into_iter()
                .map(|d| d.prepend(query.clone()))
                .collect(),
        }
    }

    /// Wraps the aggregate into a [`FactoryError`].
    #[must_use]
    pub fn raise(self) -> FactoryError {
        FactoryError::Unsatisfied(self)
    }
}

impl Display for UnsatisfiedDependencies {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut rendered = String::new();
        for (i, dependency) in self.dependencies.iter().enumerate() {
            if i > 0 {
                rendered.push('\n');
            }
            write!(rendered, "{dependency}")?;
        }
        f.write_str(&rendered)
    }
}

impl std::error::Error for UnsatisfiedDependencies {}

impl From<UnsatisfiedDependency> for UnsatisfiedDependencies {
    fn from(dependency: UnsatisfiedDependency) -> Self {
        UnsatisfiedDependencies::of(dependency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Name;

    #[test]
    fn path_renders_with_increasing_indentation() {
        let outer = RawQuery::by_name(Name::<String>::of("a").into_raw());
        let inner = RawQuery::by_name(Name::<String>::of("b").into_raw());
        let dependency =
            UnsatisfiedDependency::on(vec![inner]).prepend(outer);
        let rendered = dependency.to_string();
        assert!(rendered.contains("QueryByName"));
        assert!(rendered.contains("\n  -> "));
    }

    #[test]
    fn prepend_applies_to_every_member() {
        let q = RawQuery::by_name(Name::<String>::of("x").into_raw());
        let aggregate = UnsatisfiedDependencies::of(UnsatisfiedDependency::on(vec![q.clone()]))
            .concat(UnsatisfiedDependencies::of(UnsatisfiedDependency::on(
                vec![q.clone()],
            )))
            .prepend(q);
        for dependency in aggregate.dependencies() {
            assert_eq!(2, dependency.path().len());
        }
    }
}
