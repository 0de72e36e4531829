use crate::{
    Component, ComponentInfo, Factory, FactoryResult, Name, NamedComponent, RawName, Svc,
};
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// What a query targets.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// A specific name.
    ByName(RawName),
    /// Every buildable name of a component class.
    ByClass(ComponentInfo),
    /// The factory itself.
    Factory,
}

/// A type-erased component query, as carried in a
/// [`BillOfMaterials`](crate::BillOfMaterials).
///
/// Two queries are considered the same query when they target the same
/// thing; the mandatory flag does not take part in equality.
#[derive(Clone, Debug)]
pub struct RawQuery {
    kind: QueryKind,
    mandatory: bool,
}

impl RawQuery {
    /// A mandatory query for a specific name.
    #[must_use]
    pub fn by_name(name: RawName) -> Self {
        RawQuery {
            kind: QueryKind::ByName(name),
            mandatory: true,
        }
    }

    /// An optional query for every buildable name of a class.
    #[must_use]
    pub fn by_class(class: ComponentInfo) -> Self {
        RawQuery {
            kind: QueryKind::ByClass(class),
            mandatory: false,
        }
    }

    /// The always-satisfied query for the factory itself.
    #[must_use]
    pub fn factory() -> Self {
        RawQuery {
            kind: QueryKind::Factory,
            mandatory: true,
        }
    }

    /// What this query targets.
    #[must_use]
    pub fn kind(&self) -> &QueryKind {
        &self.kind
    }

    /// Whether an empty result is an error.
    #[must_use]
    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    /// Whether this query may yield several components.
    #[must_use]
    pub fn is_multiple(&self) -> bool {
        matches!(self.kind, QueryKind::ByClass(_))
    }

    /// The component class this query targets.
    #[must_use]
    pub fn component_class(&self) -> ComponentInfo {
        match &self.kind {
            QueryKind::ByName(name) => name.class(),
            QueryKind::ByClass(class) => *class,
            QueryKind::Factory => ComponentInfo::of::<Factory>(),
        }
    }

    pub(crate) fn set_mandatory(mut self, mandatory: bool) -> Self {
        // the factory query is always satisfied; the flag is meaningless
        if !matches!(self.kind, QueryKind::Factory) {
            self.mandatory = mandatory;
        }
        self
    }
}

impl PartialEq for RawQuery {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for RawQuery {}

impl Hash for RawQuery {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl Display for RawQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.kind {
            QueryKind::ByName(name) => write!(f, "QueryByName{{name={name}}}"),
            QueryKind::ByClass(class) => {
                write!(f, "QueryByClass{{class={}}}", class.simple_name())
            }
            QueryKind::Factory => f.write_str("FactoryQuery"),
        }
    }
}

/// A typed component query, not yet bound to a factory.
///
/// Queries are cheap descriptions; nothing is resolved until they are bound
/// with [`Query::bind`] (or created bound through
/// [`Factory::query_by_name`](crate::Factory::query_by_name) and friends)
/// and one of the `find` operations is invoked.
///
/// - [`Query::by_name`] targets one specific name and is mandatory by
///   default.
/// - [`Query::by_class`] targets every buildable name of a component class
///   and is optional by default.
/// - [`Query::factory`] targets the factory itself and is always satisfied.
pub struct Query<T: Component> {
    raw: RawQuery,
    marker: PhantomData<fn() -> T>,
}

impl<T: Component> Query<T> {
    /// A query for a specific name.
    #[must_use]
    pub fn by_name(name: Name<T>) -> Self {
        Query {
            raw: RawQuery::by_name(name.into_raw()),
            marker: PhantomData,
        }
    }

    /// A query for every buildable name of component class `T`.
    #[must_use]
    pub fn by_class() -> Self {
        Query {
            raw: RawQuery::by_class(ComponentInfo::of::<T>()),
            marker: PhantomData,
        }
    }

    /// Makes an empty result an error.
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.raw = self.raw.set_mandatory(true);
        self
    }

    /// Makes an empty result acceptable.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.raw = self.raw.set_mandatory(false);
        self
    }

    /// Whether an empty result is an error.
    #[must_use]
    pub fn is_mandatory(&self) -> bool {
        self.raw.is_mandatory()
    }

    /// Whether this query may yield several components.
    #[must_use]
    pub fn is_multiple(&self) -> bool {
        self.raw.is_multiple()
    }

    /// Borrows the type-erased form of this query.
    #[must_use]
    pub fn as_raw(&self) -> &RawQuery {
        &self.raw
    }

    /// Binds this query to a factory for evaluation.
    #[must_use]
    pub fn bind(self, factory: &Arc<Factory>) -> BoundQuery<T> {
        BoundQuery {
            query: self,
            factory: Arc::clone(factory),
        }
    }
}

impl Query<Factory> {
    /// The query for the factory itself.
    #[must_use]
    pub fn factory() -> Self {
        Query {
            raw: RawQuery::factory(),
            marker: PhantomData,
        }
    }
}

impl<T: Component> Clone for Query<T> {
    fn clone(&self) -> Self {
        Query {
            raw: self.raw.clone(),
            marker: PhantomData,
        }
    }
}

impl<T: Component> From<Query<T>> for RawQuery {
    fn from(query: Query<T>) -> Self {
        query.raw
    }
}

impl<T: Component> Display for Query<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.raw, f)
    }
}

/// A query bound to a factory, ready to evaluate.
pub struct BoundQuery<T: Component> {
    query: Query<T>,
    factory: Arc<Factory>,
}

impl<T: Component> BoundQuery<T> {
    /// Makes an empty result an error.
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.query = self.query.mandatory();
        self
    }

    /// Makes an empty result acceptable.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.query = self.query.optional();
        self
    }

    /// Enumerates the names this query resolves to, without building
    /// anything.
    #[must_use]
    pub fn find_names(&self) -> Vec<Name<T>> {
        self.factory
            .find_names_raw(self.query.as_raw())
            .into_iter()
            .map(Name::from_raw_unchecked)
            .collect()
    }

    /// Builds and returns every component matching this query, in rule
    /// priority order.
    ///
    /// # Errors
    ///
    /// Fails when a matched component cannot be built.
    pub fn find(&self) -> FactoryResult<Vec<NamedComponent<T>>> {
        let components = self.factory.find_raw(self.query.as_raw())?;
        Ok(components
            .into_iter()
            .filter_map(|c| c.downcast::<T>().ok())
            .collect())
    }

    /// Builds and returns the single component matching this query.
    ///
    /// # Errors
    ///
    /// Fails when the query is mandatory and nothing matches, when more than
    /// one component matches, or when building fails.
    pub fn find_one(&self) -> FactoryResult<Option<NamedComponent<T>>> {
        let component = self.factory.find_one_raw(self.query.as_raw())?;
        Ok(component.and_then(|c| c.downcast::<T>().ok()))
    }

    /// Like [`BoundQuery::find_one`], dropping the name.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`BoundQuery::find_one`].
    pub fn find_one_as_component(&self) -> FactoryResult<Option<Svc<T>>> {
        Ok(self.find_one()?.map(NamedComponent::into_component))
    }

    /// Like [`BoundQuery::find`], dropping the names.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`BoundQuery::find`].
    pub fn find_as_components(&self) -> FactoryResult<Vec<Svc<T>>> {
        Ok(self
            .find()?
            .into_iter()
            .map(NamedComponent::into_component)
            .collect())
    }

    /// Verifies that every name this query resolves to could be built,
    /// without building anything.
    ///
    /// # Errors
    ///
    /// Fails exactly when building would fail: a mandatory query with no
    /// names, a missing rule, an unsatisfiable transitive dependency, or a
    /// dependency cycle.
    pub fn check_satisfy(&self) -> FactoryResult<()> {
        self.factory
            .check_satisfy_raw(self.query.as_raw(), &mut Vec::new())
    }
}

impl<T: Component> Display for BoundQuery<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.query, f)
    }
}
