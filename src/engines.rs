use crate::{
    AnyComponent, AutoStartable, Closeable, Component, ComponentBox, Name, NamedComponent, Query,
    RawName, RawQuery, Svc,
};
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};

/// The ordered set of dependency queries an engine needs satisfied before it
/// can build its component.
#[derive(Clone, Debug, Default)]
pub struct BillOfMaterials {
    queries: Vec<RawQuery>,
}

impl BillOfMaterials {
    /// A bill with no dependencies.
    #[must_use]
    pub fn empty() -> Self {
        BillOfMaterials::default()
    }

    /// Builds a bill from the given queries, dropping duplicates while
    /// preserving order.
    #[must_use]
    pub fn of(queries: impl IntoIterator<Item = RawQuery>) -> Self {
        let mut seen = HashSet::new();
        BillOfMaterials {
            queries: queries
                .into_iter()
                .filter(|q| seen.insert(q.kind().clone()))
                .collect(),
        }
    }

    /// The queries, in declaration order.
    #[must_use]
    pub fn queries(&self) -> &[RawQuery] {
        &self.queries
    }

    /// Whether the bill declares no dependencies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// A bill of materials together with the components that satisfied each of
/// its queries.
#[derive(Clone)]
pub struct SatisfiedBom {
    bom: BillOfMaterials,
    materials: Vec<Vec<AnyComponent>>,
}

impl SatisfiedBom {
    /// A satisfaction of an empty (or fully optional) bill.
    #[must_use]
    pub fn empty(bom: BillOfMaterials) -> Self {
        let materials = vec![Vec::new(); bom.queries().len()];
        SatisfiedBom { bom, materials }
    }

    pub(crate) fn new(bom: BillOfMaterials, materials: Vec<Vec<AnyComponent>>) -> Self {
        SatisfiedBom { bom, materials }
    }

    /// The bill this satisfaction answers.
    #[must_use]
    pub fn bill_of_materials(&self) -> &BillOfMaterials {
        &self.bom
    }

    /// The erased components that satisfied the given query.
    #[must_use]
    pub fn components_for(&self, query: &RawQuery) -> &[AnyComponent] {
        self.bom
            .queries()
            .iter()
            .position(|q| q == query)
            .map_or(&[], |i| &self.materials[i])
    }

    /// The single typed component that satisfied the given query.
    #[must_use]
    pub fn one<T: Component>(&self, query: &Query<T>) -> Option<NamedComponent<T>> {
        self.components_for(query.as_raw())
            .first()
            .cloned()
            .and_then(|c| c.downcast::<T>().ok())
    }

    /// Every typed component that satisfied the given query, in resolution
    /// order.
    #[must_use]
    pub fn all<T: Component>(&self, query: &Query<T>) -> Vec<NamedComponent<T>> {
        self.components_for(query.as_raw())
            .iter()
            .cloned()
            .filter_map(|c| c.downcast::<T>().ok())
            .collect()
    }
}

impl Display for SatisfiedBom {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("SatisfiedBOM{")?;
        for (i, query) in self.bom.queries().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{query} -> [")?;
            for (j, component) in self.materials[i].iter().enumerate() {
                if j > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{component}")?;
            }
            f.write_str("]")?;
        }
        f.write_str("}")
    }
}

/// The build procedure for one name: its bill of materials plus a
/// constructor turning a satisfaction of that bill into a component box.
///
/// Engines stay purely declarative until invoked; in a single-threaded
/// observer the constructor runs at most once per name per factory, guarded
/// by the warehouse write. Concurrent builds of the same name may invoke it
/// more than once, with the first check-in winning, so constructors must be
/// free of externally visible side effects.
pub trait Engine: Send + Sync + Display {
    /// The name this engine builds.
    fn name(&self) -> &RawName;

    /// The dependencies this engine needs satisfied.
    fn bill_of_materials(&self) -> &BillOfMaterials;

    /// Builds the component from its satisfied dependencies.
    fn new_component(&self, satisfied: &SatisfiedBom) -> ComponentBox;

    /// Whether [`Factory::start`](crate::Factory::start) should materialize
    /// this engine's component.
    fn auto_start(&self) -> bool {
        false
    }
}

type BuildFn<T> = Box<dyn Fn(&SatisfiedBom) -> Option<T> + Send + Sync>;

/// The standard closure-backed [`Engine`].
///
/// ## Example
///
/// ```
/// use runtime_factory::{BillOfMaterials, Name, Query, StdEngine, Svc};
///
/// struct Greeter {
///     greeting: Svc<String>,
/// }
///
/// let greeting = Query::by_name(Name::<String>::of("greeting"));
/// let dep = greeting.clone();
/// let engine = StdEngine::new(
///     Name::<Greeter>::of("greeter"),
///     BillOfMaterials::of([greeting.into()]),
///     move |bom| Greeter {
///         greeting: bom.one(&dep).unwrap().into_component(),
///     },
/// );
/// ```
pub struct StdEngine<T: Component> {
    name: Name<T>,
    bom: BillOfMaterials,
    bounded: bool,
    start: Option<fn(Svc<T>) -> Svc<dyn AutoStartable>>,
    close: Option<fn(Svc<T>) -> Svc<dyn Closeable>>,
    build: BuildFn<T>,
}

impl<T: Component> StdEngine<T> {
    /// An engine whose constructor always produces a component.
    #[must_use]
    pub fn new(
        name: Name<T>,
        bom: BillOfMaterials,
        build: impl Fn(&SatisfiedBom) -> T + Send + Sync + 'static,
    ) -> Self {
        StdEngine {
            name,
            bom,
            bounded: false,
            start: None,
            close: None,
            build: Box::new(move |satisfied| Some(build(satisfied))),
        }
    }

    /// An engine with no dependencies.
    #[must_use]
    pub fn no_deps(name: Name<T>, build: impl Fn() -> T + Send + Sync + 'static) -> Self {
        StdEngine::new(name, BillOfMaterials::empty(), move |_| build())
    }

    /// An engine whose constructor may legitimately decline to produce a
    /// component. An absent output is never checked in; mandatory queries
    /// for it fail, optional ones yield nothing.
    #[must_use]
    pub fn optionally(
        name: Name<T>,
        bom: BillOfMaterials,
        build: impl Fn(&SatisfiedBom) -> Option<T> + Send + Sync + 'static,
    ) -> Self {
        StdEngine {
            name,
            bom,
            bounded: false,
            start: None,
            close: None,
            build: Box::new(build),
        }
    }

    /// Makes the produced box hand its component out only once.
    #[must_use]
    pub fn bounded(mut self) -> Self {
        self.bounded = true;
        self
    }

    /// Flags the produced component for [`Factory::start`](crate::Factory::start).
    #[must_use]
    pub fn auto_startable(mut self) -> Self
    where
        T: AutoStartable,
    {
        fn upcast<U: Component + AutoStartable>(svc: Svc<U>) -> Svc<dyn AutoStartable> {
            svc
        }
        self.start = Some(upcast::<T>);
        self
    }

    /// Registers the produced component for release when the warehouse
    /// closes.
    #[must_use]
    pub fn closeable(mut self) -> Self
    where
        T: Closeable,
    {
        fn upcast<U: Component + Closeable>(svc: Svc<U>) -> Svc<dyn Closeable> {
            svc
        }
        self.close = Some(upcast::<T>);
        self
    }

    /// The typed name this engine builds.
    #[must_use]
    pub fn typed_name(&self) -> &Name<T> {
        &self.name
    }
}

impl<T: Component> Engine for StdEngine<T> {
    fn name(&self) -> &RawName {
        self.name.as_raw()
    }

    fn bill_of_materials(&self) -> &BillOfMaterials {
        &self.bom
    }

    fn new_component(&self, satisfied: &SatisfiedBom) -> ComponentBox {
        let Some(value) = (self.build)(satisfied) else {
            return ComponentBox::empty(self.name.as_raw().clone());
        };
        let svc = Svc::new(value);
        let component = AnyComponent::new(self.name.as_raw().clone(), Svc::clone(&svc));
        let mut bx = if self.bounded {
            ComponentBox::bounded(component)
        } else {
            ComponentBox::boundless(component)
        };
        if let Some(upcast) = self.start {
            bx = bx.with_start_handle(upcast(Svc::clone(&svc)));
        }
        if let Some(upcast) = self.close {
            bx = bx.with_close_handle(upcast(svc));
        }
        bx
    }

    fn auto_start(&self) -> bool {
        self.start.is_some()
    }
}

impl<T: Component> Display for StdEngine<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "StdEngine{{name={}}}", self.name)
    }
}
