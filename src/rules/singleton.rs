use crate::{
    AnyComponent, AutoStartable, BillOfMaterials, Closeable, Component, ComponentBox, Engine, Name,
    NamedComponent, RawName, Rule, SatisfiedBom, Svc,
};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// A rule providing one pre-built component under one name.
///
/// This is the workhorse of overlays and tests: wrap a value, pick a
/// priority, and the factory will hand the same instance out for every
/// request.
///
/// ## Example
///
/// ```
/// use runtime_factory::{Builder, Name, SingletonRule, Svc};
/// use std::sync::Arc;
///
/// let name = Name::<String>::of("greeting");
/// let mut builder = Builder::new();
/// builder.add_rule(Arc::new(SingletonRule::new(name.clone(), "hello".to_string())));
///
/// let factory = builder.build().unwrap();
/// let greeting: Svc<String> = factory.get_component(&name).unwrap();
/// assert_eq!("hello", greeting.as_str());
/// ```
pub struct SingletonRule<T: Component> {
    priority: i32,
    named: NamedComponent<T>,
    start: Option<fn(Svc<T>) -> Svc<dyn AutoStartable>>,
    close: Option<fn(Svc<T>) -> Svc<dyn Closeable>>,
}

impl<T: Component> SingletonRule<T> {
    /// Wraps a component value under the given name, at priority 0.
    #[must_use]
    pub fn new(name: Name<T>, component: T) -> Self {
        SingletonRule::of_named(NamedComponent::new(name, component))
    }

    /// Wraps an already named component, at priority 0.
    #[must_use]
    pub fn of_named(named: NamedComponent<T>) -> Self {
        SingletonRule {
            priority: 0,
            named,
            start: None,
            close: None,
        }
    }

    /// Changes the rule priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Flags the component for [`Factory::start`](crate::Factory::start).
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

    /// Registers the component for release when the warehouse closes.
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
}

impl<T: Component> Rule for SingletonRule<T> {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn produced_names(&self) -> Vec<RawName> {
        vec![self.named.name().as_raw().clone()]
    }

    fn engine_for(&self, name: &RawName) -> Option<Arc<dyn Engine>> {
        (name == self.named.name().as_raw()).then(|| {
            Arc::new(SingletonEngine {
                named: self.named.clone(),
                bom: BillOfMaterials::empty(),
                start: self.start,
                close: self.close,
            }) as Arc<dyn Engine>
        })
    }
}

impl<T: Component> Display for SingletonRule<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SingletonRule{{priority={}, component={}}}",
            self.priority,
            self.named.name()
        )
    }
}

struct SingletonEngine<T: Component> {
    named: NamedComponent<T>,
    bom: BillOfMaterials,
    start: Option<fn(Svc<T>) -> Svc<dyn AutoStartable>>,
    close: Option<fn(Svc<T>) -> Svc<dyn Closeable>>,
}

impl<T: Component> Engine for SingletonEngine<T> {
    fn name(&self) -> &RawName {
        self.named.name().as_raw()
    }

    fn bill_of_materials(&self) -> &BillOfMaterials {
        &self.bom
    }

    fn new_component(&self, _satisfied: &SatisfiedBom) -> ComponentBox {
        let svc = Svc::clone(self.named.component());
        let component = AnyComponent::new(self.name().clone(), Svc::clone(&svc));
        let mut bx = ComponentBox::boundless(component);
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

impl<T: Component> Display for SingletonEngine<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SingletonEngine{{name={}}}", self.named.name())
    }
}
