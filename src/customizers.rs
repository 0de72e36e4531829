use crate::{AnyComponent, Component, ComponentInfo, Name, NamedComponent, RawName, Svc};
use std::fmt::{self, Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

/// A post-construction transform applied to freshly built components.
///
/// Customizers for a name are collected from every matching
/// [`CustomizerEngine`], stable-sorted by priority (smaller first, ties in
/// insertion order) and folded over the component box before it is checked
/// into the warehouse.
pub trait Customizer: Send + Sync {
    /// Ordering among customizers of the same component; smaller runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// A short label for metric keys and logs.
    fn label(&self) -> &str;

    /// Transforms the component.
    fn customize(&self, component: AnyComponent) -> AnyComponent;
}

/// Produces [`Customizer`]s for the names it elects to customize.
///
/// Customizer engines are themselves components, built by rules producing
/// `Arc<dyn CustomizerEngine>` during the factory bootstrap; they cannot
/// customize rules or other customizer engines.
pub trait CustomizerEngine: Send + Sync {
    /// Whether this engine customizes the given name.
    fn can_customize(&self, name: &RawName) -> bool;

    /// The customizer for a name this engine elected to customize.
    fn customizer_for(&self, name: &RawName) -> Arc<dyn Customizer>;
}

/// A [`CustomizerEngine`] customizing every component of one class with a
/// single closure.
///
/// ## Example
///
/// ```
/// use runtime_factory::ClassCustomizerEngine;
///
/// let engine = ClassCustomizerEngine::<String>::new(0, |component| {
///     format!("{}!", component.component())
/// });
/// ```
pub struct ClassCustomizerEngine<T: Component> {
    customizer: Arc<dyn Customizer>,
    marker: PhantomData<fn(T)>,
}

impl<T: Component> ClassCustomizerEngine<T> {
    /// Customizes every component of class `T` with `transform`.
    #[must_use]
    pub fn new(
        priority: i32,
        transform: impl Fn(NamedComponent<T>) -> T + Send + Sync + 'static,
    ) -> Self {
        ClassCustomizerEngine {
            customizer: Arc::new(FnCustomizer {
                priority,
                label: format!("{}Customizer", ComponentInfo::of::<T>().simple_name()),
                transform: Box::new(move |component| {
                    let name = component.name().clone();
                    match component.downcast::<T>() {
                        Ok(named) => {
                            let value = transform(named);
                            NamedComponent::from_svc(
                                Name::from_raw_unchecked(name),
                                Svc::new(value),
                            )
                            .erase()
                        }
                        Err(component) => {
                            tracing::warn!(
                                name = %component.name(),
                                "customizer received a component of an unexpected type"
                            );
                            component
                        }
                    }
                }),
            }),
            marker: PhantomData,
        }
    }
}

impl<T: Component> CustomizerEngine for ClassCustomizerEngine<T> {
    fn can_customize(&self, name: &RawName) -> bool {
        name.class() == ComponentInfo::of::<T>()
    }

    fn customizer_for(&self, _name: &RawName) -> Arc<dyn Customizer> {
        Arc::clone(&self.customizer)
    }
}

impl<T: Component> Display for ClassCustomizerEngine<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClassCustomizerEngine{{class={}}}",
            ComponentInfo::of::<T>().simple_name()
        )
    }
}

type TransformFn = Box<dyn Fn(AnyComponent) -> AnyComponent + Send + Sync>;

struct FnCustomizer {
    priority: i32,
    label: String,
    transform: TransformFn,
}

impl Customizer for FnCustomizer {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn customize(&self, component: AnyComponent) -> AnyComponent {
        (self.transform)(component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_customizer_transforms_matching_components() {
        let engine = ClassCustomizerEngine::<String>::new(0, |c| format!("{}!", c.component()));
        let name = Name::<String>::of("greeting");
        assert!(engine.can_customize(name.as_raw()));
        let customizer = engine.customizer_for(name.as_raw());
        let out = customizer.customize(NamedComponent::new(name, "hey".to_string()).erase());
        let out = out.downcast::<String>().ok().unwrap();
        assert_eq!("hey!", out.component().as_str());
    }

    #[test]
    fn class_customizer_ignores_other_classes() {
        let engine = ClassCustomizerEngine::<String>::new(0, |c| c.component().to_string());
        assert!(!engine.can_customize(Name::<i32>::of("n").as_raw()));
    }
}
