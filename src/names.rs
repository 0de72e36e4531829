use crate::{Component, ComponentInfo, DynSvc, Svc};
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// A type-erased component name: a component class plus a string identifier.
///
/// Names are the primary key of the whole factory: rules declare the names
/// they can build, the warehouse memoizes built components by name, and
/// queries resolve to sets of names. Two names are equal when both the class
/// and the identifier are equal.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct RawName {
    class: ComponentInfo,
    id: Arc<str>,
}

impl RawName {
    /// Creates a raw name from a component class and an identifier.
    #[must_use]
    pub fn new(class: ComponentInfo, id: impl Into<Arc<str>>) -> Self {
        RawName {
            class,
            id: id.into(),
        }
    }

    /// The component class this name belongs to.
    #[must_use]
    pub fn class(&self) -> ComponentInfo {
        self.class
    }

    /// The string identifier of this name.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Short rendering used in metric keys: the simple type name only.
    #[must_use]
    pub fn simple_name(&self) -> String {
        self.class.simple_name()
    }
}

impl Display for RawName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}[\"{}\"]", self.class.simple_name(), self.id)
    }
}

/// A typed wrapper around [`RawName`] carrying the component type at the call
/// site.
///
/// ## Example
///
/// ```
/// use runtime_factory::Name;
///
/// let name = Name::<String>::of("greeting");
/// assert_eq!("greeting", name.id());
/// ```
pub struct Name<T> {
    raw: RawName,
    marker: PhantomData<fn() -> T>,
}

impl<T: Component> Name<T> {
    /// Creates a name for component type `T` with the given identifier.
    #[must_use]
    pub fn of(id: impl Into<Arc<str>>) -> Self {
        Name {
            raw: RawName::new(ComponentInfo::of::<T>(), id),
            marker: PhantomData,
        }
    }

    /// Recovers a typed name from a raw one, checking the component class.
    #[must_use]
    pub fn from_raw(raw: RawName) -> Option<Self> {
        (raw.class() == ComponentInfo::of::<T>()).then(|| Name {
            raw,
            marker: PhantomData,
        })
    }

    /// Wraps a raw name whose class is already known to be `T`.
    pub(crate) fn from_raw_unchecked(raw: RawName) -> Self {
        Name {
            raw,
            marker: PhantomData,
        }
    }

    /// The string identifier of this name.
    #[must_use]
    pub fn id(&self) -> &str {
        self.raw.id()
    }

    /// Borrows the type-erased form of this name.
    #[must_use]
    pub fn as_raw(&self) -> &RawName {
        &self.raw
    }

    /// Converts this name into its type-erased form.
    #[must_use]
    pub fn into_raw(self) -> RawName {
        self.raw
    }
}

impl<T> Clone for Name<T> {
    fn clone(&self) -> Self {
        Name {
            raw: self.raw.clone(),
            marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Name<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Name<T> {}

impl<T> Hash for Name<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> Debug for Name<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.raw, f)
    }
}

impl<T> Display for Name<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.raw, f)
    }
}

/// A name paired with the component it designates.
pub struct NamedComponent<T: Component> {
    name: Name<T>,
    component: Svc<T>,
}

impl<T: Component> NamedComponent<T> {
    /// Wraps a freshly built component value under the given name.
    #[must_use]
    pub fn new(name: Name<T>, component: T) -> Self {
        NamedComponent {
            name,
            component: Svc::new(component),
        }
    }

    /// Wraps an already shared component under the given name.
    #[must_use]
    pub fn from_svc(name: Name<T>, component: Svc<T>) -> Self {
        NamedComponent { name, component }
    }

    /// The name of this component.
    #[must_use]
    pub fn name(&self) -> &Name<T> {
        &self.name
    }

    /// Borrows the component pointer.
    #[must_use]
    pub fn component(&self) -> &Svc<T> {
        &self.component
    }

    /// Unwraps the component pointer, dropping the name.
    #[must_use]
    pub fn into_component(self) -> Svc<T> {
        self.component
    }

    /// Erases the component type, keeping the name for later recovery.
    #[must_use]
    pub fn erase(self) -> AnyComponent {
        AnyComponent {
            name: self.name.into_raw(),
            component: self.component,
        }
    }
}

impl<T: Component> Clone for NamedComponent<T> {
    fn clone(&self) -> Self {
        NamedComponent {
            name: self.name.clone(),
            component: Svc::clone(&self.component),
        }
    }
}

impl<T: Component> Display for NamedComponent<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.name, f)
    }
}

/// A type-erased named component, as stored in the warehouse and passed
/// through customizers.
#[derive(Clone)]
pub struct AnyComponent {
    name: RawName,
    component: DynSvc,
}

impl AnyComponent {
    /// Erases a typed component pointer under the given raw name.
    #[must_use]
    pub fn new<T: Component>(name: RawName, component: Svc<T>) -> Self {
        AnyComponent { name, component }
    }

    pub(crate) fn from_parts(name: RawName, component: DynSvc) -> Self {
        AnyComponent { name, component }
    }

    /// The name of this component.
    #[must_use]
    pub fn name(&self) -> &RawName {
        &self.name
    }

    /// Borrows the erased component pointer.
    #[must_use]
    pub fn component(&self) -> &DynSvc {
        &self.component
    }

    pub(crate) fn into_svc(self) -> DynSvc {
        self.component
    }

    /// Recovers the typed component, or returns `self` unchanged when the
    /// component is not a `T`.
    ///
    /// # Errors
    ///
    /// Returns the component back when its concrete type is not `T`.
    pub fn downcast<T: Component>(self) -> Result<NamedComponent<T>, AnyComponent> {
        let AnyComponent { name, component } = self;
        match component.downcast_arc::<T>() {
            Ok(component) => Ok(NamedComponent {
                name: Name::from_raw_unchecked(name),
                component,
            }),
            Err(component) => Err(AnyComponent { name, component }),
        }
    }
}

impl Display for AnyComponent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.name, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_equal_by_class_and_id() {
        assert_eq!(Name::<String>::of("a"), Name::<String>::of("a"));
        assert_ne!(Name::<String>::of("a"), Name::<String>::of("b"));
        assert_ne!(
            Name::<String>::of("a").into_raw(),
            Name::<i32>::of("a").into_raw()
        );
    }

    #[test]
    fn erased_component_downcasts_to_its_type() {
        let named = NamedComponent::new(Name::<String>::of("a"), "hello".to_string());
        let erased = named.erase();
        let back = erased.downcast::<String>().ok().unwrap();
        assert_eq!("hello", back.component().as_str());
    }

    #[test]
    fn downcast_to_wrong_type_returns_component() {
        let erased = NamedComponent::new(Name::<String>::of("a"), "hello".to_string()).erase();
        let err = erased.downcast::<i32>().err().unwrap();
        assert_eq!("a", err.name().id());
    }
}
