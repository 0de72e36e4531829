use downcast_rs::{impl_downcast, DowncastSync};
use std::any::{Any, TypeId};

/// A reference-counted pointer holding a built component.
///
/// Components are shared between the factory's warehouse and every consumer
/// that requested them, so they are always handed out behind [`Arc<T>`](std::sync::Arc).
pub type Svc<T> = std::sync::Arc<T>;

/// A service pointer holding an instance of `dyn Component`.
pub type DynSvc = Svc<dyn Component>;

/// Implemented automatically on types that are capable of being a component.
///
/// Any `Send + Sync + 'static` type qualifies; the trait only exists so that
/// type-erased component pointers can be downcast back to their concrete type.
pub trait Component: DowncastSync {}

impl<T: ?Sized + DowncastSync> Component for T {}

impl_downcast!(sync Component);

/// Type information about a component class.
///
/// This is the runtime stand-in for the component class carried by every
/// [`Name`](crate::Name): a [`TypeId`] for identity plus the type name for
/// diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct ComponentInfo {
    id: TypeId,
    name: &'static str,
}

impl ComponentInfo {
    /// Creates a [`ComponentInfo`] for the given type.
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + Any>() -> Self {
        ComponentInfo {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Gets the [`TypeId`] for this component class.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Gets the full type name of this component class.
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.name
    }

    /// Gets the type name with all module paths stripped.
    ///
    /// `alloc::sync::Arc<dyn my_crate::rules::Rule>` renders as
    /// `Arc<dyn Rule>`. Used for metric keys and diagnostics.
    #[must_use]
    pub fn simple_name(&self) -> String {
        let mut out = String::new();
        let mut segment = String::new();
        for c in self.name.chars() {
            if c.is_alphanumeric() || c == '_' || c == ':' {
                segment.push(c);
            } else {
                flush_segment(&mut out, &mut segment);
                out.push(c);
            }
        }
        flush_segment(&mut out, &mut segment);
        out
    }
}

fn flush_segment(out: &mut String, segment: &mut String) {
    if segment.is_empty() {
        return;
    }
    if let Some(last) = segment.rsplit("::").next() {
        out.push_str(last);
    }
    segment.clear();
}
