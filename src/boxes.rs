use crate::{AnyComponent, AutoStartable, Closeable, Customizer, DynSvc, RawName, Svc};
use parking_lot::Mutex;
use std::fmt::{self, Display, Formatter};

/// A wrapper around a built (or absent) component.
///
/// Two variants exist: a *boundless* box hands its component out on every
/// [`ComponentBox::pick`], while a *bounded* box hands it out exactly once
/// and is empty afterwards. Boxes also carry the optional lifecycle handles
/// captured when the component was constructed.
///
/// Customizing a box transforms its content; the lifecycle handles keep
/// pointing at the engine-built value, so customizers that wrap rather than
/// mutate should not be combined with lifecycle participation.
pub struct ComponentBox {
    name: RawName,
    state: BoxState,
    start: Option<Svc<dyn AutoStartable>>,
    close: Option<Svc<dyn Closeable>>,
}

enum BoxState {
    Boundless(Option<DynSvc>),
    Bounded(Mutex<Option<DynSvc>>),
}

impl ComponentBox {
    /// A box handing its component out repeatedly.
    #[must_use]
    pub fn boundless(component: AnyComponent) -> Self {
        ComponentBox {
            name: component.name().clone(),
            state: BoxState::Boundless(Some(component.into_svc())),
            start: None,
            close: None,
        }
    }

    /// A box handing its component out exactly once.
    #[must_use]
    pub fn bounded(component: AnyComponent) -> Self {
        ComponentBox {
            name: component.name().clone(),
            state: BoxState::Bounded(Mutex::new(Some(component.into_svc()))),
            start: None,
            close: None,
        }
    }

    /// A box for an engine that declined to produce a component.
    #[must_use]
    pub fn empty(name: RawName) -> Self {
        ComponentBox {
            name,
            state: BoxState::Boundless(None),
            start: None,
            close: None,
        }
    }

    /// Attaches a start handle invoked by
    /// [`Factory::start`](crate::Factory::start).
    #[must_use]
    pub fn with_start_handle(mut self, handle: Svc<dyn AutoStartable>) -> Self {
        self.start = Some(handle);
        self
    }

    /// Attaches a close handle invoked when the warehouse closes.
    #[must_use]
    pub fn with_close_handle(mut self, handle: Svc<dyn Closeable>) -> Self {
        self.close = Some(handle);
        self
    }

    /// The name of the boxed component.
    #[must_use]
    pub fn name(&self) -> &RawName {
        &self.name
    }

    /// Whether this box hands its component out only once.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        matches!(self.state, BoxState::Bounded(_))
    }

    /// Whether no component is (or is left) inside.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.state {
            BoxState::Boundless(content) => content.is_none(),
            BoxState::Bounded(content) => content.lock().is_none(),
        }
    }

    /// Takes the component out. A boundless box yields a clone of the same
    /// pointer every time; a bounded box yields it once and `None` after.
    #[must_use]
    pub fn pick(&self) -> Option<AnyComponent> {
        let svc = match &self.state {
            BoxState::Boundless(content) => content.clone(),
            BoxState::Bounded(content) => content.lock().take(),
        };
        svc.map(|svc| AnyComponent::from_parts(self.name.clone(), svc))
    }

    /// Applies a customizer to the content, producing a box of the same
    /// variant under the same name.
    #[must_use]
    pub fn customize(self, customizer: &dyn Customizer) -> ComponentBox {
        let ComponentBox {
            name,
            state,
            start,
            close,
        } = self;
        let apply = |svc: DynSvc| {
            customizer
                .customize(AnyComponent::from_parts(name.clone(), svc))
                .into_svc()
        };
        let state = match state {
            BoxState::Boundless(content) => BoxState::Boundless(content.map(apply)),
            BoxState::Bounded(content) => {
                BoxState::Bounded(Mutex::new(content.into_inner().map(apply)))
            }
        };
        ComponentBox {
            name,
            state,
            start,
            close,
        }
    }

    pub(crate) fn start_handle(&self) -> Option<Svc<dyn AutoStartable>> {
        self.start.clone()
    }

    pub(crate) fn close_handle(&self) -> Option<Svc<dyn Closeable>> {
        self.close.clone()
    }
}

impl Display for ComponentBox {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let variant = if self.is_bounded() {
            "BoundedBox"
        } else {
            "BoundlessBox"
        };
        write!(f, "{variant}{{name={}}}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Name, NamedComponent};

    fn component(value: &str) -> AnyComponent {
        NamedComponent::new(Name::<String>::of("x"), value.to_string()).erase()
    }

    #[test]
    fn boundless_box_picks_repeatedly() {
        let bx = ComponentBox::boundless(component("v"));
        assert!(bx.pick().is_some());
        assert!(bx.pick().is_some());
        assert!(!bx.is_empty());
    }

    #[test]
    fn bounded_box_picks_once() {
        let bx = ComponentBox::bounded(component("v"));
        assert!(bx.pick().is_some());
        assert!(bx.pick().is_none());
        assert!(bx.is_empty());
    }

    #[test]
    fn empty_box_picks_nothing() {
        let bx = ComponentBox::empty(Name::<String>::of("x").into_raw());
        assert!(bx.pick().is_none());
        assert!(bx.is_empty());
    }
}
