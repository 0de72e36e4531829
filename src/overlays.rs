use crate::{Component, Name, NamedComponent, Rule, SingletonRule};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

/// Overlay rules win over anything registered normally.
pub const OVERLAY_PRIORITY: i32 = -1000;

static OVERLAYS: LazyLock<DashMap<String, Arc<Overlay>>> = LazyLock::new(DashMap::new);
static NEXT_OVERLAY_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static THREAD_OVERLAY_ID: String = format!(
        "TL[{}][{:03}]",
        std::thread::current().name().unwrap_or("unnamed"),
        NEXT_OVERLAY_ID.fetch_add(1, Ordering::Relaxed)
    );
}

/// A scoped, mutable list of rules merged into factories at build time.
///
/// Overlays transparently override normally registered rules: the `set`
/// helpers wrap plain values into [`SingletonRule`]s at priority
/// [`OVERLAY_PRIORITY`]. Three process-global scopes exist:
///
/// - [`Overlay::thread_local`] — one overlay per thread, created lazily;
/// - [`Overlay::context_local`] — one overlay per caller-supplied name;
/// - [`Overlay::thread_local_from`] — another thread's overlay by id; when
///   no such overlay exists an empty, *unregistered* one is returned so
///   stray mutations do not leak.
///
/// Builders snapshot overlay rules at build time; later mutations never
/// affect an already built factory.
///
/// ## Example
///
/// ```
/// use runtime_factory::{Builder, Name, Overlay, Svc};
///
/// Overlay::thread_local().set("port", 8080_i32);
///
/// let mut builder = Builder::new();
/// builder.add_thread_overlay();
/// let factory = builder.build().unwrap();
///
/// let port: Svc<i32> = factory.get_component(&Name::<i32>::of("port")).unwrap();
/// assert_eq!(8080, *port);
/// # runtime_factory::Overlay::thread_local().clear();
/// ```
pub struct Overlay {
    id: String,
    rules: Mutex<Vec<Arc<dyn Rule>>>,
}

impl Overlay {
    fn new(id: String) -> Self {
        Overlay {
            id,
            rules: Mutex::new(Vec::new()),
        }
    }

    /// The overlay of the current thread, created and registered on first
    /// access.
    #[must_use]
    pub fn thread_local() -> Arc<Overlay> {
        let id = THREAD_OVERLAY_ID.with(Clone::clone);
        OVERLAYS
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Overlay::new(id)))
            .clone()
    }

    /// An alias for [`Overlay::thread_local`] making override intent
    /// explicit at call sites.
    #[must_use]
    pub fn override_components() -> Arc<Overlay> {
        Overlay::thread_local()
    }

    /// Another thread's overlay, by its id. When no overlay is registered
    /// under that id, an empty overlay is returned without registering it.
    #[must_use]
    pub fn thread_local_from(id: &str) -> Arc<Overlay> {
        match OVERLAYS.get(id) {
            Some(overlay) => Arc::clone(&overlay),
            None => Arc::new(Overlay::new(id.to_owned())),
        }
    }

    /// The overlay registered under the given context name, created on
    /// first access.
    #[must_use]
    pub fn context_local(context: &str) -> Arc<Overlay> {
        OVERLAYS
            .entry(context.to_owned())
            .or_insert_with(|| {
                Arc::new(Overlay::new(format!(
                    "CTX[{context}][{:03}]",
                    NEXT_OVERLAY_ID.fetch_add(1, Ordering::Relaxed)
                )))
            })
            .clone()
    }

    /// This overlay's id. For thread overlays this is also their registry
    /// key, which other threads can use with [`Overlay::thread_local_from`].
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Appends a rule.
    pub fn add_rule(&self, rule: Arc<dyn Rule>) -> &Self {
        self.rules.lock().push(rule);
        self
    }

    /// Removes a previously added rule, by identity.
    pub fn remove_rule(&self, rule: &Arc<dyn Rule>) -> &Self {
        self.rules.lock().retain(|r| !Arc::ptr_eq(r, rule));
        self
    }

    /// Drops every rule.
    pub fn clear(&self) {
        self.rules.lock().clear();
    }

    /// Overrides the component registered under `id` with a plain value, at
    /// [`OVERLAY_PRIORITY`].
    pub fn set<T: Component>(&self, id: &str, component: T) -> &Self {
        self.set_named(NamedComponent::new(Name::of(id), component))
    }

    /// Like [`Overlay::set`] with an explicit priority.
    pub fn set_with_priority<T: Component>(&self, priority: i32, id: &str, component: T) -> &Self {
        self.set_named_with_priority(priority, NamedComponent::new(Name::of(id), component))
    }

    /// Overrides a named component, at [`OVERLAY_PRIORITY`].
    pub fn set_named<T: Component>(&self, named: NamedComponent<T>) -> &Self {
        self.set_named_with_priority(OVERLAY_PRIORITY, named)
    }

    /// Like [`Overlay::set_named`] with an explicit priority.
    pub fn set_named_with_priority<T: Component>(
        &self,
        priority: i32,
        named: NamedComponent<T>,
    ) -> &Self {
        self.add_rule(Arc::new(
            SingletonRule::of_named(named).with_priority(priority),
        ))
    }

    /// A snapshot of the rules currently in this overlay.
    #[must_use]
    pub fn rules(&self) -> Vec<Arc<dyn Rule>> {
        self.rules.lock().clone()
    }
}

/// Drops every registered overlay. A test hook: factories already built are
/// unaffected, but any overlay handle kept across this call is orphaned.
pub fn clear_all_overlays() {
    OVERLAYS.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_overlays_are_isolated() {
        let a = Overlay::context_local("overlay-test-a");
        let b = Overlay::context_local("overlay-test-b");
        a.set("n", 1_i32);
        assert_eq!(1, a.rules().len());
        assert!(b.rules().is_empty());
        a.clear();
    }

    #[test]
    fn context_overlay_is_shared_under_one_name() {
        let first = Overlay::context_local("overlay-test-shared");
        let second = Overlay::context_local("overlay-test-shared");
        assert!(Arc::ptr_eq(&first, &second));
        first.clear();
    }

    #[test]
    fn unknown_thread_overlay_is_unregistered() {
        let stray = Overlay::thread_local_from("TL[nobody][999]");
        stray.set("n", 1_i32);
        // mutating the stray overlay must not create a registered one
        let again = Overlay::thread_local_from("TL[nobody][999]");
        assert!(again.rules().is_empty());
    }

    #[test]
    fn removing_a_rule_is_by_identity() {
        let overlay = Overlay::context_local("overlay-test-remove");
        overlay.set("n", 1_i32);
        let rules = overlay.rules();
        overlay.remove_rule(&rules[0]);
        assert!(overlay.rules().is_empty());
    }
}
