use crate::{AnyComponent, AutoStartable, ComponentBox, RawName, SatisfiedBom, Svc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_WAREHOUSE_ID: AtomicU64 = AtomicU64::new(0);

/// The memoization store of built components, keyed by name.
///
/// A warehouse is append-only while its factory lives: the first check-in
/// for a name wins and later ones are silently dropped, so lookups are
/// monotone. On a lookup miss the provider chain (parent warehouses) is
/// consulted in declared order, read-only.
///
/// Closing releases every stored component carrying a close handle, in
/// reverse check-in order. The factory itself is never stored, so closing
/// cannot recurse into it.
pub struct Warehouse {
    id: String,
    providers: Vec<Arc<Warehouse>>,
    store: RwLock<IndexMap<RawName, StoredBox>>,
}

pub(crate) struct StoredBox {
    bx: ComponentBox,
    satisfied: SatisfiedBom,
    duration: Duration,
}

impl Warehouse {
    /// An empty warehouse with no providers.
    #[must_use]
    pub fn new() -> Self {
        Warehouse::with_providers(Vec::new())
    }

    /// An empty warehouse consulting the given parent warehouses on miss.
    #[must_use]
    pub fn with_providers(providers: Vec<Arc<Warehouse>>) -> Self {
        Warehouse {
            id: format!("wh{:03}", NEXT_WAREHOUSE_ID.fetch_add(1, Ordering::Relaxed)),
            providers,
            store: RwLock::new(IndexMap::new()),
        }
    }

    /// This warehouse's identifier, unique within the process.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The provider chain consulted on lookup miss.
    #[must_use]
    pub fn providers(&self) -> &[Arc<Warehouse>] {
        &self.providers
    }

    /// Looks a component up by name, locally first and then through the
    /// provider chain.
    #[must_use]
    pub fn check_out(&self, name: &RawName) -> Option<AnyComponent> {
        if let Some(stored) = self.store.read().get(name) {
            return stored.bx.pick();
        }
        self.providers
            .iter()
            .find_map(|provider| provider.check_out(name))
    }

    /// Stores a built box with its provenance. If the name is already
    /// stored the new box is dropped: the first writer wins.
    pub(crate) fn check_in(&self, bx: ComponentBox, satisfied: SatisfiedBom, duration: Duration) {
        let name = bx.name().clone();
        let mut store = self.store.write();
        if store.contains_key(&name) {
            tracing::debug!(warehouse = %self.id, %name, "already checked in, dropping later build");
            return;
        }
        tracing::debug!(warehouse = %self.id, %name, ?duration, "checking in");
        store.insert(
            name,
            StoredBox {
                bx,
                satisfied,
                duration,
            },
        );
    }

    /// The stored names, in check-in order.
    #[must_use]
    pub fn stored_names(&self) -> Vec<RawName> {
        self.store.read().keys().cloned().collect()
    }

    /// The dependency satisfaction a stored component was built from.
    #[must_use]
    pub fn provenance(&self, name: &RawName) -> Option<(SatisfiedBom, Duration)> {
        self.store
            .read()
            .get(name)
            .map(|stored| (stored.satisfied.clone(), stored.duration))
    }

    pub(crate) fn start_handle(&self, name: &RawName) -> Option<Svc<dyn AutoStartable>> {
        self.store.read().get(name).and_then(|s| s.bx.start_handle())
    }

    /// Releases every stored component, invoking close handles in reverse
    /// check-in order. A failing handle is logged and closing continues.
    pub fn close(&self) {
        let mut store = self.store.write();
        for (name, stored) in store.iter().rev() {
            if let Some(handle) = stored.bx.close_handle() {
                tracing::debug!(warehouse = %self.id, %name, "closing component");
                if let Err(error) = handle.close() {
                    tracing::error!(warehouse = %self.id, %name, %error, "error while closing component");
                }
            }
        }
        store.clear();
    }
}

impl Default for Warehouse {
    fn default() -> Self {
        Warehouse::new()
    }
}

impl Display for Warehouse {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let store = self.store.read();
        write!(f, "Warehouse{{id={}, components=[", self.id)?;
        for (i, (name, stored)) in store.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name} ({:?})", stored.duration)?;
        }
        f.write_str("]}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BillOfMaterials, Name, NamedComponent};

    fn boxed(id: &str, value: &str) -> ComponentBox {
        ComponentBox::boundless(NamedComponent::new(Name::<String>::of(id), value.to_string()).erase())
    }

    fn empty_bom() -> SatisfiedBom {
        SatisfiedBom::empty(BillOfMaterials::empty())
    }

    #[test]
    fn first_check_in_wins() {
        let warehouse = Warehouse::new();
        warehouse.check_in(boxed("n", "first"), empty_bom(), Duration::ZERO);
        warehouse.check_in(boxed("n", "second"), empty_bom(), Duration::ZERO);

        let name = Name::<String>::of("n").into_raw();
        let out = warehouse.check_out(&name).unwrap();
        let out = out.downcast::<String>().ok().unwrap();
        assert_eq!("first", out.component().as_str());
    }

    #[test]
    fn miss_falls_back_to_providers_in_order() {
        let parent = Arc::new(Warehouse::new());
        parent.check_in(boxed("n", "from-parent"), empty_bom(), Duration::ZERO);
        let child = Warehouse::with_providers(vec![Arc::clone(&parent)]);

        let name = Name::<String>::of("n").into_raw();
        assert!(child.check_out(&name).is_some());
        assert!(child.stored_names().is_empty());
    }

    #[test]
    fn close_clears_the_store() {
        let warehouse = Warehouse::new();
        warehouse.check_in(boxed("n", "v"), empty_bom(), Duration::ZERO);
        warehouse.close();
        assert!(warehouse.stored_names().is_empty());
        warehouse.close();
    }
}
