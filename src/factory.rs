use crate::{
    metrics_name, resolver, AnyComponent, BillOfMaterials, BoundQuery, Component, ComponentBox,
    ComponentInfo, CustomizerEngine, Engine, FactoryError, FactoryResult, MetricsHandle, Name,
    Query, QueryKind, RawName, RawQuery, Rule, SatisfiedBom, StdEngine, Svc, SingleNameRule,
    UnsatisfiedDependency, Warehouse,
};
use indexmap::{IndexMap, IndexSet};
use std::fmt::{self, Debug, Display, Formatter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) const FACTORY_BUCKET: &str = "FactoryRule";
pub(crate) const METRICS_BUCKET: &str = "MetricsRule";
pub(crate) const PROVIDERS_BUCKET: &str = "WarehouseProviders";

/// The well-known name every factory registers itself under, so that
/// [`Query::factory`] is always satisfied without recursion.
#[must_use]
pub fn factory_name() -> Name<Factory> {
    Name::of("FACTORY")
}

/// An immutable dependency-injection factory.
///
/// A factory holds a priority-ordered list of [`Rule`]s, a [`Warehouse`]
/// memoizing everything built so far, and the customizer engines applied to
/// freshly built components. Components are built lazily on first demand and
/// live for the factory's lifetime; concurrent readers are safe once
/// construction completes.
///
/// Factories are created through a [`Builder`](crate::Builder) and never
/// mutated: adding a rule ([`Factory::concat`]) produces a fresh factory.
///
/// ## Example
///
/// ```
/// use runtime_factory::{Builder, Name, SingletonRule, Svc};
/// use std::sync::Arc;
///
/// let name = Name::<i32>::of("answer");
/// let mut builder = Builder::new();
/// builder.add_rule(Arc::new(SingletonRule::new(name.clone(), 42)));
///
/// let factory = builder.build().unwrap();
/// let answer: Svc<i32> = factory.get_component(&name).unwrap();
/// assert_eq!(42, *answer);
/// ```
pub struct Factory {
    id: String,
    used_plugins: bool,
    buckets: IndexMap<String, Vec<Arc<dyn Rule>>>,
    rules: Vec<Arc<dyn Rule>>,
    customizer_engines: Vec<Arc<dyn CustomizerEngine>>,
    warehouse: Arc<Warehouse>,
    metrics: OnceLock<MetricsHandle>,
    weak_self: Weak<Factory>,
}

impl Factory {
    pub(crate) fn create(
        used_plugins: bool,
        user_buckets: IndexMap<String, Vec<Arc<dyn Rule>>>,
        customizer_engines: Vec<Arc<dyn CustomizerEngine>>,
        warehouse: Warehouse,
    ) -> FactoryResult<Arc<Self>> {
        let warehouse = Arc::new(warehouse);
        let factory = Arc::new_cyclic(|weak: &Weak<Factory>| {
            let mut buckets: IndexMap<String, Vec<Arc<dyn Rule>>> = IndexMap::new();
            let self_rule: Arc<dyn Rule> = Arc::new(FactorySelfRule { weak: weak.clone() });
            buckets.insert(FACTORY_BUCKET.to_owned(), vec![self_rule]);
            let metrics_rule: Arc<dyn Rule> = Arc::new(SingleNameRule::new(
                10000,
                Arc::new(StdEngine::no_deps(metrics_name(), MetricsHandle::default)),
            ));
            buckets.insert(METRICS_BUCKET.to_owned(), vec![metrics_rule]);
            if !warehouse.providers().is_empty() {
                let providers_rule: Arc<dyn Rule> = Arc::new(WarehouseProvidersRule {
                    providers: warehouse.providers().to_vec(),
                });
                buckets.insert(PROVIDERS_BUCKET.to_owned(), vec![providers_rule]);
            }
            for (bucket, rules) in &user_buckets {
                buckets
                    .entry(bucket.clone())
                    .or_default()
                    .extend(rules.iter().cloned());
            }

            let mut rules: Vec<Arc<dyn Rule>> = buckets.values().flatten().cloned().collect();
            rules.sort_by_key(|rule| rule.priority());

            let id = format!(
                "{:03}-{}({})",
                NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed),
                warehouse.id(),
                rules.len()
            );
            Factory {
                id,
                used_plugins,
                buckets,
                rules,
                customizer_engines,
                warehouse: Arc::clone(&warehouse),
                metrics: OnceLock::new(),
                weak_self: weak.clone(),
            }
        });
        factory.init_metrics()?;
        Ok(factory)
    }

    // Resolves the metrics component eagerly. Timings recorded while this
    // very resolution runs go to a throwaway default sink.
    fn init_metrics(self: &Arc<Self>) -> FactoryResult<()> {
        let handle = self
            .query_by_name(metrics_name())
            .find_one_as_component()?
            .ok_or_else(|| {
                FactoryError::Internal("the metrics component could not be resolved".to_owned())
            })?;
        let _ = self.metrics.set((*handle).clone());
        Ok(())
    }

    pub(crate) fn metrics(&self) -> MetricsHandle {
        self.metrics.get().cloned().unwrap_or_default()
    }

    /// This factory's identifier, unique within the process.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The rules of this factory, in priority order.
    #[must_use]
    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    /// This factory's warehouse.
    #[must_use]
    pub fn warehouse(&self) -> &Arc<Warehouse> {
        &self.warehouse
    }

    pub(crate) fn customizer_engines(&self) -> &[Arc<dyn CustomizerEngine>] {
        &self.customizer_engines
    }

    /// A bound query for one specific name.
    #[must_use]
    pub fn query_by_name<T: Component>(self: &Arc<Self>, name: Name<T>) -> BoundQuery<T> {
        Query::by_name(name).bind(self)
    }

    /// A bound query for every buildable name of component class `T`.
    #[must_use]
    pub fn query_by_class<T: Component>(self: &Arc<Self>) -> BoundQuery<T> {
        Query::<T>::by_class().bind(self)
    }

    /// A bound query for this factory itself. Always satisfied.
    #[must_use]
    pub fn query_factory(self: &Arc<Self>) -> BoundQuery<Factory> {
        Query::factory().bind(self)
    }

    /// Builds (or recalls) the component registered under `name`.
    ///
    /// # Errors
    ///
    /// Fails when no rule can build the name or when building fails.
    pub fn get_component<T: Component>(self: &Arc<Self>, name: &Name<T>) -> FactoryResult<Svc<T>> {
        match self
            .query_by_name(name.clone())
            .mandatory()
            .find_one_as_component()?
        {
            Some(component) => Ok(component),
            None => Err(UnsatisfiedDependency::on(vec![RawQuery::by_name(
                name.as_raw().clone(),
            )])
            .raise()),
        }
    }

    /// Builds the single component of class `T`.
    ///
    /// # Errors
    ///
    /// Fails when no component of the class exists, when several do, or when
    /// building fails.
    pub fn get_component_by_class<T: Component>(self: &Arc<Self>) -> FactoryResult<Svc<T>> {
        match self
            .query_by_class::<T>()
            .mandatory()
            .find_one_as_component()?
        {
            Some(component) => Ok(component),
            None => Err(UnsatisfiedDependency::on(vec![RawQuery::by_class(
                ComponentInfo::of::<T>(),
            )])
            .raise()),
        }
    }

    /// Builds every component of class `T`, in rule priority order.
    ///
    /// # Errors
    ///
    /// Fails when one of the matched components cannot be built.
    pub fn get_components<T: Component>(self: &Arc<Self>) -> FactoryResult<Vec<Svc<T>>> {
        self.query_by_class::<T>().find_as_components()
    }

    /// Materializes every component flagged auto-start and invokes its start
    /// handle.
    ///
    /// # Errors
    ///
    /// Fails when one of the flagged components cannot be built.
    pub fn start(self: &Arc<Self>) -> FactoryResult<()> {
        for name in self.collect_buildable_names(None) {
            let Some(rule) = self.find_rule_for(&name) else {
                continue;
            };
            let Some(engine) = rule.engine_for(&name) else {
                continue;
            };
            if !engine.auto_start() {
                continue;
            }
            self.find_one_raw(&RawQuery::by_name(name.clone()))?;
            if let Some(handle) = self.warehouse.start_handle(&name) {
                tracing::debug!(factory = %self.id, %name, "starting component");
                handle.start();
            }
        }
        Ok(())
    }

    /// Closes the warehouse, releasing built components in reverse build
    /// order.
    pub fn close(&self) {
        self.warehouse.close();
    }

    /// A fresh factory with one more rule, the same customizer engines and a
    /// new warehouse over the same providers.
    ///
    /// # Errors
    ///
    /// Fails when the new factory cannot bootstrap.
    pub fn concat(self: &Arc<Self>, rule: Arc<dyn Rule>) -> FactoryResult<Arc<Factory>> {
        let mut buckets = self.buckets.clone();
        buckets.shift_remove(FACTORY_BUCKET);
        buckets.shift_remove(METRICS_BUCKET);
        buckets.shift_remove(PROVIDERS_BUCKET);
        buckets
            .entry("IndividualRules".to_owned())
            .or_default()
            .push(rule);
        Factory::create(
            self.used_plugins,
            buckets,
            self.customizer_engines.clone(),
            Warehouse::with_providers(self.warehouse.providers().to_vec()),
        )
    }

    // ---- rule lookup ----

    pub(crate) fn find_rule_for(&self, name: &RawName) -> Option<&Arc<dyn Rule>> {
        self.rules.iter().find(|rule| rule.can_build(name))
    }

    fn find_all_rules_for(&self, name: &RawName) -> Vec<&Arc<dyn Rule>> {
        self.rules
            .iter()
            .filter(|rule| rule.can_build(name))
            .collect()
    }

    fn find_all_rules_listing(&self, name: &RawName) -> Vec<&Arc<dyn Rule>> {
        self.rules
            .iter()
            .filter(|rule| rule.produced_names().contains(name))
            .collect()
    }

    fn collect_buildable_names(&self, class: Option<ComponentInfo>) -> Vec<RawName> {
        let mut names = IndexSet::new();
        for rule in &self.rules {
            let produced = match class {
                Some(class) => rule.names_for_class(class),
                None => rule.produced_names(),
            };
            for name in produced {
                names.insert(name);
            }
        }
        names.into_iter().collect()
    }

    pub(crate) fn machine_not_found_message(&self, name: &RawName) -> String {
        let similar = self.collect_buildable_names(Some(name.class()));
        let mut message = format!(
            "{name} can't be satisfied in {}: no machine found to build it.",
            self.id
        );
        if !similar.is_empty() {
            let hints: Vec<String> = similar.iter().map(ToString::to_string).collect();
            let _ = write!(message, " similar components found: {}", hints.join(", "));
        }
        message
    }

    // ---- erased query evaluation ----

    pub(crate) fn find_names_raw(self: &Arc<Self>, query: &RawQuery) -> Vec<RawName> {
        match query.kind() {
            QueryKind::ByName(name) => vec![name.clone()],
            QueryKind::ByClass(class) => self.collect_buildable_names(Some(*class)),
            QueryKind::Factory => vec![factory_name().into_raw()],
        }
    }

    pub(crate) fn find_raw(self: &Arc<Self>, query: &RawQuery) -> FactoryResult<Vec<AnyComponent>> {
        match query.kind() {
            QueryKind::Factory => Ok(vec![self.self_component()]),
            QueryKind::ByName(name) => {
                Ok(self.build_by_name(query, name)?.into_iter().collect())
            }
            QueryKind::ByClass(class) => {
                let mut components = Vec::new();
                let mut built: IndexSet<RawName> = IndexSet::new();
                let rules = self.rules.clone();
                for rule in &rules {
                    for name in rule.names_for_class(*class) {
                        if built.contains(&name) {
                            continue;
                        }
                        if let Some(component) = self.warehouse.check_out(&name) {
                            components.push(component);
                            built.insert(name);
                            continue;
                        }
                        let Some(engine) = rule.engine_for(&name) else {
                            tracing::warn!(
                                rule = %rule, %name,
                                "rule lists a name it does not build"
                            );
                            continue;
                        };
                        if let Some(component) =
                            resolver::build_and_store(self, query.clone(), engine)?
                        {
                            components.push(component);
                            built.insert(name);
                        }
                    }
                }
                Ok(components)
            }
        }
    }

    pub(crate) fn find_one_raw(
        self: &Arc<Self>,
        query: &RawQuery,
    ) -> FactoryResult<Option<AnyComponent>> {
        if query.is_multiple() {
            let components = self.find_raw(query)?;
            return match components.len() {
                0 if query.is_mandatory() => {
                    Err(UnsatisfiedDependency::on(vec![query.clone()]).raise())
                }
                0 => Ok(None),
                1 => Ok(components.into_iter().next()),
                _ => Err(FactoryError::Ambiguous {
                    query: query.to_string(),
                    candidates: components.iter().map(|c| c.name().clone()).collect(),
                }),
            };
        }
        let component = self.find_raw(query)?.into_iter().next();
        match component {
            Some(component) => Ok(Some(component)),
            None if query.is_mandatory() => match query.kind() {
                QueryKind::ByName(name) if self.find_rule_for(name).is_none() => Err(
                    UnsatisfiedDependency::on(vec![query.clone()])
                        .caused_by(self.machine_not_found_message(name))
                        .raise(),
                ),
                _ => Err(UnsatisfiedDependency::on(vec![query.clone()]).raise()),
            },
            None => Ok(None),
        }
    }

    fn build_by_name(
        self: &Arc<Self>,
        query: &RawQuery,
        name: &RawName,
    ) -> FactoryResult<Option<AnyComponent>> {
        if let Some(component) = self.warehouse.check_out(name) {
            return Ok(Some(component));
        }
        let rules = self.rules.clone();
        for rule in &rules {
            if !rule.can_build(name) {
                continue;
            }
            let Some(engine) = rule.engine_for(name) else {
                tracing::warn!(rule = %rule, %name, "rule claims a name it has no engine for");
                continue;
            };
            if let Some(component) = resolver::build_and_store(self, query.clone(), engine)? {
                return Ok(Some(component));
            }
        }
        Ok(None)
    }

    fn self_component(self: &Arc<Self>) -> AnyComponent {
        AnyComponent::new(factory_name().into_raw(), Arc::clone(self))
    }

    pub(crate) fn is_self_component(&self, component: &AnyComponent) -> bool {
        component
            .component()
            .as_ref()
            .downcast_ref::<Factory>()
            .is_some_and(|factory| std::ptr::eq(factory, self))
    }

    // ---- pre-flight satisfaction checks ----

    pub(crate) fn check_satisfy_raw(
        self: &Arc<Self>,
        query: &RawQuery,
        in_progress: &mut Vec<RawName>,
    ) -> FactoryResult<()> {
        if !query.is_mandatory() {
            return Ok(());
        }
        if matches!(query.kind(), QueryKind::Factory) {
            return Ok(());
        }
        let names = self.find_names_raw(query);
        if names.is_empty() {
            return Err(UnsatisfiedDependency::on(vec![query.clone()]).raise());
        }
        for name in names {
            self.check_satisfy_name(&name, in_progress)?;
        }
        Ok(())
    }

    fn check_satisfy_name(
        self: &Arc<Self>,
        name: &RawName,
        in_progress: &mut Vec<RawName>,
    ) -> FactoryResult<()> {
        if in_progress.contains(name) {
            let mut names = in_progress.clone();
            names.push(name.clone());
            return Err(FactoryError::Cycle { names });
        }
        if self.warehouse.check_out(name).is_some() {
            return Ok(());
        }
        let Some(rule) = self.find_rule_for(name) else {
            return Err(
                UnsatisfiedDependency::on(vec![RawQuery::by_name(name.clone())])
                    .caused_by(self.machine_not_found_message(name))
                    .raise(),
            );
        };
        let Some(engine) = rule.engine_for(name) else {
            return Err(
                UnsatisfiedDependency::on(vec![RawQuery::by_name(name.clone())])
                    .caused_by(self.machine_not_found_message(name))
                    .raise(),
            );
        };
        in_progress.push(name.clone());
        let mut not_satisfied = crate::UnsatisfiedDependencies::none();
        for query in engine.bill_of_materials().queries() {
            match self.check_satisfy_raw(query, in_progress) {
                Ok(()) => {}
                Err(FactoryError::Unsatisfied(unsatisfied)) => {
                    not_satisfied = not_satisfied
                        .concat(unsatisfied.prepend(RawQuery::by_name(name.clone())));
                }
                Err(other) => {
                    in_progress.pop();
                    return Err(other);
                }
            }
        }
        in_progress.pop();
        if not_satisfied.is_empty() {
            Ok(())
        } else {
            Err(not_satisfied.raise())
        }
    }

    /// Verifies that the component registered under `name` could be built.
    ///
    /// # Errors
    ///
    /// Fails exactly when [`Factory::get_component`] would fail.
    pub fn check_satisfy<T: Component>(self: &Arc<Self>, name: &Name<T>) -> FactoryResult<()> {
        self.check_satisfy_raw(
            &RawQuery::by_name(name.as_raw().clone()),
            &mut Vec::new(),
        )
    }

    // ---- diagnostics ----

    /// A human-readable snapshot of this factory: rules by priority and by
    /// bucket, buildable names with their chosen engine, overridden rules,
    /// BOM satisfaction status, and the warehouse content.
    #[must_use]
    pub fn dump(self: &Arc<Self>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "---------------------------------------------");
        let _ = writeln!(out, "             Factory {}", self.id);

        let _ = writeln!(out, "--> Rules by priority");
        for rule in &self.rules {
            let _ = writeln!(out, "  {rule}");
        }
        let _ = writeln!(out, "--");

        let _ = writeln!(out, "--> Rules by bucket");
        for (bucket, rules) in &self.buckets {
            let _ = writeln!(out, "  = {bucket}({} rules) =", rules.len());
            for rule in rules {
                let _ = writeln!(out, "     {rule}");
            }
        }
        let _ = writeln!(out, "--");

        self.dump_buildable_components(&mut out);

        let _ = writeln!(out, "--> Warehouse\n  {}", self.warehouse);
        let _ = writeln!(out, "--");
        let _ = write!(out, "---------------------------------------------");
        out
    }

    fn dump_buildable_components(self: &Arc<Self>, out: &mut String) {
        let _ = writeln!(out, "--> Buildable Components");
        for name in self.collect_buildable_names(None) {
            let _ = writeln!(out, "   {name}");
            let rules_for = self.find_all_rules_for(&name);
            let Some(first) = rules_for.first() else {
                let listing: Vec<String> = self
                    .find_all_rules_listing(&name)
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                let _ = writeln!(
                    out,
                    "      ERROR: rule [{}]\n       lists this name in produced_names() \
                     but doesn't properly implement can_build()",
                    listing.join(", ")
                );
                continue;
            };
            let Some(engine) = first.engine_for(&name) else {
                let _ = writeln!(out, "      ERROR: rule {first} has no engine for this name");
                continue;
            };
            let _ = writeln!(out, "      BUILD BY: {engine}");
            if rules_for.len() > 1 {
                let _ = writeln!(out, "      OVERRIDING:");
                for rule in &rules_for[1..] {
                    let _ = writeln!(out, "         {rule}");
                }
            }
            let bom = engine.bill_of_materials();
            if !bom.is_empty() {
                let _ = writeln!(out, "      BOM:");
                for query in bom.queries() {
                    let _ = writeln!(out, "        - {query}");
                    match self.check_satisfy_raw(query, &mut Vec::new()) {
                        Ok(()) => {
                            for dep_name in self.find_names_raw(query) {
                                let _ = writeln!(out, "          -> {dep_name}");
                            }
                        }
                        Err(error) => {
                            let _ =
                                writeln!(out, "          ERROR: CAN'T BE SATISFIED: {error}");
                        }
                    }
                }
            }
        }
        let _ = writeln!(out, "--");
    }
}

impl Display for Factory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Factory[{}]", self.id)
    }
}

impl Debug for Factory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("id", &self.id)
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

// ---- internal rules ----

// Registers the factory under its well-known name, at a priority any user
// rule can override.
struct FactorySelfRule {
    weak: Weak<Factory>,
}

impl Rule for FactorySelfRule {
    fn priority(&self) -> i32 {
        10000
    }

    fn produced_names(&self) -> Vec<RawName> {
        vec![factory_name().into_raw()]
    }

    fn engine_for(&self, name: &RawName) -> Option<Arc<dyn Engine>> {
        (name == factory_name().as_raw()).then(|| {
            Arc::new(FactorySelfEngine {
                name: factory_name().into_raw(),
                bom: BillOfMaterials::empty(),
                weak: self.weak.clone(),
            }) as Arc<dyn Engine>
        })
    }
}

impl Display for FactorySelfRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("FactorySelfRule{priority=10000}")
    }
}

struct FactorySelfEngine {
    name: RawName,
    bom: BillOfMaterials,
    weak: Weak<Factory>,
}

impl Engine for FactorySelfEngine {
    fn name(&self) -> &RawName {
        &self.name
    }

    fn bill_of_materials(&self) -> &BillOfMaterials {
        &self.bom
    }

    fn new_component(&self, _satisfied: &SatisfiedBom) -> ComponentBox {
        match self.weak.upgrade() {
            Some(factory) => {
                ComponentBox::boundless(AnyComponent::new(self.name.clone(), factory))
            }
            None => ComponentBox::empty(self.name.clone()),
        }
    }
}

impl Display for FactorySelfEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("FactorySelfEngine")
    }
}

// Surfaces the provider warehouses' stored components to class queries; name
// lookups already reach providers through the warehouse chain.
struct WarehouseProvidersRule {
    providers: Vec<Arc<Warehouse>>,
}

impl Rule for WarehouseProvidersRule {
    fn produced_names(&self) -> Vec<RawName> {
        let mut names = IndexSet::new();
        for provider in &self.providers {
            for name in provider.stored_names() {
                names.insert(name);
            }
        }
        names.into_iter().collect()
    }

    fn engine_for(&self, name: &RawName) -> Option<Arc<dyn Engine>> {
        self.can_build(name).then(|| {
            Arc::new(ProviderEngine {
                name: name.clone(),
                bom: BillOfMaterials::empty(),
                providers: self.providers.clone(),
            }) as Arc<dyn Engine>
        })
    }
}

impl Display for WarehouseProvidersRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WarehouseProvidersRule{{providers={}}}",
            self.providers.len()
        )
    }
}

struct ProviderEngine {
    name: RawName,
    bom: BillOfMaterials,
    providers: Vec<Arc<Warehouse>>,
}

impl Engine for ProviderEngine {
    fn name(&self) -> &RawName {
        &self.name
    }

    fn bill_of_materials(&self) -> &BillOfMaterials {
        &self.bom
    }

    fn new_component(&self, _satisfied: &SatisfiedBom) -> ComponentBox {
        match self
            .providers
            .iter()
            .find_map(|provider| provider.check_out(&self.name))
        {
            Some(component) => ComponentBox::boundless(component),
            None => ComponentBox::empty(self.name.clone()),
        }
    }
}

impl Display for ProviderEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderEngine{{name={}}}", self.name)
    }
}
