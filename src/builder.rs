use crate::{
    resolver, ComponentInfo, CustomizerEngine, Factory, FactoryError, FactoryResult,
    MetricsHandle, MetricsSink, NamedComponent, Overlay, RawName, RawQuery, Rule, SingletonRule,
    Svc, UnsatisfiedDependencies, Warehouse, RULE_PLUGINS,
};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const PLUGINS_BUCKET: &str = "PluginRules";
const INDIVIDUAL_BUCKET: &str = "IndividualRules";
const META_BUCKET: &str = "MetaRules";

enum OverlaySource {
    // resolved against the thread calling build()
    CallerThread,
    Fixed(Arc<Overlay>),
}

/// Assembles the rule set and bootstraps a [`Factory`].
///
/// Rules are grouped in named buckets (plugins, overlays, individual rules)
/// for diagnostics. [`Builder::build`] runs the fixed-point bootstrap: rules
/// producing rules are built round after round until no new rule appears,
/// then customizer engines are built, and the final immutable factory is
/// assembled. The builder itself stays reusable; overlays are snapshotted at
/// each `build()`.
///
/// ## Example
///
/// ```
/// use runtime_factory::{Builder, Name, SingletonRule, Svc};
/// use std::sync::Arc;
///
/// let name = Name::<String>::of("motd");
/// let mut builder = Builder::new();
/// builder.add_rule(Arc::new(SingletonRule::new(name.clone(), "hi".to_string())));
///
/// let factory = builder.build().unwrap();
/// assert_eq!("hi", factory.get_component(&name).unwrap().as_str());
/// ```
#[derive(Default)]
pub struct Builder {
    used_plugins: bool,
    buckets: IndexMap<String, Vec<Arc<dyn Rule>>>,
    overlays: Vec<OverlaySource>,
    providers: Vec<Arc<Warehouse>>,
}

impl Builder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Builder::default()
    }

    /// Adds every rule registered on the [`RULE_PLUGINS`] distributed slice
    /// into the plugin bucket.
    pub fn add_plugin_rules(&mut self) -> &mut Self {
        self.used_plugins = true;
        let bucket = self.buckets.entry(PLUGINS_BUCKET.to_owned()).or_default();
        for plugin in RULE_PLUGINS.iter() {
            bucket.push(plugin());
        }
        self
    }

    /// Uses the overlay of whichever thread ends up calling
    /// [`Builder::build`].
    pub fn add_thread_overlay(&mut self) -> &mut Self {
        self.overlays.push(OverlaySource::CallerThread);
        self
    }

    /// Adds a specific overlay; its rules are snapshotted at build time.
    pub fn add_overlay(&mut self, overlay: Arc<Overlay>) -> &mut Self {
        self.overlays.push(OverlaySource::Fixed(overlay));
        self
    }

    /// Adds one rule to the individual bucket.
    pub fn add_rule(&mut self, rule: Arc<dyn Rule>) -> &mut Self {
        self.buckets
            .entry(INDIVIDUAL_BUCKET.to_owned())
            .or_default()
            .push(rule);
        self
    }

    /// Registers a metrics sink, overriding the default in-memory one.
    pub fn with_metrics_sink(&mut self, sink: Svc<dyn MetricsSink>) -> &mut Self {
        self.add_rule(Arc::new(SingletonRule::of_named(NamedComponent::new(
            crate::metrics_name(),
            MetricsHandle::new(sink),
        ))))
    }

    /// Adds a parent warehouse consulted on lookup miss by the built
    /// factory's warehouse.
    pub fn add_warehouse_provider(&mut self, warehouse: Arc<Warehouse>) -> &mut Self {
        self.providers.push(warehouse);
        self
    }

    /// Bootstraps the factory.
    ///
    /// # Errors
    ///
    /// Fails on duplicate names (two rules in one bucket declaring the same
    /// name at the same priority), on meta-rules whose dependencies can
    /// never be satisfied, and on anything the intermediate resolutions can
    /// raise (cycles, ambiguity).
    pub fn build(&self) -> FactoryResult<Arc<Factory>> {
        let mut buckets = self.buckets.clone();
        let mut overlay_buckets = HashSet::new();
        for source in &self.overlays {
            let overlay = match source {
                OverlaySource::CallerThread => Overlay::thread_local(),
                OverlaySource::Fixed(overlay) => Arc::clone(overlay),
            };
            overlay_buckets.insert(overlay.id().to_owned());
            buckets
                .entry(overlay.id().to_owned())
                .or_default()
                .extend(overlay.rules());
        }
        check_duplicate_names(&buckets, &overlay_buckets)?;

        // Fixed point: rules may produce rules, which may need injection
        // themselves. Each round builds what it can against a fresh factory;
        // a round producing nothing new while requests are still unsatisfied
        // reports them all.
        let mut factory = Factory::create(
            self.used_plugins,
            buckets.clone(),
            Vec::new(),
            Warehouse::with_providers(self.providers.clone()),
        )?;
        let mut deferred: IndexMap<RawName, Arc<dyn crate::Engine>> = IndexMap::new();
        let seed = factory.rules().to_vec();
        let mut new_rules = build_rules(&factory, &seed, &mut deferred)?;
        while !new_rules.is_empty() {
            buckets
                .entry(META_BUCKET.to_owned())
                .or_default()
                .extend(new_rules.iter().cloned());
            factory = Factory::create(
                self.used_plugins,
                buckets.clone(),
                Vec::new(),
                Warehouse::new(),
            )?;
            new_rules = build_rules(&factory, &new_rules, &mut deferred)?;
        }

        let customizer_engines = build_customizer_engines(&factory)?;
        Factory::create(
            self.used_plugins,
            buckets,
            customizer_engines,
            Warehouse::with_providers(self.providers.clone()),
        )
    }
}

fn check_duplicate_names(
    buckets: &IndexMap<String, Vec<Arc<dyn Rule>>>,
    overlay_buckets: &HashSet<String>,
) -> FactoryResult<()> {
    for (bucket, rules) in buckets {
        if overlay_buckets.contains(bucket) {
            // an overlay is an ordered override list; re-setting a name is
            // the intended usage
            continue;
        }
        let mut declared: HashMap<RawName, Vec<i32>> = HashMap::new();
        for rule in rules {
            let mut own = HashSet::new();
            for name in rule.produced_names() {
                if !own.insert(name.clone()) {
                    continue;
                }
                let priorities = declared.entry(name.clone()).or_default();
                if priorities.contains(&rule.priority()) {
                    return Err(FactoryError::DuplicateName {
                        bucket: bucket.clone(),
                        name,
                        priority: rule.priority(),
                    });
                }
                priorities.push(rule.priority());
            }
        }
    }
    Ok(())
}

// One bootstrap round: build every buildable rule component declared by
// `from_rules`, retry the rounds' leftovers, and defer what is still
// unsatisfied.
fn build_rules(
    factory: &Arc<Factory>,
    from_rules: &[Arc<dyn Rule>],
    deferred: &mut IndexMap<RawName, Arc<dyn crate::Engine>>,
) -> FactoryResult<Vec<Arc<dyn Rule>>> {
    let rule_class = ComponentInfo::of::<Arc<dyn Rule>>();
    let mut produced: Vec<Arc<dyn Rule>> = Vec::new();
    let mut seen: HashSet<RawName> = HashSet::new();
    let mut not_satisfied = UnsatisfiedDependencies::none();
    let mut defer_next: IndexMap<RawName, Arc<dyn crate::Engine>> = IndexMap::new();

    for rule in from_rules {
        for name in rule.names_for_class(rule_class) {
            if !seen.insert(name.clone()) {
                continue;
            }
            let Some(engine) = rule.engine_for(&name) else {
                tracing::warn!(rule = %rule, %name, "rule lists a rule name it does not build");
                continue;
            };
            match build_rule_component(factory, &name, Arc::clone(&engine)) {
                Ok(Some(built)) => produced.push(built),
                Ok(None) => {}
                Err(FactoryError::Unsatisfied(unsatisfied)) => {
                    not_satisfied = not_satisfied
                        .concat(unsatisfied.prepend(RawQuery::by_name(name.clone())));
                    defer_next.insert(name, engine);
                }
                Err(other) => return Err(other),
            }
        }
    }

    let retry: Vec<(RawName, Arc<dyn crate::Engine>)> = deferred
        .iter()
        .map(|(name, engine)| (name.clone(), Arc::clone(engine)))
        .collect();
    for (name, engine) in retry {
        match build_rule_component(factory, &name, engine) {
            Ok(Some(built)) => {
                produced.push(built);
                deferred.shift_remove(&name);
            }
            Ok(None) => {
                deferred.shift_remove(&name);
            }
            Err(FactoryError::Unsatisfied(unsatisfied)) => {
                not_satisfied =
                    not_satisfied.concat(unsatisfied.prepend(RawQuery::by_name(name)));
            }
            Err(other) => return Err(other),
        }
    }
    deferred.extend(defer_next);

    if !not_satisfied.is_empty() && produced.is_empty() {
        // no new rule can appear anymore, so these can never be satisfied
        return Err(not_satisfied.raise());
    }
    Ok(produced)
}

fn build_rule_component(
    factory: &Arc<Factory>,
    name: &RawName,
    engine: Arc<dyn crate::Engine>,
) -> FactoryResult<Option<Arc<dyn Rule>>> {
    let query = RawQuery::by_name(name.clone());
    let Some(component) = resolver::build_and_store(factory, query, engine)? else {
        return Ok(None);
    };
    match component.downcast::<Arc<dyn Rule>>() {
        Ok(named) => Ok(Some((**named.component()).clone())),
        Err(component) => Err(FactoryError::Internal(format!(
            "rule component {} built to an unexpected type",
            component.name()
        ))),
    }
}

fn build_customizer_engines(
    factory: &Arc<Factory>,
) -> FactoryResult<Vec<Arc<dyn CustomizerEngine>>> {
    let customizer_class = ComponentInfo::of::<Arc<dyn CustomizerEngine>>();
    let mut engines: Vec<Arc<dyn CustomizerEngine>> = Vec::new();
    let mut seen: HashSet<RawName> = HashSet::new();
    for rule in factory.rules().to_vec() {
        for name in rule.names_for_class(customizer_class) {
            if !seen.insert(name.clone()) {
                continue;
            }
            let Some(engine) = rule.engine_for(&name) else {
                tracing::warn!(rule = %rule, %name, "rule lists a customizer name it does not build");
                continue;
            };
            let query = RawQuery::by_name(name.clone());
            let Some(component) = resolver::build_and_store(factory, query, engine)? else {
                continue;
            };
            match component.downcast::<Arc<dyn CustomizerEngine>>() {
                Ok(named) => engines.push((**named.component()).clone()),
                Err(component) => {
                    return Err(FactoryError::Internal(format!(
                        "customizer engine {} built to an unexpected type",
                        component.name()
                    )))
                }
            }
        }
    }
    Ok(engines)
}
