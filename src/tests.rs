use crate::{
    AutoStartable, BillOfMaterials, Builder, ClassCustomizerEngine, Closeable, CustomizerEngine,
    Engine, FactoryError, InMemoryMetrics, MetricsSink, Name, Overlay, Query, RawName, Rule,
    SingleNameRule, SingletonRule, StdEngine, Svc, RULE_PLUGINS,
};
use linkme::distributed_slice;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn string_singleton(id: &str, value: &str) -> Arc<dyn Rule> {
    Arc::new(SingletonRule::new(
        Name::<String>::of(id),
        value.to_string(),
    ))
}

fn dependent_string_rule(id: &str, dep: &Name<String>, prefix: &'static str) -> Arc<dyn Rule> {
    let query = Query::by_name(dep.clone());
    let bom = BillOfMaterials::of([query.clone().into()]);
    Arc::new(SingleNameRule::new(
        0,
        Arc::new(StdEngine::new(Name::<String>::of(id), bom, move |bom| {
            let dep = bom.one(&query).unwrap().into_component();
            format!("{prefix}({dep})")
        })),
    ))
}

#[test]
fn chain_of_dependencies_builds_in_dependency_order() {
    let a = Name::<String>::of("a");
    let b = Name::<String>::of("b");
    let c = Name::<String>::of("c");

    let mut builder = Builder::new();
    builder.add_rule(Arc::new(SingleNameRule::new(
        0,
        Arc::new(StdEngine::no_deps(c.clone(), || "ok".to_string())),
    )));
    builder.add_rule(dependent_string_rule("b", &c, "b"));
    builder.add_rule(dependent_string_rule("a", &b, "a"));

    let factory = builder.build().unwrap();
    let built = factory.get_component(&a).unwrap();
    assert_eq!("a(b(ok))", built.as_str());

    let stored = factory.warehouse().stored_names();
    let position = |name: &Name<String>| {
        stored
            .iter()
            .position(|stored| stored == name.as_raw())
            .unwrap()
    };
    assert!(position(&c) < position(&b));
    assert!(position(&b) < position(&a));

    let dump = factory.dump();
    assert!(dump.contains("BUILD BY"));
    assert!(dump.contains("BOM"));
    assert!(!dump.contains("CAN'T BE SATISFIED"));
}

#[test]
fn lowest_priority_rule_wins_and_dump_lists_overridden_rules() {
    let x = Name::<String>::of("x");
    let mut builder = Builder::new();
    builder.add_rule(Arc::new(
        SingletonRule::new(x.clone(), "default".to_string()).with_priority(10),
    ));
    builder.add_rule(Arc::new(
        SingletonRule::new(x.clone(), "override".to_string()).with_priority(-100),
    ));

    let factory = builder.build().unwrap();
    assert_eq!("override", factory.get_component(&x).unwrap().as_str());

    let dump = factory.dump();
    assert!(dump.contains("OVERRIDING"));
    assert!(dump.contains("priority=10"));
}

#[test]
fn cyclic_dependencies_are_rejected() {
    let a = Name::<String>::of("a");
    let b = Name::<String>::of("b");

    let mut builder = Builder::new();
    builder.add_rule(Arc::new(SingleNameRule::new(
        0,
        Arc::new(StdEngine::new(
            a.clone(),
            BillOfMaterials::of([Query::by_name(b.clone()).into()]),
            |_| "a".to_string(),
        )),
    )));
    builder.add_rule(Arc::new(SingleNameRule::new(
        0,
        Arc::new(StdEngine::new(
            b.clone(),
            BillOfMaterials::of([Query::by_name(a.clone()).into()]),
            |_| "b".to_string(),
        )),
    )));

    let factory = builder.build().unwrap();
    match factory.get_component(&a) {
        Err(FactoryError::Cycle { names }) => {
            assert!(names.contains(a.as_raw()));
            assert!(names.contains(b.as_raw()));
        }
        Err(error) => panic!("expected a cycle error, got: {error}"),
        Ok(_) => panic!("built a component with a cyclic dependency"),
    }
}

#[test]
fn missing_mandatory_dependency_reports_the_full_query_path() {
    struct Widget;

    let a = Name::<String>::of("a");
    let mut builder = Builder::new();
    builder.add_rule(Arc::new(SingleNameRule::new(
        0,
        Arc::new(StdEngine::new(
            a.clone(),
            BillOfMaterials::of([Query::<Widget>::by_class().mandatory().into()]),
            |_| "a".to_string(),
        )),
    )));

    let factory = builder.build().unwrap();
    let error = factory.get_component(&a).unwrap_err();
    let message = error.to_string();
    assert!(message.contains("QueryByName"), "got: {message}");
    assert!(message.contains("QueryByClass"), "got: {message}");
    assert!(message.contains("no machine found"), "got: {message}");
}

#[test]
fn thread_overlay_applies_only_to_builds_on_its_thread() {
    Overlay::thread_local().set("N", 42_i32);

    let mut builder = Builder::new();
    builder.add_thread_overlay();
    let factory = builder.build().unwrap();
    let n = factory.get_component(&Name::<i32>::of("N")).unwrap();
    assert_eq!(42, *n);

    Overlay::thread_local().clear();

    let handle = std::thread::spawn(move || {
        let factory = builder.build().unwrap();
        factory.get_component(&Name::<i32>::of("N"))
    });
    let result = handle.join().unwrap();
    let message = result.unwrap_err().to_string();
    assert!(message.contains("no machine found"), "got: {message}");
}

#[test]
fn meta_rules_converge_through_the_fixed_point_loop() {
    let produced_rule = Name::<Arc<dyn Rule>>::of("rule:R");
    let component = Name::<String>::of("C");

    let meta_component = component.clone();
    let meta = SingleNameRule::new(
        0,
        Arc::new(StdEngine::new(
            produced_rule,
            BillOfMaterials::empty(),
            move |_| {
                let rule: Arc<dyn Rule> = Arc::new(SingletonRule::new(
                    meta_component.clone(),
                    "from-R".to_string(),
                ));
                rule
            },
        )),
    );

    let mut builder = Builder::new();
    builder.add_rule(Arc::new(meta));
    let factory = builder.build().unwrap();

    assert_eq!("from-R", factory.get_component(&component).unwrap().as_str());
    let dump = factory.dump();
    assert!(dump.contains("MetaRules"), "got: {dump}");
}

#[test]
fn meta_rule_with_unsatisfiable_dependencies_fails_the_build() {
    let produced_rule = Name::<Arc<dyn Rule>>::of("rule:broken");
    let missing = Name::<String>::of("nowhere");

    let query = Query::by_name(missing);
    let mut builder = Builder::new();
    builder.add_rule(Arc::new(SingleNameRule::new(
        0,
        Arc::new(StdEngine::new(
            produced_rule,
            BillOfMaterials::of([query.clone().into()]),
            move |bom| {
                let rule: Arc<dyn Rule> = Arc::new(SingletonRule::new(
                    Name::<String>::of("never"),
                    bom.one(&query).map_or_else(String::new, |c| c.component().to_string()),
                ));
                rule
            },
        )),
    )));

    let error = builder.build().unwrap_err();
    assert!(error.to_string().contains("nowhere"), "got: {error}");
}

#[test]
fn components_are_memoized_and_engines_run_once() {
    let name = Name::<String>::of("counted");
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invocations);

    let mut builder = Builder::new();
    builder.add_rule(Arc::new(SingleNameRule::new(
        0,
        Arc::new(StdEngine::no_deps(name.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            "built".to_string()
        })),
    )));

    let factory = builder.build().unwrap();
    let first = factory.get_component(&name).unwrap();
    let second = factory.get_component(&name).unwrap();
    assert!(Svc::ptr_eq(&first, &second));
    assert_eq!(1, invocations.load(Ordering::SeqCst));
}

#[test]
fn built_factories_are_safe_for_concurrent_readers() {
    let name = Name::<String>::of("shared");
    let mut builder = Builder::new();
    builder.add_rule(string_singleton("shared", "v"));
    let factory = builder.build().unwrap();
    let reference = factory.get_component(&name).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let factory = Arc::clone(&factory);
            let name = name.clone();
            std::thread::spawn(move || factory.get_component(&name).unwrap())
        })
        .collect();
    for handle in handles {
        assert!(Svc::ptr_eq(&reference, &handle.join().unwrap()));
    }
}

#[test]
fn check_satisfy_succeeds_exactly_when_building_would() {
    let a = Name::<String>::of("a");
    let b = Name::<String>::of("b");

    // satisfied chain
    let mut builder = Builder::new();
    builder.add_rule(string_singleton("b", "ok"));
    builder.add_rule(dependent_string_rule("a", &b, "a"));
    let factory = builder.build().unwrap();
    factory.check_satisfy(&a).unwrap();
    factory.get_component(&a).unwrap();

    // broken chain
    let mut builder = Builder::new();
    builder.add_rule(dependent_string_rule("a", &b, "a"));
    let factory = builder.build().unwrap();
    assert!(factory.check_satisfy(&a).is_err());
    assert!(factory.get_component(&a).is_err());
}

#[test]
fn check_satisfy_terminates_on_cycles() {
    let a = Name::<String>::of("a");
    let mut builder = Builder::new();
    builder.add_rule(Arc::new(SingleNameRule::new(
        0,
        Arc::new(StdEngine::new(
            a.clone(),
            BillOfMaterials::of([Query::by_name(a.clone()).into()]),
            |_| "a".to_string(),
        )),
    )));
    let factory = builder.build().unwrap();
    assert!(matches!(
        factory.check_satisfy(&a),
        Err(FactoryError::Cycle { .. })
    ));
}

#[test]
fn empty_rule_set_still_answers_the_factory_query() {
    let factory = Builder::new().build().unwrap();
    let found = factory.query_factory().find_one().unwrap();
    assert!(found.is_some());

    let message = factory
        .get_component(&Name::<String>::of("anything"))
        .unwrap_err()
        .to_string();
    assert!(message.contains("no machine found"), "got: {message}");
}

#[test]
fn the_factory_itself_is_never_stored_in_its_warehouse() {
    let factory = Builder::new().build().unwrap();
    let _ = factory.query_factory().find_one().unwrap();
    let by_name = factory.get_component(&crate::factory_name()).unwrap();
    assert!(Arc::ptr_eq(&factory, &by_name));
    let stored = factory.warehouse().stored_names();
    assert!(stored
        .iter()
        .all(|name| name != crate::factory_name().as_raw()));
}

#[test]
fn customizers_apply_in_stable_priority_order() {
    let target = Name::<String>::of("greeting");

    let mut builder = Builder::new();
    builder.add_rule(string_singleton("greeting", "ok"));
    let second: Arc<dyn CustomizerEngine> = Arc::new(ClassCustomizerEngine::<String>::new(
        1,
        |c| format!("{}+second", c.component()),
    ));
    builder.add_rule(Arc::new(SingletonRule::new(
        Name::<Arc<dyn CustomizerEngine>>::of("second"),
        second,
    )));
    let first: Arc<dyn CustomizerEngine> = Arc::new(ClassCustomizerEngine::<String>::new(
        0,
        |c| format!("{}+first", c.component()),
    ));
    builder.add_rule(Arc::new(SingletonRule::new(
        Name::<Arc<dyn CustomizerEngine>>::of("first"),
        first,
    )));

    let factory = builder.build().unwrap();
    assert_eq!(
        "ok+first+second",
        factory.get_component(&target).unwrap().as_str()
    );
}

#[test]
fn ambiguous_single_lookups_are_rejected() {
    let mut builder = Builder::new();
    builder.add_rule(string_singleton("one", "1"));
    builder.add_rule(string_singleton("two", "2"));
    let factory = builder.build().unwrap();

    match factory.get_component_by_class::<String>() {
        Err(FactoryError::Ambiguous { candidates, .. }) => {
            assert_eq!(2, candidates.len());
        }
        Err(error) => panic!("expected ambiguity, got: {error}"),
        Ok(_) => panic!("single lookup with two matches succeeded"),
    }

    let all = factory.get_components::<String>().unwrap();
    assert_eq!(2, all.len());
}

#[test]
fn duplicate_names_in_one_bucket_are_rejected() {
    let mut builder = Builder::new();
    builder.add_rule(string_singleton("dup", "1"));
    builder.add_rule(string_singleton("dup", "2"));
    assert!(matches!(
        builder.build(),
        Err(FactoryError::DuplicateName { .. })
    ));
}

#[test]
fn overlays_may_reset_the_same_name() {
    let overlay = Overlay::context_local("tests-reset");
    overlay.set("k", 1_i32);
    overlay.set("k", 2_i32);

    let mut builder = Builder::new();
    builder.add_overlay(overlay.clone());
    let factory = builder.build().unwrap();
    // insertion order wins among equal priorities
    assert_eq!(1, *factory.get_component(&Name::<i32>::of("k")).unwrap());
    overlay.clear();
}

#[test]
fn overlay_mutations_after_build_do_not_leak_into_the_factory() {
    let overlay = Overlay::context_local("tests-snapshot");
    overlay.set("k", 1_i32);

    let mut builder = Builder::new();
    builder.add_overlay(overlay.clone());
    let factory = builder.build().unwrap();

    overlay.set("late", 2_i32);
    assert_eq!(1, *factory.get_component(&Name::<i32>::of("k")).unwrap());
    assert!(factory.get_component(&Name::<i32>::of("late")).is_err());
    overlay.clear();
}

#[test]
fn concat_produces_a_fresh_factory_with_one_more_rule() {
    let existing = Name::<String>::of("existing");
    let added = Name::<String>::of("added");

    let mut builder = Builder::new();
    builder.add_rule(string_singleton("existing", "kept"));
    let factory = builder.build().unwrap();
    factory.get_component(&existing).unwrap();

    let extended = factory.concat(string_singleton("added", "new")).unwrap();
    assert_eq!("kept", extended.get_component(&existing).unwrap().as_str());
    assert_eq!("new", extended.get_component(&added).unwrap().as_str());
    // the original factory is untouched
    assert!(factory.get_component(&added).is_err());
}

#[test]
fn build_and_close_are_idempotent() {
    let mut builder = Builder::new();
    builder.add_rule(string_singleton("n", "v"));

    for _ in 0..2 {
        let factory = builder.build().unwrap();
        factory.get_component(&Name::<String>::of("n")).unwrap();
        factory.close();
        factory.close();
        assert!(factory.warehouse().stored_names().is_empty());
    }
}

#[derive(Default)]
struct Server {
    started: AtomicBool,
}

impl AutoStartable for Server {
    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }
}

#[test]
fn start_materializes_and_starts_flagged_components() {
    let name = Name::<Server>::of("server");
    let mut builder = Builder::new();
    builder.add_rule(Arc::new(SingleNameRule::new(
        0,
        Arc::new(StdEngine::no_deps(name.clone(), Server::default).auto_startable()),
    )));

    let factory = builder.build().unwrap();
    assert!(factory.warehouse().stored_names().len() == 1); // metrics only
    factory.start().unwrap();

    let server = factory.get_component(&name).unwrap();
    assert!(server.started.load(Ordering::SeqCst));
}

struct Tracked {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Closeable for Tracked {
    fn close(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.log.lock().unwrap().push(self.label);
        Ok(())
    }
}

#[test]
fn close_releases_components_in_reverse_build_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let inner = Name::<Tracked>::of("inner");
    let outer = Name::<Tracked>::of("outer");

    let inner_log = Arc::clone(&log);
    let inner_engine = StdEngine::no_deps(inner.clone(), move || Tracked {
        label: "inner",
        log: Arc::clone(&inner_log),
    })
    .closeable();

    let outer_log = Arc::clone(&log);
    let dep = Query::by_name(inner);
    let outer_engine = StdEngine::new(
        outer.clone(),
        BillOfMaterials::of([dep.clone().into()]),
        move |bom| {
            let _inner = bom.one(&dep).unwrap();
            Tracked {
                label: "outer",
                log: Arc::clone(&outer_log),
            }
        },
    )
    .closeable();

    let mut builder = Builder::new();
    builder.add_rule(Arc::new(SingleNameRule::new(0, Arc::new(inner_engine))));
    builder.add_rule(Arc::new(SingleNameRule::new(0, Arc::new(outer_engine))));

    let factory = builder.build().unwrap();
    factory.get_component(&outer).unwrap();
    factory.close();

    assert_eq!(vec!["outer", "inner"], *log.lock().unwrap());
}

#[test]
fn optional_queries_tolerate_absence() {
    let factory = Builder::new().build().unwrap();
    let found = factory
        .query_by_name(Name::<String>::of("missing"))
        .optional()
        .find_one()
        .unwrap();
    assert!(found.is_none());

    let all = factory.query_by_class::<String>().find().unwrap();
    assert!(all.is_empty());
}

#[test]
fn engines_may_decline_to_produce() {
    let name = Name::<String>::of("sometimes");
    let mut builder = Builder::new();
    builder.add_rule(Arc::new(SingleNameRule::new(
        0,
        Arc::new(StdEngine::optionally(
            name.clone(),
            BillOfMaterials::empty(),
            |_| None,
        )),
    )));
    let factory = builder.build().unwrap();

    let found = factory
        .query_by_name(name.clone())
        .optional()
        .find_one()
        .unwrap();
    assert!(found.is_none());
    // nothing was checked in for it
    assert!(factory
        .warehouse()
        .stored_names()
        .iter()
        .all(|stored| stored != name.as_raw()));
    // the mandatory flag still applies
    assert!(factory.get_component(&name).is_err());
}

#[test]
fn bounded_boxes_hand_their_component_out_once() {
    let name = Name::<String>::of("once");
    let mut builder = Builder::new();
    builder.add_rule(Arc::new(SingleNameRule::new(
        0,
        Arc::new(StdEngine::no_deps(name.clone(), || "single".to_string()).bounded()),
    )));
    let factory = builder.build().unwrap();

    assert_eq!("single", factory.get_component(&name).unwrap().as_str());
    assert!(factory.get_component(&name).is_err());
}

#[test]
fn provider_warehouses_are_consulted_on_miss() {
    let shared = Name::<String>::of("shared");
    let mut builder = Builder::new();
    builder.add_rule(string_singleton("shared", "from-parent"));
    let parent = builder.build().unwrap();
    parent.get_component(&shared).unwrap();

    let mut builder = Builder::new();
    builder.add_warehouse_provider(Arc::clone(parent.warehouse()));
    let child = builder.build().unwrap();

    assert_eq!(
        "from-parent",
        child.get_component(&shared).unwrap().as_str()
    );
    let all: Vec<Svc<String>> = child.get_components::<String>().unwrap();
    assert_eq!(1, all.len());
}

#[test]
fn build_timers_reach_the_configured_metrics_sink() {
    let sink = Arc::new(InMemoryMetrics::default());
    let name = Name::<String>::of("timed");

    let mut builder = Builder::new();
    builder.add_rule(string_singleton("timed", "v"));
    builder.with_metrics_sink(Arc::clone(&sink) as Arc<dyn MetricsSink>);
    let factory = builder.build().unwrap();
    factory.get_component(&name).unwrap();

    let snapshot = sink.snapshot();
    assert!(
        snapshot.contains_key("<BUILD> String"),
        "got keys: {:?}",
        snapshot.keys().collect::<Vec<_>>()
    );
}

// declares a name but never admits to building it
struct LyingRule {
    name: RawName,
}

impl Rule for LyingRule {
    fn produced_names(&self) -> Vec<RawName> {
        vec![self.name.clone()]
    }

    fn can_build(&self, _name: &RawName) -> bool {
        false
    }

    fn engine_for(&self, _name: &RawName) -> Option<Arc<dyn Engine>> {
        None
    }
}

impl Display for LyingRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "LyingRule{{name={}}}", self.name)
    }
}

#[test]
fn inconsistent_rules_are_reported_in_the_dump() {
    let mut builder = Builder::new();
    builder.add_rule(Arc::new(LyingRule {
        name: Name::<String>::of("ghost").into_raw(),
    }));
    let factory = builder.build().unwrap();
    let dump = factory.dump();
    assert!(dump.contains("ERROR"), "got: {dump}");
    assert!(dump.contains("can_build"), "got: {dump}");
}

#[allow(unsafe_code)]
#[distributed_slice(RULE_PLUGINS)]
static TEST_PLUGIN: fn() -> Arc<dyn Rule> = test_plugin_rule;

fn test_plugin_rule() -> Arc<dyn Rule> {
    Arc::new(SingletonRule::new(
        Name::<String>::of("plugin:motd"),
        "from-plugin".to_string(),
    ))
}

#[test]
fn plugin_rules_are_collected_into_their_own_bucket() {
    let mut builder = Builder::new();
    builder.add_plugin_rules();
    let factory = builder.build().unwrap();

    assert_eq!(
        "from-plugin",
        factory
            .get_component(&Name::<String>::of("plugin:motd"))
            .unwrap()
            .as_str()
    );
    assert!(factory.dump().contains("PluginRules"));
}
