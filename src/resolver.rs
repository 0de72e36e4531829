//! Turns one build request into a dependency-ordered sequence of engine
//! invocations.
//!
//! Resolution walks the requested engine's bill of materials breadth-first,
//! creating one [`BuildingBox`] per reachable name, then orders the boxes
//! with Kahn's algorithm (leaves first, root last), satisfies each bill in
//! that order and finally constructs, customizes and checks in each
//! component.

use crate::{
    metrics, AnyComponent, Customizer, Engine, Factory, FactoryError, FactoryResult, QueryKind,
    RawName, RawQuery, SatisfiedBom, UnsatisfiedDependencies, UnsatisfiedDependency,
};
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

// A transient resolver node: one per name reachable from the root request.
struct BuildingBox {
    engine: Arc<dyn Engine>,
    // query path leading here, for error messages
    hierarchy: Vec<RawQuery>,
    // (bom query index, child box index) per resolved dependency name
    resolved: Vec<(usize, usize)>,
    // one edge per distinct dependency name
    deps: IndexMap<RawName, usize>,
    // scratch for the topological sort
    pending_deps: usize,
    preds: Vec<usize>,
    satisfied: Option<SatisfiedBom>,
    component: Option<AnyComponent>,
}

impl BuildingBox {
    fn new(hierarchy: Vec<RawQuery>, engine: Arc<dyn Engine>) -> Self {
        BuildingBox {
            engine,
            hierarchy,
            resolved: Vec::new(),
            deps: IndexMap::new(),
            pending_deps: 0,
            preds: Vec::new(),
            satisfied: None,
            component: None,
        }
    }
}

pub(crate) fn build_and_store(
    factory: &Arc<Factory>,
    origin: RawQuery,
    engine: Arc<dyn Engine>,
) -> FactoryResult<Option<AnyComponent>> {
    let name = engine.name().clone();
    let mut boxes = closure(factory, origin, engine)?;
    let order = sort(&mut boxes)?;
    tracing::trace!(
        factory = %factory.id(),
        %name,
        order = ?order
            .iter()
            .map(|&i| boxes[i].engine.name().to_string())
            .collect::<Vec<_>>(),
        "dependency closure resolved"
    );
    satisfy_boms(factory, &mut boxes, &order)?;
    build_box(factory, &mut boxes, 0)
}

// Breadth-first expansion of the dependency graph, accumulating every
// unsatisfied leaf so a single report lists them all.
fn closure(
    factory: &Arc<Factory>,
    origin: RawQuery,
    engine: Arc<dyn Engine>,
) -> FactoryResult<Vec<BuildingBox>> {
    let root_name = engine.name().clone();
    let mut boxes = vec![BuildingBox::new(vec![origin], engine)];
    let mut by_name: HashMap<RawName, usize> = HashMap::from([(root_name, 0)]);
    let mut queue: VecDeque<usize> = VecDeque::from([0]);
    let mut not_satisfied = UnsatisfiedDependencies::none();

    while let Some(current) = queue.pop_front() {
        let engine = Arc::clone(&boxes[current].engine);
        let hierarchy = boxes[current].hierarchy.clone();
        for (query_index, query) in engine.bill_of_materials().queries().iter().enumerate() {
            let mut path = hierarchy.clone();
            path.push(query.clone());
            let names = factory.find_names_raw(query);
            if names.is_empty() && query.is_mandatory() {
                let mut dependency = UnsatisfiedDependency::on(path);
                if let QueryKind::ByClass(class) = query.kind() {
                    dependency = dependency.caused_by(format!(
                        "component satisfying {query} not found: no machine found to build a {}.",
                        class.simple_name()
                    ));
                }
                not_satisfied.push(dependency);
                continue;
            }
            let single = names.len() == 1;
            for name in names {
                if let Some(&child) = by_name.get(&name) {
                    add_edge(&mut boxes, current, query_index, child);
                    continue;
                }
                let Some(engine) = factory
                    .find_rule_for(&name)
                    .and_then(|rule| rule.engine_for(&name))
                else {
                    if query.is_mandatory() && single {
                        not_satisfied.push(
                            UnsatisfiedDependency::on(path.clone())
                                .caused_by(factory.machine_not_found_message(&name)),
                        );
                    }
                    continue;
                };
                let child = boxes.len();
                boxes.push(BuildingBox::new(path.clone(), engine));
                by_name.insert(name, child);
                queue.push_back(child);
                add_edge(&mut boxes, current, query_index, child);
            }
        }
    }

    if not_satisfied.is_empty() {
        Ok(boxes)
    } else {
        Err(not_satisfied.raise())
    }
}

fn add_edge(boxes: &mut [BuildingBox], parent: usize, query_index: usize, child: usize) {
    let name = boxes[child].engine.name().clone();
    if !boxes[parent].deps.contains_key(&name) {
        boxes[parent].deps.insert(name, child);
        boxes[parent].pending_deps += 1;
        boxes[child].preds.push(parent);
    }
    boxes[parent].resolved.push((query_index, child));
}

// Kahn's algorithm seeded with the leaves. An incomplete order means the
// remaining boxes are mutually blocked: a dependency cycle.
fn sort(boxes: &mut [BuildingBox]) -> FactoryResult<Vec<usize>> {
    let mut ready: VecDeque<usize> = boxes
        .iter()
        .enumerate()
        .filter(|(_, b)| b.pending_deps == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(boxes.len());
    while let Some(current) = ready.pop_front() {
        order.push(current);
        let preds = std::mem::take(&mut boxes[current].preds);
        for pred in preds {
            boxes[pred].pending_deps -= 1;
            if boxes[pred].pending_deps == 0 {
                ready.push_back(pred);
            }
        }
    }
    if order.len() == boxes.len() {
        Ok(order)
    } else {
        let names = boxes
            .iter()
            .filter(|b| b.pending_deps > 0)
            .map(|b| b.engine.name().clone())
            .collect();
        Err(FactoryError::Cycle { names })
    }
}

// Walks the sorted order and materializes each box's dependencies into a
// SatisfiedBom. Children always precede their parents, so every dependency
// is built (or recalled from the warehouse) by the time it is packaged.
fn satisfy_boms(
    factory: &Arc<Factory>,
    boxes: &mut [BuildingBox],
    order: &[usize],
) -> FactoryResult<()> {
    for &current in order {
        let bom = boxes[current].engine.bill_of_materials().clone();
        if bom.is_empty() {
            boxes[current].satisfied = Some(SatisfiedBom::empty(bom));
            continue;
        }
        let mut materials: Vec<Vec<AnyComponent>> = vec![Vec::new(); bom.queries().len()];
        let resolved = boxes[current].resolved.clone();
        for (query_index, child) in resolved {
            if let Some(component) = build_box(factory, boxes, child)? {
                materials[query_index].push(component);
            }
        }
        boxes[current].satisfied = Some(SatisfiedBom::new(bom, materials));
    }
    Ok(())
}

// Builds one box: recall the component if this resolution or the warehouse
// already has it, otherwise run its engine over its satisfied bill.
fn build_box(
    factory: &Arc<Factory>,
    boxes: &mut [BuildingBox],
    index: usize,
) -> FactoryResult<Option<AnyComponent>> {
    if let Some(component) = &boxes[index].component {
        return Ok(Some(component.clone()));
    }
    let name = boxes[index].engine.name().clone();
    if let Some(component) = factory.warehouse().check_out(&name) {
        boxes[index].component = Some(component.clone());
        return Ok(Some(component));
    }
    let Some(satisfied) = boxes[index].satisfied.clone() else {
        return Err(FactoryError::Internal(format!(
            "dependency resolution order broken: bill of materials for {name} not yet satisfied"
        )));
    };
    let engine = Arc::clone(&boxes[index].engine);
    let component = construct_and_store(factory, &engine, satisfied)?;
    boxes[index].component.clone_from(&component);
    Ok(component)
}

// Runs the engine, applies matching customizers in stable priority order and
// checks the result in. The factory's own component is handed back directly,
// neither stored nor customized, so closing the warehouse cannot recurse.
fn construct_and_store(
    factory: &Arc<Factory>,
    engine: &Arc<dyn Engine>,
    satisfied: SatisfiedBom,
) -> FactoryResult<Option<AnyComponent>> {
    let name = engine.name().clone();
    tracing::debug!(
        factory = %factory.id(),
        %name,
        engine = %engine,
        satisfied = %satisfied,
        "building component"
    );
    let sink = factory.metrics();
    let started = Instant::now();
    let mut bx = engine.new_component(&satisfied);
    let build_elapsed = started.elapsed();
    sink.record_timer(&metrics::build_key(&name), build_elapsed);

    if !bx.is_bounded() {
        if let Some(component) = bx.pick() {
            if factory.is_self_component(&component) {
                return Ok(Some(component));
            }
        }
    }
    if bx.is_empty() {
        // the engine declined to produce; nothing to store
        return Ok(None);
    }

    let mut customizers: Vec<Arc<dyn Customizer>> = factory
        .customizer_engines()
        .iter()
        .filter(|candidate| candidate.can_customize(&name))
        .map(|candidate| candidate.customizer_for(&name))
        .collect();
    customizers.sort_by_key(|customizer| customizer.priority());
    for customizer in customizers {
        tracing::debug!(
            factory = %factory.id(),
            %name,
            customizer = customizer.label(),
            "customizing component"
        );
        let customize_started = Instant::now();
        bx = bx.customize(customizer.as_ref());
        sink.record_timer(
            &metrics::customize_key(&name, customizer.label()),
            customize_started.elapsed(),
        );
    }

    factory.warehouse().check_in(bx, satisfied, build_elapsed);
    Ok(factory.warehouse().check_out(&name))
}
