//! End-to-end evaluation tests: build a mock scene, tag, flush, dispatch,
//! and observe the callback invocations through the context scratch.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex, Once,
};
use std::{thread, time::Duration};

use fnv::FnvHashMap;

use sceneflow_builder::{
    funcs, graph_build_from_scene,
    source::{
        AnimationInfo, BoneInfo, ConstraintInfo, ConstraintKind, ConstraintTargetInfo,
        DriverInfo, EntityInfo, GroupInfo, ObjectDataInfo, ObjectDataKind, ObjectInfo,
        ParentInfo, ParentKind, RigidBodyConstraintInfo, RigidBodyWorldInfo, SceneInfo,
        SceneSource,
    },
};
use sceneflow_core::{
    register_eval_function, threaded_init, CallbackError, ContextKind, EntityId,
    EvaluationContext, OpContext,
};
use sceneflow_eval::{
    evaluate_on_framechange, evaluate_on_refresh, evaluation_context_init,
    evaluation_contexts_free, graph_flush_updates, id_tag_update, node_tag_update,
    on_visible_update, property_tag_update, EvalError, EvalOutcome, EvalStats,
};
use sceneflow_graph::{
    node::{NodeKind, OpClass},
    registry::register_node_types,
    relation::RelationKind,
    validate_links, Depsgraph, PropertyResolver, PropertyTarget, ValidateError,
};

/* Mock scene =================================================== */

#[derive(Default)]
struct MockScene {
    entities: FnvHashMap<EntityId, EntityInfo>,
    properties: FnvHashMap<(EntityId, String), PropertyTarget>,
}

impl MockScene {
    fn insert(&mut self, id: u64, info: EntityInfo) -> EntityId {
        let id = EntityId::new(id);
        self.entities.insert(id, info);
        id
    }

    fn parameters_property(&mut self, entity: EntityId, path: &str) {
        self.properties.insert(
            (entity, path.to_owned()),
            PropertyTarget {
                entity,
                component: NodeKind::Parameters,
                bone: None,
                operation: None,
            },
        );
    }

    fn transform_property(&mut self, entity: EntityId, path: &str) {
        self.properties.insert(
            (entity, path.to_owned()),
            PropertyTarget {
                entity,
                component: NodeKind::Transform,
                bone: None,
                operation: None,
            },
        );
    }
}

impl PropertyResolver for MockScene {
    fn resolve(&self, entity: EntityId, path: &str) -> Option<PropertyTarget> {
        self.properties.get(&(entity, path.to_owned())).cloned()
    }
}

impl SceneSource for MockScene {
    fn entity(&self, id: EntityId) -> Option<EntityInfo> {
        self.entities.get(&id).cloned()
    }
}

/* Recording callbacks ========================================== */

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    ctimes: Mutex<Vec<f64>>,
    drivers_in_flight: AtomicUsize,
    drivers_overlapped: AtomicBool,
}

impl Recorder {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn ctx_label(op: &OpContext) -> String {
    match op {
        OpContext::None => "-".to_owned(),
        OpContext::Entity(id) => format!("{}", id.raw()),
        OpContext::Property(prop) => format!("{}@{}", prop.entity.raw(), prop.path),
        OpContext::Bone { entity, bone } => format!("{}:{}", entity.raw(), bone),
    }
}

fn record(ctx: &EvaluationContext, tag: &str, op: &OpContext) {
    if let Some(recorder) = ctx.scratch::<Recorder>() {
        recorder
            .calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", tag, ctx_label(op)));
    }
}

macro_rules! recording_eval {
    ($name:ident, $tag:expr) => {
        fn $name(ctx: &EvaluationContext, op: &OpContext) -> Result<(), CallbackError> {
            record(ctx, $tag, op);
            Ok(())
        }
    };
}

recording_eval!(eval_params, "params");
recording_eval!(eval_local, "local");
recording_eval!(eval_parent, "parent");
recording_eval!(eval_constraints, "constraints");
recording_eval!(eval_geometry, "geom");
recording_eval!(eval_bone, "bone");
recording_eval!(eval_ik, "ik");
recording_eval!(eval_rb_rebuild, "rb_rebuild");
recording_eval!(eval_rb_sim, "rb_sim");
recording_eval!(eval_rb_sync, "rb_sync");
recording_eval!(eval_ok, "ok");

fn eval_animation(ctx: &EvaluationContext, op: &OpContext) -> Result<(), CallbackError> {
    if let Some(recorder) = ctx.scratch::<Recorder>() {
        recorder.ctimes.lock().unwrap().push(ctx.ctime());
    }
    record(ctx, "anim", op);
    Ok(())
}

fn eval_driver(ctx: &EvaluationContext, op: &OpContext) -> Result<(), CallbackError> {
    if let Some(recorder) = ctx.scratch::<Recorder>() {
        let in_flight = recorder.drivers_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        if in_flight > 1 {
            recorder.drivers_overlapped.store(true, Ordering::SeqCst);
        }
        thread::sleep(Duration::from_millis(2));
        recorder.drivers_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
    record(ctx, "driver", op);
    Ok(())
}

fn eval_fail(ctx: &EvaluationContext, op: &OpContext) -> Result<(), CallbackError> {
    record(ctx, "fail", op);
    Err(CallbackError::new("deliberate test failure"))
}

fn eval_cancel(ctx: &EvaluationContext, op: &OpContext) -> Result<(), CallbackError> {
    ctx.cancel_token().cancel();
    record(ctx, "cancel", op);
    Ok(())
}

fn setup() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        simple_logger::init_with_level(log::Level::Warn).ok();
        threaded_init();
        register_node_types();
        register_eval_function(funcs::PARAMETERS, eval_params);
        register_eval_function(funcs::LOCAL_TRANSFORM, eval_local);
        register_eval_function(funcs::PARENT, eval_parent);
        register_eval_function(funcs::CONSTRAINTS, eval_constraints);
        register_eval_function(funcs::MESH_GEOMETRY, eval_geometry);
        register_eval_function(funcs::ANIMATION, eval_animation);
        register_eval_function(funcs::DRIVER, eval_driver);
        register_eval_function(funcs::BONE, eval_bone);
        register_eval_function(funcs::IK_SOLVER, eval_ik);
        register_eval_function(funcs::RIGIDBODY_REBUILD, eval_rb_rebuild);
        register_eval_function(funcs::RIGIDBODY_SIM, eval_rb_sim);
        register_eval_function(funcs::RIGIDBODY_SYNC, eval_rb_sync);
        register_eval_function("tests::ok", eval_ok);
        register_eval_function("tests::fail", eval_fail);
        register_eval_function("tests::cancel", eval_cancel);
    });
}

fn init_viewport(graph: &mut Depsgraph) {
    evaluation_context_init(graph, ContextKind::Viewport);
    graph
        .context_mut(ContextKind::Viewport)
        .unwrap()
        .set_scratch(Box::new(Recorder::default()));
}

fn recorded(graph: &Depsgraph) -> Vec<String> {
    graph
        .context(ContextKind::Viewport)
        .unwrap()
        .scratch::<Recorder>()
        .unwrap()
        .calls()
}

fn index_of(calls: &[String], entry: &str) -> usize {
    calls
        .iter()
        .position(|call| call == entry)
        .unwrap_or_else(|| panic!("`{}` not in {:?}", entry, calls))
}

fn tagged_operations(graph: &Depsgraph) -> Vec<String> {
    graph
        .operations()
        .filter(|(_, node)| node.is_tagged())
        .map(|(_, node)| node.name().to_owned())
        .collect()
}

/* Scenarios ==================================================== */

/// Parent chain: tagging the middle object re-evaluates its own stack and
/// the child's parent step, nothing else.
#[test]
fn parent_chain_evaluation() {
    setup();
    let mut scene = MockScene::default();
    let c = scene.insert(3, EntityInfo::Object(ObjectInfo::default()));
    let b = scene.insert(
        2,
        EntityInfo::Object(ObjectInfo {
            parent: Some(ParentInfo {
                parent: c,
                kind: ParentKind::Object,
            }),
            ..ObjectInfo::default()
        }),
    );
    let a = scene.insert(
        1,
        EntityInfo::Object(ObjectInfo {
            parent: Some(ParentInfo {
                parent: b,
                kind: ParentKind::Object,
            }),
            ..ObjectInfo::default()
        }),
    );
    let scene_id = scene.insert(
        100,
        EntityInfo::Scene(SceneInfo {
            objects: vec![a, b, c],
            ..SceneInfo::default()
        }),
    );

    let mut graph = Depsgraph::new();
    graph_build_from_scene(&mut graph, &scene, scene_id).unwrap();
    init_viewport(&mut graph);

    id_tag_update(&mut graph, b);
    graph_flush_updates(&mut graph);
    assert_eq!(tagged_operations(&graph).len(), 4);

    // Flushing is idempotent.
    graph_flush_updates(&mut graph);
    assert_eq!(tagged_operations(&graph).len(), 4);

    match evaluate_on_refresh(&mut graph, ContextKind::Viewport).unwrap() {
        EvalOutcome::Completed(stats) => assert_eq!(
            stats,
            EvalStats {
                executed: 4,
                failed: 0,
                skipped: 0
            }
        ),
        other => panic!("unexpected outcome {:?}", other),
    }

    let calls = recorded(&graph);
    assert!(index_of(&calls, "local:2") < index_of(&calls, "parent:2"));
    assert!(index_of(&calls, "parent:2") < index_of(&calls, "parent:1"));
    assert!(!calls.contains(&"local:1".to_owned()), "{:?}", calls);
    assert!(!calls.contains(&"local:3".to_owned()), "{:?}", calls);

    // A successful refresh leaves the dirty set empty.
    assert!(tagged_operations(&graph).is_empty());
    evaluation_contexts_free(&mut graph);
}

/// Driver: tagging the variable target re-evaluates the driver and then
/// the driven parameters.
#[test]
fn driver_evaluation() {
    setup();
    let mut scene = MockScene::default();
    let b = scene.insert(2, EntityInfo::Object(ObjectInfo::default()));
    let a = scene.insert(
        1,
        EntityInfo::Object(ObjectInfo {
            animation: Some(AnimationInfo {
                animated: false,
                drivers: vec![DriverInfo {
                    path: "influence".to_owned(),
                    uses_python: false,
                    targets: vec![sceneflow_builder::source::DriverTargetInfo {
                        entity: b,
                        bone: None,
                        path: Some("location".to_owned()),
                    }],
                }],
            }),
            ..ObjectInfo::default()
        }),
    );
    let scene_id = scene.insert(
        100,
        EntityInfo::Scene(SceneInfo {
            objects: vec![a, b],
            ..SceneInfo::default()
        }),
    );
    scene.parameters_property(a, "influence");
    scene.transform_property(b, "location");

    let mut graph = Depsgraph::new();
    graph_build_from_scene(&mut graph, &scene, scene_id).unwrap();
    init_viewport(&mut graph);

    property_tag_update(&mut graph, &scene, b, "location");
    evaluate_on_refresh(&mut graph, ContextKind::Viewport).unwrap();

    let calls = recorded(&graph);
    assert!(index_of(&calls, "local:2") < index_of(&calls, "driver:1@influence"));
    assert!(index_of(&calls, "driver:1@influence") < index_of(&calls, "params:1"));
    evaluation_contexts_free(&mut graph);
}

/// IK chain: tagging the root bone runs all three bone steps and then the
/// solver, in parent-chain order.
#[test]
fn ik_chain_evaluation() {
    setup();
    let mut scene = MockScene::default();
    let rig_data = scene.insert(
        10,
        EntityInfo::ObjectData(ObjectDataInfo {
            kind: ObjectDataKind::Armature {
                bones: vec![
                    BoneInfo {
                        name: "root".to_owned(),
                        ..BoneInfo::default()
                    },
                    BoneInfo {
                        name: "mid".to_owned(),
                        parent: Some("root".to_owned()),
                        ..BoneInfo::default()
                    },
                    BoneInfo {
                        name: "tip".to_owned(),
                        parent: Some("mid".to_owned()),
                        constraints: vec![ConstraintInfo {
                            name: "IK".to_owned(),
                            kind: ConstraintKind::Kinematic { root_bone: 0 },
                            targets: Vec::new(),
                        }],
                    },
                ],
            },
            shape_key: None,
            animation: None,
        }),
    );
    let rig = scene.insert(
        1,
        EntityInfo::Object(ObjectInfo {
            data: Some(rig_data),
            ..ObjectInfo::default()
        }),
    );
    let scene_id = scene.insert(
        100,
        EntityInfo::Scene(SceneInfo {
            objects: vec![rig],
            ..SceneInfo::default()
        }),
    );

    let mut graph = Depsgraph::new();
    graph_build_from_scene(&mut graph, &scene, scene_id).unwrap();
    init_viewport(&mut graph);

    let root = graph
        .find_node(NodeKind::Bone, Some(rig), Some("root"))
        .unwrap();
    node_tag_update(&mut graph, root);
    evaluate_on_refresh(&mut graph, ContextKind::Viewport).unwrap();

    let calls = recorded(&graph);
    let root_at = index_of(&calls, "bone:1:root");
    let mid_at = index_of(&calls, "bone:1:mid");
    let tip_at = index_of(&calls, "bone:1:tip");
    let solver_at = index_of(&calls, "ik:1:root");
    assert!(root_at < mid_at);
    assert!(mid_at < tip_at);
    assert!(tip_at < solver_at);
    evaluation_contexts_free(&mut graph);
}

/// Cycle: validation cites both offending relations, evaluation refuses to
/// run and no callback is invoked.
#[test]
fn cycle_refuses_evaluation() {
    setup();
    let mut graph = Depsgraph::new();
    let a = EntityId::new(1);
    let b = EntityId::new(2);
    let op_a = graph
        .add_operation(
            a,
            None,
            NodeKind::OpTransform,
            OpClass::Exec,
            "tests::ok",
            "A Transform",
            OpContext::Entity(a),
        )
        .unwrap();
    let op_b = graph
        .add_operation(
            b,
            None,
            NodeKind::OpTransform,
            OpClass::Exec,
            "tests::ok",
            "B Transform",
            OpContext::Entity(b),
        )
        .unwrap();
    let ab = graph.add_relation(op_a, op_b, RelationKind::Transform, "A -> B");
    let ba = graph.add_relation(op_b, op_a, RelationKind::Transform, "B -> A");

    match validate_links(&mut graph) {
        Err(ValidateError::Cycle { relations, .. }) => {
            assert!(relations.contains(&ab) && relations.contains(&ba));
        }
        other => panic!("expected cycle, got {:?}", other),
    }

    init_viewport(&mut graph);
    node_tag_update(&mut graph, op_a);
    match evaluate_on_refresh(&mut graph, ContextKind::Viewport) {
        Err(EvalError::Unvalidated) => {}
        other => panic!("expected Unvalidated, got {:?}", other),
    }
    assert!(recorded(&graph).is_empty());
    evaluation_contexts_free(&mut graph);
}

/// Rigid body: base transform, sync and constraint stack interleave with
/// the world simulation in the specified order.
#[test]
fn rigidbody_evaluation_order() {
    setup();
    let mut scene = MockScene::default();
    let p = scene.insert(3, EntityInfo::Object(ObjectInfo::default()));
    let t = scene.insert(4, EntityInfo::Object(ObjectInfo::default()));
    let o = scene.insert(
        1,
        EntityInfo::Object(ObjectInfo {
            parent: Some(ParentInfo {
                parent: p,
                kind: ParentKind::Object,
            }),
            constraints: vec![ConstraintInfo {
                name: "Limit".to_owned(),
                kind: ConstraintKind::Standard,
                targets: vec![ConstraintTargetInfo {
                    entity: t,
                    subtarget: None,
                }],
            }],
            ..ObjectInfo::default()
        }),
    );
    let scene_id = scene.insert(
        100,
        EntityInfo::Scene(SceneInfo {
            objects: vec![o, p, t],
            rigidbody: Some(RigidBodyWorldInfo {
                objects: vec![o],
                constraints: vec![RigidBodyConstraintInfo {
                    object: t,
                    first: o,
                    second: o,
                }],
            }),
            ..SceneInfo::default()
        }),
    );

    let mut graph = Depsgraph::new();
    graph_build_from_scene(&mut graph, &scene, scene_id).unwrap();
    init_viewport(&mut graph);

    on_visible_update(&mut graph, false);
    evaluate_on_refresh(&mut graph, ContextKind::Viewport).unwrap();

    let calls = recorded(&graph);
    assert!(index_of(&calls, "local:3") < index_of(&calls, "parent:1"));
    assert!(index_of(&calls, "local:1") < index_of(&calls, "parent:1"));
    assert!(index_of(&calls, "parent:1") < index_of(&calls, "rb_sync:1"));
    assert!(index_of(&calls, "rb_sync:1") < index_of(&calls, "constraints:1"));
    assert!(index_of(&calls, "rb_rebuild:100") < index_of(&calls, "rb_sim:100"));
    assert!(index_of(&calls, "rb_sim:100") < index_of(&calls, "rb_sync:1"));
    evaluation_contexts_free(&mut graph);
}

/// Python-flagged drivers never run concurrently.
#[test]
fn python_drivers_serialize() {
    setup();
    let mut scene = MockScene::default();
    let mut objects = Vec::new();
    for raw in 1..=4u64 {
        let id = EntityId::new(raw);
        scene.parameters_property(id, "influence");
        let object = scene.insert(
            raw,
            EntityInfo::Object(ObjectInfo {
                animation: Some(AnimationInfo {
                    animated: false,
                    drivers: vec![DriverInfo {
                        path: "influence".to_owned(),
                        uses_python: true,
                        targets: Vec::new(),
                    }],
                }),
                ..ObjectInfo::default()
            }),
        );
        objects.push(object);
    }
    let scene_id = scene.insert(
        100,
        EntityInfo::Scene(SceneInfo {
            objects: objects.clone(),
            ..SceneInfo::default()
        }),
    );

    let mut graph = Depsgraph::new();
    graph_build_from_scene(&mut graph, &scene, scene_id).unwrap();
    init_viewport(&mut graph);

    for object in &objects {
        id_tag_update(&mut graph, *object);
    }
    evaluate_on_refresh(&mut graph, ContextKind::Viewport).unwrap();

    let ctx = graph.context(ContextKind::Viewport).unwrap();
    let recorder = ctx.scratch::<Recorder>().unwrap();
    assert_eq!(
        recorder
            .calls()
            .iter()
            .filter(|call| call.starts_with("driver:"))
            .count(),
        4
    );
    assert!(
        !recorder.drivers_overlapped.load(Ordering::SeqCst),
        "python drivers overlapped"
    );
    evaluation_contexts_free(&mut graph);
}

/// A failing callback downgrades everything downstream to skipped; other
/// branches complete; failed and skipped operations stay dirty.
#[test]
fn failure_downgrades_downstream() {
    setup();
    let mut graph = Depsgraph::new();
    let ids: Vec<EntityId> = (1..=4u64).map(EntityId::new).collect();
    let failing = graph
        .add_operation(
            ids[0],
            None,
            NodeKind::OpTransform,
            OpClass::Exec,
            "tests::fail",
            "Failing",
            OpContext::Entity(ids[0]),
        )
        .unwrap();
    let middle = graph
        .add_operation(
            ids[1],
            None,
            NodeKind::OpTransform,
            OpClass::Exec,
            "tests::ok",
            "Middle",
            OpContext::Entity(ids[1]),
        )
        .unwrap();
    let leaf = graph
        .add_operation(
            ids[2],
            None,
            NodeKind::OpTransform,
            OpClass::Exec,
            "tests::ok",
            "Leaf",
            OpContext::Entity(ids[2]),
        )
        .unwrap();
    let island = graph
        .add_operation(
            ids[3],
            None,
            NodeKind::OpTransform,
            OpClass::Exec,
            "tests::ok",
            "Island",
            OpContext::Entity(ids[3]),
        )
        .unwrap();
    graph.add_relation(failing, middle, RelationKind::Standard, "fail -> middle");
    graph.add_relation(middle, leaf, RelationKind::Standard, "middle -> leaf");
    validate_links(&mut graph).unwrap();
    init_viewport(&mut graph);

    for op in [failing, middle, leaf, island].iter() {
        node_tag_update(&mut graph, *op);
    }
    match evaluate_on_refresh(&mut graph, ContextKind::Viewport).unwrap() {
        EvalOutcome::Completed(stats) => assert_eq!(
            stats,
            EvalStats {
                executed: 1,
                failed: 1,
                skipped: 2
            }
        ),
        other => panic!("unexpected outcome {:?}", other),
    }

    let calls = recorded(&graph);
    assert!(calls.contains(&"ok:4".to_owned()));
    assert!(!calls.contains(&"ok:2".to_owned()));
    assert!(!calls.contains(&"ok:3".to_owned()));

    assert!(graph.node(middle).is_tagged());
    assert!(graph.node(leaf).is_tagged());
    assert!(graph.node(failing).is_tagged());
    assert!(!graph.node(island).is_tagged());
    evaluation_contexts_free(&mut graph);
}

/// Cancellation stops further dispatch, finishes in-flight work and keeps
/// the dirty set for the next run.
#[test]
fn cancellation_aborts_and_keeps_tags() {
    setup();
    let mut graph = Depsgraph::new();
    let ids: Vec<EntityId> = (1..=3u64).map(EntityId::new).collect();
    let first = graph
        .add_operation(
            ids[0],
            None,
            NodeKind::OpTransform,
            OpClass::Exec,
            "tests::cancel",
            "First",
            OpContext::Entity(ids[0]),
        )
        .unwrap();
    let second = graph
        .add_operation(
            ids[1],
            None,
            NodeKind::OpTransform,
            OpClass::Exec,
            "tests::ok",
            "Second",
            OpContext::Entity(ids[1]),
        )
        .unwrap();
    let third = graph
        .add_operation(
            ids[2],
            None,
            NodeKind::OpTransform,
            OpClass::Exec,
            "tests::ok",
            "Third",
            OpContext::Entity(ids[2]),
        )
        .unwrap();
    graph.add_relation(first, second, RelationKind::Standard, "1 -> 2");
    graph.add_relation(second, third, RelationKind::Standard, "2 -> 3");
    validate_links(&mut graph).unwrap();
    init_viewport(&mut graph);

    for op in [first, second, third].iter() {
        node_tag_update(&mut graph, *op);
    }
    match evaluate_on_refresh(&mut graph, ContextKind::Viewport).unwrap() {
        EvalOutcome::Aborted => {}
        other => panic!("expected Aborted, got {:?}", other),
    }

    let calls = recorded(&graph);
    assert_eq!(calls, vec!["cancel:1".to_owned()]);
    assert!(graph.node(first).is_tagged());
    assert!(graph.node(second).is_tagged());
    assert!(graph.node(third).is_tagged());

    // The next run resumes the full dirty set (the cancel callback fires
    // again, so expect another abort with one more call).
    match evaluate_on_refresh(&mut graph, ContextKind::Viewport).unwrap() {
        EvalOutcome::Aborted => {}
        other => panic!("expected Aborted, got {:?}", other),
    }
    assert_eq!(recorded(&graph).len(), 2);
    evaluation_contexts_free(&mut graph);
}

/// Frame change: the time source fans out to animation and drivers; the
/// callbacks observe the new frame time; a refresh afterwards is a no-op.
#[test]
fn framechange_drives_animation() {
    setup();
    let mut scene = MockScene::default();
    let a = scene.insert(
        1,
        EntityInfo::Object(ObjectInfo {
            animation: Some(AnimationInfo {
                animated: true,
                drivers: vec![DriverInfo {
                    path: "influence".to_owned(),
                    uses_python: false,
                    targets: Vec::new(),
                }],
            }),
            ..ObjectInfo::default()
        }),
    );
    scene.parameters_property(a, "influence");
    let scene_id = scene.insert(
        100,
        EntityInfo::Scene(SceneInfo {
            objects: vec![a],
            ..SceneInfo::default()
        }),
    );

    let mut graph = Depsgraph::new();
    graph_build_from_scene(&mut graph, &scene, scene_id).unwrap();
    init_viewport(&mut graph);

    evaluate_on_framechange(&mut graph, ContextKind::Viewport, 12.0).unwrap();
    {
        let recorder = graph
            .context(ContextKind::Viewport)
            .unwrap()
            .scratch::<Recorder>()
            .unwrap();
        assert_eq!(recorder.ctimes.lock().unwrap().clone(), vec![12.0]);
        let calls = recorder.calls();
        assert!(calls.contains(&"anim:1".to_owned()));
        assert!(calls.iter().any(|call| call.starts_with("driver:")));
        // Time does not touch the transform stack.
        assert!(!calls.contains(&"local:1".to_owned()));
    }

    // Nothing left dirty: a refresh runs nothing.
    let before = recorded(&graph).len();
    evaluate_on_refresh(&mut graph, ContextKind::Viewport).unwrap();
    assert_eq!(recorded(&graph).len(), before);

    // The next frame re-evaluates time-dependent operations.
    evaluate_on_framechange(&mut graph, ContextKind::Viewport, 13.0).unwrap();
    assert!(recorded(&graph).len() > before);
    evaluation_contexts_free(&mut graph);
}

/// Dirtying an instancing object floods the instanced group's nested
/// graph; its operations run under the outer context.
#[test]
fn subgraph_expansion() {
    setup();
    let mut scene = MockScene::default();
    let inner = scene.insert(5, EntityInfo::Object(ObjectInfo::default()));
    let group = scene.insert(
        20,
        EntityInfo::Group(GroupInfo {
            objects: vec![inner],
        }),
    );
    let instancer = scene.insert(
        1,
        EntityInfo::Object(ObjectInfo {
            dup_group: Some(group),
            ..ObjectInfo::default()
        }),
    );
    let scene_id = scene.insert(
        100,
        EntityInfo::Scene(SceneInfo {
            objects: vec![instancer],
            ..SceneInfo::default()
        }),
    );

    let mut graph = Depsgraph::new();
    graph_build_from_scene(&mut graph, &scene, scene_id).unwrap();
    init_viewport(&mut graph);

    id_tag_update(&mut graph, instancer);
    evaluate_on_refresh(&mut graph, ContextKind::Viewport).unwrap();

    let calls = recorded(&graph);
    // The instancer ran, and so did the nested object, afterwards.
    assert!(index_of(&calls, "local:1") < index_of(&calls, "local:5"));

    // Nested tags were cleared along with the outer ones.
    let wrapper = graph.id_ref(group).unwrap();
    let nested = graph.node(wrapper).as_subgraph().unwrap().graph();
    assert!(nested.operations().all(|(_, node)| !node.is_tagged()));
    evaluation_contexts_free(&mut graph);
}

/// Evaluation without an initialized context is refused.
#[test]
fn missing_context_is_reported() {
    setup();
    let mut graph = Depsgraph::new();
    let a = EntityId::new(1);
    graph
        .add_operation(
            a,
            None,
            NodeKind::OpTransform,
            OpClass::Exec,
            "tests::ok",
            "Lonely",
            OpContext::Entity(a),
        )
        .unwrap();
    validate_links(&mut graph).unwrap();
    match evaluate_on_refresh(&mut graph, ContextKind::Render) {
        Err(EvalError::NoSuchContext(ContextKind::Render)) => {}
        other => panic!("expected NoSuchContext, got {:?}", other),
    }
}
