//! End-to-end tests for world ticks, deferred mutation and messages.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use keel_ecs::{
    AspectCollection, ComponentPtr, ComponentSet, CreatedComponentMessage, CreatedEntityMessage,
    DeletedComponentMessage, DeletedEntityMessage, Dependencies, EcsError, Entity, FrameTime,
    System, World, WorldConfig,
};
use keel_task::{TaskManager, TaskManagerConfig};
use parking_lot::Mutex;

fn world_with(config: WorldConfig) -> World {
    let tasks = TaskManager::new(TaskManagerConfig::with_workers(3).max_in_flight_tasks(4096));
    World::with_config(Arc::new(tasks), config)
}

fn world() -> World {
    world_with(WorldConfig::default().strict_errors(false).pool_block_size(64))
}

fn run(world: &mut World, ticks: u64) {
    let mut time = FrameTime::first(1.0 / 60.0);
    for _ in 0..ticks {
        world.tick(&time);
        time = time.advance(1.0 / 60.0);
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq)]
struct Transform {
    x: f32,
    y: f32,
}

#[derive(Default, Debug, Clone, Copy, PartialEq)]
struct Mesh {
    vertices: u32,
}

#[derive(Default, Debug)]
struct Health(u32);

#[derive(Default, Debug)]
struct Tag;

type Slices<'a, S> = <<S as System>::Components as ComponentSet>::Slices<'a>;

// ============================================================================
// Aspect collections
// ============================================================================

#[test]
fn test_tick_exposes_entity_in_collection() {
    let mut world = world();
    let entity = world.create_entity();
    let transform = world.add_component_with(entity, Transform { x: 1.0, y: 2.0 }).unwrap();
    let mesh = world.add_component_with(entity, Mesh { vertices: 3 }).unwrap();
    let id = world.aspect_id_of::<(Transform, Mesh)>();

    run(&mut world, 1);

    world
        .with_aspect_collection(id, |collection| {
            assert_eq!(collection.entities(), &[entity]);
            let index = collection.index_of(entity).unwrap();
            assert_eq!(collection.entity_components::<Transform>()[index], transform);
            assert_eq!(collection.entity_components::<Mesh>()[index], mesh);
            // SAFETY: no tick running
            assert_eq!(unsafe { mesh.as_ref() }.vertices, 3);
        })
        .unwrap();
}

#[test]
fn test_collection_drops_entity_when_aspect_stops_matching() {
    let world = world();
    let id = world.aspect_id_of::<(Transform, Mesh)>();
    let entity = world.create_entity();
    world.add_component::<Transform>(entity).unwrap();
    assert_eq!(world.with_aspect_collection(id, AspectCollection::len), Some(0));

    world.add_component::<Mesh>(entity).unwrap();
    assert_eq!(world.with_aspect_collection(id, AspectCollection::len), Some(1));

    world.remove_component::<Transform>(entity).unwrap();
    assert_eq!(world.with_aspect_collection(id, AspectCollection::len), Some(0));
}

// ============================================================================
// System ordering
// ============================================================================

#[derive(Default)]
struct OrderProbe {
    a_running: AtomicBool,
    a_completed: AtomicU64,
    b_ticks: AtomicU64,
    violations: AtomicUsize,
}

struct Producer(Arc<OrderProbe>);

impl System for Producer {
    type Components = (Health,);

    fn tick(&mut self, _: &World, _: &FrameTime, _: &[Entity], (health,): Slices<'_, Self>) {
        self.0.a_running.store(true, Ordering::SeqCst);
        let mut total = 0_u64;
        for ptr in health {
            // SAFETY: only this system writes Health
            let health = unsafe { ptr.as_mut() };
            health.0 += 1;
            total += u64::from(health.0);
        }
        std::hint::black_box(total);
        self.0.a_running.store(false, Ordering::SeqCst);
        self.0.a_completed.fetch_add(1, Ordering::SeqCst);
    }
}

struct Consumer(Arc<OrderProbe>);

impl System for Consumer {
    type Components = (Tag,);

    fn dependencies(&self, dependencies: &mut Dependencies) {
        dependencies.after::<Producer>();
    }

    fn tick(&mut self, _: &World, _: &FrameTime, _: &[Entity], _: Slices<'_, Self>) {
        let expected = self.0.b_ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if self.0.a_running.load(Ordering::SeqCst)
            || self.0.a_completed.load(Ordering::SeqCst) != expected
        {
            self.0.violations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Runs unordered next to the other two.
struct Bystander;

impl System for Bystander {
    type Components = (Tag,);

    fn tick(&mut self, _: &World, _: &FrameTime, entities: &[Entity], _: Slices<'_, Self>) {
        std::hint::black_box(entities.len());
    }
}

#[test]
fn test_predecessor_completes_before_successor_starts() {
    let mut world = world();
    let state = Arc::new(OrderProbe::default());
    // Register the successor first so registration order cannot help.
    world.add_system(Consumer(Arc::clone(&state))).unwrap();
    world.add_system(Bystander).unwrap();
    world.add_system(Producer(Arc::clone(&state))).unwrap();

    let mut live = Vec::new();
    let mut time = FrameTime::first(0.016);
    for round in 0..100_usize {
        for _ in 0..(round % 7) * 10 {
            let entity = world.create_entity();
            world.add_component::<Health>(entity).unwrap();
            world.add_component::<Tag>(entity).unwrap();
            live.push(entity);
        }
        if round % 3 == 0 {
            for entity in live.drain(..live.len() / 2) {
                world.destroy_entity(entity);
            }
        }
        world.tick(&time);
        time = time.advance(0.016);
    }

    assert_eq!(state.violations.load(Ordering::SeqCst), 0);
    assert_eq!(state.a_completed.load(Ordering::SeqCst), 100);
    assert_eq!(state.b_ticks.load(Ordering::SeqCst), 100);
}

struct Early(Arc<Mutex<Vec<&'static str>>>);

impl System for Early {
    type Components = ();

    fn dependencies(&self, dependencies: &mut Dependencies) {
        dependencies.before::<Late>();
    }

    fn tick(&mut self, _: &World, _: &FrameTime, _: &[Entity], (): Slices<'_, Self>) {
        self.0.lock().push("early");
    }
}

struct Late(Arc<Mutex<Vec<&'static str>>>);

impl System for Late {
    type Components = ();

    fn tick(&mut self, _: &World, _: &FrameTime, _: &[Entity], (): Slices<'_, Self>) {
        self.0.lock().push("late");
    }
}

#[test]
fn test_successor_declaration_orders_tasks() {
    let mut world = world();
    let log = Arc::new(Mutex::new(Vec::new()));
    world.add_system(Late(Arc::clone(&log))).unwrap();
    world.add_system(Early(Arc::clone(&log))).unwrap();

    run(&mut world, 20);

    let log = log.lock();
    assert_eq!(log.len(), 40);
    for pair in log.chunks(2) {
        assert_eq!(pair, ["early", "late"]);
    }
}

struct Orphan(Arc<AtomicUsize>);

impl System for Orphan {
    type Components = ();

    fn dependencies(&self, dependencies: &mut Dependencies) {
        dependencies.after::<Producer>();
    }

    fn tick(&mut self, _: &World, _: &FrameTime, _: &[Entity], (): Slices<'_, Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_unregistered_dependency_is_ignored() {
    let mut world = world();
    let ticks = Arc::new(AtomicUsize::new(0));
    world.add_system(Orphan(Arc::clone(&ticks))).unwrap();

    run(&mut world, 3);
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
}

#[test]
fn test_system_registration() {
    let mut world = world();
    let ticks = Arc::new(AtomicUsize::new(0));
    world.add_system(Orphan(Arc::clone(&ticks))).unwrap();
    assert_eq!(
        world.add_system(Orphan(Arc::clone(&ticks))),
        Err(EcsError::DuplicateSystem(std::any::type_name::<Orphan>()))
    );
    world.add_system(Bystander).unwrap();
    assert_eq!(world.system_count(), 2);
    assert!(world.system_mut::<Orphan>().is_some());

    let orphan = world.remove_system::<Orphan>().unwrap();
    assert!(Arc::ptr_eq(&orphan.0, &ticks));
    assert!(!world.has_system::<Orphan>());
    assert!(matches!(
        world.remove_system::<Orphan>(),
        Err(EcsError::SystemNotFound(_))
    ));

    run(&mut world, 2);
    assert_eq!(ticks.load(Ordering::SeqCst), 0);
    assert!(world.system_mut::<Bystander>().is_some());
}

// ============================================================================
// Deferred structural changes
// ============================================================================

#[derive(Default)]
struct Observations {
    still_resolvable: AtomicBool,
    seen_per_tick: Mutex<Vec<usize>>,
}

/// Destroys everything it sees on the first frame.
struct Destroyer(Arc<Observations>);

impl System for Destroyer {
    type Components = (Health,);

    fn tick(&mut self, world: &World, time: &FrameTime, entities: &[Entity], _: Slices<'_, Self>) {
        if time.frame_index != 0 {
            return;
        }
        for &entity in entities {
            world.destroy_entity(entity);
        }
        let resolvable = entities
            .iter()
            .all(|&entity| world.get_component::<Health>(entity).is_some());
        self.0.still_resolvable.store(resolvable, Ordering::SeqCst);
    }
}

struct Watcher(Arc<Observations>);

impl System for Watcher {
    type Components = (Health,);

    fn dependencies(&self, dependencies: &mut Dependencies) {
        dependencies.after::<Destroyer>();
    }

    fn tick(&mut self, _: &World, _: &FrameTime, entities: &[Entity], _: Slices<'_, Self>) {
        self.0.seen_per_tick.lock().push(entities.len());
    }
}

#[test]
fn test_destruction_waits_for_next_tick() {
    let mut world = world();
    let observations = Arc::new(Observations::default());
    world.add_system(Destroyer(Arc::clone(&observations))).unwrap();
    world.add_system(Watcher(Arc::clone(&observations))).unwrap();

    let entities: Vec<_> = (0..10)
        .map(|_| {
            let entity = world.create_entity();
            world.add_component::<Health>(entity).unwrap();
            entity
        })
        .collect();

    run(&mut world, 1);
    assert!(observations.still_resolvable.load(Ordering::SeqCst));
    assert!(entities.iter().all(|&entity| world.is_entity_alive(entity)));
    assert_eq!(world.with_component_pool::<Health, _>(|pool| pool.len()), Some(10));

    run(&mut world, 1);
    assert_eq!(*observations.seen_per_tick.lock(), vec![10, 0]);
    assert_eq!(world.entity_count(), 0);
    assert_eq!(world.with_component_pool::<Health, _>(|pool| pool.len()), Some(0));
}

/// Strips `Tag` on the first frame and adds `Mesh` to everything it sees.
struct Restructure;

impl System for Restructure {
    type Components = (Tag,);

    fn tick(&mut self, world: &World, time: &FrameTime, entities: &[Entity], _: Slices<'_, Self>) {
        if time.frame_index != 0 {
            return;
        }
        for &entity in entities {
            world.remove_component::<Tag>(entity).unwrap();
            world.add_component::<Mesh>(entity).unwrap();
            // Visible at once, even though the collections are not updated yet.
            assert!(world.has_component::<Mesh>(entity));
        }
    }
}

#[test]
fn test_additions_apply_after_join_and_removals_next_tick() {
    let mut world = world();
    world.add_system(Restructure).unwrap();
    let tagged = world.aspect_id_of::<(Tag,)>();
    let meshed = world.aspect_id_of::<(Mesh,)>();

    let entities: Vec<_> = (0..25)
        .map(|_| {
            let entity = world.create_entity();
            world.add_component::<Tag>(entity).unwrap();
            entity
        })
        .collect();

    run(&mut world, 1);
    assert_eq!(world.with_aspect_collection(meshed, AspectCollection::len), Some(25));
    assert_eq!(world.with_aspect_collection(tagged, AspectCollection::len), Some(25));
    assert!(entities.iter().all(|&entity| world.has_component::<Tag>(entity)));

    run(&mut world, 1);
    assert_eq!(world.with_aspect_collection(tagged, AspectCollection::len), Some(0));
    assert!(entities.iter().all(|&entity| !world.has_component::<Tag>(entity)));
    assert_eq!(world.with_aspect_collection(meshed, AspectCollection::len), Some(25));
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Default)]
struct NotificationCounts {
    created_entities: Mutex<Vec<usize>>,
    created_components: Mutex<Vec<usize>>,
    deleted_entities: Mutex<Vec<usize>>,
    deleted_components: Mutex<Vec<usize>>,
}

struct NotificationReader(Arc<NotificationCounts>);

impl System for NotificationReader {
    type Components = ();

    fn tick(&mut self, world: &World, time: &FrameTime, _: &[Entity], (): Slices<'_, Self>) {
        let counts = &self.0;
        counts
            .created_entities
            .lock()
            .push(world.peek_messages::<CreatedEntityMessage, _>(<[_]>::len));
        counts
            .created_components
            .lock()
            .push(world.peek_messages::<CreatedComponentMessage, _>(<[_]>::len));
        counts
            .deleted_entities
            .lock()
            .push(world.peek_messages::<DeletedEntityMessage, _>(<[_]>::len));
        counts
            .deleted_components
            .lock()
            .push(world.peek_messages::<DeletedComponentMessage, _>(<[_]>::len));

        if time.frame_index == 0 {
            let spawned = world.create_entity();
            world.add_component::<Health>(spawned).unwrap();
        }
    }
}

#[test]
fn test_notifications_arrive_once_per_flush() {
    let mut world = world();
    let counts = Arc::new(NotificationCounts::default());
    world.add_system(NotificationReader(Arc::clone(&counts))).unwrap();

    let doomed = world.create_entity();
    world.add_component::<Health>(doomed).unwrap();
    world.add_component::<Tag>(doomed).unwrap();
    world.create_entity();
    world.create_entity();

    run(&mut world, 1);
    world.destroy_entity(doomed);
    run(&mut world, 2);

    assert_eq!(*counts.created_entities.lock(), vec![3, 1, 0]);
    assert_eq!(*counts.created_components.lock(), vec![2, 1, 0]);
    assert_eq!(*counts.deleted_entities.lock(), vec![0, 1, 0]);
    assert_eq!(*counts.deleted_components.lock(), vec![0, 2, 0]);
}

// ============================================================================
// Messages between systems
// ============================================================================

#[derive(Debug)]
struct Damage(u32);

struct Attacker;

impl System for Attacker {
    type Components = (Health,);

    fn dependencies(&self, dependencies: &mut Dependencies) {
        dependencies.before::<Defender>();
    }

    fn tick(&mut self, world: &World, _: &FrameTime, entities: &[Entity], _: Slices<'_, Self>) {
        for (i, &entity) in entities.iter().enumerate() {
            world.queue_message_for(entity, Damage(i as u32 + 1));
        }
        world.queue_message(Damage(0));
    }
}

struct Defender {
    global_seen: usize,
}

impl System for Defender {
    type Components = (Health,);

    fn tick(
        &mut self,
        world: &World,
        _: &FrameTime,
        entities: &[Entity],
        (health,): Slices<'_, Self>,
    ) {
        for (i, &entity) in entities.iter().enumerate() {
            for Damage(amount) in world.consume_messages_for::<Damage>(entity) {
                // SAFETY: Defender is the only Health writer in this test
                let health = unsafe { health[i].as_mut() };
                health.0 = health.0.saturating_sub(amount);
            }
        }
        self.global_seen += world.consume_messages::<Damage>().len();
    }
}

#[test]
fn test_messages_flow_from_predecessor_to_successor() {
    let mut world = world();
    world.add_system(Defender { global_seen: 0 }).unwrap();
    world.add_system(Attacker).unwrap();

    let entities: Vec<_> = (0..8)
        .map(|_| {
            let entity = world.create_entity();
            world.add_component_with(entity, Health(100)).unwrap();
            entity
        })
        .collect();

    run(&mut world, 4);

    let total: u32 = entities
        .iter()
        // SAFETY: no tick running
        .map(|&entity| unsafe { world.get_component::<Health>(entity).unwrap().as_ref() }.0)
        .sum();
    // Each tick the collection's i-th entity takes i + 1 damage.
    assert_eq!(total, 8 * 100 - 4 * (1..=8).sum::<u32>());
    assert_eq!(world.system_mut::<Defender>().unwrap().global_seen, 4);
    assert_eq!(world.consume_all_messages::<Damage>().len(), 0);
}

// ============================================================================
// Parallel iteration inside systems
// ============================================================================

#[derive(Default)]
struct Counter(u32);

struct ParallelIncrement;

impl System for ParallelIncrement {
    type Components = (Counter,);

    fn tick(&mut self, world: &World, _: &FrameTime, _: &[Entity], (counters,): Slices<'_, Self>) {
        let counters: &[ComponentPtr<Counter>] = counters;
        world
            .task_manager()
            .parallel_for(counters.len(), 64, "increment", |i| {
                // SAFETY: every index is visited once
                unsafe { counters[i].as_mut() }.0 += 1;
            });
    }
}

#[test]
fn test_parallel_for_inside_system_visits_every_entity() {
    let mut world = world();
    world.add_system(ParallelIncrement).unwrap();
    let entities: Vec<_> = (0..1000)
        .map(|_| {
            let entity = world.create_entity();
            world.add_component::<Counter>(entity).unwrap();
            entity
        })
        .collect();

    run(&mut world, 5);

    for entity in entities {
        assert_eq!(world.component_mut::<Counter>(entity).unwrap().0, 5);
    }
}

// ============================================================================
// Errors
// ============================================================================

#[test]
#[should_panic(expected = "entity not found")]
fn test_strict_world_panics_on_programmer_error() {
    let world = world_with(WorldConfig::default().strict_errors(true));
    let _ = world.add_component::<Health>(Entity::from_raw(7));
}

#[test]
fn test_lenient_world_returns_errors() {
    let world = world();
    let entity = world.create_entity();
    world.add_component::<Health>(entity).unwrap();

    assert!(matches!(
        world.add_component::<Health>(entity),
        Err(EcsError::DuplicateComponent { .. })
    ));
    assert!(matches!(
        world.remove_component::<Tag>(entity),
        Err(EcsError::ComponentNotFound { .. })
    ));
    // Destroying a missing entity is not an error.
    world.destroy_entity(Entity::from_raw(5));
    assert_eq!(world.entity_count(), 1);
}

struct Faulty;

impl System for Faulty {
    type Components = ();

    fn tick(&mut self, _: &World, time: &FrameTime, _: &[Entity], (): Slices<'_, Self>) {
        assert!(time.frame_index != 0, "faulty system");
    }
}

#[test]
fn test_system_panic_is_reraised_and_world_recovers() {
    let mut world = world();
    world.add_system(Faulty).unwrap();

    let first = FrameTime::first(0.016);
    let result = panic::catch_unwind(AssertUnwindSafe(|| world.tick(&first)));
    assert!(result.is_err());
    assert!(!world.is_tick_active());

    world.tick(&first.advance(0.016));
    assert_eq!(world.tick_count(), 1);
}

/// Every index of its first-frame parallel loop panics.
struct FaultyParallel;

impl System for FaultyParallel {
    type Components = (Counter,);

    fn tick(
        &mut self,
        world: &World,
        time: &FrameTime,
        _: &[Entity],
        (counters,): Slices<'_, Self>,
    ) {
        let counters: &[ComponentPtr<Counter>] = counters;
        let explode = time.frame_index == 0;
        world.task_manager().parallel_for(counters.len(), 8, "faulty increment", |i| {
            assert!(!explode, "faulty parallel body");
            // SAFETY: every index is visited once
            unsafe { counters[i].as_mut() }.0 += 1;
        });
    }
}

#[test]
fn test_parallel_for_panic_in_system_is_reraised() {
    let mut world = world();
    world.add_system(FaultyParallel).unwrap();
    let entities: Vec<_> = (0..200)
        .map(|_| {
            let entity = world.create_entity();
            world.add_component::<Counter>(entity).unwrap();
            entity
        })
        .collect();

    let first = FrameTime::first(0.016);
    let result = panic::catch_unwind(AssertUnwindSafe(|| world.tick(&first)));
    assert!(result.is_err());
    assert!(!world.is_tick_active());

    world.tick(&first.advance(0.016));
    for entity in entities {
        assert_eq!(world.component_mut::<Counter>(entity).unwrap().0, 1);
    }
}
