//! World management and execution layer.
//!
//! This module defines [`World`], the central orchestration layer responsible
//! for:
//!
//! * owning the [`Store`] and the registered systems,
//! * owning one [`Stage`] per worker plus any unmanaged (async) stages,
//! * entering and leaving readonly mode and merging stage queues,
//! * compiling and running pipelines frame by frame.
//!
//! ## Concurrency model
//!
//! The store lives behind a `parking_lot::RwLock` and every stage behind its
//! own `parking_lot::Mutex`. While an op runs, the world is shared (`&World`)
//! between the calling thread and the rayon workers:
//!
//! * systems read the store through shared locks,
//! * structural mutations are recorded into the running stage's queue,
//! * in-place value writes go through per-column locks.
//!
//! Merges, pipeline rebuilds and configuration changes take `&mut World`, so
//! they can never overlap with system execution.
//!
//! ## Frame structure
//!
//! [`World::advance_frame`] runs the startup pipeline once (frame 0, single
//! stage), then the current pipeline, then closes the frame. See
//! [`scheduler`](crate::engine::scheduler) for the op loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::engine::component::{Component, ComponentValue};
use crate::engine::config::WorldConfig;
use crate::engine::entity::Entity;
use crate::engine::error::{ConfigError, ECSError, ECSResult, PipelineError, SystemError};
use crate::engine::merge::{self, CommandStats};
use crate::engine::pipeline::{PipelineDesc, PipelineState};
use crate::engine::scheduler;
use crate::engine::stage::{Stage, StageRef};
use crate::engine::storage::{EventKind, ObserverEvent, Store};
use crate::engine::systems::{SystemDesc, SystemRecord};
use crate::engine::types::{ComponentID, Id, PipelineID, SystemID};


/// Id of the built-in frame pipeline.
pub const FRAME_PIPELINE: PipelineID = 0;

/// Id of the pipeline running [`Phase::OnStart`](crate::engine::pipeline::Phase::OnStart) systems.
pub const STARTUP_PIPELINE: PipelineID = 1;

/// Runtime counters of a world.

#[derive(Clone, Debug, Default)]
pub struct WorldInfo {
    /// Completed frames.
    pub frame_count_total: u64,
    /// Merges performed.
    pub merge_count_total: u64,
    /// Pipeline schedules compiled.
    pub pipeline_build_count_total: u64,
    /// Systems invoked during the last frame.
    pub systems_ran_frame: u64,
    /// Systems invoked since creation.
    pub systems_ran_total: u64,
    /// Scaled delta of the last frame, in seconds.
    pub delta_time: f32,
    /// Sum of scaled frame deltas, in seconds.
    pub world_time_total: f64,
    /// Measured wall-clock frame time.
    pub frame_time_total: Duration,
    /// Time spent inside ops, excluding merges.
    pub system_time_total: Duration,
    /// Time spent merging.
    pub merge_time_total: Duration,
    /// Applied command counters.
    pub cmd: CommandStats,
}

/// Entity store, systems, stages and pipelines of one simulation.
///
/// ## Example
/// ```ignore
/// let mut world = World::with_config(WorldConfig::default().with_threads(4))?;
/// let position = world.register::<Position>();
/// world.system(SystemDesc::new("move").query(QueryBuilder::new().write(position)).run(|ctx| {
///     for &e in ctx.entities() { /* ... */ }
/// }));
/// while world.advance_frame(1.0 / 60.0) {}
/// ```

pub struct World {
    store: RwLock<Store>,
    pub(crate) stages: Vec<Mutex<Stage>>,
    async_stages: Vec<Mutex<Stage>>,
    pub(crate) systems: Vec<SystemRecord>,
    pub(crate) systems_version: u64,
    pub(crate) pipelines: Vec<PipelineState>,
    current_pipeline: PipelineID,
    pub(crate) workers: Option<rayon::ThreadPool>,
    readonly: bool,
    multi_threaded: bool,
    quit: AtomicBool,
    pub(crate) info: WorldInfo,
    config: WorldConfig,
    last_frame_start: Option<Instant>,
}

impl Default for World {
    fn default() -> Self { Self::new() }
}

impl World {
    /// Creates a single-stage world.
    pub fn new() -> Self {
        Self {
            store: RwLock::new(Store::new()),
            stages: vec![Mutex::new(Stage::new(Some(0)))],
            async_stages: Vec::new(),
            systems: Vec::new(),
            systems_version: 0,
            pipelines: vec![
                PipelineState::new(PipelineDesc::frame()),
                PipelineState::new(PipelineDesc::startup()),
            ],
            current_pipeline: FRAME_PIPELINE,
            workers: None,
            readonly: false,
            multi_threaded: false,
            quit: AtomicBool::new(false),
            info: WorldInfo::default(),
            config: WorldConfig::default(),
            last_frame_start: None,
        }
    }

    /// Creates a world from a validated configuration.
    pub fn with_config(config: WorldConfig) -> ECSResult<Self> {
        config.validate()?;
        let mut world = Self::new();
        let threads = config.threads;
        world.config = config;
        world.set_threads(threads)?;
        Ok(world)
    }

    /// Active configuration.
    #[inline] pub fn config(&self) -> &WorldConfig { &self.config }

    pub(crate) fn store_lock(&self) -> &RwLock<Store> { &self.store }

    pub(crate) fn store_mut(&mut self) -> &mut Store { self.store.get_mut() }

    /// Runs `f` with shared access to the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        f(&self.store.read_recursive())
    }

    // ── components ─────────────────────────────────────────────────────────

    /// Registers `T` with a default constructor.
    pub fn register<T: Component + Default>(&mut self) -> Id {
        Id::component(self.store.get_mut().registry_mut().register::<T>())
    }

    /// Registers `T` without a default constructor.
    pub fn register_without_default<T: Component>(&mut self) -> Id {
        Id::component(self.store.get_mut().registry_mut().register_without_default::<T>())
    }

    /// Registers a data-less tag.
    pub fn tag(&mut self, name: &str) -> Id {
        Id::component(self.store.get_mut().registry_mut().register_tag(name))
    }

    /// Component id of `T`, if registered.
    pub fn component_id<T: 'static>(&self) -> Option<ComponentID> {
        self.with_store(|store| store.registry().id_of::<T>())
    }

    /// Id of `T`.
    ///
    /// ## Panics
    /// Panics if `T` was never registered.

    pub fn component<T: 'static>(&self) -> Id {
        match self.component_id::<T>() {
            Some(component_id) => Id::component(component_id),
            None => panic!("component `{}` is not registered", std::any::type_name::<T>()),
        }
    }

    // ── entity reads ───────────────────────────────────────────────────────

    /// Reserves a new entity. Safe while readonly.
    pub fn new_entity(&self) -> Entity { self.with_store(|store| store.new_entity()) }
    /// Returns `true` if `entity` is alive.
    pub fn is_alive(&self, entity: Entity) -> bool { self.with_store(|store| store.is_alive(entity)) }

    /// Returns `true` if `entity` has an id matching `id`.
    pub fn has(&self, entity: Entity, id: impl Into<Id>) -> bool {
        let id = id.into();
        self.with_store(|store| store.has(entity, id))
    }

    /// Copy of the `T` component of `entity`.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<T> {
        let id = self.component::<T>();
        self.with_store(|store| store.get::<T>(entity, id))
    }

    /// Name of `entity`.
    pub fn name(&self, entity: Entity) -> Option<String> {
        self.with_store(|store| store.name(entity).map(str::to_string))
    }

    /// `::`-separated path of `entity` through its named parents.
    pub fn path(&self, entity: Entity) -> Option<String> {
        self.with_store(|store| store.path(entity))
    }

    // ── main stage ─────────────────────────────────────────────────────────

    /// Handle of stage 0, the stage of the calling thread.
    pub fn main_stage(&self) -> StageRef<'_> { StageRef::new(self, &self.stages[0]) }

    /// Adds `id` to `entity` through the main stage.
    pub fn add(&self, entity: Entity, id: impl Into<Id>) { self.main_stage().add(entity, id) }
    /// Removes `id` from `entity` through the main stage.
    pub fn remove(&self, entity: Entity, id: impl Into<Id>) { self.main_stage().remove(entity, id) }
    /// Assigns `value` through the main stage.
    pub fn set<T: Component>(&self, entity: Entity, value: T) { self.main_stage().set(entity, value) }
    /// Assigns a type-erased value through the main stage.
    pub fn set_id(&self, entity: Entity, id: impl Into<Id>, value: ComponentValue) {
        self.main_stage().set_id(entity, id, value)
    }
    /// Ensures and initializes a `T` through the main stage.
    pub fn emplace<T: Component>(&self, entity: Entity, init: impl FnOnce(&mut T)) {
        self.main_stage().emplace(entity, init)
    }
    /// Flags `id` on `entity` as changed through the main stage.
    pub fn modified(&self, entity: Entity, id: impl Into<Id>) { self.main_stage().modified(entity, id) }
    /// Clears `entity` through the main stage.
    pub fn clear(&self, entity: Entity) { self.main_stage().clear(entity) }
    /// Deletes `entity` through the main stage.
    pub fn delete(&self, entity: Entity) { self.main_stage().delete(entity) }
    /// Enables `id` on `entity` through the main stage.
    pub fn enable(&self, entity: Entity, id: impl Into<Id>) { self.main_stage().enable(entity, id) }
    /// Disables `id` on `entity` through the main stage.
    pub fn disable(&self, entity: Entity, id: impl Into<Id>) { self.main_stage().disable(entity, id) }

    /// Opens a defer scope on the main stage.
    pub fn defer_begin(&self) -> bool { self.main_stage().defer_begin() }
    /// Closes a defer scope on the main stage, flushing at the outermost one.
    pub fn defer_end(&self) -> bool { self.main_stage().defer_end() }
    /// Suspends deferral on the main stage.
    pub fn defer_suspend(&self) { self.main_stage().defer_suspend() }
    /// Resumes deferral on the main stage.
    pub fn defer_resume(&self) { self.main_stage().defer_resume() }
    /// Returns `true` if the main stage is recording.
    pub fn is_deferred(&self) -> bool { self.main_stage().is_deferred() }

    // ── stages ─────────────────────────────────────────────────────────────

    /// Number of managed stages.
    #[inline] pub fn stage_count(&self) -> usize { self.stages.len() }

    /// Handle of managed stage `index`.
    pub fn stage(&self, index: usize) -> ECSResult<StageRef<'_>> {
        self.stages.get(index)
            .map(|stage| StageRef::new(self, stage))
            .ok_or(ECSError::Stage { index, count: self.stages.len() })
    }

    /// Creates an unmanaged stage and returns its id.
    ///
    /// Unmanaged stages are always deferred; their commands are applied only
    /// by [`World::merge_async`].

    pub fn async_stage(&mut self) -> usize {
        self.async_stages.push(Mutex::new(Stage::unmanaged()));
        self.async_stages.len() - 1
    }

    /// Handle of unmanaged stage `id`.
    pub fn async_stage_ref(&self, id: usize) -> ECSResult<StageRef<'_>> {
        self.async_stages.get(id)
            .map(|stage| StageRef::new(self, stage))
            .ok_or(ECSError::Stage { index: id, count: self.async_stages.len() })
    }

    /// Applies the commands of unmanaged stage `id` and re-enters deferred
    /// mode on it.
    ///
    /// ## Panics
    /// Panics if the world is readonly.

    pub fn merge_async(&mut self, id: usize) -> ECSResult<()> {
        assert!(!self.readonly, "cannot merge an async stage while the world is readonly");
        let count = self.async_stages.len();
        let stage = self.async_stages.get_mut(id)
            .ok_or(ECSError::Stage { index: id, count })?
            .get_mut();
        let queue = stage.defer_end();
        stage.defer_begin();
        let store = self.store.get_mut();
        if let Some(mut queue) = queue {
            merge::flush(store, &mut queue);
        }
        store.eval_component_monitors();
        self.info.merge_count_total += 1;
        Ok(())
    }

    /// Replaces the managed stages and the worker pool.
    ///
    /// Stage 0 keeps its state; a pool of `threads - 1` rayon workers is
    /// created when `threads > 1`.
    ///
    /// ## Panics
    /// Panics if the world is readonly or a dropped stage holds commands.

    pub fn set_threads(&mut self, threads: usize) -> ECSResult<()> {
        assert!(!self.readonly, "cannot change the stage count while the world is readonly");
        if threads == 0 {
            return Err(ConfigError::Invalid {
                field: "threads",
                reason: "at least one stage is required".to_string(),
            }.into());
        }
        for stage in self.stages.iter_mut().skip(threads) {
            assert!(stage.get_mut().queue().is_empty(), "dropping a stage with pending commands");
        }
        self.stages.truncate(threads);
        while self.stages.len() < threads {
            self.stages.push(Mutex::new(Stage::new(Some(self.stages.len()))));
        }

        self.workers = if threads > 1 {
            let prefix = self.config.thread_name_prefix.clone();
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads - 1)
                .thread_name(move |index| format!("{prefix}-{}", index + 1))
                .build()?;
            Some(pool)
        } else {
            None
        };
        self.config.threads = threads;
        info!(threads, "configured stages");
        Ok(())
    }

    // ── observers & systems ────────────────────────────────────────────────

    /// Registers an observer for `event`, optionally restricted to ids
    /// matching `filter`.
    pub fn observe<F>(&mut self, event: EventKind, filter: Option<Id>, callback: F)
    where
        F: Fn(&Store, &ObserverEvent<'_>) + Send + Sync + 'static,
    {
        self.store.get_mut().observe(event, filter, Box::new(callback));
    }

    /// Registers a system and returns its id.
    pub fn system(&mut self, desc: SystemDesc) -> SystemID {
        let id = self.systems.len() as SystemID;
        debug!(system = id, name = %desc.name, phase = ?desc.phase, "registered system");
        self.systems.push(SystemRecord::new(id, desc));
        self.systems_version += 1;
        id
    }

    /// Enables or disables a system.
    pub fn enable_system(&mut self, id: SystemID, enabled: bool) -> ECSResult<()> {
        let record = self.systems.get_mut(id as usize).ok_or(SystemError::Unknown(id))?;
        if record.enabled != enabled {
            record.enabled = enabled;
            self.systems_version += 1;
        }
        Ok(())
    }

    /// Number of times system `id` was invoked, summed over stages.
    pub fn system_invocations(&self, id: SystemID) -> ECSResult<u64> {
        self.systems.get(id as usize)
            .map(SystemRecord::invocations)
            .ok_or_else(|| SystemError::Unknown(id).into())
    }

    // ── pipelines ──────────────────────────────────────────────────────────

    /// Registers a pipeline and returns its id.
    pub fn pipeline(&mut self, desc: PipelineDesc) -> PipelineID {
        self.pipelines.push(PipelineState::new(desc));
        (self.pipelines.len() - 1) as PipelineID
    }

    /// Makes `id` the pipeline run by [`World::advance_frame`].
    pub fn set_pipeline(&mut self, id: PipelineID) -> ECSResult<()> {
        if self.readonly {
            return Err(PipelineError::Readonly.into());
        }
        if id as usize >= self.pipelines.len() {
            return Err(PipelineError::Unknown(id).into());
        }
        self.current_pipeline = id;
        Ok(())
    }

    /// Pipeline run by [`World::advance_frame`].
    #[inline] pub fn get_pipeline(&self) -> PipelineID { self.current_pipeline }

    /// Compiled state of pipeline `id`.
    pub fn pipeline_state(&self, id: PipelineID) -> ECSResult<&PipelineState> {
        self.pipelines.get(id as usize).ok_or_else(|| PipelineError::Unknown(id).into())
    }

    /// Runs pipeline `id` once to completion on every managed stage.
    pub fn run_pipeline(&mut self, id: PipelineID, delta_time: f32) -> ECSResult<()> {
        if id as usize >= self.pipelines.len() {
            return Err(PipelineError::Unknown(id).into());
        }
        let stage_count = self.stage_count();
        scheduler::run_pipeline(self, id, delta_time, stage_count);
        Ok(())
    }

    // ── readonly mode ──────────────────────────────────────────────────────

    /// Enters readonly mode: every managed stage starts deferring.
    ///
    /// Returns whether the world was already readonly.
    ///
    /// ## Panics
    /// Panics if a stage is already deferred, which includes nested calls.

    pub fn readonly_begin(&mut self, multi_threaded: bool) -> bool {
        trace!(multi_threaded, "readonly begin");
        for stage in &mut self.stages {
            let stage = stage.get_mut();
            assert_eq!(
                stage.defer_depth(), 0,
                "deferred mode cannot be enabled when entering readonly mode"
            );
            stage.defer_begin();
        }
        let was_readonly = self.readonly;
        self.readonly = true;
        self.multi_threaded = multi_threaded;
        was_readonly
    }

    /// Leaves readonly mode and merges every managed stage.
    ///
    /// ## Panics
    /// Panics if the world is not readonly.

    pub fn readonly_end(&mut self) {
        assert!(self.readonly, "readonly_end called while the world is not readonly");
        trace!("readonly end");
        self.readonly = false;
        self.multi_threaded = false;
        self.merge_stages();
    }

    fn merge_stages(&mut self) -> usize {
        let started = self.config.measure_system_time.then(Instant::now);
        let store = self.store.get_mut();
        let mut merged = 0;
        for stage in &mut self.stages {
            if let Some(mut queue) = stage.get_mut().defer_end() {
                merged += merge::flush(store, &mut queue);
            }
        }
        store.eval_component_monitors();
        self.info.merge_count_total += 1;
        if let Some(started) = started {
            self.info.merge_time_total += started.elapsed();
        }
        merged
    }

    /// Returns `true` between [`World::readonly_begin`] and
    /// [`World::readonly_end`].
    #[inline] pub fn is_readonly(&self) -> bool { self.readonly }

    /// Returns `true` while a multi-threaded op runs.
    #[inline] pub fn is_multi_threaded(&self) -> bool { self.multi_threaded }

    // ── frames ─────────────────────────────────────────────────────────────

    /// Delta used when there is no previous frame to measure from.
    fn first_frame_delta(&self) -> f32 {
        if self.config.target_fps > 0.0 {
            1.0 / self.config.target_fps
        } else {
            1.0 / 60.0
        }
    }

    fn frame_delta(&mut self, user_delta_time: f32, frame_start: Instant) -> f32 {
        let previous = self.last_frame_start.replace(frame_start);
        let raw = if user_delta_time > 0.0 {
            user_delta_time
        } else {
            match previous {
                Some(start) => {
                    let mut elapsed = frame_start.duration_since(start);
                    while elapsed.is_zero() {
                        std::hint::spin_loop();
                        elapsed = start.elapsed();
                    }
                    elapsed.as_secs_f32()
                }
                None => self.first_frame_delta(),
            }
        };
        raw * self.config.time_scale
    }

    fn end_frame(&mut self, frame_start: Instant) {
        let frame_time = frame_start.elapsed();
        if self.config.measure_frame_time {
            self.info.frame_time_total += frame_time;
        }
        if self.config.target_fps > 0.0 {
            let budget = Duration::from_secs_f32(1.0 / self.config.target_fps);
            if let Some(remaining) = budget.checked_sub(frame_time) {
                trace!(?remaining, "throttling frame");
                std::thread::sleep(remaining);
            }
        }
    }

    /// Runs one frame.
    ///
    /// ## Semantics
    /// A zero `delta_time` is replaced by the wall-clock time since the
    /// previous frame started; the first such frame uses `1 / target_fps`, or
    /// `1 / 60` without a target. Startup systems run on frame 0 only, on a
    /// single stage. With a `target_fps` set, the frame sleeps until its
    /// budget is used up.
    ///
    /// Returns `false` once [`World::quit`] was called.

    pub fn advance_frame(&mut self, delta_time: f32) -> bool {
        let frame_start = Instant::now();
        let delta_time = self.frame_delta(delta_time, frame_start);
        self.info.delta_time = delta_time;
        self.info.systems_ran_frame = 0;

        if self.info.frame_count_total == 0 {
            scheduler::run_pipeline(self, STARTUP_PIPELINE, delta_time, 1);
        }
        let stage_count = self.stage_count();
        scheduler::run_pipeline(self, self.current_pipeline, delta_time, stage_count);

        self.info.frame_count_total += 1;
        self.info.world_time_total += f64::from(delta_time);
        trace!(frame = self.info.frame_count_total, delta_time, "frame end");
        self.end_frame(frame_start);
        !self.should_quit()
    }

    /// Throttles [`World::advance_frame`] to `fps` frames per second; `0`
    /// removes the limit.
    pub fn set_target_fps(&mut self, fps: f32) -> ECSResult<()> {
        let config = self.config.clone().with_target_fps(fps);
        config.validate()?;
        self.config = config;
        debug!(fps, "set target frame rate");
        Ok(())
    }

    /// Restarts world time at zero.
    ///
    /// The next frame without an explicit delta uses the first-frame
    /// estimate instead of the time spent since the last frame.
    pub fn reset_clock(&mut self) {
        self.info.world_time_total = 0.0;
        self.last_frame_start = None;
    }

    /// Re-evaluates which systems of the current pipeline match no entities
    /// and drops them from its schedule at the next frame.
    ///
    /// Returns the number of enabled systems left out.

    pub fn deactivate_systems(&mut self) -> ECSResult<usize> {
        if self.readonly {
            return Err(PipelineError::Readonly.into());
        }
        let store = self.store.get_mut();
        store.eval_component_monitors();
        let index = self.current_pipeline as usize;
        let desc = self.pipelines[index].desc();
        let inactive = self.systems.iter()
            .filter(|system| system.enabled && desc.includes(system.phase))
            .filter(|system| !store.is_query_active(&system.query))
            .count();
        debug!(pipeline = %desc.name, inactive, "deactivating unmatched systems");
        self.pipelines[index].invalidate();
        Ok(inactive)
    }

    /// Requests the frame loop to stop. Callable from systems.
    pub fn quit(&self) { self.quit.store(true, Ordering::Release) }

    /// Returns `true` once [`World::quit`] was called.
    pub fn should_quit(&self) -> bool { self.quit.load(Ordering::Acquire) }

    /// Snapshot of the runtime counters.
    pub fn info(&self) -> WorldInfo {
        let mut info = self.info.clone();
        info.cmd = self.with_store(|store| store.stats().clone());
        info
    }
}
