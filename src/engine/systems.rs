//! ECS System Abstractions
//!
//! This module defines the *system execution model* used by the pipeline.
//!
//! A **system** is a unit of per-frame logic. Systems:
//! - declare which ids they access through a [`Query`],
//! - belong to a [`Phase`] that orders them inside a pipeline,
//! - are marked multi-threaded (run on every stage over a slice of the
//!   matched entities) or immediate (run on the calling thread with direct
//!   store access),
//! - operate through a [`SystemContext`] rather than direct world access.
//!
//! ## System Trait
//!
//! [`System::run`] is the only required method. Any
//! `Fn(&mut SystemContext<'_>) + Send + Sync` closure is a system.
//!
//! ## Thread Safety
//!
//! All systems must be `Send + Sync`: a multi-threaded system is invoked
//! concurrently on every stage. While the world is readonly the context only
//! permits reads and recorded commands.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::entity::Entity;
use crate::engine::pipeline::Phase;
use crate::engine::query::Query;
use crate::engine::stage::StageRef;
use crate::engine::types::{SystemID, Tick};


/// A unit of executable logic operating on the world.

pub trait System: Send + Sync {
    /// Executes the system logic for one stage.
    fn run(&self, ctx: &mut SystemContext<'_>);
}

impl<F> System for F
where
    F: Fn(&mut SystemContext<'_>) + Send + Sync,
{
    fn run(&self, ctx: &mut SystemContext<'_>) {
        self(ctx)
    }
}

/// Everything a system invocation sees.
///
/// Dereferences to the [`StageRef`] of the stage running the system, so reads
/// and commands are issued directly on the context.

pub struct SystemContext<'w> {
    stage: StageRef<'w>,
    system: SystemID,
    entities: Vec<Entity>,
    delta_time: f32,
    stage_index: usize,
    stage_count: usize,
}

impl<'w> SystemContext<'w> {
    pub(crate) fn new(
        stage: StageRef<'w>,
        system: SystemID,
        entities: Vec<Entity>,
        delta_time: f32,
        stage_index: usize,
        stage_count: usize,
    ) -> Self {
        Self { stage, system, entities, delta_time, stage_index, stage_count }
    }

    /// Entities this invocation iterates.
    ///
    /// For multi-threaded systems this is the stage's share of the matched
    /// entities.

    #[inline] pub fn entities(&self) -> &[Entity] { &self.entities }
    /// Running system.
    #[inline] pub fn system(&self) -> SystemID { self.system }
    /// Scaled frame delta in seconds.
    #[inline] pub fn delta_time(&self) -> f32 { self.delta_time }
    /// Index of the stage running this invocation.
    #[inline] pub fn stage_index(&self) -> usize { self.stage_index }
    /// Number of stages sharing this invocation's op.
    #[inline] pub fn stage_count(&self) -> usize { self.stage_count }
    /// Stage handle.
    #[inline] pub fn stage(&self) -> StageRef<'w> { self.stage }
}

impl<'w> Deref for SystemContext<'w> {
    type Target = StageRef<'w>;

    fn deref(&self) -> &Self::Target { &self.stage }
}

/// Declaration of a system.
///
/// ## Example
/// ```ignore
/// let id = world.system(
///     SystemDesc::new("integrate")
///         .phase(Phase::OnUpdate)
///         .query(QueryBuilder::new().read(velocity).write(position))
///         .multi_threaded(true)
///         .run(|ctx| { /* ... */ }),
/// );
/// ```

pub struct SystemDesc {
    /// System name.
    pub name: String,
    /// Phase the system runs in.
    pub phase: Phase,
    /// Declared access.
    pub query: Query,
    /// Run on every stage.
    pub multi_threaded: bool,
    /// Run with direct store access outside readonly mode.
    pub immediate: bool,
    /// Minimum seconds between runs.
    pub interval: Option<f32>,
    /// Enabled on registration.
    pub enabled: bool,
    callback: Option<Box<dyn System>>,
}

impl SystemDesc {
    /// Creates a system in [`Phase::OnUpdate`] with no terms and no callback.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: Phase::default(),
            query: Query::default(),
            multi_threaded: false,
            immediate: false,
            interval: None,
            enabled: true,
            callback: None,
        }
    }

    /// Sets the phase.
    pub fn phase(mut self, phase: Phase) -> Self { self.phase = phase; self }
    /// Sets the declared access.
    pub fn query(mut self, query: impl Into<Query>) -> Self { self.query = query.into(); self }
    /// Marks the system multi-threaded.
    pub fn multi_threaded(mut self, multi_threaded: bool) -> Self { self.multi_threaded = multi_threaded; self }
    /// Marks the system immediate.
    pub fn immediate(mut self, immediate: bool) -> Self { self.immediate = immediate; self }
    /// Runs the system at most once per `seconds`.
    pub fn interval(mut self, seconds: f32) -> Self { self.interval = Some(seconds); self }
    /// Registers the system disabled.
    pub fn disabled(mut self) -> Self { self.enabled = false; self }

    /// Sets the callback from a closure.
    pub fn run<F>(self, f: F) -> Self
    where
        F: Fn(&mut SystemContext<'_>) + Send + Sync + 'static,
    {
        self.system(f)
    }

    /// Sets the callback from a [`System`] implementation.
    pub fn system(mut self, system: impl System + 'static) -> Self {
        self.callback = Some(Box::new(system));
        self
    }
}

fn noop(_: &mut SystemContext<'_>) {}

/// A registered system.

pub(crate) struct SystemRecord {
    pub id: SystemID,
    pub name: String,
    pub phase: Phase,
    pub query: Query,
    pub multi_threaded: bool,
    pub immediate: bool,
    pub interval: Option<f32>,
    pub enabled: bool,
    time_passed: f32,
    last_frame: AtomicU64,
    invocations: AtomicU64,
    callback: Box<dyn System>,
}

impl SystemRecord {
    pub fn new(id: SystemID, desc: SystemDesc) -> Self {
        Self {
            id,
            name: desc.name,
            phase: desc.phase,
            query: desc.query,
            multi_threaded: desc.multi_threaded,
            immediate: desc.immediate,
            interval: desc.interval,
            enabled: desc.enabled,
            time_passed: 0.0,
            last_frame: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            callback: desc.callback.unwrap_or_else(|| Box::new(noop) as Box<dyn System>),
        }
    }

    /// Advances the interval timer; returns `true` if the system is due.
    pub fn tick(&mut self, delta_time: f32) -> bool {
        let Some(interval) = self.interval else { return true };
        self.time_passed += delta_time;
        if self.time_passed >= interval {
            self.time_passed -= interval;
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn last_frame(&self) -> Tick { self.last_frame.load(Ordering::Acquire) }

    #[inline]
    pub fn mark_passed(&self, frame: Tick) { self.last_frame.store(frame, Ordering::Release) }

    #[inline]
    pub fn invocations(&self) -> u64 { self.invocations.load(Ordering::Relaxed) }

    pub fn invoke(&self, ctx: &mut SystemContext<'_>) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.callback.run(ctx);
    }
}
