//! # Pipeline Builder
//!
//! Compiles the ordered list of systems of a pipeline into a schedule: a flat
//! list of active systems partitioned into contiguous **ops**. The systems of
//! one op run back to back with no merge between them; a merge (sync point)
//! happens at every op boundary.
//!
//! ## Merge insertion
//! Systems are walked in order while a [`WriteState`] records the ids written
//! by active systems since the last merge. A merge is inserted before a system
//! when:
//! - one of its `This` terms touches a staged id,
//! - one of its other terms reads a staged id,
//! - its threading mode (`multi_threaded`, `immediate`) differs from the
//!   running mode,
//! - the running mode is immediate.
//!
//! ## Invariants
//! - Ops tile the flat system list without gaps, in order.
//! - Every op is non-empty, except the single op of a schedule with no
//!   active systems.
//! - After a rebuild the cursor sits after the last system that already ran
//!   this frame.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::query::{InOutKind, Query, Term, TermOper};
use crate::engine::types::SystemID;
use crate::engine::write_state::{WriteKind, WriteState};


/// Ordered execution phase of a system.
///
/// Systems are ordered by phase first and by registration order second.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    /// Runs once, before the first frame.
    OnStart,
    /// First phase of every frame.
    PreFrame,
    /// Loads external data.
    OnLoad,
    /// Processes loaded data.
    PostLoad,
    /// Prepares the update.
    PreUpdate,
    /// Main simulation logic.
    #[default]
    OnUpdate,
    /// Validates the update.
    OnValidate,
    /// Applies corrections.
    PostUpdate,
    /// Prepares for storing results.
    PreStore,
    /// Stores results.
    OnStore,
    /// Last phase of every frame.
    PostFrame,
}

impl Phase {
    /// Phases run by the built-in frame pipeline, in order.
    pub const FRAME: [Phase; 10] = [
        Phase::PreFrame,
        Phase::OnLoad,
        Phase::PostLoad,
        Phase::PreUpdate,
        Phase::OnUpdate,
        Phase::OnValidate,
        Phase::PostUpdate,
        Phase::PreStore,
        Phase::OnStore,
        Phase::PostFrame,
    ];
}

/// Declaration of a pipeline.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDesc {
    /// Pipeline name.
    pub name: String,
    /// Phases whose systems this pipeline runs.
    pub phases: Vec<Phase>,
}

impl PipelineDesc {
    /// Creates a pipeline with no phases.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), phases: Vec::new() }
    }

    /// Adds a phase.
    pub fn phase(mut self, phase: Phase) -> Self {
        if !self.phases.contains(&phase) {
            self.phases.push(phase);
        }
        self
    }

    /// Returns `true` if systems of `phase` belong to this pipeline.
    #[inline]
    pub fn includes(&self, phase: Phase) -> bool { self.phases.contains(&phase) }

    /// The built-in frame pipeline.
    pub fn frame() -> Self {
        Phase::FRAME.iter().fold(Self::new("builtin"), |desc, &phase| desc.phase(phase))
    }

    /// The pipeline that runs startup systems.
    pub fn startup() -> Self {
        Self::new("startup").phase(Phase::OnStart)
    }
}

/// A run of systems executed without an intermediate merge.

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Op {
    /// Index of the first system in the flat list.
    pub offset: usize,
    /// Number of systems.
    pub count: usize,
    /// Systems run on every stage.
    pub multi_threaded: bool,
    /// Systems run on the real world without readonly mode.
    pub immediate: bool,
    /// Accumulated run plus merge time.
    pub time_spent: Duration,
    /// Accumulated number of commands merged after this op.
    pub commands_enqueued: u64,
}

impl Op {
    /// One past the last system index of this op.
    #[inline]
    pub fn end(&self) -> usize { self.offset + self.count }
}

/// What the builder needs to know about a candidate system.

#[derive(Clone, Copy, Debug)]
pub struct SystemBuildInfo<'a> {
    /// System id.
    pub id: SystemID,
    /// Declared terms.
    pub query: &'a Query,
    /// The system is enabled and matches at least one entity.
    pub active: bool,
    /// Run on every stage.
    pub multi_threaded: bool,
    /// Run without readonly mode.
    pub immediate: bool,
}

/// Output of the builder.

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schedule {
    /// Active systems in execution order.
    pub systems: Vec<SystemID>,
    /// Ops tiling `systems`.
    pub ops: Vec<Op>,
}

/// Effective access of a term, `None` if it takes no part in merge decisions.
fn resolve_inout(term: &Term) -> Option<InOutKind> {
    match term.inout {
        InOutKind::None | InOutKind::Filter => None,
        InOutKind::Default if term.matches_nothing() => None,
        InOutKind::Default if term.matches_this() => Some(InOutKind::InOut),
        InOutKind::Default => Some(InOutKind::In),
        // `Not` + `Out` adds the id to any matched table.
        InOutKind::Out if term.oper == TermOper::Not => Some(InOutKind::Out),
        inout => Some(inout),
    }
}

fn check_term(term: &Term, write_state: &WriteState) -> bool {
    let Some(inout) = resolve_inout(term) else { return false };
    if write_state.get(term.id) != WriteKind::Staged {
        return false;
    }
    term.matches_this() || matches!(inout, InOutKind::In | InOutKind::InOut)
}

fn record_writes(query: &Query, write_state: &mut WriteState) {
    for term in query.terms() {
        if matches!(resolve_inout(term), Some(InOutKind::Out | InOutKind::InOut)) {
            write_state.set(term.id);
        }
    }
}

/// Returns `true` if `query` touches an id staged by an earlier system, then
/// records its own writes when the system is active.

fn check_terms(query: &Query, is_active: bool, write_state: &mut WriteState) -> bool {
    let this_terms = query.terms().iter().filter(|t| t.matches_this());
    let other_terms = query.terms().iter().filter(|t| !t.matches_this());
    let staged: &WriteState = write_state;
    let needs_merge = this_terms.chain(other_terms).fold(false, |acc, term| check_term(term, staged) | acc);
    if is_active {
        record_writes(query, write_state);
    }
    needs_merge
}

/// Builds the schedule for `systems`, given in execution order.
///
/// ## Semantics
/// Inactive systems take no slot in the flat list but still participate in
/// merge decisions: a staged id read by an inactive system closes the current
/// op. An empty op is reused rather than closed, and a trailing empty op is
/// dropped when it is not the only one.
///
/// ## Panics
/// Panics if a system still requires a merge right after one was inserted.

pub fn compile(systems: &[SystemBuildInfo<'_>]) -> Schedule {
    let mut write_state = WriteState::new();
    let mut flat = Vec::new();
    let mut ops: Vec<Op> = Vec::new();
    let mut current: Option<usize> = None;

    let mut first = true;
    let mut multi_threaded = false;
    let mut immediate = false;

    for system in systems {
        let mut needs_merge = check_terms(system.query, system.active, &mut write_state);

        if system.active {
            if first {
                multi_threaded = system.multi_threaded;
                immediate = system.immediate;
                first = false;
            }
            if system.multi_threaded != multi_threaded {
                needs_merge = true;
                multi_threaded = system.multi_threaded;
            }
            if system.immediate != immediate {
                needs_merge = true;
                immediate = system.immediate;
            }
        }

        if immediate {
            needs_merge = true;
        }

        if needs_merge {
            write_state.reset();
            if current.is_some_and(|op| ops[op].count > 0) {
                current = None;
            }
            if system.active {
                let again = check_terms(system.query, true, &mut write_state);
                assert!(!again, "system {} requires a merge right after a merge", system.id);
            }
        }

        let op = *current.get_or_insert_with(|| {
            ops.push(Op { offset: flat.len(), ..Op::default() });
            ops.len() - 1
        });

        if system.active {
            flat.push(system.id);
            let op = &mut ops[op];
            if op.count == 0 {
                op.multi_threaded = multi_threaded;
                op.immediate = immediate;
            }
            op.count += 1;
        }
    }

    if ops.len() > 1 && ops.last().is_some_and(|op| op.count == 0) {
        ops.pop();
    }
    if ops.is_empty() {
        ops.push(Op::default());
    }

    Schedule { systems: flat, ops }
}

/// Fingerprint of everything a schedule depends on.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchCount {
    /// Bumped when systems are added, enabled or disabled.
    pub systems_version: u64,
    /// Bumped when any table changes between empty and non-empty.
    pub activity_version: u64,
}

/// Compiled schedule of a pipeline plus its execution cursor.

#[derive(Debug)]
pub struct PipelineState {
    desc: PipelineDesc,
    schedule: Schedule,
    match_count: Option<MatchCount>,
    cur_op: Option<usize>,
    cur_i: usize,
    rebuild_count: u64,
}

impl PipelineState {
    /// Creates an unbuilt pipeline.
    pub fn new(desc: PipelineDesc) -> Self {
        Self {
            desc,
            schedule: Schedule::default(),
            match_count: None,
            cur_op: None,
            cur_i: 0,
            rebuild_count: 0,
        }
    }

    /// Declaration of this pipeline.
    #[inline] pub fn desc(&self) -> &PipelineDesc { &self.desc }
    /// Active systems in execution order.
    #[inline] pub fn systems(&self) -> &[SystemID] { &self.schedule.systems }
    /// Ops of the current schedule.
    #[inline] pub fn ops(&self) -> &[Op] { &self.schedule.ops }
    /// Number of times the schedule was rebuilt.
    #[inline] pub fn rebuild_count(&self) -> u64 { self.rebuild_count }
    /// Current op index and system index.
    #[inline] pub fn cursor(&self) -> (Option<usize>, usize) { (self.cur_op, self.cur_i) }

    pub(crate) fn op_mut(&mut self, index: usize) -> Option<&mut Op> {
        self.schedule.ops.get_mut(index)
    }

    /// Returns `true` if the schedule is stale for `match_count`.
    #[inline]
    pub fn needs_rebuild(&self, match_count: MatchCount) -> bool {
        self.match_count != Some(match_count)
    }

    /// Installs a freshly compiled schedule.
    ///
    /// ## Semantics
    /// The cursor is moved after the last system of the new list for which
    /// `has_run` holds, so a mid-frame rebuild resumes where execution left
    /// off.

    pub fn install(&mut self, match_count: MatchCount, schedule: Schedule, has_run: impl Fn(SystemID) -> bool) {
        self.schedule = schedule;
        self.match_count = Some(match_count);
        self.rebuild_count += 1;

        for (index, op) in self.schedule.ops.iter().enumerate() {
            debug!(
                pipeline = %self.desc.name,
                op = index,
                systems = ?&self.schedule.systems[op.offset..op.end()],
                multi_threaded = op.multi_threaded,
                immediate = op.immediate,
                "pipeline op"
            );
        }

        self.cur_i = self.schedule.systems.iter()
            .rposition(|&system| has_run(system))
            .map_or(0, |last| last + 1);
        self.cur_op = self.locate(self.cur_i);
    }

    fn locate(&self, index: usize) -> Option<usize> {
        if index >= self.schedule.systems.len() {
            return None;
        }
        self.schedule.ops.iter().position(|op| op.offset <= index && index < op.end())
    }

    /// Forces a rebuild at the next update.
    pub(crate) fn invalidate(&mut self) {
        self.match_count = None;
    }

    /// Points the cursor at the first op.
    pub fn rewind(&mut self) {
        self.cur_i = 0;
        self.cur_op = if self.schedule.ops.is_empty() { None } else { Some(0) };
    }

    /// Records that the systems before `next` have run.
    pub(crate) fn set_position(&mut self, next: usize) {
        self.cur_i = next;
    }

    /// Moves to the op containing the cursor, or past the end.
    pub fn advance(&mut self) {
        if self.cur_op.is_some() {
            self.cur_op = self.locate(self.cur_i);
        }
    }
}
