//! Jobs: one cooperatively scheduled execution context each.
//!
//! A [`Job`] owns its evaluator state (frames, control, tag stack) and is
//! owned by the scheduler. Everything else in the process refers to it
//! through a [`JobHandle`], which stays valid after the job is reaped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::Notify;

use super::world::World;
use crate::errors::{FatalError, SchedulerError};
use crate::interpreter::types::{CallSite, Control, Exception, Interrupt, StopPayload, Val};
use crate::interpreter::vm::{Hold, Step, Vm};
use crate::interpreter::step;
use crate::sync::{Barrier, Semaphore};
use crate::tag::{FlowKind, TagRef};

/// Monotonic job identity; also the registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Unstarted,
    Runnable,
    Running,
    Suspended,
    Terminated,
}

/// Why a suspended job is parked
#[derive(Debug, Clone)]
pub enum Wait {
    /// Until simulated time reaches the deadline
    Sleep(Duration),
    /// Until the host reports the descriptor ready
    Descriptor(i32),
    Semaphore(Rc<Semaphore>),
    Barrier(Rc<Barrier>),
    /// Until every listed job is terminated
    Join(Vec<JobHandle>),
    /// Until the store version differs from the one recorded
    Changed(u64),
}

impl Wait {
    fn label(&self) -> &'static str {
        match self {
            Wait::Sleep(_) => "sleeping",
            Wait::Join(_) => "joining",
            Wait::Descriptor(_) | Wait::Semaphore(_) | Wait::Barrier(_) | Wait::Changed(_) => {
                "waiting"
            }
        }
    }
}

/// How a job ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Ran to completion with this value
    Value(Val),
    /// An exception escaped the job
    Failed(Exception),
    /// One of the tags it inherited was stopped
    Stopped(Val),
    /// Terminated on request
    Terminated,
    /// Internal error: a flow unwind escaped with nothing to catch it
    Fault(String),
}

/* ===================== Handle ===================== */

struct JobShared {
    id: JobId,
    name: String,
    status: Cell<JobStatus>,
    wait_label: Cell<&'static str>,
    held: Cell<bool>,
    terminate_requested: Cell<bool>,
    outcome: RefCell<Option<JobOutcome>>,
    backtrace: Rc<RefCell<Vec<CallSite>>>,
    done: Notify,
}

/// Shared, cheap-to-clone reference to a job
#[derive(Clone)]
pub struct JobHandle(Rc<JobShared>);

impl JobHandle {
    fn new(id: JobId, name: String, backtrace: Rc<RefCell<Vec<CallSite>>>) -> Self {
        JobHandle(Rc::new(JobShared {
            id,
            name,
            status: Cell::new(JobStatus::Unstarted),
            wait_label: Cell::new("waiting"),
            held: Cell::new(false),
            terminate_requested: Cell::new(false),
            outcome: RefCell::new(None),
            backtrace,
            done: Notify::new(),
        }))
    }

    pub fn id(&self) -> JobId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn status_kind(&self) -> JobStatus {
        self.0.status.get()
    }

    pub fn is_terminated(&self) -> bool {
        self.0.status.get() == JobStatus::Terminated
    }

    /// Human readable state, e.g. `sleeping (frozen)`
    pub fn status(&self) -> String {
        let base = match self.0.status.get() {
            JobStatus::Unstarted => "to_start",
            JobStatus::Runnable | JobStatus::Running => "running",
            JobStatus::Suspended => self.0.wait_label.get(),
            JobStatus::Terminated => "zombie",
        };
        if self.0.held.get() && !self.is_terminated() {
            format!("{} (frozen)", base)
        } else {
            base.to_string()
        }
    }

    /// Snapshot of the current call stack, outermost first
    pub fn backtrace(&self) -> Vec<CallSite> {
        self.0.backtrace.borrow().clone()
    }

    /// Request termination. The job unwinds at its next safe point; asking
    /// twice has no further effect.
    pub fn terminate(&self) {
        if !self.is_terminated() {
            self.0.terminate_requested.set(true);
        }
    }

    pub fn terminate_requested(&self) -> bool {
        self.0.terminate_requested.get()
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.0.outcome.borrow().clone()
    }

    /// Resolve once the job reaches `Terminated`
    pub async fn wait_for_termination(&self) -> JobOutcome {
        loop {
            let notified = self.0.done.notified();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    pub(crate) fn set_status(&self, status: JobStatus) {
        self.0.status.set(status);
    }

    pub(crate) fn set_held(&self, held: bool) {
        self.0.held.set(held);
    }

    fn finish(&self, outcome: JobOutcome) {
        *self.0.outcome.borrow_mut() = Some(outcome);
        self.0.status.set(JobStatus::Terminated);
        self.0.done.notify_waiters();
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job({}#{}, {})", self.name(), self.id(), self.status())
    }
}

/* ===================== Job ===================== */

/// Result of one `run()` slice
#[derive(Debug)]
pub enum RunResult {
    Yielded,
    Waiting(Wait),
    Finished(JobOutcome),
}

/// Failure of one `run()` slice
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Precondition(#[from] SchedulerError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

pub struct Job {
    pub(crate) handle: JobHandle,
    pub(crate) vm: Vm,
    pub(crate) wait: Option<Wait>,
    /// Job that receives our uncaught exception
    pub(crate) parent: Option<JobId>,
    pub(crate) frozen_since: Option<Duration>,
    terminate_seen: bool,
    stops_seen: usize,
}

impl Job {
    pub fn new(name: impl Into<String>, vm: Vm, parent: Option<JobId>) -> Self {
        let handle = JobHandle::new(vm.job, name.into(), vm.backtrace.clone());
        Self {
            handle,
            vm,
            wait: None,
            parent,
            frozen_since: None,
            terminate_seen: false,
            stops_seen: 0,
        }
    }

    pub fn id(&self) -> JobId {
        self.handle.id()
    }

    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.handle.status_kind()
    }

    pub fn backtrace(&self) -> Vec<CallSite> {
        self.handle.backtrace()
    }

    pub(crate) fn is_runnable(&self) -> bool {
        matches!(self.status(), JobStatus::Unstarted | JobStatus::Runnable)
    }

    /// Frozen or paused, and nothing pending that must run anyway
    pub(crate) fn hold(&self) -> Option<Hold> {
        if self.vm.pending.is_some() || self.vm.control.is_stopping() {
            return None;
        }
        self.vm.hold()
    }

    /// Request termination (same as through the handle, but observed
    /// without waiting for the scheduler to notice)
    pub fn terminate(&mut self) {
        self.handle.terminate();
        self.observe_termination_request();
    }

    pub(crate) fn observe_termination_request(&mut self) -> bool {
        if self.terminate_seen || !self.handle.terminate_requested() || self.handle.is_terminated()
        {
            return false;
        }
        self.terminate_seen = true;
        self.vm.pending = Some(Interrupt::Terminate);
        true
    }

    /// Register a stop of `tag`. The job will unwind to the outermost
    /// occurrence of the tag in its stack, never deeper than a stop that is
    /// already pending. Returns whether the job is affected.
    pub fn register_stopped_tag(&mut self, tag: &TagRef, payload: &StopPayload) -> bool {
        if self.handle.is_terminated() {
            return false;
        }
        let mut limit = self.vm.tags.len();
        match &self.vm.pending {
            Some(Interrupt::Terminate) => return false,
            Some(Interrupt::Stop { pos, .. }) => limit = limit.min(*pos),
            _ => {}
        }
        match &self.vm.control {
            Control::Terminate => return false,
            Control::Stop { pos, .. } => limit = limit.min(*pos),
            _ => {}
        }
        let Some(pos) = self.vm.tags[..limit]
            .iter()
            .position(|entry| Rc::ptr_eq(&entry.tag, tag))
        else {
            return false;
        };
        self.vm.pending = Some(Interrupt::Stop {
            pos,
            payload: payload.clone(),
        });
        true
    }

    /// Queue an exception raised by a linked sibling
    pub(crate) fn register_child_failure(&mut self, exception: Exception) -> bool {
        if self.handle.is_terminated() || self.vm.pending.is_some() {
            return false;
        }
        self.vm.pending = Some(Interrupt::ChildFailed(exception));
        true
    }

    /// Resume the job until it yields, waits or terminates
    pub fn run(&mut self, world: &mut World) -> Result<RunResult, RunError> {
        if self.handle.is_terminated() {
            tracing::warn!(job = %self.id(), "run() called on a terminated job");
            return Err(SchedulerError::JobTerminated(self.id()).into());
        }

        self.handle.set_status(JobStatus::Running);
        self.wait = None;
        world.current = Some(self.id());
        self.stops_seen = world.stops.len();

        loop {
            let step = step(&mut self.vm, world)?;

            if world.stops.len() > self.stops_seen {
                self.absorb_own_stops(world);
            }
            self.observe_termination_request();

            match step {
                Step::Continue => continue,
                Step::Yield => {
                    self.handle.set_status(JobStatus::Runnable);
                    world.current = None;
                    return Ok(RunResult::Yielded);
                }
                Step::Wait(wait) => {
                    self.handle.0.wait_label.set(wait.label());
                    self.handle.set_status(JobStatus::Suspended);
                    self.wait = Some(wait.clone());
                    world.current = None;
                    return Ok(RunResult::Waiting(wait));
                }
                Step::Done => {
                    let outcome = self.outcome(world);
                    tracing::debug!(job = %self.id(), ?outcome, "job terminated");
                    self.handle.finish(outcome.clone());
                    world.current = None;
                    return Ok(RunResult::Finished(outcome));
                }
            }
        }
    }

    /// Stops this job issued during its own slice apply to itself right away
    fn absorb_own_stops(&mut self, world: &World) {
        let fresh: Vec<_> = world.stops[self.stops_seen..]
            .iter()
            .map(|s| (s.tag.clone(), s.payload.clone()))
            .collect();
        self.stops_seen = world.stops.len();
        for (tag, payload) in fresh {
            self.register_stopped_tag(&tag, &payload);
        }
    }

    fn outcome(&mut self, world: &mut World) -> JobOutcome {
        match std::mem::replace(&mut self.vm.control, Control::None) {
            Control::None => JobOutcome::Value(std::mem::replace(&mut self.vm.acc, Val::Void)),
            Control::Throw(exception) => JobOutcome::Failed(exception),
            Control::Stop { payload, .. } => JobOutcome::Stopped(match payload {
                StopPayload::Value(v) | StopPayload::Return(v) => v,
                StopPayload::Break => Val::Void,
            }),
            Control::Terminate => JobOutcome::Terminated,
            Control::Break => self.escape_flow(world, FlowKind::Loop, StopPayload::Break),
            Control::Continue => match self.innermost_flow_tag(FlowKind::Loop) {
                Some(_) => JobOutcome::Value(Val::Void),
                None => self.fault("continue"),
            },
            Control::Return(v) => {
                self.escape_flow(world, FlowKind::Function, StopPayload::Return(v.clone()))
            }
        }
    }

    /// A flow unwind reached the top of a sibling job: stop the inherited
    /// loop/function tag it targets.
    fn escape_flow(&mut self, world: &mut World, kind: FlowKind, payload: StopPayload) -> JobOutcome {
        match self.innermost_flow_tag(kind) {
            Some(tag) => {
                world.stop_flow(&tag, payload.clone());
                match payload {
                    StopPayload::Return(v) => JobOutcome::Value(v),
                    _ => JobOutcome::Value(Val::Void),
                }
            }
            None => self.fault(match kind {
                FlowKind::Loop => "break",
                FlowKind::Function => "return",
            }),
        }
    }

    fn innermost_flow_tag(&self, kind: FlowKind) -> Option<TagRef> {
        self.vm
            .tags
            .iter()
            .rev()
            .find(|entry| entry.inherited && entry.tag.flow() == Some(kind))
            .map(|entry| entry.tag.clone())
    }

    fn fault(&self, what: &str) -> JobOutcome {
        let message = format!("'{}' escaped job {} with no enclosing construct", what, self.id());
        tracing::error!(job = %self.id(), "{}", message);
        JobOutcome::Fault(message)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("handle", &self.handle)
            .field("frames", &self.vm.frames.len())
            .field("wait", &self.wait)
            .finish()
    }
}
