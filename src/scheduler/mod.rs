//! Cooperative job scheduler
//!
//! All jobs share one thread. Time is divided into cycles; in each cycle
//! every runnable job gets one turn, in registration order. A turn lasts
//! until the job yields, waits or terminates. Jobs woken or spawned during
//! a cycle also get their turn in that same cycle, so the scheduler keeps
//! making passes over the ready set until nobody holds a turn.
//!
//! Within a cycle, simulated time does not move: everything that happens
//! in one cycle happens at the same instant.

pub mod job;
pub mod world;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::rc::Rc;
use std::time::Duration;

pub use job::{Job, JobHandle, JobId, JobOutcome, JobStatus, RunError, RunResult, Wait};
pub use world::{StopSignal, World};

use crate::config::{ClockMode, SchedulerConfig};
use crate::errors::{FatalError, SchedulerError};
use crate::interpreter::env::Scope;
use crate::interpreter::stdlib::inject_stdlib;
use crate::interpreter::types::{Ast, Val};
use crate::interpreter::vm::{Hold, Vm};
use crate::tag::TagRef;

/// Summary of one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub cycle: u64,
    /// Scheduler time the cycle ran at
    pub time: Duration,
    /// Turns executed
    pub turns: usize,
    pub passes: usize,
    /// Some job can run next cycle without anything happening first
    pub has_runnable: bool,
    /// Earliest sleep deadline of a job that is not held
    pub next_deadline: Option<Duration>,
    /// Some job waits for a host descriptor
    pub waiting_on_descriptors: bool,
}

impl CycleOutcome {
    /// Nothing will happen without outside input
    pub fn is_idle(&self) -> bool {
        !self.has_runnable && self.next_deadline.is_none()
    }
}

pub struct Scheduler {
    jobs: BTreeMap<JobId, Job>,
    world: World,
    /// Jobs holding a turn in the current cycle
    ready: BTreeSet<JobId>,
    sleepers: BTreeSet<(Duration, JobId)>,
    descriptors: HashMap<i32, Vec<JobId>>,
    cycles: u64,
    seen_store_version: u64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let globals = Scope::root();
        inject_stdlib(&globals);
        Self {
            jobs: BTreeMap::new(),
            world: World::new(config, globals),
            ready: BTreeSet::new(),
            sleepers: BTreeSet::new(),
            descriptors: HashMap::new(),
            cycles: 0,
            seen_store_version: 0,
        }
    }

    /* ===================== Jobs ===================== */

    /// Register a job running `ast` at toplevel in the global scope
    pub fn spawn(&mut self, name: impl Into<String>, ast: Ast) -> Result<JobHandle, SchedulerError> {
        ast.validate().map_err(SchedulerError::InvalidAst)?;
        let id = self.world.next_job_id();
        let root = ast.root;
        let vm = Vm::new(
            id,
            Rc::new(ast),
            root,
            self.world.globals.clone(),
            self.world.config.max_stack_depth,
        );
        Ok(self.add(Job::new(name, vm, None)))
    }

    /// Register a job. It becomes eligible to run in the next cycle (or in
    /// the current one, if a cycle is in progress).
    pub fn add(&mut self, job: Job) -> JobHandle {
        let handle = job.handle();
        tracing::debug!(job = %handle.id(), name = handle.name(), "job registered");
        self.jobs.insert(handle.id(), job);
        handle
    }

    pub fn job(&self, id: JobId) -> Result<JobHandle, SchedulerError> {
        self.jobs
            .get(&id)
            .map(Job::handle)
            .ok_or(SchedulerError::UnknownJob(id))
    }

    /// Live (not yet reaped) jobs
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Request termination of a job
    pub fn terminate(&mut self, id: JobId) -> Result<(), SchedulerError> {
        let job = self.jobs.get_mut(&id).ok_or(SchedulerError::UnknownJob(id))?;
        job.terminate();
        self.interrupt_wake(id);
        Ok(())
    }

    /* ===================== Tags ===================== */

    /// Registered tag at `path`, created on demand
    pub fn tag(&mut self, path: &str) -> TagRef {
        self.world.tags.get_or_create(path)
    }

    /// Stop every job running under `tag` (and its descendants)
    pub fn signal_stop(&mut self, tag: &TagRef, payload: Val) {
        tag.stop(payload, &mut self.world);
        self.deliver_stops();
    }

    /// Stop a registered tag by name
    pub fn stop_tag(&mut self, path: &str, payload: Val) -> Result<(), SchedulerError> {
        let tag = self
            .world
            .tags
            .lookup(path)
            .ok_or_else(|| SchedulerError::UnknownTag(path.to_string()))?;
        self.signal_stop(&tag, payload);
        Ok(())
    }

    /* ===================== Host Input ===================== */

    /// The host saw `fd` become ready
    pub fn descriptor_ready(&mut self, fd: i32) {
        let waiting = self.descriptors.remove(&fd).unwrap_or_default();
        for id in waiting {
            self.wake(id, Val::Void);
        }
    }

    /// Set the clock (realtime mode)
    pub fn set_time(&mut self, now: Duration) {
        if now > self.world.now {
            self.world.now = now;
        }
    }

    pub fn now(&self) -> Duration {
        self.world.now
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.world.config
    }

    /// Script output so far
    pub fn output(&self) -> &[String] {
        &self.world.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.world.output)
    }

    pub fn globals(&self) -> &Rc<Scope> {
        &self.world.globals
    }

    /* ===================== Cycle ===================== */

    /// Run one cycle
    pub fn cycle(&mut self) -> Result<CycleOutcome, FatalError> {
        self.cycles += 1;
        let time = self.world.now;
        let _span = tracing::debug_span!("cycle", n = self.cycles, t = ?time).entered();

        self.observe_termination_requests();
        self.wake_sleepers();

        for (id, job) in &self.jobs {
            let held = job.hold().is_some();
            job.handle.set_held(held);
            if job.is_runnable() {
                self.ready.insert(*id);
            }
        }

        let max_passes = self.world.config.max_passes_per_cycle;
        let mut passes = 0;
        let mut turns = 0;
        while !self.ready.is_empty() {
            if passes == max_passes {
                tracing::warn!(
                    cycle = self.cycles,
                    pending = self.ready.len(),
                    "pass limit reached, deferring the remaining jobs to the next cycle"
                );
                self.ready.clear();
                break;
            }
            passes += 1;

            let mut cursor: Option<JobId> = None;
            loop {
                let next = match cursor {
                    None => self.ready.iter().next().copied(),
                    Some(c) => self
                        .ready
                        .range((Bound::Excluded(c), Bound::Unbounded))
                        .next()
                        .copied(),
                };
                let Some(id) = next else {
                    break;
                };
                cursor = Some(id);
                self.ready.remove(&id);
                if self.run_turn(id)? {
                    turns += 1;
                }
            }
        }

        self.reap();
        let outcome = CycleOutcome {
            cycle: self.cycles,
            time,
            turns,
            passes,
            has_runnable: self.has_runnable(),
            next_deadline: self.next_deadline(),
            waiting_on_descriptors: self.descriptors.values().any(|w| !w.is_empty()),
        };
        self.advance_clock(&outcome);
        Ok(outcome)
    }

    /// Run cycles until nothing can happen without outside input
    pub fn run_until_idle(&mut self, max_cycles: u64) -> Result<u64, FatalError> {
        for n in 1..=max_cycles {
            if self.cycle()?.is_idle() {
                return Ok(n);
            }
        }
        tracing::warn!(max_cycles, "cycle limit reached before the program went idle");
        Ok(max_cycles)
    }

    /// A runnable job that is not held by a frozen or paused tag exists
    pub fn has_runnable(&self) -> bool {
        self.jobs
            .values()
            .any(|job| job.is_runnable() && job.hold().is_none())
    }

    pub fn is_idle(&self) -> bool {
        !self.has_runnable() && self.next_deadline().is_none()
    }

    /// Earliest deadline among sleepers that are not held
    pub fn next_deadline(&self) -> Option<Duration> {
        self.sleepers
            .iter()
            .find(|(_, id)| {
                self.jobs
                    .get(id)
                    .is_some_and(|job| job.hold().is_none())
            })
            .map(|(deadline, _)| *deadline)
    }

    /// Run one turn of `id`. Returns whether the job actually ran.
    fn run_turn(&mut self, id: JobId) -> Result<bool, FatalError> {
        let Some(job) = self.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !job.is_runnable() {
            return Ok(false);
        }
        if job.hold().is_some() {
            job.handle.set_held(true);
            return Ok(false);
        }
        job.handle.set_held(false);

        tracing::trace!(job = %id, "turn");
        let result = job.run(&mut self.world);
        match result {
            Ok(RunResult::Yielded) => job.handle.set_held(job.hold().is_some()),
            Ok(RunResult::Waiting(wait)) => self.park(id, wait),
            Ok(RunResult::Finished(outcome)) => self.on_finished(id, outcome),
            Err(RunError::Precondition(e)) => {
                tracing::warn!(job = %id, "{}", e);
                return Ok(false);
            }
            Err(RunError::Fatal(e)) => return Err(e),
        }
        self.apply_effects();
        Ok(true)
    }

    /// Apply what the last turn queued up in the world
    fn apply_effects(&mut self) {
        for job in std::mem::take(&mut self.world.spawned) {
            let id = job.id();
            self.add(job);
            self.ready.insert(id);
        }

        self.deliver_stops();
        self.observe_termination_requests();

        // Passing a grant on may queue another wake
        while !self.world.wakes.is_empty() {
            for (id, value, release) in std::mem::take(&mut self.world.wakes) {
                if !self.wake(id, value.clone()) {
                    tracing::debug!(job = %id, "grant passed on, job stopped waiting");
                    release.pass_on(value, &mut self.world);
                }
            }
        }

        if self.world.store_version != self.seen_store_version {
            self.seen_store_version = self.world.store_version;
            let changed: Vec<JobId> = self
                .jobs
                .iter()
                .filter(|(_, job)| matches!(&job.wait, Some(Wait::Changed(v)) if *v != self.world.store_version))
                .map(|(id, _)| *id)
                .collect();
            for id in changed {
                self.wake(id, Val::Void);
            }
        }
    }

    /// Hand pending stop signals to every affected job
    fn deliver_stops(&mut self) {
        let stops = std::mem::take(&mut self.world.stops);
        for signal in stops {
            tracing::debug!(tag = signal.tag.name(), payload = ?signal.payload, "stop delivered");
            let affected: Vec<JobId> = self
                .jobs
                .iter_mut()
                .filter(|(id, _)| Some(**id) != signal.issuer)
                .filter_map(|(id, job)| {
                    job.register_stopped_tag(&signal.tag, &signal.payload)
                        .then_some(*id)
                })
                .collect();
            for id in affected {
                self.interrupt_wake(id);
            }
        }
    }

    fn observe_termination_requests(&mut self) {
        let requested: Vec<JobId> = self
            .jobs
            .iter_mut()
            .filter_map(|(id, job)| job.observe_termination_request().then_some(*id))
            .collect();
        for id in requested {
            tracing::debug!(job = %id, "termination requested");
            self.interrupt_wake(id);
        }
    }

    /// Park a job on its wait condition
    fn park(&mut self, id: JobId, wait: Wait) {
        match &wait {
            Wait::Sleep(deadline) => {
                self.sleepers.insert((*deadline, id));
            }
            Wait::Descriptor(fd) => self.descriptors.entry(*fd).or_default().push(id),
            Wait::Join(handles) => {
                if handles.iter().all(JobHandle::is_terminated) {
                    self.wake(id, Val::Void);
                }
            }
            Wait::Changed(version) => {
                if *version != self.world.store_version {
                    self.wake(id, Val::Void);
                }
            }
            Wait::Semaphore(_) | Wait::Barrier(_) => {}
        }
    }

    /// Take a job out of whatever it waits on
    fn unpark(&mut self, id: JobId) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        match job.wait.take() {
            Some(Wait::Sleep(deadline)) => {
                self.sleepers.remove(&(deadline, id));
                job.frozen_since = None;
            }
            Some(Wait::Descriptor(fd)) => {
                if let Some(waiting) = self.descriptors.get_mut(&fd) {
                    waiting.retain(|j| *j != id);
                }
            }
            Some(Wait::Semaphore(sem)) => sem.cancel(id),
            Some(Wait::Barrier(barrier)) => barrier.cancel(id),
            Some(Wait::Join(_)) | Some(Wait::Changed(_)) | None => {}
        }
    }

    /// Wake a suspended job with a resume value. Returns false when the job
    /// was not waiting any more.
    fn wake(&mut self, id: JobId, value: Val) -> bool {
        let suspended = self
            .jobs
            .get(&id)
            .is_some_and(|job| job.status() == JobStatus::Suspended);
        if !suspended {
            return false;
        }
        self.unpark(id);
        if let Some(job) = self.jobs.get_mut(&id) {
            job.vm.resume_value = Some(value);
            job.handle.set_status(JobStatus::Runnable);
            self.ready.insert(id);
        }
        true
    }

    /// A job got an interrupt: it must run (to unwind) even if it was waiting
    fn interrupt_wake(&mut self, id: JobId) {
        let Some(status) = self.jobs.get(&id).map(Job::status) else {
            return;
        };
        match status {
            JobStatus::Suspended => {
                self.unpark(id);
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.handle.set_status(JobStatus::Runnable);
                }
                self.ready.insert(id);
            }
            JobStatus::Unstarted | JobStatus::Runnable => {
                self.ready.insert(id);
            }
            JobStatus::Running | JobStatus::Terminated => {}
        }
    }

    fn on_finished(&mut self, id: JobId, outcome: JobOutcome) {
        if let JobOutcome::Failed(exception) = &outcome {
            let parent = self.jobs.get(&id).and_then(|job| job.parent);
            let delivered = match parent.and_then(|p| self.jobs.get_mut(&p).map(|job| (p, job))) {
                Some((p, job)) => {
                    let accepted = job.register_child_failure(exception.clone());
                    if accepted {
                        self.interrupt_wake(p);
                    }
                    accepted
                }
                None => false,
            };
            if !delivered {
                self.world.report_uncaught(id, exception);
            }
        }

        let joiners: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, job)| {
                matches!(&job.wait, Some(Wait::Join(handles)) if handles.iter().all(JobHandle::is_terminated))
            })
            .map(|(id, _)| *id)
            .collect();
        for joiner in joiners {
            self.wake(joiner, Val::Void);
        }
    }

    fn reap(&mut self) {
        self.jobs.retain(|id, job| {
            let keep = job.status() != JobStatus::Terminated;
            if !keep {
                tracing::trace!(job = %id, "reaped");
            }
            keep
        });
    }

    /// Wake due sleepers. Frozen sleepers have their deadline pushed back by
    /// the time they spent frozen; paused sleepers just wait for resume.
    fn wake_sleepers(&mut self) {
        let now = self.world.now;
        let sleepers: Vec<(Duration, JobId)> = self.sleepers.iter().copied().collect();
        for (deadline, id) in sleepers {
            let Some(job) = self.jobs.get_mut(&id) else {
                self.sleepers.remove(&(deadline, id));
                continue;
            };
            match job.hold() {
                Some(Hold::Frozen) => {
                    job.frozen_since.get_or_insert(now);
                    continue;
                }
                Some(Hold::Paused) => continue,
                None => {}
            }
            let mut deadline_now = deadline;
            if let Some(since) = job.frozen_since.take() {
                deadline_now = deadline.saturating_add(now.saturating_sub(since));
                self.sleepers.remove(&(deadline, id));
                self.sleepers.insert((deadline_now, id));
                job.wait = Some(Wait::Sleep(deadline_now));
            }
            if deadline_now <= now {
                self.wake(id, Val::Void);
            }
        }
    }

    fn advance_clock(&mut self, outcome: &CycleOutcome) {
        if self.world.config.clock != ClockMode::Simulated {
            return;
        }
        if outcome.has_runnable {
            self.world.now = self.world.now.saturating_add(self.world.config.period());
        } else if let Some(deadline) = outcome.next_deadline {
            self.world.now = self.world.now.max(deadline);
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("cycle", &self.cycles)
            .field("now", &self.world.now)
            .field("jobs", &self.jobs.len())
            .finish()
    }
}
