//! Shared context handed to a running job.
//!
//! Everything a step may touch outside its own job goes through `World`:
//! the clock, global scope, tag registry, store version, and the queues of
//! effects (spawns, stops, wake-ups) the scheduler applies after the slice.

use std::rc::Rc;
use std::time::Duration;

use super::job::{Job, JobHandle, JobId};
use crate::config::SchedulerConfig;
use crate::interpreter::env::Scope;
use crate::interpreter::types::{Exception, StopPayload, Val};
use crate::interpreter::vm::Vm;
use crate::sync::{Release, WakeSink};
use crate::tag::{TagRef, TagRegistry, TagSink};

/// A stop request waiting to be delivered
#[derive(Debug, Clone)]
pub struct StopSignal {
    pub tag: TagRef,
    pub payload: StopPayload,
    /// Job that issued it; it has already applied the stop to itself
    pub issuer: Option<JobId>,
}

pub struct World {
    pub(crate) now: Duration,
    pub(crate) config: SchedulerConfig,
    pub(crate) globals: Rc<Scope>,
    pub(crate) tags: TagRegistry,
    pub(crate) store_version: u64,
    pub(crate) current: Option<JobId>,
    pub(crate) spawned: Vec<Job>,
    pub(crate) stops: Vec<StopSignal>,
    pub(crate) wakes: Vec<(JobId, Val, Release)>,
    pub(crate) output: Vec<String>,
    next_job_id: u64,
}

impl World {
    pub fn new(config: SchedulerConfig, globals: Rc<Scope>) -> Self {
        Self {
            now: Duration::ZERO,
            config,
            globals,
            tags: TagRegistry::new(),
            store_version: 0,
            current: None,
            spawned: Vec::new(),
            stops: Vec::new(),
            wakes: Vec::new(),
            output: Vec::new(),
            next_job_id: 1,
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn globals(&self) -> &Rc<Scope> {
        &self.globals
    }

    pub fn tags(&mut self) -> &mut TagRegistry {
        &mut self.tags
    }

    /// Bumped on every write to a variable, slot or list, and on tag state changes
    pub fn store_version(&self) -> u64 {
        self.store_version
    }

    pub fn touch(&mut self) {
        self.store_version += 1;
    }

    pub fn next_job_id(&mut self) -> JobId {
        let id = JobId(self.next_job_id);
        self.next_job_id += 1;
        id
    }

    /// Register a new job; the scheduler picks it up after the current slice
    pub fn spawn(&mut self, name: Option<String>, vm: Vm, parent: Option<JobId>) -> JobHandle {
        let name = name.unwrap_or_else(|| format!("job{}", vm.job));
        let job = Job::new(name, vm, parent);
        let handle = job.handle();
        tracing::debug!(job = %handle.id(), name = handle.name(), linked = parent.is_some(), "job spawned");
        self.spawned.push(job);
        handle
    }

    /// Stop a flow tag on behalf of an escaping break/return
    pub fn stop_flow(&mut self, tag: &TagRef, payload: StopPayload) {
        self.stops.push(StopSignal {
            tag: tag.clone(),
            payload,
            issuer: self.current,
        });
    }

    /// Script-visible output line
    pub fn echo(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(target: "tempo::echo", "{}", line);
        self.output.push(line);
    }

    /// An exception nobody caught
    pub fn report_uncaught(&mut self, job: JobId, exception: &Exception) {
        tracing::error!(job = %job, "uncaught exception: {}", exception);
        self.output.push(format!("!!! {}", exception.value));
    }
}

impl TagSink for World {
    fn signal_stop(&mut self, tag: &TagRef, payload: &Val) {
        self.stop_flow(tag, StopPayload::Value(payload.clone()));
    }

    /// `frozen()`/`blocked()` reads may change value, like any store read
    fn tag_state_changed(&mut self) {
        self.touch();
    }
}

impl WakeSink for World {
    fn wake(&mut self, job: JobId, value: Val, release: Release) {
        self.wakes.push((job, value, release));
    }
}
