//! Host loop
//!
//! Drives a [`Scheduler`] from a tokio runtime. The scheduler itself is
//! single-threaded and synchronous; the host decides when the next cycle
//! runs (immediately in simulated mode, on period boundaries or deadlines
//! in realtime mode) and feeds outside events into it through a
//! [`HostHandle`], which can be sent to other tasks and threads.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::config::ClockMode;
use crate::errors::FatalError;
use crate::interpreter::expressions::lit_to_val;
use crate::interpreter::types::Lit;
use crate::scheduler::{CycleOutcome, Scheduler};

/// Event delivered to the scheduler between cycles
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A descriptor some job waits on became ready
    DescriptorReady(i32),
    /// Stop a registered tag
    StopTag { tag: String, payload: Lit },
    /// Return from [`Host::run`] after the current cycle
    Shutdown,
}

/// Sender side of the host's event queue
#[derive(Debug, Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl HostHandle {
    pub fn notify_ready(&self, fd: i32) {
        self.send(HostEvent::DescriptorReady(fd));
    }

    pub fn stop_tag(&self, tag: impl Into<String>, payload: Lit) {
        self.send(HostEvent::StopTag {
            tag: tag.into(),
            payload,
        });
    }

    pub fn shutdown(&self) {
        self.send(HostEvent::Shutdown);
    }

    fn send(&self, event: HostEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("host is gone, event dropped");
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    /// Give up after this many cycles
    pub max_cycles: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No job can make progress and none waits for a descriptor
    Idle,
    Shutdown,
    CycleLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostReport {
    pub cycles: u64,
    pub reason: StopReason,
    /// Scheduler time when the host stopped
    pub time: Duration,
}

pub struct Host {
    scheduler: Scheduler,
    options: HostOptions,
    tx: mpsc::UnboundedSender<HostEvent>,
    rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl Host {
    pub fn new(scheduler: Scheduler, options: HostOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            scheduler,
            options,
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn into_scheduler(self) -> Scheduler {
        self.scheduler
    }

    /// Run cycles until the program goes idle, the cycle limit is reached or
    /// a shutdown is requested
    pub async fn run(&mut self) -> Result<HostReport, FatalError> {
        let clock = self.scheduler.config().clock;
        let period = self.scheduler.config().period();
        let start = Instant::now();
        let mut cycles = 0;

        tracing::info!(%clock, period_ms = period.as_millis() as u64, "host started");

        loop {
            while let Ok(event) = self.rx.try_recv() {
                if self.apply(event) {
                    return Ok(self.report(cycles, StopReason::Shutdown));
                }
            }

            if clock == ClockMode::Realtime {
                self.scheduler.set_time(start.elapsed());
            }
            let cycle_start = Instant::now();
            let outcome = self.scheduler.cycle()?;
            cycles += 1;

            if self.options.max_cycles.is_some_and(|max| cycles >= max) {
                tracing::warn!(cycles, "cycle limit reached");
                return Ok(self.report(cycles, StopReason::CycleLimit));
            }
            if outcome.is_idle() && !outcome.waiting_on_descriptors {
                tracing::info!(cycles, time = ?self.scheduler.now(), "program idle");
                return Ok(self.report(cycles, StopReason::Idle));
            }

            let next_period = cycle_start.checked_add(period);
            let Some(wake_at) = next_wake(clock, &outcome, start, next_period) else {
                // Simulated time with work left: the scheduler already moved the
                // clock, just let other tasks in before the next cycle
                tokio::task::yield_now().await;
                continue;
            };

            let event = match wake_at {
                Some(at) => tokio::select! {
                    _ = sleep_until(at) => None,
                    event = self.rx.recv() => event,
                },
                None => self.rx.recv().await,
            };
            if let Some(event) = event {
                if self.apply(event) {
                    return Ok(self.report(cycles, StopReason::Shutdown));
                }
            }
        }
    }

    /// Apply one event. Returns whether the host should stop.
    fn apply(&mut self, event: HostEvent) -> bool {
        tracing::debug!(?event, "host event");
        match event {
            HostEvent::DescriptorReady(fd) => self.scheduler.descriptor_ready(fd),
            HostEvent::StopTag { tag, payload } => {
                if let Err(e) = self.scheduler.stop_tag(&tag, lit_to_val(&payload)) {
                    tracing::warn!("{}", e);
                }
            }
            HostEvent::Shutdown => return true,
        }
        false
    }

    fn report(&self, cycles: u64, reason: StopReason) -> HostReport {
        HostReport {
            cycles,
            reason,
            time: self.scheduler.now(),
        }
    }
}

/// Run `scheduler` to completion on a fresh host and hand it back
pub async fn run(
    scheduler: Scheduler,
    options: HostOptions,
) -> Result<(HostReport, Scheduler), FatalError> {
    let mut host = Host::new(scheduler, options);
    let report = host.run().await?;
    Ok((report, host.into_scheduler()))
}

/// When the host should run the next cycle.
///
/// `None`: right away. `Some(None)`: only once an event arrives.
/// `Some(Some(at))`: at `at`, or earlier if an event arrives.
///
/// Instants past what the platform clock can represent count as never.
fn next_wake(
    clock: ClockMode,
    outcome: &CycleOutcome,
    start: Instant,
    next_period: Option<Instant>,
) -> Option<Option<Instant>> {
    match clock {
        ClockMode::Simulated if outcome.is_idle() => Some(None),
        ClockMode::Simulated => None,
        ClockMode::Realtime if outcome.has_runnable => Some(next_period),
        ClockMode::Realtime => Some(
            outcome
                .next_deadline
                .and_then(|deadline| start.checked_add(deadline)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::interpreter::parse_program;
    use crate::scheduler::JobOutcome;

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default())
    }

    fn call(name: &str, args: &str) -> String {
        format!(r#"{{"t":"Call","name":"{}","args":[{}]}}"#, name, args)
    }

    #[tokio::test]
    async fn test_runs_until_idle() {
        // sleep(1); echo("done")
        let json = format!(
            r#"{{"nodes":[
                {{"t":"Literal","v":{{"t":"Num","v":1.0}}}},
                {},
                {{"t":"Literal","v":{{"t":"Str","v":"done"}}}},
                {},
                {{"t":"Nary","children":[{{"exp":1}},{{"exp":3}}]}}
            ],"root":4}}"#,
            call("sleep", "0"),
            call("echo", "2")
        );
        let mut sched = scheduler();
        let job = sched.spawn("main", parse_program(&json).unwrap()).unwrap();

        let mut host = Host::new(sched, HostOptions::default());
        let report = host.run().await.unwrap();

        assert_eq!(report.reason, StopReason::Idle);
        assert!(report.time >= Duration::from_secs(1));
        assert_eq!(host.scheduler().output(), &["done".to_string()]);
        assert!(matches!(job.outcome(), Some(JobOutcome::Value(_))));
    }

    #[tokio::test]
    async fn test_descriptor_event_wakes_job() {
        // waitFd(3); echo("ready")
        let json = format!(
            r#"{{"nodes":[
                {{"t":"Literal","v":{{"t":"Num","v":3.0}}}},
                {},
                {{"t":"Literal","v":{{"t":"Str","v":"ready"}}}},
                {},
                {{"t":"Nary","children":[{{"exp":1}},{{"exp":3}}]}}
            ],"root":4}}"#,
            call("waitFd", "0"),
            call("echo", "2")
        );
        let mut sched = scheduler();
        sched.spawn("main", parse_program(&json).unwrap()).unwrap();

        let mut host = Host::new(sched, HostOptions::default());
        let handle = host.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            handle.notify_ready(3);
        });

        let report = host.run().await.unwrap();
        assert_eq!(report.reason, StopReason::Idle);
        assert_eq!(host.scheduler().output(), &["ready".to_string()]);
    }

    #[tokio::test]
    async fn test_cycle_limit() {
        // while (true) {}
        let json = r#"{"nodes":[
            {"t":"Literal","v":{"t":"Bool","v":true}},
            {"t":"Nary","children":[]},
            {"t":"While","test":0,"body":1}
        ],"root":2}"#;
        let mut sched = scheduler();
        sched.spawn("spin", parse_program(json).unwrap()).unwrap();

        let mut host = Host::new(
            sched,
            HostOptions {
                max_cycles: Some(10),
            },
        );
        let report = host.run().await.unwrap();
        assert_eq!(report.reason, StopReason::CycleLimit);
        assert_eq!(report.cycles, 10);
    }

    #[tokio::test]
    async fn test_run_returns_scheduler() {
        let json = format!(
            r#"{{"nodes":[
                {{"t":"Literal","v":{{"t":"Str","v":"hi"}}}},
                {}
            ],"root":1}}"#,
            call("echo", "0")
        );
        let mut sched = scheduler();
        sched.spawn("main", parse_program(&json).unwrap()).unwrap();

        let (report, mut sched) = run(sched, HostOptions::default()).await.unwrap();
        assert_eq!(report.reason, StopReason::Idle);
        assert_eq!(sched.take_output(), vec!["hi".to_string()]);
        assert_eq!(sched.job_count(), 0);
    }

    fn waiting_until(deadline: Duration) -> CycleOutcome {
        CycleOutcome {
            cycle: 1,
            time: Duration::ZERO,
            turns: 1,
            passes: 1,
            has_runnable: false,
            next_deadline: Some(deadline),
            waiting_on_descriptors: false,
        }
    }

    #[test]
    fn test_unrepresentable_deadline_waits_for_events() {
        let start = Instant::now();
        let far = waiting_until(Duration::MAX);
        assert_eq!(next_wake(ClockMode::Realtime, &far, start, None), Some(None));

        let near = waiting_until(Duration::from_secs(1));
        assert_eq!(
            next_wake(ClockMode::Realtime, &near, start, None),
            Some(Some(start + Duration::from_secs(1)))
        );
    }

    #[tokio::test]
    async fn test_shutdown_event() {
        let json = r#"{"nodes":[
            {"t":"Literal","v":{"t":"Num","v":3.0}},
            {"t":"Call","name":"waitFd","args":[0]}
        ],"root":1}"#;
        let mut sched = scheduler();
        sched.spawn("main", parse_program(json).unwrap()).unwrap();

        let mut host = Host::new(sched, HostOptions::default());
        host.handle().shutdown();
        let report = host.run().await.unwrap();
        assert_eq!(report.reason, StopReason::Shutdown);
        assert_eq!(report.cycles, 0);
    }
}
