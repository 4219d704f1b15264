use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use maplit::hashmap;
use tokio_test::{assert_pending, assert_ready};

use super::*;
use crate::interpreter::tests::helpers::{lines, Builder};
use crate::interpreter::types::Flavor::Semicolon;

fn realtime() -> Scheduler {
    Scheduler::new(SchedulerConfig {
        clock: ClockMode::Realtime,
        ..Default::default()
    })
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// `tag_path: { sleep(seconds); echo(time()) }`
fn tagged_sleeper(tag_path: &str, seconds: f64) -> Ast {
    let b = Builder::new();
    let body = b.pipe(&[b.sleep(seconds), b.echo(&[b.call("time", &[])])]);
    let root = b.tagged(b.call("Tag", &[b.str(tag_path)]), body);
    b.build(root)
}

#[test]
fn test_jobs_run_in_registration_order() {
    let mut sched = Scheduler::new(SchedulerConfig::default());
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let b = Builder::new();
        let root = b.say(name);
        ids.push(sched.spawn(name, b.build(root)).unwrap().id());
    }

    let outcome = sched.cycle().unwrap();
    assert_eq!(sched.output(), &lines(&["a", "b", "c"])[..]);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(outcome.turns, 3);
    assert_eq!(outcome.passes, 1);
    assert!(outcome.is_idle());
}

#[test]
fn test_sleep_sets_next_deadline() {
    let b = Builder::new();
    let root = b.pipe(&[b.sleep(1.0), b.echo(&[b.call("time", &[])])]);
    let mut sched = Scheduler::new(SchedulerConfig::default());
    sched.spawn("main", b.build(root)).unwrap();

    let first = sched.cycle().unwrap();
    assert!(!first.has_runnable);
    assert_eq!(first.next_deadline, Some(secs(1)));
    assert_eq!(sched.now(), secs(1));

    sched.run_until_idle(10).unwrap();
    assert_eq!(sched.output(), &lines(&["1"])[..]);
}

#[test]
fn test_clock_advances_by_period_while_busy() {
    let b = Builder::new();
    let root = b.seq(&[b.say("a"), b.say("b")]);
    let mut sched = Scheduler::new(SchedulerConfig {
        period_ms: 10,
        ..Default::default()
    });
    sched.spawn("main", b.build(root)).unwrap();

    let outcome = sched.cycle().unwrap();
    assert!(outcome.has_runnable);
    assert_eq!(outcome.time, Duration::ZERO);
    assert_eq!(sched.now(), Duration::from_millis(10));
}

#[test]
fn test_realtime_clock_only_moves_forward() {
    let mut sched = realtime();
    sched.set_time(secs(5));
    sched.set_time(secs(3));
    assert_eq!(sched.now(), secs(5));

    sched.cycle().unwrap();
    assert_eq!(sched.now(), secs(5));
}

#[test]
fn test_terminate_is_idempotent() {
    let b = Builder::new();
    let root = b.seq(&[b.sleep(10.0), b.say("never")]);
    let mut sched = Scheduler::new(SchedulerConfig::default());
    let job = sched.spawn("sleeper", b.build(root)).unwrap();
    sched.cycle().unwrap();
    assert_eq!(job.status(), "sleeping");

    sched.terminate(job.id()).unwrap();
    sched.terminate(job.id()).unwrap();
    job.terminate();
    sched.run_until_idle(10).unwrap();

    assert_eq!(job.outcome(), Some(JobOutcome::Terminated));
    assert_eq!(job.status(), "zombie");
    assert!(sched.output().is_empty());
    assert_eq!(
        sched.terminate(job.id()),
        Err(SchedulerError::UnknownJob(job.id()))
    );
}

#[test]
fn test_run_terminated_job_is_rejected() {
    let b = Builder::new();
    let root = b.num(1.0);
    let ast = b.build(root);

    let globals = Scope::root();
    let mut world = World::new(SchedulerConfig::default(), globals.clone());
    let vm = Vm::new(world.next_job_id(), Rc::new(ast), root, globals, 100);
    let mut job = Job::new("once", vm, None);

    let first = job.run(&mut world).unwrap();
    assert!(matches!(
        first,
        RunResult::Finished(JobOutcome::Value(Val::Num(n))) if n == 1.0
    ));

    let id = job.id();
    let err = job.run(&mut world).unwrap_err();
    assert!(matches!(
        err,
        RunError::Precondition(SchedulerError::JobTerminated(j)) if j == id
    ));
}

#[test]
fn test_spawn_rejects_invalid_ast() {
    let mut sched = Scheduler::new(SchedulerConfig::default());
    let ast = Ast {
        nodes: Vec::new(),
        root: crate::interpreter::NodeId(0),
    };
    assert!(matches!(
        sched.spawn("bad", ast),
        Err(SchedulerError::InvalidAst(_))
    ));
    assert_eq!(sched.job_count(), 0);
}

#[test]
fn test_stop_unknown_tag() {
    let mut sched = Scheduler::new(SchedulerConfig::default());
    assert_eq!(
        sched.stop_tag("nope", Val::Void),
        Err(SchedulerError::UnknownTag("nope".to_string()))
    );
}

#[test]
fn test_stop_registered_tag_from_host() {
    let b = Builder::new();
    let body = b.seq(&[b.sleep(10.0), b.say("never")]);
    let root = b.tagged(b.call("Tag", &[b.str("robot.arm")]), body);
    let mut sched = Scheduler::new(SchedulerConfig::default());
    let job = sched.spawn("arm", b.build(root)).unwrap();
    sched.cycle().unwrap();

    sched.stop_tag("robot", Val::Num(3.0)).unwrap();
    sched.run_until_idle(10).unwrap();

    assert_eq!(job.outcome(), Some(JobOutcome::Value(Val::Num(3.0))));
    assert!(sched.output().is_empty());
}

#[test]
fn test_freeze_shifts_sleep_deadline() {
    let mut sched = realtime();
    let job = sched.spawn("sleeper", tagged_sleeper("f", 10.0)).unwrap();
    sched.cycle().unwrap();
    assert_eq!(sched.next_deadline(), Some(secs(10)));

    sched.set_time(secs(4));
    let tag = sched.tag("f");
    tag.freeze(&mut sched.world);
    sched.cycle().unwrap();
    assert_eq!(job.status(), "sleeping (frozen)");
    assert_eq!(sched.next_deadline(), None);

    sched.set_time(secs(9));
    tag.unfreeze(&mut sched.world);
    sched.cycle().unwrap();
    assert_eq!(sched.next_deadline(), Some(secs(15)));

    sched.set_time(secs(12));
    sched.cycle().unwrap();
    assert!(sched.output().is_empty());

    sched.set_time(secs(15));
    sched.cycle().unwrap();
    assert_eq!(sched.output(), &lines(&["15"])[..]);
}

#[test]
fn test_pause_keeps_sleep_deadline() {
    let mut sched = realtime();
    let job = sched.spawn("sleeper", tagged_sleeper("p", 10.0)).unwrap();
    sched.cycle().unwrap();

    sched.set_time(secs(4));
    let tag = sched.tag("p");
    tag.pause(&mut sched.world);
    sched.cycle().unwrap();
    assert_eq!(job.status(), "sleeping (frozen)");

    sched.set_time(secs(11));
    sched.cycle().unwrap();
    assert!(sched.output().is_empty());

    sched.set_time(secs(12));
    tag.resume(&mut sched.world);
    sched.cycle().unwrap();
    assert_eq!(sched.output(), &lines(&["12"])[..]);
}

#[test]
fn test_frozen_loop_makes_no_progress() {
    // var n = 0; Tag("f"): while (true) n = n + 1
    let b = Builder::new();
    let n = b.var("n", b.num(0.0));
    let body = b.assign("n", b.op(b.local("n"), "+", b.num(1.0)));
    let looped = b.while_(Semicolon, b.bool(true), body);
    let tagged = b.tagged(b.call("Tag", &[b.str("f")]), looped);
    let root = b.program(&[(n, Semicolon), (tagged, Semicolon)]);

    let mut sched = Scheduler::new(SchedulerConfig::default());
    let job = sched.spawn("counter", b.build(root)).unwrap();
    let count = |sched: &Scheduler| match sched.globals().lookup("n") {
        Some(Val::Num(n)) => n,
        other => panic!("unexpected n: {:?}", other),
    };

    for _ in 0..5 {
        sched.cycle().unwrap();
    }
    let before = count(&sched);
    assert!(before > 0.0);

    let tag = sched.tag("f");
    tag.freeze(&mut sched.world);
    for _ in 0..5 {
        let outcome = sched.cycle().unwrap();
        assert!(!outcome.has_runnable);
    }
    assert_eq!(count(&sched), before);
    assert_eq!(job.status(), "running (frozen)");

    tag.unfreeze(&mut sched.world);
    for _ in 0..3 {
        sched.cycle().unwrap();
    }
    assert!(count(&sched) > before);
    assert_eq!(job.status(), "running");
}

#[test]
fn test_status_labels() {
    let mut sched = Scheduler::new(SchedulerConfig::default());
    let mut handles = Vec::new();

    let b = Builder::new();
    let root = b.sleep(5.0);
    handles.push(sched.spawn("sleeper", b.build(root)).unwrap());

    let b = Builder::new();
    let root = b.call("waitFd", &[b.num(3.0)]);
    handles.push(sched.spawn("fd", b.build(root)).unwrap());

    let b = Builder::new();
    let root = b.while_(Semicolon, b.bool(true), b.num(1.0));
    handles.push(sched.spawn("worker", b.build(root)).unwrap());

    sched.cycle().unwrap();

    let b = Builder::new();
    let root = b.num(1.0);
    handles.push(sched.spawn("late", b.build(root)).unwrap());

    let statuses: HashMap<&str, String> = handles.iter().map(|h| (h.name(), h.status())).collect();
    assert_eq!(
        statuses,
        hashmap! {
            "sleeper" => "sleeping".to_string(),
            "fd" => "waiting".to_string(),
            "worker" => "running".to_string(),
            "late" => "to_start".to_string(),
        }
    );

    let outcome = sched.cycle().unwrap();
    assert!(outcome.waiting_on_descriptors);
    sched.descriptor_ready(3);
    sched.cycle().unwrap();
    assert_eq!(handles[1].status(), "zombie");
    assert_eq!(handles[3].status(), "zombie");
}

#[test]
fn test_wait_for_termination_future() {
    let b = Builder::new();
    let root = b.pipe(&[b.sleep(1.0), b.num(7.0)]);
    let mut sched = Scheduler::new(SchedulerConfig::default());
    let job = sched.spawn("main", b.build(root)).unwrap();

    let mut done = tokio_test::task::spawn(job.wait_for_termination());
    assert_pending!(done.poll());

    sched.run_until_idle(10).unwrap();
    assert!(done.is_woken());
    let outcome = assert_ready!(done.poll());
    assert_eq!(outcome, JobOutcome::Value(Val::Num(7.0)));

    // Already finished: resolves right away
    let again = tokio_test::block_on(job.wait_for_termination());
    assert_eq!(again, JobOutcome::Value(Val::Num(7.0)));
}

/// Job 1 waits on a semaphore that job 2 releases: waking job 1 needs a
/// second pass over the ready set
fn wake_behind_cursor(sched: &mut Scheduler) {
    let b = Builder::new();
    let s = b.var("s", b.call("Semaphore", &[b.num(0.0)]));
    let root = b.pipe(&[s, b.send(b.local("s"), "p", &[]), b.say("woken")]);
    sched.spawn("waiter", b.build(root)).unwrap();

    let b = Builder::new();
    let root = b.send(b.local("s"), "v", &[]);
    sched.spawn("releaser", b.build(root)).unwrap();
}

#[test]
fn test_woken_job_runs_in_same_cycle() {
    let mut sched = Scheduler::new(SchedulerConfig::default());
    wake_behind_cursor(&mut sched);

    let outcome = sched.cycle().unwrap();
    assert_eq!(outcome.passes, 2);
    assert_eq!(sched.output(), &lines(&["woken"])[..]);
}

#[test]
fn test_pass_limit_defers_woken_jobs() {
    let mut sched = Scheduler::new(SchedulerConfig {
        max_passes_per_cycle: 1,
        ..Default::default()
    });
    wake_behind_cursor(&mut sched);

    let outcome = sched.cycle().unwrap();
    assert_eq!(outcome.passes, 1);
    assert!(outcome.has_runnable);
    assert!(sched.output().is_empty());

    sched.cycle().unwrap();
    assert_eq!(sched.output(), &lines(&["woken"])[..]);
}
