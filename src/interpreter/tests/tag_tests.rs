//! Tests for tagged statements: stop, block, freeze and tag hierarchies

use super::helpers::{lines, output_of, run, Builder};
use crate::interpreter::types::Flavor::{Comma, Semicolon};
use crate::interpreter::types::Val;
use crate::scheduler::JobOutcome;

#[test]
fn test_stop_evaluates_to_payload() {
    // var t = Tag();
    // echo(t: { sleep(10); echo("never") }),
    // sleep(1); t.stop(5); echo("main done")
    let b = Builder::new();
    let t = b.var("t", b.call("Tag", &[]));
    let body = b.seq(&[b.sleep(10.0), b.say("never")]);
    let tagged = b.echo(&[b.tagged(b.local("t"), body)]);
    let stop = b.send(b.local("t"), "stop", &[b.num(5.0)]);
    let root = b.program(&[
        (t, Semicolon),
        (tagged, Comma),
        (b.sleep(1.0), Semicolon),
        (stop, Semicolon),
        (b.say("main done"), Semicolon),
    ]);

    let (sched, job) = run(b.build(root));
    assert_eq!(sched.output(), &lines(&["5", "main done"])[..]);
    assert!(matches!(job.outcome(), Some(JobOutcome::Value(_))));
    assert_eq!(sched.job_count(), 0);
}

#[test]
fn test_stop_without_payload() {
    // var t = Tag(); echo(t: { t.stop(); 1 })
    let b = Builder::new();
    let t = b.var("t", b.call("Tag", &[]));
    let body = b.seq(&[b.send(b.local("t"), "stop", &[]), b.num(1.0)]);
    let show = b.echo(&[b.tagged(b.local("t"), body)]);
    let root = b.program(&[(t, Semicolon), (show, Semicolon)]);

    assert_eq!(output_of(b.build(root)), lines(&["void"]));
}

#[test]
fn test_stopping_parent_stops_descendants() {
    // Tag("a.b"): { sleep(10); echo("never") },
    // sleep(1); Tag("a").stop(); echo("end")
    let b = Builder::new();
    let body = b.seq(&[b.sleep(10.0), b.say("never")]);
    let tagged = b.tagged(b.call("Tag", &[b.str("a.b")]), body);
    let stop = b.send(b.call("Tag", &[b.str("a")]), "stop", &[]);
    let root = b.program(&[
        (tagged, Comma),
        (b.sleep(1.0), Semicolon),
        (stop, Semicolon),
        (b.say("end"), Semicolon),
    ]);

    let (sched, _) = run(b.build(root));
    assert_eq!(sched.output(), &lines(&["end"])[..]);
    assert_eq!(sched.job_count(), 0);
}

#[test]
fn test_stopping_child_spares_parent() {
    // var p = Tag(); var c = p.new("c");
    // p: { c: { c.stop(1); echo("inner") }; echo("outer") }
    let b = Builder::new();
    let p = b.var("p", b.call("Tag", &[]));
    let c = b.var("c", b.send(b.local("p"), "new", &[b.str("c")]));
    let inner = b.seq(&[
        b.send(b.local("c"), "stop", &[b.num(1.0)]),
        b.say("inner"),
    ]);
    let outer = b.seq(&[b.tagged(b.local("c"), inner), b.say("outer")]);
    let tagged = b.tagged(b.local("p"), outer);
    let root = b.program(&[(p, Semicolon), (c, Semicolon), (tagged, Semicolon)]);

    assert_eq!(output_of(b.build(root)), lines(&["outer"]));
}

#[test]
fn test_freeze_holds_until_unfreeze() {
    // var t = Tag(); t.freeze();
    // t: { echo("a"); echo("b") },
    // sleep(1); echo("thawing"); t.unfreeze()
    let b = Builder::new();
    let t = b.var("t", b.call("Tag", &[]));
    let freeze = b.send(b.local("t"), "freeze", &[]);
    let body = b.seq(&[b.say("a"), b.say("b")]);
    let tagged = b.tagged(b.local("t"), body);
    let unfreeze = b.send(b.local("t"), "unfreeze", &[]);
    let root = b.program(&[
        (t, Semicolon),
        (freeze, Semicolon),
        (tagged, Comma),
        (b.sleep(1.0), Semicolon),
        (b.say("thawing"), Semicolon),
        (unfreeze, Semicolon),
    ]);

    assert_eq!(output_of(b.build(root)), lines(&["thawing", "a", "b"]));
}

#[test]
fn test_frozen_job_is_not_idle_work() {
    // A job frozen forever leaves the scheduler idle rather than busy
    let b = Builder::new();
    let t = b.var("t", b.call("Tag", &[]));
    let freeze = b.send(b.local("t"), "freeze", &[]);
    let tagged = b.tagged(b.local("t"), b.seq(&[b.say("a")]));
    let root = b.program(&[(t, Semicolon), (freeze, Semicolon), (tagged, Semicolon)]);

    let mut sched = super::helpers::scheduler();
    let job = sched.spawn("main", b.build(root)).unwrap();
    let cycles = sched.run_until_idle(100).unwrap();
    assert!(cycles < 100);
    assert!(sched.is_idle());
    assert!(sched.output().is_empty());
    assert_eq!(job.status(), "running (frozen)");
}

#[test]
fn test_block_and_unblock() {
    // var t = Tag(); t.block(7);
    // echo(t: echo("body"));
    // t.unblock();
    // echo(t: { echo("body"); 3 })
    let b = Builder::new();
    let t = b.var("t", b.call("Tag", &[]));
    let block = b.send(b.local("t"), "block", &[b.num(7.0)]);
    let skipped = b.echo(&[b.tagged(b.local("t"), b.say("body"))]);
    let unblock = b.send(b.local("t"), "unblock", &[]);
    let body = b.seq(&[b.say("body"), b.num(3.0)]);
    let entered = b.echo(&[b.tagged(b.local("t"), body)]);
    let root = b.program(&[
        (t, Semicolon),
        (block, Semicolon),
        (skipped, Semicolon),
        (unblock, Semicolon),
        (entered, Semicolon),
    ]);

    assert_eq!(output_of(b.build(root)), lines(&["7", "body", "3"]));
}

#[test]
fn test_block_stops_running_job() {
    // var t = Tag();
    // echo(t: { sleep(5); echo("never") }),
    // sleep(1); t.block(9); echo("main")
    let b = Builder::new();
    let t = b.var("t", b.call("Tag", &[]));
    let body = b.seq(&[b.sleep(5.0), b.say("never")]);
    let tagged = b.echo(&[b.tagged(b.local("t"), body)]);
    let block = b.send(b.local("t"), "block", &[b.num(9.0)]);
    let root = b.program(&[
        (t, Semicolon),
        (tagged, Comma),
        (b.sleep(1.0), Semicolon),
        (block, Semicolon),
        (b.say("main"), Semicolon),
    ]);

    assert_eq!(output_of(b.build(root)), lines(&["9", "main"]));
}

#[test]
fn test_stop_reaches_concurrent_iterations() {
    // var t = Tag();
    // t: for, (x in [1, 2, 3]) { sleep(x); echo(x) },
    // sleep(1.5); t.stop(); echo("main")
    let b = Builder::new();
    let t = b.var("t", b.call("Tag", &[]));
    let items = b.list(&[b.num(1.0), b.num(2.0), b.num(3.0)]);
    let body = b.seq(&[
        b.call("sleep", &[b.local("x")]),
        b.echo(&[b.local("x")]),
    ]);
    let looped = b.foreach(Comma, "x", items, body);
    let tagged = b.tagged(b.local("t"), looped);
    let stop = b.send(b.local("t"), "stop", &[]);
    let root = b.program(&[
        (t, Semicolon),
        (tagged, Comma),
        (b.sleep(1.5), Semicolon),
        (stop, Semicolon),
        (b.say("main"), Semicolon),
    ]);

    let (sched, _) = run(b.build(root));
    assert_eq!(sched.output(), &lines(&["1", "main"])[..]);
    assert_eq!(sched.job_count(), 0);
}

#[test]
fn test_child_tag_follows_parent_state() {
    // var p = Tag(); var c = p.new("c"); p.freeze();
    // echo(c.frozen(), p.frozen(), c.parent() == p); p.unfreeze(); echo(c.frozen())
    let b = Builder::new();
    let p = b.var("p", b.call("Tag", &[]));
    let c = b.var("c", b.send(b.local("p"), "new", &[b.str("c")]));
    let freeze = b.send(b.local("p"), "freeze", &[]);
    let parent = b.send(b.local("c"), "parent", &[]);
    let show = b.echo(&[
        b.send(b.local("c"), "frozen", &[]),
        b.send(b.local("p"), "frozen", &[]),
        b.op(parent, "==", b.local("p")),
    ]);
    let unfreeze = b.send(b.local("p"), "unfreeze", &[]);
    let after = b.echo(&[b.send(b.local("c"), "frozen", &[])]);
    let root = b.program(&[
        (p, Semicolon),
        (c, Semicolon),
        (freeze, Semicolon),
        (show, Semicolon),
        (unfreeze, Semicolon),
        (after, Semicolon),
    ]);

    assert_eq!(output_of(b.build(root)), lines(&["true true true", "false"]));
}

#[test]
fn test_tagged_requires_tag() {
    // 3: echo("x")
    let b = Builder::new();
    let root = b.tagged(b.num(3.0), b.say("x"));
    let (_, job) = run(b.build(root));

    let Some(JobOutcome::Failed(exception)) = job.outcome() else {
        unreachable!("expected a failed job, got {:?}", job.outcome());
    };
    assert!(matches!(exception.value, Val::Error(ref e) if e.code == "TYPE_ERROR"));
}
