//! Tests for try/catch/else and finally

use super::helpers::{handler, lines, output_of, scheduler, Builder};
use crate::errors::FatalError;
use crate::interpreter::types::Flavor::{Comma, Semicolon};
use crate::interpreter::types::Handler;

#[test]
fn test_catch_by_code() {
    // try { throw Error("E_BAD", "boom") } catch (e: E_BAD) { echo(e) }
    let b = Builder::new();
    let body = b.raise("E_BAD", "boom");
    let catch = b.echo(&[b.local("e")]);
    let root = b.try_(body, vec![handler(Some("E_BAD"), Some("e"), catch)], None);

    assert_eq!(output_of(b.build(root)), lines(&["E_BAD: boom"]));
}

#[test]
fn test_first_matching_handler_wins() {
    // try { throw Error("E_TWO", "x") }
    // catch (_: E_ONE) { echo("one") } catch (_: E_TWO) { echo("two") } catch { echo("any") }
    let b = Builder::new();
    let body = b.raise("E_TWO", "x");
    let handlers = vec![
        handler(Some("E_ONE"), None, b.say("one")),
        handler(Some("E_TWO"), None, b.say("two")),
        handler(None, None, b.say("any")),
    ];
    let root = b.try_(body, handlers, None);

    assert_eq!(output_of(b.build(root)), lines(&["two"]));
}

#[test]
fn test_unmatched_exception_propagates() {
    // try { try { throw Error("E_X", "x") } catch (_: E_Y) { echo("inner") } }
    // catch (e: E_X) { echo(e) }
    let b = Builder::new();
    let inner = b.try_(
        b.raise("E_X", "x"),
        vec![handler(Some("E_Y"), None, b.say("inner"))],
        None,
    );
    let outer_catch = b.echo(&[b.local("e")]);
    let root = b.try_(inner, vec![handler(Some("E_X"), Some("e"), outer_catch)], None);

    assert_eq!(output_of(b.build(root)), lines(&["E_X: x"]));
}

#[test]
fn test_else_runs_on_success() {
    // try { echo("body") } catch { echo("caught") } else { echo("else") }
    let b = Builder::new();
    let root = b.try_(
        b.say("body"),
        vec![handler(None, None, b.say("caught"))],
        Some(b.say("else")),
    );

    assert_eq!(output_of(b.build(root)), lines(&["body", "else"]));
}

#[test]
fn test_else_skipped_on_exception() {
    let b = Builder::new();
    let root = b.try_(
        b.raise("E", "x"),
        vec![handler(None, None, b.say("caught"))],
        Some(b.say("else")),
    );

    assert_eq!(output_of(b.build(root)), lines(&["caught"]));
}

#[test]
fn test_false_guard_moves_to_next_handler() {
    // try { throw Error("E", "x") }
    // catch (e) if (false) { echo("guarded") } catch (e) { echo("fallback") }
    let b = Builder::new();
    let guarded = Handler {
        guard: Some(b.bool(false)),
        ..handler(None, Some("e"), b.say("guarded"))
    };
    let fallback = handler(None, Some("e"), b.say("fallback"));
    let root = b.try_(b.raise("E", "x"), vec![guarded, fallback], None);

    assert_eq!(output_of(b.build(root)), lines(&["fallback"]));
}

#[test]
fn test_guard_sees_binding() {
    // try { throw 7 } catch (n) if (n == 7) { echo("seven") }
    let b = Builder::new();
    let guard = b.op(b.local("n"), "==", b.num(7.0));
    let seven = Handler {
        guard: Some(guard),
        ..handler(None, Some("n"), b.say("seven"))
    };
    let root = b.try_(b.throw(b.num(7.0)), vec![seven], None);

    assert_eq!(output_of(b.build(root)), lines(&["seven"]));
}

#[test]
fn test_finally_runs_before_catch() {
    // try { { throw Error("E", "x") } finally { echo("cleanup") } } catch { echo("caught") }
    let b = Builder::new();
    let protected = b.finally(b.raise("E", "x"), b.say("cleanup"));
    let root = b.try_(protected, vec![handler(None, None, b.say("caught"))], None);

    assert_eq!(output_of(b.build(root)), lines(&["cleanup", "caught"]));
}

#[test]
fn test_finally_keeps_return_value() {
    // var f = function() { { return 1 } finally { echo("fin") } }; echo(f())
    let b = Builder::new();
    let protected = b.finally(b.ret(Some(b.num(1.0))), b.say("fin"));
    let f = b.var("f", b.func(&[], protected));
    let show = b.echo(&[b.call("f", &[])]);
    let root = b.program(&[(f, Semicolon), (show, Semicolon)]);

    assert_eq!(output_of(b.build(root)), lines(&["fin", "1"]));
}

#[test]
fn test_finally_on_normal_completion() {
    // echo({ 5 } finally { echo("fin") })
    let b = Builder::new();
    let protected = b.finally(b.num(5.0), b.say("fin"));
    let root = b.echo(&[protected]);

    assert_eq!(output_of(b.build(root)), lines(&["fin", "5"]));
}

#[test]
fn test_catch_string_by_type() {
    // try { throw "oops" } catch (e: String) { echo(e) }
    let b = Builder::new();
    let catch = b.echo(&[b.local("e")]);
    let root = b.try_(
        b.throw(b.str("oops")),
        vec![handler(Some("String"), Some("e"), catch)],
        None,
    );

    assert_eq!(output_of(b.build(root)), lines(&["oops"]));
}

#[test]
fn test_catch_object_by_prototype() {
    // var MyError = Object.clone(); MyError.setSlot("type", "MyError");
    // try { throw MyError.new() } catch (_: Other) { echo("other") } catch (_: MyError) { echo("mine") }
    let b = Builder::new();
    let decl = b.var("MyError", b.send(b.local("Object"), "clone", &[]));
    let set_type = b.send(b.local("MyError"), "setSlot", &[b.str("type"), b.str("MyError")]);
    let thrown = b.throw(b.send(b.local("MyError"), "new", &[]));
    let attempt = b.try_(
        thrown,
        vec![
            handler(Some("Other"), None, b.say("other")),
            handler(Some("MyError"), None, b.say("mine")),
        ],
        None,
    );
    let root = b.program(&[(decl, Semicolon), (set_type, Semicolon), (attempt, Semicolon)]);

    assert_eq!(output_of(b.build(root)), lines(&["mine"]));
}

#[test]
fn test_sibling_exception_reaches_parent_try() {
    // try { throw Error("E", "boom"), echo("main") } catch (e) { echo(e) }
    let b = Builder::new();
    let body = b.nary(&[(b.raise("E", "boom"), Comma), (b.say("main"), Semicolon)]);
    let catch = b.echo(&[b.local("e")]);
    let root = b.try_(body, vec![handler(None, Some("e"), catch)], None);

    assert_eq!(output_of(b.build(root)), lines(&["main", "E: boom"]));
}

#[test]
fn test_try_does_not_catch_stop() {
    // var t = Tag(); t: { try { t.stop(1) } catch { echo("caught") }; echo("after") }; echo("out")
    let b = Builder::new();
    let t = b.var("t", b.call("Tag", &[]));
    let attempt = b.try_(
        b.send(b.local("t"), "stop", &[b.num(1.0)]),
        vec![handler(None, None, b.say("caught"))],
        None,
    );
    let body = b.seq(&[attempt, b.say("after")]);
    let tagged = b.tagged(b.local("t"), body);
    let root = b.program(&[(t, Semicolon), (tagged, Semicolon), (b.say("out"), Semicolon)]);

    assert_eq!(output_of(b.build(root)), lines(&["out"]));
}

#[test]
fn test_throw_in_finally_while_stopping_is_fatal() {
    // var t = Tag();
    // t: { sleep(5) finally throw Error("E", "boom") },
    // sleep(1); t.stop()
    let b = Builder::new();
    let t = b.var("t", b.call("Tag", &[]));
    let guarded = b.finally(b.sleep(5.0), b.raise("E", "boom"));
    let tagged = b.tagged(b.local("t"), guarded);
    let stop = b.send(b.local("t"), "stop", &[]);
    let root = b.program(&[
        (t, Semicolon),
        (tagged, Comma),
        (b.sleep(1.0), Semicolon),
        (stop, Semicolon),
    ]);

    let mut sched = scheduler();
    sched.spawn("main", b.build(root)).unwrap();
    let err = sched.run_until_idle(100).unwrap_err();
    assert!(matches!(err, FatalError::UnwindFailed { ref message, .. } if message.contains("boom")));
}

#[test]
fn test_throw_in_finally_on_normal_exit_is_catchable() {
    // try { 1 finally throw Error("E", "late") } catch (e) { echo(e) }
    let b = Builder::new();
    let guarded = b.finally(b.num(1.0), b.raise("E", "late"));
    let root = b.try_(guarded, vec![handler(None, Some("e"), b.echo(&[b.local("e")]))], None);

    assert_eq!(output_of(b.build(root)), lines(&["E: late"]));
}
