//! Output, time and job-spawning primitives

use std::time::Duration;

use super::{arity, index, into_result, num, one_arg, string};
use crate::interpreter::errors::{self, ErrorInfo};
use crate::interpreter::expressions::EvalResult;
use crate::interpreter::types::Val;
use crate::interpreter::vm::Vm;
use crate::scheduler::{Wait, World};

/// echo(a, b, ...) - print the arguments separated by spaces
pub fn echo(world: &mut World, args: &[Val]) -> EvalResult {
    let line = args
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    world.echo(line);
    EvalResult::void()
}

/// sleep(seconds) - suspend for that long on the scheduler clock
pub fn sleep(world: &mut World, args: &[Val]) -> EvalResult {
    let seconds = match one_arg("sleep", args).and_then(|v| num("sleep", v)) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let deadline = Duration::try_from_secs_f64(seconds)
        .ok()
        .and_then(|d| world.now().checked_add(d));
    match deadline {
        Some(deadline) => EvalResult::Suspend {
            wait: Wait::Sleep(deadline),
        },
        None => EvalResult::error(
            errors::WRONG_ARG_TYPE,
            format!("sleep: invalid duration {}", seconds),
        ),
    }
}

/// time() - seconds on the scheduler clock
pub fn time(world: &mut World, args: &[Val]) -> EvalResult {
    into_result(arity("time", args, 0, 0).map(|_| Val::Num(world.now().as_secs_f64())))
}

/// yield() - end this job's turn
pub fn yield_now(args: &[Val]) -> EvalResult {
    match arity("yield", args, 0, 0) {
        Ok(()) => EvalResult::Yield,
        Err(e) => e,
    }
}

/// waitFd(fd) - suspend until the host reports the descriptor ready
pub fn wait_fd(args: &[Val]) -> EvalResult {
    let fd = match one_arg("waitFd", args).and_then(|v| index("waitFd", v)) {
        Ok(fd) => fd,
        Err(e) => return e,
    };
    match i32::try_from(fd) {
        Ok(fd) => EvalResult::Suspend {
            wait: Wait::Descriptor(fd),
        },
        Err(_) => EvalResult::error(
            errors::WRONG_ARG_TYPE,
            format!("waitFd: descriptor {} out of range", fd),
        ),
    }
}

/// detach(f[, name]) - run `f()` as an unlinked job under the caller's tags
pub fn detach(world: &mut World, vm: &Vm, args: &[Val]) -> EvalResult {
    if let Err(e) = arity("detach", args, 1, 2) {
        return e;
    }
    let Val::Code(closure) = &args[0] else {
        return EvalResult::error(
            errors::WRONG_ARG_TYPE,
            format!("detach: expected a function, got {}", args[0].type_name()),
        );
    };
    let name = match args.get(1).map(|v| string("detach", v)) {
        Some(Ok(name)) => Some(name.to_string()),
        Some(Err(e)) => return e,
        None => None,
    };

    let id = world.next_job_id();
    let child = Vm::for_closure(vm, id, closure.clone());
    let handle = world.spawn(name, child, None);
    EvalResult::value(Val::Job(handle))
}

/// Error(code, message) - build an error value for `throw`
pub fn make_error(args: &[Val]) -> EvalResult {
    if let Err(e) = arity("Error", args, 2, 2) {
        return e;
    }
    match (string("Error", &args[0]), string("Error", &args[1])) {
        (Ok(code), Ok(message)) => EvalResult::value(Val::Error(ErrorInfo::new(code, message))),
        (Err(e), _) | (_, Err(e)) => e,
    }
}
