//! Standard library function implementations
//!
//! Global primitives are `StdlibFunc` values stored in the global scope.
//! Methods on builtin values (`1.+(2)`, `t.stop(0)`, `s.p()`) are resolved
//! by [`call_method`] from the receiver's type and the slot name.

pub mod job;
pub mod math;
pub mod object;
pub mod runtime;
pub mod sync;
pub mod tag;

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::env::Scope;
use super::errors;
use super::expressions::EvalResult;
use super::types::{Object, Val};
use super::vm::Vm;
use crate::scheduler::World;

/* ===================== Standard Library Function Types ===================== */

/// Standard library function identifiers
///
/// Each variant represents a specific global primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StdlibFunc {
    // Output and time
    Echo,
    Sleep,
    Time,
    Yield,
    WaitFd,
    // Jobs
    Detach,
    // Constructors
    MakeError,
    MakeTag,
    MakeSemaphore,
    MakeBarrier,
}

/* ===================== Stdlib Dispatcher ===================== */

/// Call a standard library function with arguments
pub fn call_stdlib_func(func: &StdlibFunc, world: &mut World, vm: &Vm, args: &[Val]) -> EvalResult {
    match func {
        StdlibFunc::Echo => runtime::echo(world, args),
        StdlibFunc::Sleep => runtime::sleep(world, args),
        StdlibFunc::Time => runtime::time(world, args),
        StdlibFunc::Yield => runtime::yield_now(args),
        StdlibFunc::WaitFd => runtime::wait_fd(args),
        StdlibFunc::Detach => runtime::detach(world, vm, args),
        StdlibFunc::MakeError => runtime::make_error(args),
        StdlibFunc::MakeTag => tag::make_tag(world, args),
        StdlibFunc::MakeSemaphore => sync::make_semaphore(args),
        StdlibFunc::MakeBarrier => sync::make_barrier(args),
    }
}

/// Call method `name` on a builtin value
pub fn call_method(world: &mut World, vm: &Vm, target: &Val, name: &str, args: &[Val]) -> EvalResult {
    let result = match target {
        Val::Num(n) => math::num_method(*n, name, args),
        Val::Str(s) => math::str_method(s, name, args),
        Val::Bool(b) => math::bool_method(*b, name, args),
        Val::List(items) => math::list_method(world, items, name, args),
        Val::Tag(t) => tag::tag_method(world, t, name, args),
        Val::Semaphore(s) => sync::semaphore_method(world, vm, s, name, args),
        Val::Barrier(b) => sync::barrier_method(world, vm, b, name, args),
        Val::Job(j) => job::job_method(vm, j, name, args),
        Val::Object(o) => object::object_method(world, o, name, args),
        _ => None,
    };
    result
        .or_else(|| generic_method(target, name, args))
        .unwrap_or_else(|| {
            EvalResult::error(
                errors::LOOKUP_ERROR,
                format!("{} has no slot '{}'", target.type_name(), name),
            )
        })
}

/// Methods every value answers
fn generic_method(target: &Val, name: &str, args: &[Val]) -> Option<EvalResult> {
    let result = match name {
        "==" => one_arg(name, args).map(|other| Val::Bool(target == other)),
        "!=" => one_arg(name, args).map(|other| Val::Bool(target != other)),
        "asString" => no_args(name, args).map(|_| Val::Str(target.to_string())),
        "type" => no_args(name, args).map(|_| Val::Str(target.type_name().to_string())),
        _ => return None,
    };
    Some(into_result(result))
}

/// Bind the global primitives in `globals`
pub fn inject_stdlib(globals: &Rc<Scope>) {
    let funcs = [
        ("echo", StdlibFunc::Echo),
        ("sleep", StdlibFunc::Sleep),
        ("time", StdlibFunc::Time),
        ("yield", StdlibFunc::Yield),
        ("waitFd", StdlibFunc::WaitFd),
        ("detach", StdlibFunc::Detach),
        ("Error", StdlibFunc::MakeError),
        ("Tag", StdlibFunc::MakeTag),
        ("Semaphore", StdlibFunc::MakeSemaphore),
        ("Barrier", StdlibFunc::MakeBarrier),
    ];
    for (name, func) in funcs {
        globals.declare(name, Val::NativeFunc(func));
    }

    let root = Object::new();
    root.set_slot("type", Val::Str("Object".to_string()));
    globals.declare("Object", Val::Object(root));
}

/* ===================== Argument Helpers ===================== */

pub(crate) type NativeResult<T> = Result<T, EvalResult>;

pub(crate) fn into_result(result: NativeResult<Val>) -> EvalResult {
    match result {
        Ok(v) => EvalResult::Value { v },
        Err(e) => e,
    }
}

pub(crate) fn arity(name: &str, args: &[Val], min: usize, max: usize) -> NativeResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(EvalResult::error(
            errors::WRONG_ARG_COUNT,
            format!("{}: expected {} arguments, got {}", name, expected, args.len()),
        ));
    }
    Ok(())
}

pub(crate) fn no_args(name: &str, args: &[Val]) -> NativeResult<()> {
    arity(name, args, 0, 0)
}

pub(crate) fn one_arg<'a>(name: &str, args: &'a [Val]) -> NativeResult<&'a Val> {
    arity(name, args, 1, 1)?;
    Ok(&args[0])
}

/// Optional payload argument, `void` when absent
pub(crate) fn payload_arg(name: &str, args: &[Val]) -> NativeResult<Val> {
    arity(name, args, 0, 1)?;
    Ok(args.first().cloned().unwrap_or(Val::Void))
}

pub(crate) fn num(name: &str, value: &Val) -> NativeResult<f64> {
    match value {
        Val::Num(n) => Ok(*n),
        other => Err(EvalResult::error(
            errors::WRONG_ARG_TYPE,
            format!("{}: expected a Float, got {}", name, other.type_name()),
        )),
    }
}

pub(crate) fn string<'a>(name: &str, value: &'a Val) -> NativeResult<&'a str> {
    match value {
        Val::Str(s) => Ok(s),
        other => Err(EvalResult::error(
            errors::WRONG_ARG_TYPE,
            format!("{}: expected a String, got {}", name, other.type_name()),
        )),
    }
}

/// Integral, non-negative number
pub(crate) fn index(name: &str, value: &Val) -> NativeResult<usize> {
    let n = num(name, value)?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(EvalResult::error(
            errors::WRONG_ARG_TYPE,
            format!("{}: expected a non-negative integer, got {}", name, value),
        ));
    }
    Ok(n as usize)
}
