//! Semaphore and barrier primitives

use std::rc::Rc;

use super::{arity, into_result, no_args, num, payload_arg, NativeResult};
use crate::interpreter::expressions::EvalResult;
use crate::interpreter::types::Val;
use crate::interpreter::vm::Vm;
use crate::scheduler::{Wait, World};
use crate::sync::{Barrier, Semaphore};

/// Semaphore(n)
pub fn make_semaphore(args: &[Val]) -> EvalResult {
    let count = arity("Semaphore", args, 1, 1).and_then(|_| num("Semaphore", &args[0]));
    into_result(count.map(|n| Val::Semaphore(Rc::new(Semaphore::new(n as i64)))))
}

/// Barrier()
pub fn make_barrier(args: &[Val]) -> EvalResult {
    into_result(no_args("Barrier", args).map(|_| Val::Barrier(Rc::new(Barrier::new()))))
}

pub fn semaphore_method(
    world: &mut World,
    vm: &Vm,
    sem: &Rc<Semaphore>,
    name: &str,
    args: &[Val],
) -> Option<EvalResult> {
    let result: NativeResult<Val> = match name {
        "p" | "acquire" => {
            if let Err(e) = no_args(name, args) {
                return Some(e);
            }
            if sem.p(vm.job) {
                Ok(Val::Void)
            } else {
                return Some(EvalResult::Suspend {
                    wait: Wait::Semaphore(sem.clone()),
                });
            }
        }
        "v" | "release" => no_args(name, args).map(|_| {
            sem.v(world);
            Val::Void
        }),
        "value" => no_args(name, args).map(|_| Val::Num(sem.value() as f64)),
        _ => return None,
    };
    Some(into_result(result))
}

pub fn barrier_method(
    world: &mut World,
    vm: &Vm,
    barrier: &Rc<Barrier>,
    name: &str,
    args: &[Val],
) -> Option<EvalResult> {
    let result: NativeResult<Val> = match name {
        "wait" => {
            if let Err(e) = no_args(name, args) {
                return Some(e);
            }
            barrier.wait(vm.job);
            return Some(EvalResult::Suspend {
                wait: Wait::Barrier(barrier.clone()),
            });
        }
        "signal" => payload_arg(name, args).map(|payload| Val::Bool(barrier.signal(payload, world))),
        "signalAll" => payload_arg(name, args)
            .map(|payload| Val::Num(barrier.signal_all(payload, world) as f64)),
        "waiting" => no_args(name, args).map(|_| Val::Num(barrier.waiting() as f64)),
        _ => return None,
    };
    Some(into_result(result))
}
