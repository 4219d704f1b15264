//! Job handle methods

use super::{into_result, no_args, NativeResult};
use crate::interpreter::errors;
use crate::interpreter::expressions::EvalResult;
use crate::interpreter::types::Val;
use crate::interpreter::vm::Vm;
use crate::scheduler::{JobHandle, Wait};

pub fn job_method(vm: &Vm, job: &JobHandle, name: &str, args: &[Val]) -> Option<EvalResult> {
    let result: NativeResult<Val> = match name {
        "status" => no_args(name, args).map(|_| Val::Str(job.status())),
        "name" => no_args(name, args).map(|_| Val::Str(job.name().to_string())),
        "id" => no_args(name, args).map(|_| Val::Num(job.id().0 as f64)),
        "terminate" => no_args(name, args).map(|_| {
            job.terminate();
            Val::Void
        }),
        "backtrace" => no_args(name, args).map(|_| {
            Val::list(
                job.backtrace()
                    .iter()
                    .map(|site| Val::Str(format!("{} ({})", site.name, site.span)))
                    .collect(),
            )
        }),
        "waitForTermination" => {
            if let Err(e) = no_args(name, args) {
                return Some(e);
            }
            if job.is_terminated() {
                Ok(Val::Void)
            } else if job.id() == vm.job {
                Err(EvalResult::error(
                    errors::TYPE_ERROR,
                    "a job cannot wait for its own termination",
                ))
            } else {
                return Some(EvalResult::Suspend {
                    wait: Wait::Join(vec![job.clone()]),
                });
            }
        }
        _ => return None,
    };
    Some(into_result(result))
}
