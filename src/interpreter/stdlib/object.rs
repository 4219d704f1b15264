//! Prototype object methods
//!
//! Only reached when the object has no slot of that name itself, so user
//! code can override any of these.

use super::{arity, into_result, no_args, one_arg, string, NativeResult};
use crate::interpreter::errors;
use crate::interpreter::expressions::EvalResult;
use crate::interpreter::types::{ObjRef, Object, Val};
use crate::scheduler::World;

pub fn object_method(world: &mut World, obj: &ObjRef, name: &str, args: &[Val]) -> Option<EvalResult> {
    let result: NativeResult<Val> = match name {
        "clone" | "new" => no_args(name, args).map(|_| Val::Object(Object::derive(obj))),
        "setSlot" => slot_and_value(name, args).map(|(slot, value)| {
            obj.set_slot(slot, value.clone());
            world.touch();
            value
        }),
        "updateSlot" => slot_and_value(name, args).and_then(|(slot, value)| {
            if obj.update_slot(slot, value.clone()) {
                world.touch();
                Ok(value)
            } else {
                Err(missing_slot(slot))
            }
        }),
        "getSlot" => one_arg(name, args)
            .and_then(|slot| string(name, slot))
            .and_then(|slot| obj.lookup(slot).ok_or_else(|| missing_slot(slot))),
        "hasSlot" => one_arg(name, args)
            .and_then(|slot| string(name, slot))
            .map(|slot| Val::Bool(obj.lookup(slot).is_some())),
        "isA" => one_arg(name, args)
            .and_then(|kind| string(name, kind))
            .map(|kind| Val::Bool(obj.is_a(kind))),
        "protos" => no_args(name, args)
            .map(|_| Val::list(obj.protos().into_iter().map(Val::Object).collect())),
        _ => return None,
    };
    Some(into_result(result))
}

fn slot_and_value<'a>(name: &str, args: &'a [Val]) -> NativeResult<(&'a str, Val)> {
    arity(name, args, 2, 2)?;
    Ok((string(name, &args[0])?, args[1].clone()))
}

fn missing_slot(slot: &str) -> EvalResult {
    EvalResult::error(errors::LOOKUP_ERROR, format!("slot not found: {}", slot))
}
