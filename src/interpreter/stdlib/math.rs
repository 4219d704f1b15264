//! Methods of numbers, strings, booleans and lists

use super::{arity, index, into_result, no_args, num, one_arg, NativeResult};
use crate::interpreter::errors;
use crate::interpreter::expressions::EvalResult;
use crate::interpreter::types::{ListRef, Val};
use crate::scheduler::World;

fn rhs(name: &str, args: &[Val]) -> NativeResult<f64> {
    one_arg(name, args).and_then(|v| num(name, v))
}

fn nonzero(name: &str, b: f64) -> NativeResult<f64> {
    if b == 0.0 {
        return Err(EvalResult::error(
            errors::ARITHMETIC_ERROR,
            format!("{}: division by zero", name),
        ));
    }
    Ok(b)
}

/* ===================== Numbers ===================== */

pub fn num_method(n: f64, name: &str, args: &[Val]) -> Option<EvalResult> {
    let result = match name {
        "+" => rhs(name, args).map(|b| Val::Num(n + b)),
        "-" if args.is_empty() => Ok(Val::Num(-n)),
        "-" => rhs(name, args).map(|b| Val::Num(n - b)),
        "*" => rhs(name, args).map(|b| Val::Num(n * b)),
        "/" => rhs(name, args)
            .and_then(|b| nonzero(name, b))
            .map(|b| Val::Num(n / b)),
        "%" => rhs(name, args)
            .and_then(|b| nonzero(name, b))
            .map(|b| Val::Num(n % b)),
        "<" => rhs(name, args).map(|b| Val::Bool(n < b)),
        "<=" => rhs(name, args).map(|b| Val::Bool(n <= b)),
        ">" => rhs(name, args).map(|b| Val::Bool(n > b)),
        ">=" => rhs(name, args).map(|b| Val::Bool(n >= b)),
        "abs" => no_args(name, args).map(|_| Val::Num(n.abs())),
        "floor" => no_args(name, args).map(|_| Val::Num(n.floor())),
        "ceil" => no_args(name, args).map(|_| Val::Num(n.ceil())),
        "round" => no_args(name, args).map(|_| Val::Num(n.round())),
        "sqrt" => no_args(name, args).map(|_| Val::Num(n.sqrt())),
        _ => return None,
    };
    Some(into_result(result))
}

/* ===================== Strings ===================== */

pub fn str_method(s: &str, name: &str, args: &[Val]) -> Option<EvalResult> {
    let result = match name {
        "+" => one_arg(name, args).map(|other| Val::Str(format!("{}{}", s, other))),
        "size" => no_args(name, args).map(|_| Val::Num(s.chars().count() as f64)),
        "<" => one_arg(name, args).map(|other| match other {
            Val::Str(o) => Val::Bool(s < o.as_str()),
            _ => Val::Bool(false),
        }),
        _ => return None,
    };
    Some(into_result(result))
}

/* ===================== Booleans ===================== */

pub fn bool_method(b: bool, name: &str, args: &[Val]) -> Option<EvalResult> {
    let result = match name {
        "!" => no_args(name, args).map(|_| Val::Bool(!b)),
        "&&" => one_arg(name, args).map(|o| Val::Bool(b && o.is_truthy())),
        "||" => one_arg(name, args).map(|o| Val::Bool(b || o.is_truthy())),
        _ => return None,
    };
    Some(into_result(result))
}

/* ===================== Lists ===================== */

pub fn list_method(world: &mut World, items: &ListRef, name: &str, args: &[Val]) -> Option<EvalResult> {
    let result = match name {
        "size" => no_args(name, args).map(|_| Val::Num(items.borrow().len() as f64)),
        "push" => one_arg(name, args).map(|v| {
            items.borrow_mut().push(v.clone());
            world.touch();
            Val::List(items.clone())
        }),
        "[]" | "get" => one_arg(name, args)
            .and_then(|i| index(name, i))
            .and_then(|i| element(items, i)),
        "[]=" | "set" => arity(name, args, 2, 2)
            .and_then(|_| index(name, &args[0]))
            .and_then(|i| {
                let mut list = items.borrow_mut();
                let len = list.len();
                let slot = list.get_mut(i).ok_or_else(|| out_of_range(i, len))?;
                *slot = args[1].clone();
                Ok(args[1].clone())
            })
            .inspect(|_| world.touch()),
        "has" => one_arg(name, args).map(|v| Val::Bool(items.borrow().contains(v))),
        "+" => one_arg(name, args).and_then(|other| match other {
            Val::List(other) => {
                let mut joined = items.borrow().clone();
                joined.extend(other.borrow().iter().cloned());
                Ok(Val::list(joined))
            }
            other => Err(EvalResult::error(
                errors::WRONG_ARG_TYPE,
                format!("+: expected a List, got {}", other.type_name()),
            )),
        }),
        _ => return None,
    };
    Some(into_result(result))
}

fn element(items: &ListRef, i: usize) -> NativeResult<Val> {
    let list = items.borrow();
    list.get(i).cloned().ok_or_else(|| out_of_range(i, list.len()))
}

fn out_of_range(i: usize, len: usize) -> EvalResult {
    EvalResult::error(
        errors::INDEX_ERROR,
        format!("index {} out of range for list of size {}", i, len),
    )
}
