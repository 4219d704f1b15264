//! Tag construction and tag methods

use super::{arity, into_result, no_args, one_arg, payload_arg, string, NativeResult};
use crate::interpreter::expressions::EvalResult;
use crate::interpreter::types::Val;
use crate::scheduler::World;
use crate::tag::{Tag, TagRef};

/// Tag() or Tag("a.b") - anonymous tag, or the registered tag at that path
pub fn make_tag(world: &mut World, args: &[Val]) -> EvalResult {
    if let Err(e) = arity("Tag", args, 0, 1) {
        return e;
    }
    let tag = match args.first() {
        None => Tag::new("tag"),
        Some(path) => match string("Tag", path) {
            Ok(path) => world.tags().get_or_create(path),
            Err(e) => return e,
        },
    };
    EvalResult::value(Val::Tag(tag))
}

pub fn tag_method(world: &mut World, tag: &TagRef, name: &str, args: &[Val]) -> Option<EvalResult> {
    let result: NativeResult<Val> = match name {
        "stop" => payload_arg(name, args).map(|payload| {
            tracing::debug!(tag = tag.name(), %payload, "stop");
            tag.stop(payload, world);
            Val::Void
        }),
        "block" => payload_arg(name, args).map(|payload| {
            tracing::debug!(tag = tag.name(), %payload, "block");
            tag.block(payload, world);
            Val::Void
        }),
        "unblock" => no_args(name, args).map(|_| {
            tag.unblock(world);
            Val::Void
        }),
        "freeze" => no_args(name, args).map(|_| {
            tag.freeze(world);
            Val::Void
        }),
        "unfreeze" => no_args(name, args).map(|_| {
            tag.unfreeze(world);
            Val::Void
        }),
        "pause" => no_args(name, args).map(|_| {
            tag.pause(world);
            Val::Void
        }),
        "resume" => no_args(name, args).map(|_| {
            tag.resume(world);
            Val::Void
        }),
        "frozen" => no_args(name, args).map(|_| Val::Bool(tag.frozen())),
        "paused" => no_args(name, args).map(|_| Val::Bool(tag.paused())),
        "blocked" => no_args(name, args).map(|_| Val::Bool(tag.blocked())),
        "name" => no_args(name, args).map(|_| Val::Str(tag.name().to_string())),
        "parent" => no_args(name, args).map(|_| tag.parent().map(Val::Tag).unwrap_or(Val::Nil)),
        "new" => one_arg(name, args)
            .and_then(|child| string(name, child))
            .map(|child| Val::Tag(child_tag(world, tag, child))),
        _ => return None,
    };
    Some(into_result(result))
}

/// Child of a registered tag is registered too; children of anonymous tags
/// only live as long as script values hold them
fn child_tag(world: &mut World, parent: &TagRef, child: &str) -> TagRef {
    let registered = world
        .tags()
        .lookup(parent.name())
        .is_some_and(|t| std::rc::Rc::ptr_eq(&t, parent));
    if registered {
        world
            .tags()
            .get_or_create(&format!("{}.{}", parent.name(), child))
    } else {
        Tag::with_parent(child, parent)
    }
}
