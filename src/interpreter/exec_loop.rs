//! Core execution loop
//!
//! This module contains the step() function - the heart of the interpreter.
//! It processes one frame at a time, advancing execution phases and managing
//! the frame stack.
//!
//! ## Function Organization
//! 1. step() - one micro-step of a job (dispatches to statement handlers)
//! 2. deliver_interrupt() - turns pending stops/terminations into control flow

use super::statements::{
    execute_and, execute_assign, execute_at, execute_call, execute_declare, execute_finally, execute_foreach,
    execute_if, execute_invoke, execute_list, execute_nary, execute_pipe, execute_return,
    execute_scope, execute_tagged, execute_throw, execute_try, execute_wait_until,
    execute_while, live_children,
};
use super::types::{Control, FrameKind, Interrupt, NodeKind, StopPayload};
use super::vm::{pop_frame, start, Step, Vm};
use crate::errors::FatalError;
use crate::scheduler::{Wait, World};

/* ===================== Public API ===================== */

/// Execute one step of the VM
///
/// 1. Delivers a pending interrupt (stop, terminate, sibling failure)
/// 2. Turns a blocked tag into a stop, or yields if a tag holds the job
/// 3. While unwinding, joins spawned siblings and pops frames that do not
///    intercept control flow
/// 4. Dispatches the top frame to its handler
pub fn step(vm: &mut Vm, world: &mut World) -> Result<Step, FatalError> {
    deliver_interrupt(vm);

    if let Some(entry) = vm.take_entry() {
        if !vm.control.is_active() {
            start(vm, world, entry)?;
        }
        return Ok(Step::Continue);
    }

    // Get top frame (if any)
    let Some(frame_idx) = vm.frames.len().checked_sub(1) else {
        return Ok(Step::Done);
    };

    if !vm.control.is_active() {
        if let Some((pos, payload)) = vm.blocked_tag() {
            vm.control = Control::Stop {
                pos,
                payload: StopPayload::Value(payload),
            };
        } else if vm.hold().is_some() {
            return Ok(Step::Yield);
        }
    }

    if vm.control.is_active() {
        let live = live_children(vm);
        if !live.is_empty() {
            for child in &live {
                child.terminate();
            }
            return Ok(Step::Wait(Wait::Join(live)));
        }
        vm.frames[frame_idx].children.clear();
        if !vm.frames[frame_idx].kind.intercepts_control() {
            pop_frame(vm, world);
            return Ok(Step::Continue);
        }
    }

    // Clone frame data we need (to avoid borrow checker issues)
    let (kind, ast, node) = {
        let f = &vm.frames[frame_idx];
        (f.kind.clone(), f.ast.clone(), f.node)
    };

    match (kind, ast.kind(node)) {
        (FrameKind::Declare { phase }, NodeKind::Declare { name, value }) => {
            execute_declare(vm, world, &ast, phase, name, *value)
        }

        (FrameKind::Assign { phase }, NodeKind::Assign { name, value }) => {
            execute_assign(vm, world, &ast, phase, name, *value)
        }

        (
            FrameKind::Call {
                phase,
                target,
                args,
            },
            NodeKind::Call {
                target: target_node,
                name,
                args: arg_nodes,
            },
        ) => execute_call(
            vm,
            world,
            &ast,
            node,
            phase,
            target,
            args,
            *target_node,
            name,
            arg_nodes.as_deref(),
        ),

        (FrameKind::Invoke { .. }, NodeKind::Function { .. }) => execute_invoke(vm, world),

        (FrameKind::List { phase, items }, NodeKind::List { items: nodes }) => {
            execute_list(vm, world, &ast, phase, items, nodes)
        }

        (FrameKind::Nary { phase, idx, last }, NodeKind::Nary { children, toplevel }) => {
            execute_nary(vm, world, &ast, phase, idx, last, children, *toplevel)
        }

        (FrameKind::Pipe { phase, idx }, NodeKind::Pipe { children }) => {
            execute_pipe(vm, world, &ast, phase, idx, children)
        }

        (FrameKind::And { phase }, NodeKind::And { children }) => {
            execute_and(vm, world, &ast, phase, children)
        }

        (FrameKind::Scope { phase }, NodeKind::Scope { body }) => {
            execute_scope(vm, world, &ast, phase, *body)
        }

        (FrameKind::If { phase }, NodeKind::If { test, then, else_ }) => {
            execute_if(vm, world, &ast, phase, *test, *then, *else_)
        }

        (FrameKind::While { phase }, NodeKind::While { flavor, test, body }) => {
            execute_while(vm, world, &ast, phase, *flavor, *test, *body)
        }

        (
            FrameKind::Foreach { phase, items, idx },
            NodeKind::Foreach {
                flavor,
                binding,
                list,
                body,
            },
        ) => execute_foreach(
            vm, world, &ast, phase, items, idx, *flavor, binding, *list, *body,
        ),

        (FrameKind::Return { phase }, NodeKind::Return { value: Some(value) }) => {
            execute_return(vm, world, &ast, phase, *value)
        }

        (FrameKind::Throw { phase }, NodeKind::Throw { value }) => {
            execute_throw(vm, world, &ast, phase, *value)
        }

        (
            FrameKind::Try { phase, exception },
            NodeKind::Try {
                body,
                handlers,
                else_,
            },
        ) => execute_try(vm, world, &ast, phase, exception, *body, handlers, *else_),

        (FrameKind::Finally { phase, saved, value }, NodeKind::Finally { body, finally }) => {
            execute_finally(vm, world, &ast, phase, saved, value, *body, *finally)
        }

        (FrameKind::Tagged { phase }, NodeKind::TaggedStmt { tag, body }) => {
            execute_tagged(vm, world, &ast, phase, *tag, *body)
        }

        (FrameKind::WaitUntil { phase }, NodeKind::WaitUntil { test }) => {
            execute_wait_until(vm, world, &ast, phase, *test)
        }

        (FrameKind::At { phase, triggered }, NodeKind::At { test, body, onleave }) => {
            execute_at(vm, world, &ast, node, phase, triggered, *test, *body, *onleave)
        }

        // Shouldn't happen - frame kind doesn't match node
        _ => panic!("Frame kind does not match node"),
    }
}

/* ===================== Interrupts ===================== */

/// Turn the pending interrupt into control flow
///
/// A termination overrides anything. A stop replaces the current control
/// unless a stop to a shallower tag is already unwinding. A sibling's
/// failure only lands if nothing else is unwinding.
fn deliver_interrupt(vm: &mut Vm) {
    let Some(interrupt) = vm.pending.take() else {
        return;
    };
    match interrupt {
        Interrupt::Terminate => vm.control = Control::Terminate,
        Interrupt::Stop { pos, payload } => {
            let current = std::mem::replace(&mut vm.control, Control::None);
            vm.control = Control::stronger(current, Control::Stop { pos, payload });
        }
        Interrupt::ChildFailed(exception) => {
            if !vm.control.is_active() {
                vm.control = Control::Throw(exception);
            }
        }
    }
}
