//! Statement execution handlers
//!
//! Each node kind that needs a frame has its own handler. A handler looks
//! at its phase, does one micro-step (usually: update its phase, then push
//! a child) and returns. Handlers of frames that intercept control flow
//! are also called while `vm.control` is active and decide whether to
//! catch it or pop and propagate.

use std::rc::Rc;

use super::env::Scope;
use super::errors;
use super::expressions::EvalResult;
use super::stdlib::{call_method, call_stdlib_func};
use super::types::{
    Ast, AtPhase, CallPhase, CallSite, Closure, Control, Exception, FinallyPhase, Flavor, Frame, FrameKind,
    Handler, IfPhase, InvokePhase, LoopPhase, NaryPhase, NodeId, Pattern, ScopePhase, Span, Stmt,
    StopPayload, StorePhase, TagEntry, TaggedPhase, TryPhase, Val, ValuePhase,
};
use super::vm::{pop_frame, push_frame, push_node, set_kind, Step, Vm};
use crate::errors::FatalError;
use crate::scheduler::{JobHandle, Wait, World};
use crate::tag::{FlowKind, Tag};

pub type StepResult = Result<Step, FatalError>;

/* ===================== Helpers ===================== */

fn top(vm: &Vm) -> usize {
    vm.frames.len() - 1
}

/// Start `node` as a sibling job sharing our tags. Linked siblings report
/// their uncaught exception to us.
fn spawn_sibling(
    vm: &Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    node: NodeId,
    env: Rc<Scope>,
    linked: bool,
) -> JobHandle {
    let id = world.next_job_id();
    let child = Vm::sibling(vm, id, ast.clone(), node, env);
    world.spawn(None, child, linked.then_some(vm.job))
}

/// Attach a sibling to the top frame; the frame joins it before popping
fn adopt(vm: &mut Vm, child: JobHandle) {
    let frame_idx = top(vm);
    vm.frames[frame_idx].children.push(child);
}

/// Spawned siblings of the top frame that are still alive
pub fn live_children(vm: &Vm) -> Vec<JobHandle> {
    vm.frames
        .last()
        .map(|f| {
            f.children
                .iter()
                .filter(|c| !c.is_terminated())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Join the top frame's siblings, or finish with `value`
fn join_or_finish(vm: &mut Vm, world: &World, value: Val) -> StepResult {
    let live = live_children(vm);
    if !live.is_empty() {
        return Ok(Step::Wait(Wait::Join(live)));
    }
    let frame_idx = top(vm);
    vm.frames[frame_idx].children.clear();
    vm.acc = value;
    pop_frame(vm, world);
    Ok(Step::Continue)
}

fn push_flow_tag(vm: &mut Vm, kind: FlowKind) -> usize {
    let pos = vm.tags.len();
    vm.tags.push(TagEntry {
        tag: Tag::new_flow(kind),
        inherited: false,
    });
    pos
}

/* ===================== Stores ===================== */

/// Execute Declare: `var name = value`
pub fn execute_declare(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: StorePhase,
    name: &str,
    value: Option<NodeId>,
) -> StepResult {
    if phase == StorePhase::Eval {
        if let Some(value) = value {
            set_kind(vm, FrameKind::Declare {
                phase: StorePhase::Store,
            });
            push_node(vm, world, ast, value)?;
            return Ok(Step::Continue);
        }
        vm.acc = Val::Nil;
    }

    vm.env.declare(name, vm.acc.clone());
    world.touch();
    pop_frame(vm, world);
    Ok(Step::Continue)
}

/// Execute Assign: `name = value`
pub fn execute_assign(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: StorePhase,
    name: &str,
    value: NodeId,
) -> StepResult {
    match phase {
        StorePhase::Eval => {
            set_kind(vm, FrameKind::Assign {
                phase: StorePhase::Store,
            });
            push_node(vm, world, ast, value)?;
        }
        StorePhase::Store => {
            if vm.env.assign(name, vm.acc.clone()) {
                world.touch();
            } else {
                vm.throw_error(
                    errors::LOOKUP_ERROR,
                    format!("assignment to undeclared variable: {}", name),
                );
            }
            pop_frame(vm, world);
        }
    }
    Ok(Step::Continue)
}

/* ===================== Calls ===================== */

/// Execute Call: evaluate target and arguments left to right, then dispatch
#[allow(clippy::too_many_arguments)]
pub fn execute_call(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    node: NodeId,
    phase: CallPhase,
    target: Option<Val>,
    mut args: Vec<Val>,
    target_node: Option<NodeId>,
    name: &str,
    arg_nodes: Option<&[NodeId]>,
) -> StepResult {
    match phase {
        CallPhase::Start => {
            if let Some(target_node) = target_node {
                set_kind(vm, FrameKind::Call {
                    phase: CallPhase::Target,
                    target: None,
                    args,
                });
                push_node(vm, world, ast, target_node)?;
                return Ok(Step::Continue);
            }
            next_arg(vm, world, ast, node, None, args, name, arg_nodes)
        }
        CallPhase::Target => {
            let target = Some(vm.acc.clone());
            next_arg(vm, world, ast, node, target, args, name, arg_nodes)
        }
        CallPhase::Arg(_) => {
            args.push(vm.acc.clone());
            next_arg(vm, world, ast, node, target, args, name, arg_nodes)
        }
        CallPhase::Resume => {
            vm.acc = vm.resume_value.take().unwrap_or(Val::Void);
            pop_frame(vm, world);
            Ok(Step::Continue)
        }
        CallPhase::Returned => {
            pop_frame(vm, world);
            Ok(Step::Continue)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn next_arg(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    node: NodeId,
    target: Option<Val>,
    args: Vec<Val>,
    name: &str,
    arg_nodes: Option<&[NodeId]>,
) -> StepResult {
    if let Some(&arg) = arg_nodes.and_then(|nodes| nodes.get(args.len())) {
        let idx = args.len();
        set_kind(vm, FrameKind::Call {
            phase: CallPhase::Arg(idx),
            target,
            args,
        });
        push_node(vm, world, ast, arg)?;
        return Ok(Step::Continue);
    }
    dispatch_call(vm, world, ast.span(node), target, args, name, arg_nodes.is_some())
}

/// All arguments are evaluated: find the callee and call it
fn dispatch_call(
    vm: &mut Vm,
    world: &mut World,
    site: Span,
    target: Option<Val>,
    args: Vec<Val>,
    name: &str,
    has_args: bool,
) -> StepResult {
    let (callee, this) = match &target {
        None => match vm.env.lookup(name) {
            Some(v) => (v, None),
            None => {
                vm.throw_error(errors::LOOKUP_ERROR, format!("lookup failed: {}", name));
                pop_frame(vm, world);
                return Ok(Step::Continue);
            }
        },
        Some(Val::Object(obj)) => match obj.lookup(name) {
            Some(v) => (v, target.clone()),
            None => {
                let result = call_method(world, vm, &Val::Object(obj.clone()), name, &args);
                return finish_native(vm, world, result);
            }
        },
        Some(value) => {
            let result = call_method(world, vm, value, name, &args);
            return finish_native(vm, world, result);
        }
    };

    if !has_args {
        vm.acc = callee;
        pop_frame(vm, world);
        return Ok(Step::Continue);
    }

    match callee {
        Val::Code(closure) => {
            set_kind(vm, FrameKind::Call {
                phase: CallPhase::Returned,
                target: None,
                args: Vec::new(),
            });
            push_invoke(vm, world, closure, this, args, site, name.to_string())?;
            Ok(Step::Continue)
        }
        Val::NativeFunc(func) => {
            let result = call_stdlib_func(&func, world, vm, &args);
            finish_native(vm, world, result)
        }
        other => {
            vm.throw_error(
                errors::NOT_A_FUNCTION,
                format!("{} is not a function ({})", name, other.type_name()),
            );
            pop_frame(vm, world);
            Ok(Step::Continue)
        }
    }
}

/// Apply a primitive's result to the Call frame on top
fn finish_native(vm: &mut Vm, world: &mut World, result: EvalResult) -> StepResult {
    match result {
        EvalResult::Value { v } => {
            vm.acc = v;
            pop_frame(vm, world);
            Ok(Step::Continue)
        }
        EvalResult::Throw { error } => {
            vm.throw(error);
            pop_frame(vm, world);
            Ok(Step::Continue)
        }
        EvalResult::Suspend { wait } => {
            vm.resume_value = None;
            set_kind(vm, FrameKind::Call {
                phase: CallPhase::Resume,
                target: None,
                args: Vec::new(),
            });
            Ok(Step::Wait(wait))
        }
        EvalResult::Yield => {
            vm.resume_value = None;
            set_kind(vm, FrameKind::Call {
                phase: CallPhase::Resume,
                target: None,
                args: Vec::new(),
            });
            Ok(Step::Yield)
        }
    }
}

/// Enter a function body: bind parameters in a fresh scope under the
/// closure's scope, push the function's flow tag and a backtrace entry
pub(crate) fn push_invoke(
    vm: &mut Vm,
    world: &World,
    closure: Rc<Closure>,
    this: Option<Val>,
    args: Vec<Val>,
    site: Span,
    name: String,
) -> Result<(), FatalError> {
    let params = closure.params();
    if params.len() != args.len() {
        vm.throw_error(
            errors::WRONG_ARG_COUNT,
            format!(
                "{}: expected {} arguments, got {}",
                name,
                params.len(),
                args.len()
            ),
        );
        return Ok(());
    }
    let super::types::NodeKind::Function { body, .. } = closure.ast.kind(closure.node) else {
        vm.throw_error(errors::NOT_A_FUNCTION, format!("{} is not a function", name));
        return Ok(());
    };

    let scope = Scope::child(&closure.env);
    for (param, arg) in params.into_iter().zip(args) {
        scope.declare(param, arg);
    }
    if let Some(this) = this {
        scope.declare("this", this);
    }

    let saved_env = std::mem::replace(&mut vm.env, scope);
    let tag_pos = push_flow_tag(vm, FlowKind::Function);
    vm.backtrace.borrow_mut().push(CallSite {
        name: name.clone(),
        span: site,
    });

    let mut frame = Frame::new(
        closure.ast.clone(),
        closure.node,
        FrameKind::Invoke {
            phase: InvokePhase::Body,
            name,
        },
    );
    frame.saved_env = Some(saved_env);
    frame.tag_pos = Some(tag_pos);
    frame.call_site = true;
    push_frame(vm, frame)?;
    push_node(vm, world, &closure.ast, *body)
}

/// Execute Invoke: the body finished or is unwinding
pub fn execute_invoke(vm: &mut Vm, world: &mut World) -> StepResult {
    let tag_pos = vm.frames[top(vm)].tag_pos;
    match std::mem::replace(&mut vm.control, Control::None) {
        Control::Return(v) => vm.acc = v,
        Control::Stop {
            pos,
            payload: StopPayload::Return(v),
        } if Some(pos) == tag_pos => vm.acc = v,
        Control::Break | Control::Continue => {
            vm.throw_error(errors::TYPE_ERROR, "break or continue outside of a loop");
        }
        other => vm.control = other,
    }
    pop_frame(vm, world);
    Ok(Step::Continue)
}

/* ===================== Composites ===================== */

/// Execute List literal: evaluate items left to right
pub fn execute_list(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: NaryPhase,
    mut items: Vec<Val>,
    nodes: &[NodeId],
) -> StepResult {
    if phase == NaryPhase::Collect {
        items.push(vm.acc.clone());
    }
    match nodes.get(items.len()) {
        Some(&next) => {
            set_kind(vm, FrameKind::List {
                phase: NaryPhase::Collect,
                items,
            });
            push_node(vm, world, ast, next)?;
        }
        None => {
            vm.acc = Val::list(items);
            pop_frame(vm, world);
        }
    }
    Ok(Step::Continue)
}

/// Where a Nary goes after child `idx` completed (or was spawned)
fn after_child(children: &[Stmt], idx: usize, last: Val) -> FrameKind {
    let next = idx + 1;
    let phase = if next >= children.len() {
        NaryPhase::Join
    } else if children[idx].flavor == Flavor::Semicolon {
        NaryPhase::Yield
    } else {
        NaryPhase::Exec
    };
    FrameKind::Nary {
        phase,
        idx: next,
        last,
    }
}

/// Execute Nary: a statement list
///
/// `;` children run in order with a scheduling point after each one, `|`
/// children run in order without one, and `,`/`&` children are started as
/// sibling jobs joined when the list ends. A toplevel list detaches its
/// concurrent children and reports uncaught exceptions instead of dying.
#[allow(clippy::too_many_arguments)]
pub fn execute_nary(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: NaryPhase,
    idx: usize,
    last: Val,
    children: &[Stmt],
    toplevel: bool,
) -> StepResult {
    if vm.control.is_active() {
        if toplevel {
            if let Control::Throw(exception) = &vm.control {
                world.report_uncaught(vm.job, exception);
                vm.control = Control::None;
                set_kind(vm, after_child(children, idx, Val::Void));
                return Ok(Step::Continue);
            }
        }
        pop_frame(vm, world);
        return Ok(Step::Continue);
    }

    match phase {
        NaryPhase::Yield => {
            set_kind(vm, FrameKind::Nary {
                phase: NaryPhase::Exec,
                idx,
                last,
            });
            Ok(Step::Yield)
        }
        NaryPhase::Exec => {
            let Some(stmt) = children.get(idx) else {
                set_kind(vm, FrameKind::Nary {
                    phase: NaryPhase::Join,
                    idx,
                    last,
                });
                return Ok(Step::Continue);
            };
            match stmt.flavor {
                Flavor::Comma | Flavor::And => {
                    let env = vm.env.clone();
                    let child = spawn_sibling(vm, world, ast, stmt.exp, env, !toplevel);
                    if !toplevel {
                        adopt(vm, child);
                    }
                    set_kind(vm, after_child(children, idx, last));
                }
                Flavor::Semicolon | Flavor::Pipe => {
                    set_kind(vm, FrameKind::Nary {
                        phase: NaryPhase::Collect,
                        idx,
                        last,
                    });
                    push_node(vm, world, ast, stmt.exp)?;
                }
            }
            Ok(Step::Continue)
        }
        NaryPhase::Collect => {
            set_kind(vm, after_child(children, idx, vm.acc.clone()));
            Ok(Step::Continue)
        }
        NaryPhase::Join => join_or_finish(vm, world, last),
    }
}

/// Execute Pipe: children in order, no scheduling point in between
pub fn execute_pipe(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: NaryPhase,
    idx: usize,
    children: &[NodeId],
) -> StepResult {
    let next = match phase {
        NaryPhase::Collect => idx + 1,
        _ => idx,
    };
    match children.get(next) {
        Some(&child) => {
            set_kind(vm, FrameKind::Pipe {
                phase: NaryPhase::Collect,
                idx: next,
            });
            push_node(vm, world, ast, child)?;
        }
        None => {
            if children.is_empty() {
                vm.acc = Val::Void;
            }
            pop_frame(vm, world);
        }
    }
    Ok(Step::Continue)
}

/// Execute And: every child starts in the same cycle; the first one runs
/// in this job, the others as linked siblings
pub fn execute_and(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: NaryPhase,
    children: &[NodeId],
) -> StepResult {
    match phase {
        NaryPhase::Exec => {
            let Some((&first, rest)) = children.split_first() else {
                vm.acc = Val::Void;
                pop_frame(vm, world);
                return Ok(Step::Continue);
            };
            for &child in rest {
                let env = vm.env.clone();
                let handle = spawn_sibling(vm, world, ast, child, env, true);
                adopt(vm, handle);
            }
            set_kind(vm, FrameKind::And {
                phase: NaryPhase::Join,
            });
            push_node(vm, world, ast, first)?;
            Ok(Step::Continue)
        }
        _ => join_or_finish(vm, world, Val::Void),
    }
}

/// Execute Scope: body in a fresh child scope
pub fn execute_scope(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: ScopePhase,
    body: NodeId,
) -> StepResult {
    match phase {
        ScopePhase::Enter => {
            let frame_idx = top(vm);
            vm.frames[frame_idx].saved_env = Some(vm.env.clone());
            vm.env = Scope::child(&vm.env);
            set_kind(vm, FrameKind::Scope {
                phase: ScopePhase::Exit,
            });
            push_node(vm, world, ast, body)?;
        }
        ScopePhase::Exit => pop_frame(vm, world),
    }
    Ok(Step::Continue)
}

/* ===================== Conditionals and Loops ===================== */

/// Execute If: the chosen branch replaces the If frame
pub fn execute_if(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: IfPhase,
    test: NodeId,
    then: NodeId,
    else_: Option<NodeId>,
) -> StepResult {
    match phase {
        IfPhase::Test => {
            set_kind(vm, FrameKind::If {
                phase: IfPhase::Choose,
            });
            push_node(vm, world, ast, test)?;
        }
        IfPhase::Choose => {
            let branch = if vm.acc.is_truthy() { Some(then) } else { else_ };
            vm.frames.pop();
            match branch {
                Some(branch) => push_node(vm, world, ast, branch)?,
                None => vm.acc = Val::Void,
            }
        }
    }
    Ok(Step::Continue)
}

/// Loop control shared by While and Foreach. Returns the phase to continue
/// at, or None when the frame must pop.
fn loop_control(vm: &mut Vm, flavor: Flavor, on_continue: LoopPhase) -> Option<LoopPhase> {
    let tag_pos = vm.frames[top(vm)].tag_pos;
    match &vm.control {
        Control::Break => {
            vm.control = Control::None;
            vm.acc = Val::Void;
            None
        }
        Control::Stop {
            pos,
            payload: StopPayload::Break,
        } if Some(*pos) == tag_pos => {
            vm.control = Control::None;
            vm.acc = Val::Void;
            None
        }
        Control::Continue => {
            vm.control = Control::None;
            Some(if flavor == Flavor::Semicolon {
                LoopPhase::YieldThenIterate
            } else {
                on_continue
            })
        }
        _ => None,
    }
}

/// Execute While
///
/// `;` yields after every iteration, `|` never does, `,`/`&` start each
/// iteration as a sibling job and re-test after yielding.
#[allow(clippy::too_many_arguments)]
pub fn execute_while(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: LoopPhase,
    flavor: Flavor,
    test: NodeId,
    body: NodeId,
) -> StepResult {
    if vm.control.is_active() {
        match loop_control(vm, flavor, LoopPhase::Eval) {
            Some(phase) => set_kind(vm, FrameKind::While { phase }),
            None => pop_frame(vm, world),
        }
        return Ok(Step::Continue);
    }

    match phase {
        LoopPhase::Enter => {
            let tag_pos = push_flow_tag(vm, FlowKind::Loop);
            let frame_idx = top(vm);
            vm.frames[frame_idx].tag_pos = Some(tag_pos);
            set_kind(vm, FrameKind::While {
                phase: LoopPhase::Eval,
            });
        }
        LoopPhase::Eval | LoopPhase::Iterate => {
            set_kind(vm, FrameKind::While {
                phase: LoopPhase::Check,
            });
            push_node(vm, world, ast, test)?;
        }
        LoopPhase::Check => {
            if !vm.acc.is_truthy() {
                set_kind(vm, FrameKind::While {
                    phase: LoopPhase::Join,
                });
                return Ok(Step::Continue);
            }
            match flavor {
                Flavor::Comma | Flavor::And => {
                    let env = vm.env.clone();
                    let child = spawn_sibling(vm, world, ast, body, env, true);
                    adopt(vm, child);
                    set_kind(vm, FrameKind::While {
                        phase: LoopPhase::YieldThenIterate,
                    });
                }
                Flavor::Semicolon | Flavor::Pipe => {
                    set_kind(vm, FrameKind::While {
                        phase: LoopPhase::AfterBody,
                    });
                    push_node(vm, world, ast, body)?;
                }
            }
        }
        LoopPhase::AfterBody => {
            let phase = if flavor == Flavor::Pipe {
                LoopPhase::Eval
            } else {
                LoopPhase::YieldThenIterate
            };
            set_kind(vm, FrameKind::While { phase });
        }
        LoopPhase::YieldThenIterate => {
            set_kind(vm, FrameKind::While {
                phase: LoopPhase::Eval,
            });
            return Ok(Step::Yield);
        }
        LoopPhase::Join => return join_or_finish(vm, world, Val::Void),
    }
    Ok(Step::Continue)
}

/// Execute Foreach
///
/// Each iteration binds the element in its own scope. `,`/`&` start all
/// iterations at once as sibling jobs and join them.
#[allow(clippy::too_many_arguments)]
pub fn execute_foreach(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: LoopPhase,
    items: Vec<Val>,
    idx: usize,
    flavor: Flavor,
    binding: &str,
    list: NodeId,
    body: NodeId,
) -> StepResult {
    if vm.control.is_active() {
        match loop_control(vm, flavor, LoopPhase::Iterate) {
            Some(phase) => set_kind(vm, FrameKind::Foreach { phase, items, idx }),
            None => pop_frame(vm, world),
        }
        return Ok(Step::Continue);
    }

    match phase {
        LoopPhase::Enter => {
            let tag_pos = push_flow_tag(vm, FlowKind::Loop);
            let frame_idx = top(vm);
            vm.frames[frame_idx].tag_pos = Some(tag_pos);
            set_kind(vm, FrameKind::Foreach {
                phase: LoopPhase::Eval,
                items,
                idx,
            });
        }
        LoopPhase::Eval => {
            set_kind(vm, FrameKind::Foreach {
                phase: LoopPhase::Check,
                items,
                idx,
            });
            push_node(vm, world, ast, list)?;
        }
        LoopPhase::Check => {
            let Val::List(list) = &vm.acc else {
                let message = format!("for: expected a List, got {}", vm.acc.type_name());
                vm.throw_error(errors::TYPE_ERROR, message);
                pop_frame(vm, world);
                return Ok(Step::Continue);
            };
            let items = list.borrow().clone();
            let frame_idx = top(vm);
            vm.frames[frame_idx].saved_env = Some(vm.env.clone());
            set_kind(vm, FrameKind::Foreach {
                phase: LoopPhase::Iterate,
                items,
                idx: 0,
            });
        }
        LoopPhase::Iterate => {
            let Some(item) = items.get(idx).cloned() else {
                set_kind(vm, FrameKind::Foreach {
                    phase: LoopPhase::Join,
                    items,
                    idx,
                });
                return Ok(Step::Continue);
            };
            let frame_idx = top(vm);
            let base = vm.frames[frame_idx]
                .saved_env
                .clone()
                .unwrap_or_else(|| vm.env.clone());
            let scope = Scope::child(&base);
            scope.declare(binding, item);

            match flavor {
                Flavor::Comma | Flavor::And => {
                    let child = spawn_sibling(vm, world, ast, body, scope, true);
                    adopt(vm, child);
                    set_kind(vm, FrameKind::Foreach {
                        phase: LoopPhase::Iterate,
                        items,
                        idx: idx + 1,
                    });
                }
                Flavor::Semicolon | Flavor::Pipe => {
                    vm.env = scope;
                    set_kind(vm, FrameKind::Foreach {
                        phase: LoopPhase::AfterBody,
                        items,
                        idx: idx + 1,
                    });
                    push_node(vm, world, ast, body)?;
                }
            }
        }
        LoopPhase::AfterBody => {
            let phase = if flavor == Flavor::Pipe {
                LoopPhase::Iterate
            } else {
                LoopPhase::YieldThenIterate
            };
            set_kind(vm, FrameKind::Foreach { phase, items, idx });
        }
        LoopPhase::YieldThenIterate => {
            set_kind(vm, FrameKind::Foreach {
                phase: LoopPhase::Iterate,
                items,
                idx,
            });
            return Ok(Step::Yield);
        }
        LoopPhase::Join => return join_or_finish(vm, world, Val::Void),
    }
    Ok(Step::Continue)
}

/* ===================== Return and Throw ===================== */

/// Execute Return with a value
pub fn execute_return(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: ValuePhase,
    value: NodeId,
) -> StepResult {
    match phase {
        ValuePhase::Eval => {
            set_kind(vm, FrameKind::Return {
                phase: ValuePhase::Apply,
            });
            push_node(vm, world, ast, value)?;
        }
        ValuePhase::Apply => {
            vm.control = Control::Return(vm.acc.clone());
            pop_frame(vm, world);
        }
    }
    Ok(Step::Continue)
}

/// Execute Throw
pub fn execute_throw(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: ValuePhase,
    value: NodeId,
) -> StepResult {
    match phase {
        ValuePhase::Eval => {
            set_kind(vm, FrameKind::Throw {
                phase: ValuePhase::Apply,
            });
            push_node(vm, world, ast, value)?;
        }
        ValuePhase::Apply => {
            let error = vm.acc.clone();
            vm.throw(error);
            pop_frame(vm, world);
        }
    }
    Ok(Step::Continue)
}

/* ===================== Exceptions ===================== */

/// Does a handler pattern accept the thrown value?
pub fn matches_pattern(pattern: &Pattern, value: &Val) -> bool {
    let Some(kind) = &pattern.kind else {
        return true;
    };
    match value {
        Val::Error(info) => &info.code == kind,
        Val::Object(obj) => obj.is_a(kind),
        other => other.type_name() == kind,
    }
}

/// Execute Try
///
/// Only exceptions are caught; stops and terminations pass through. A
/// handler that does not match (pattern or guard) hands over to the next
/// one; if none matches, the exception is rethrown unchanged.
#[allow(clippy::too_many_arguments)]
pub fn execute_try(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: TryPhase,
    exception: Option<Exception>,
    body: NodeId,
    handlers: &[Handler],
    else_: Option<NodeId>,
) -> StepResult {
    if vm.control.is_active() {
        if phase == TryPhase::TryStarted {
            if let Control::Throw(thrown) = &vm.control {
                let thrown = thrown.clone();
                vm.control = Control::None;
                return select_handler(vm, world, ast, thrown, handlers, 0);
            }
        }
        pop_frame(vm, world);
        return Ok(Step::Continue);
    }

    match phase {
        TryPhase::NotStarted => {
            set_kind(vm, FrameKind::Try {
                phase: TryPhase::TryStarted,
                exception: None,
            });
            push_node(vm, world, ast, body)?;
        }
        TryPhase::TryStarted => match else_ {
            Some(else_) => {
                set_kind(vm, FrameKind::Try {
                    phase: TryPhase::ElseStarted,
                    exception: None,
                });
                push_node(vm, world, ast, else_)?;
            }
            None => pop_frame(vm, world),
        },
        TryPhase::Guard(i) => {
            let Some(thrown) = exception else {
                pop_frame(vm, world);
                return Ok(Step::Continue);
            };
            if vm.acc.is_truthy() {
                set_kind(vm, FrameKind::Try {
                    phase: TryPhase::CatchStarted,
                    exception: None,
                });
                push_node(vm, world, ast, handlers[i].body)?;
            } else {
                return select_handler(vm, world, ast, thrown, handlers, i + 1);
            }
        }
        TryPhase::CatchStarted | TryPhase::ElseStarted => pop_frame(vm, world),
    }
    Ok(Step::Continue)
}

fn select_handler(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    thrown: Exception,
    handlers: &[Handler],
    from: usize,
) -> StepResult {
    let Some((i, handler)) = handlers
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, h)| matches_pattern(&h.pattern, &thrown.value))
    else {
        vm.control = Control::Throw(thrown);
        pop_frame(vm, world);
        return Ok(Step::Continue);
    };

    let frame_idx = top(vm);
    let current = vm.env.clone();
    let base = vm.frames[frame_idx]
        .saved_env
        .get_or_insert(current)
        .clone();
    let scope = Scope::child(&base);
    if let Some(binding) = &handler.pattern.binding {
        scope.declare(binding.as_str(), thrown.value.clone());
    }
    vm.env = scope;

    match handler.guard {
        Some(guard) => {
            set_kind(vm, FrameKind::Try {
                phase: TryPhase::Guard(i),
                exception: Some(thrown),
            });
            push_node(vm, world, ast, guard)?;
        }
        None => {
            set_kind(vm, FrameKind::Try {
                phase: TryPhase::CatchStarted,
                exception: None,
            });
            push_node(vm, world, ast, handler.body)?;
        }
    }
    Ok(Step::Continue)
}

/// Execute Finally
///
/// The finally body runs however the protected body ended, with the
/// unwind (if any) set aside. Afterwards the stronger of the set-aside and
/// the current control wins.
pub fn execute_finally(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: FinallyPhase,
    saved: Control,
    value: Val,
    body: NodeId,
    finally: NodeId,
) -> StepResult {
    match phase {
        FinallyPhase::NotStarted => {
            set_kind(vm, FrameKind::Finally {
                phase: FinallyPhase::BodyStarted,
                saved,
                value,
            });
            push_node(vm, world, ast, body)?;
        }
        FinallyPhase::BodyStarted => {
            let saved = std::mem::replace(&mut vm.control, Control::None);
            set_kind(vm, FrameKind::Finally {
                phase: FinallyPhase::FinallyStarted,
                saved,
                value: vm.acc.clone(),
            });
            push_node(vm, world, ast, finally)?;
        }
        FinallyPhase::FinallyStarted => {
            if let Control::Throw(thrown) = &vm.control {
                if saved.is_stopping() {
                    tracing::error!(job = %vm.job, "exception thrown while unwinding: {}", thrown);
                    return Err(FatalError::UnwindFailed {
                        job: vm.job,
                        message: thrown.to_string(),
                    });
                }
            }
            let current = std::mem::replace(&mut vm.control, Control::None);
            vm.control = Control::stronger(saved, current);
            if !vm.control.is_active() {
                vm.acc = value;
            }
            pop_frame(vm, world);
        }
    }
    Ok(Step::Continue)
}

/* ===================== Tags and Waits ===================== */

/// Execute TaggedStmt: `tag: body`
///
/// Entering a blocked tag skips the body. Stopping (or blocking) the tag
/// unwinds the body, and the statement evaluates to the stop payload.
pub fn execute_tagged(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: TaggedPhase,
    tag: NodeId,
    body: NodeId,
) -> StepResult {
    let frame_idx = top(vm);
    if vm.control.is_active() {
        let tag_pos = vm.frames[frame_idx].tag_pos;
        if let Control::Stop {
            pos,
            payload: StopPayload::Value(v),
        } = &vm.control
        {
            if Some(*pos) == tag_pos {
                vm.acc = v.clone();
                vm.control = Control::None;
            }
        }
        pop_frame(vm, world);
        return Ok(Step::Continue);
    }

    match phase {
        TaggedPhase::EvalTag => {
            set_kind(vm, FrameKind::Tagged {
                phase: TaggedPhase::Enter,
            });
            push_node(vm, world, ast, tag)?;
        }
        TaggedPhase::Enter => {
            let Val::Tag(tag) = vm.acc.clone() else {
                let message = format!("expected a Tag, got {}", vm.acc.type_name());
                vm.throw_error(errors::TYPE_ERROR, message);
                pop_frame(vm, world);
                return Ok(Step::Continue);
            };
            if let Some(payload) = tag.blocked_payload() {
                vm.acc = payload;
                pop_frame(vm, world);
                return Ok(Step::Continue);
            }
            let pos = vm.tags.len();
            vm.tags.push(TagEntry {
                tag,
                inherited: false,
            });
            vm.frames[frame_idx].tag_pos = Some(pos);
            set_kind(vm, FrameKind::Tagged {
                phase: TaggedPhase::Body,
            });
            push_node(vm, world, ast, body)?;
        }
        TaggedPhase::Body => pop_frame(vm, world),
    }
    Ok(Step::Continue)
}

/// Execute WaitUntil: re-evaluate the test each time the store changes
pub fn execute_wait_until(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    phase: ValuePhase,
    test: NodeId,
) -> StepResult {
    match phase {
        ValuePhase::Eval => {
            set_kind(vm, FrameKind::WaitUntil {
                phase: ValuePhase::Apply,
            });
            push_node(vm, world, ast, test)?;
            Ok(Step::Continue)
        }
        ValuePhase::Apply => {
            if vm.acc.is_truthy() {
                vm.acc = Val::Void;
                pop_frame(vm, world);
                return Ok(Step::Continue);
            }
            set_kind(vm, FrameKind::WaitUntil {
                phase: ValuePhase::Eval,
            });
            Ok(Step::Wait(Wait::Changed(world.store_version())))
        }
    }
}

/// Execute At
///
/// The statement itself only starts a watcher job and evaluates to void.
/// The watcher re-evaluates the condition whenever the store changes and
/// starts `body` (or `onleave`) as a detached job on each edge. It lives
/// under the tags that enclosed the statement: stopping one of them ends
/// it, freezing one suspends it. An exception in the condition ends it
/// and is reported like any uncaught exception.
#[allow(clippy::too_many_arguments)]
pub fn execute_at(
    vm: &mut Vm,
    world: &mut World,
    ast: &Rc<Ast>,
    node: NodeId,
    phase: AtPhase,
    triggered: bool,
    test: NodeId,
    body: NodeId,
    onleave: Option<NodeId>,
) -> StepResult {
    match phase {
        AtPhase::Register => {
            let id = world.next_job_id();
            let watcher = Vm::watcher(vm, id, ast.clone(), node, vm.env.clone());
            world.spawn(Some(format!("at@{}", ast.span(node))), watcher, None);
            vm.acc = Val::Void;
            pop_frame(vm, world);
            Ok(Step::Continue)
        }
        AtPhase::Test => {
            set_kind(vm, FrameKind::At {
                phase: AtPhase::Check,
                triggered,
            });
            push_node(vm, world, ast, test)?;
            Ok(Step::Continue)
        }
        AtPhase::Check => {
            let now = vm.acc.is_truthy();
            let action = match (triggered, now) {
                (false, true) => Some(body),
                (true, false) => onleave,
                _ => None,
            };
            if let Some(action) = action {
                let handle = spawn_sibling(vm, world, ast, action, vm.env.clone(), false);
                tracing::debug!(job = %vm.job, action = %handle.id(), entered = now, "at edge");
            }
            set_kind(vm, FrameKind::At {
                phase: AtPhase::Test,
                triggered: now,
            });
            Ok(Step::Wait(Wait::Changed(world.store_version())))
        }
    }
}
