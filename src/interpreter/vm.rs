//! Virtual Machine state
//!
//! One `Vm` per job. All evaluation state lives here (frames, control,
//! accumulator, scope, tag stack) so a job can be suspended between any two
//! steps and resumed later by the scheduler.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::env::Scope;
use super::errors::ErrorInfo;
use super::expressions::{eval_leaf, EvalResult};
use super::types::{
    Ast, AtPhase, CallPhase, CallSite, Closure, Control, Exception, FinallyPhase, Frame, FrameKind,
    IfPhase, Interrupt, LoopPhase, NaryPhase, NodeId, NodeKind, ScopePhase, StorePhase,
    TagEntry, TaggedPhase, TryPhase, Val, ValuePhase,
};
use crate::errors::FatalError;
use crate::scheduler::{JobId, Wait, World};

/// Result of a single step
#[derive(Debug)]
pub enum Step {
    /// More work to do right away
    Continue,
    /// Give the other jobs a turn
    Yield,
    /// Park until the wait condition is met
    Wait(Wait),
    /// No frames left; the outcome is in `control`/`acc`
    Done,
}

/// Why a job may not run right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hold {
    /// A tag in the stack is frozen: the job's clock stops as well
    Frozen,
    /// A tag in the stack is paused: time keeps running
    Paused,
}

/// What the job runs first
#[derive(Debug, Clone)]
enum Entry {
    Node(Rc<Ast>, NodeId),
    Closure(Rc<Closure>),
    /// Watch the condition of an `at` node
    Watch(Rc<Ast>, NodeId),
}

/// Virtual Machine state
pub struct Vm {
    /// Owning job
    pub job: JobId,

    /// Stack of execution frames
    pub frames: Vec<Frame>,

    /// Current control flow state
    pub control: Control,

    /// Value of the last completed node
    pub acc: Val,

    /// Current scope
    pub env: Rc<Scope>,

    /// Tags enclosing the current point, outermost first
    pub tags: Vec<TagEntry>,

    /// Interrupt waiting for the next safe point
    pub pending: Option<Interrupt>,

    /// Result handed back by the scheduler to a suspended primitive
    pub resume_value: Option<Val>,

    /// Call stack for error reports, shared with the job handle
    pub backtrace: Rc<RefCell<Vec<CallSite>>>,

    /// Frame count at which the job is killed
    pub max_depth: usize,

    entry: Option<Entry>,

    /// Side-effect-free node values keyed by (tree, node)
    cache: HashMap<(usize, NodeId), Cached>,
}

/// A side-effect-free value, valid while neither the store nor the scope
/// it was computed in changed
struct Cached {
    version: u64,
    env: Weak<Scope>,
    value: Val,
}

impl Vm {
    /// Vm that will evaluate `node` in `env`
    pub fn new(job: JobId, ast: Rc<Ast>, node: NodeId, env: Rc<Scope>, max_depth: usize) -> Self {
        Self {
            job,
            frames: Vec::new(),
            control: Control::None,
            acc: Val::Void,
            env,
            tags: Vec::new(),
            pending: None,
            resume_value: None,
            backtrace: Rc::new(RefCell::new(Vec::new())),
            max_depth,
            entry: Some(Entry::Node(ast, node)),
            cache: HashMap::new(),
        }
    }

    /// Vm for a sibling job spawned by `parent`: same tags, given scope
    pub fn sibling(parent: &Vm, job: JobId, ast: Rc<Ast>, node: NodeId, env: Rc<Scope>) -> Self {
        let mut vm = Vm::new(job, ast, node, env, parent.max_depth);
        vm.tags = inherit_tags(&parent.tags);
        vm.backtrace = Rc::new(RefCell::new(parent.backtrace.borrow().clone()));
        vm
    }

    /// Vm that calls `closure` with no arguments, inheriting `parent`'s tags
    pub fn for_closure(parent: &Vm, job: JobId, closure: Rc<Closure>) -> Self {
        let mut vm = Vm::new(
            job,
            closure.ast.clone(),
            closure.node,
            closure.env.clone(),
            parent.max_depth,
        );
        vm.tags = inherit_tags(&parent.tags);
        vm.entry = Some(Entry::Closure(closure));
        vm
    }

    /// Vm watching the `at` statement `node` on behalf of `parent`
    pub fn watcher(parent: &Vm, job: JobId, ast: Rc<Ast>, node: NodeId, env: Rc<Scope>) -> Self {
        let mut vm = Vm::sibling(parent, job, ast.clone(), node, env);
        vm.entry = Some(Entry::Watch(ast, node));
        vm
    }

    /// Set control to a language-level exception carrying `error`
    pub fn throw(&mut self, error: Val) {
        let backtrace = self.backtrace.borrow().clone();
        self.control = Control::Throw(Exception::new(error, backtrace));
    }

    pub fn throw_error(&mut self, code: &str, message: impl Into<String>) {
        self.throw(Val::Error(ErrorInfo::new(code, message)));
    }

    /// Frozen wins over paused
    pub fn hold(&self) -> Option<Hold> {
        if self.tags.iter().any(|e| e.tag.frozen()) {
            Some(Hold::Frozen)
        } else if self.tags.iter().any(|e| e.tag.paused()) {
            Some(Hold::Paused)
        } else {
            None
        }
    }

    /// Outermost blocked tag in the stack and its payload
    pub fn blocked_tag(&self) -> Option<(usize, Val)> {
        self.tags
            .iter()
            .enumerate()
            .find_map(|(pos, e)| e.tag.blocked_payload().map(|payload| (pos, payload)))
    }

    pub(crate) fn take_entry(&mut self) -> Option<EntryPoint> {
        self.entry.take().map(EntryPoint)
    }

    fn cached(&self, ast: &Rc<Ast>, id: NodeId, version: u64) -> Option<Val> {
        let entry = self.cache.get(&(Rc::as_ptr(ast) as usize, id))?;
        let same_scope = Weak::ptr_eq(&entry.env, &Rc::downgrade(&self.env));
        (entry.version == version && same_scope).then(|| entry.value.clone())
    }
}

/// Opaque first-step payload handed to [`start`]
pub(crate) struct EntryPoint(Entry);

fn inherit_tags(tags: &[TagEntry]) -> Vec<TagEntry> {
    tags.iter()
        .map(|e| TagEntry {
            tag: e.tag.clone(),
            inherited: true,
        })
        .collect()
}

/* ===================== Frame Management ===================== */

impl Frame {
    pub fn new(ast: Rc<Ast>, node: NodeId, kind: FrameKind) -> Self {
        Self {
            kind,
            ast,
            node,
            saved_env: None,
            tag_pos: None,
            children: Vec::new(),
            call_site: false,
        }
    }
}

/// Push a frame, enforcing the depth limit
pub fn push_frame(vm: &mut Vm, frame: Frame) -> Result<(), FatalError> {
    if vm.frames.len() >= vm.max_depth {
        tracing::error!(job = %vm.job, depth = vm.frames.len(), "stack exhausted");
        return Err(FatalError::StackExhausted {
            job: vm.job,
            depth: vm.frames.len(),
        });
    }
    vm.frames.push(frame);
    Ok(())
}

/// Start evaluating `id`
///
/// Leaves (literals, locals, function literals) complete immediately and
/// leave their value in `acc`; everything else gets a frame.
pub fn push_node(vm: &mut Vm, world: &World, ast: &Rc<Ast>, id: NodeId) -> Result<(), FatalError> {
    let node = ast.node(id);
    if node.side_effect_free {
        if let Some(v) = vm.cached(ast, id, world.store_version()) {
            vm.acc = v;
            return Ok(());
        }
    }

    let kind = match &node.kind {
        NodeKind::Literal { .. } | NodeKind::Local { .. } | NodeKind::Function { .. } => {
            match eval_leaf(ast, id, &vm.env) {
                EvalResult::Value { v } => vm.acc = v,
                EvalResult::Throw { error } => vm.throw(error),
                EvalResult::Suspend { .. } | EvalResult::Yield => {}
            }
            return Ok(());
        }
        NodeKind::Break => {
            vm.control = Control::Break;
            return Ok(());
        }
        NodeKind::Continue => {
            vm.control = Control::Continue;
            return Ok(());
        }
        NodeKind::Return { value: None } => {
            vm.control = Control::Return(Val::Void);
            return Ok(());
        }
        NodeKind::Declare { .. } => FrameKind::Declare {
            phase: StorePhase::Eval,
        },
        NodeKind::Assign { .. } => FrameKind::Assign {
            phase: StorePhase::Eval,
        },
        NodeKind::Call { .. } => FrameKind::Call {
            phase: CallPhase::Start,
            target: None,
            args: Vec::new(),
        },
        NodeKind::List { items } => FrameKind::List {
            phase: NaryPhase::Exec,
            items: Vec::with_capacity(items.len()),
        },
        NodeKind::Nary { .. } => FrameKind::Nary {
            phase: NaryPhase::Exec,
            idx: 0,
            last: Val::Void,
        },
        NodeKind::Pipe { .. } => FrameKind::Pipe {
            phase: NaryPhase::Exec,
            idx: 0,
        },
        NodeKind::And { .. } => FrameKind::And {
            phase: NaryPhase::Exec,
        },
        NodeKind::Scope { .. } => FrameKind::Scope {
            phase: ScopePhase::Enter,
        },
        NodeKind::If { .. } => FrameKind::If {
            phase: IfPhase::Test,
        },
        NodeKind::While { .. } => FrameKind::While {
            phase: LoopPhase::Enter,
        },
        NodeKind::Foreach { .. } => FrameKind::Foreach {
            phase: LoopPhase::Enter,
            items: Vec::new(),
            idx: 0,
        },
        NodeKind::Return { value: Some(_) } => FrameKind::Return {
            phase: ValuePhase::Eval,
        },
        NodeKind::Throw { .. } => FrameKind::Throw {
            phase: ValuePhase::Eval,
        },
        NodeKind::Try { .. } => FrameKind::Try {
            phase: TryPhase::NotStarted,
            exception: None,
        },
        NodeKind::Finally { .. } => FrameKind::Finally {
            phase: FinallyPhase::NotStarted,
            saved: Control::None,
            value: Val::Void,
        },
        NodeKind::TaggedStmt { .. } => FrameKind::Tagged {
            phase: TaggedPhase::EvalTag,
        },
        NodeKind::WaitUntil { .. } => FrameKind::WaitUntil {
            phase: ValuePhase::Eval,
        },
        NodeKind::At { .. } => FrameKind::At {
            phase: AtPhase::Register,
            triggered: false,
        },
    };

    push_frame(vm, Frame::new(ast.clone(), id, kind))
}

/// Pop the top frame, restoring what it changed
pub fn pop_frame(vm: &mut Vm, world: &World) {
    let Some(frame) = vm.frames.pop() else {
        return;
    };
    if let Some(env) = frame.saved_env {
        vm.env = env;
    }
    if let Some(pos) = frame.tag_pos {
        vm.tags.truncate(pos);
    }
    if frame.call_site {
        vm.backtrace.borrow_mut().pop();
    }
    if !vm.control.is_active() && frame.ast.node(frame.node).side_effect_free {
        let entry = Cached {
            version: world.store_version(),
            env: Rc::downgrade(&vm.env),
            value: vm.acc.clone(),
        };
        vm.cache
            .insert((Rc::as_ptr(&frame.ast) as usize, frame.node), entry);
    }
}

/// Replace the top frame's kind (phase bookkeeping)
pub fn set_kind(vm: &mut Vm, kind: FrameKind) {
    let frame_idx = vm.frames.len() - 1;
    vm.frames[frame_idx].kind = kind;
}

/// Run the job's entry point: its root node, a detached closure call, or an
/// `at` condition watch
pub(crate) fn start(vm: &mut Vm, world: &World, entry: EntryPoint) -> Result<(), FatalError> {
    match entry.0 {
        Entry::Node(ast, node) => push_node(vm, world, &ast, node),
        Entry::Closure(closure) => {
            let site = closure.ast.span(closure.node);
            let name = format!("detach@{}", site);
            super::statements::push_invoke(vm, world, closure, None, Vec::new(), site, name)
        }
        Entry::Watch(ast, node) => {
            let kind = FrameKind::At {
                phase: AtPhase::Test,
                triggered: false,
            };
            push_frame(vm, Frame::new(ast, node, kind))
        }
    }
}
