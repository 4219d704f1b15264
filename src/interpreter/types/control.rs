//! Control flow and execution frame types

use std::rc::Rc;

use super::super::env::Scope;
use super::ast::{Ast, NodeId, Span};
use super::phase::{
    AtPhase, CallPhase, FinallyPhase, IfPhase, InvokePhase, LoopPhase, NaryPhase, ScopePhase, StorePhase,
    TaggedPhase, TryPhase, ValuePhase,
};
use super::values::Val;
use crate::scheduler::JobHandle;
use crate::tag::TagRef;

/* ===================== Control Flow ===================== */

/// Control flow state
///
/// This represents active control flow (break, continue, return, throw, stop,
/// terminate). When control != None, frames are popped until one of them
/// handles it.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    None,
    Break,
    Continue,
    Return(Val),
    Throw(Exception),
    /// Unwind to the tag at `pos` in the job's tag stack
    Stop { pos: usize, payload: StopPayload },
    /// Unwind everything
    Terminate,
}

impl Control {
    pub fn is_active(&self) -> bool {
        !matches!(self, Control::None)
    }

    /// Stops and terminations cannot be caught by script code
    pub fn is_stopping(&self) -> bool {
        matches!(self, Control::Stop { .. } | Control::Terminate)
    }

    /// Pick the control that must win when two unwinds meet (e.g. an unwind
    /// started inside a finally body while another one was pending).
    pub fn stronger(saved: Control, current: Control) -> Control {
        match (&saved, &current) {
            (Control::Terminate, _) => saved,
            (_, Control::Terminate) => current,
            (_, Control::None) => saved,
            (Control::Stop { pos: a, .. }, Control::Stop { pos: b, .. }) => {
                if a <= b {
                    saved
                } else {
                    current
                }
            }
            (Control::Stop { .. }, _) => saved,
            _ => current,
        }
    }
}

/// What a stopped tag scope evaluates to
#[derive(Debug, Clone, PartialEq)]
pub enum StopPayload {
    /// `tag.stop(v)` / `tag.block(v)`: the tagged statement evaluates to `v`
    Value(Val),
    /// `break` escaping a sibling job, delivered to the loop tag
    Break,
    /// `return v` escaping a sibling job, delivered to the function tag
    Return(Val),
}

/// Language-level exception: the thrown value and the call stack at throw time
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub value: Val,
    pub backtrace: Vec<CallSite>,
}

impl Exception {
    pub fn new(value: Val, backtrace: Vec<CallSite>) -> Self {
        Self { value, backtrace }
    }
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)?;
        for site in self.backtrace.iter().rev() {
            write!(f, "\n    called from: {} ({})", site.name, site.span)?;
        }
        Ok(())
    }
}

/// One entry of a job backtrace
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub name: String,
    pub span: Span,
}

/// Request delivered to a job from outside, observed at its next safe point
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    Stop { pos: usize, payload: StopPayload },
    Terminate,
    /// A linked sibling job died with an exception
    ChildFailed(Exception),
}

/// One entry of a job's tag stack
#[derive(Debug, Clone)]
pub struct TagEntry {
    pub tag: TagRef,
    /// Pushed by the spawning job rather than by one of our frames
    pub inherited: bool,
}

/* ===================== Frames ===================== */

/// Frame kind - the type and state of a node being executed
#[derive(Debug, Clone)]
pub enum FrameKind {
    Declare { phase: StorePhase },
    Assign { phase: StorePhase },
    Call {
        phase: CallPhase,
        target: Option<Val>,
        args: Vec<Val>,
    },
    /// A function body running for a call
    Invoke { phase: InvokePhase, name: String },
    List { phase: NaryPhase, items: Vec<Val> },
    Nary {
        phase: NaryPhase,
        idx: usize,
        last: Val,
    },
    Pipe { phase: NaryPhase, idx: usize },
    And { phase: NaryPhase },
    Scope { phase: ScopePhase },
    If { phase: IfPhase },
    While { phase: LoopPhase },
    Foreach {
        phase: LoopPhase,
        items: Vec<Val>,
        idx: usize,
    },
    Return { phase: ValuePhase },
    Throw { phase: ValuePhase },
    Try {
        phase: TryPhase,
        exception: Option<Exception>,
    },
    Finally {
        phase: FinallyPhase,
        saved: Control,
        value: Val,
    },
    Tagged { phase: TaggedPhase },
    WaitUntil { phase: ValuePhase },
    At { phase: AtPhase, triggered: bool },
}

impl FrameKind {
    /// Frame kinds whose handler runs while control flow is active.
    /// Every other frame is simply popped during an unwind.
    pub fn intercepts_control(&self) -> bool {
        matches!(
            self,
            FrameKind::Invoke { .. }
                | FrameKind::Nary { .. }
                | FrameKind::While { .. }
                | FrameKind::Foreach { .. }
                | FrameKind::Try { .. }
                | FrameKind::Finally { .. }
                | FrameKind::Tagged { .. }
        )
    }
}

/// Execution frame - one per active node
///
/// The frame stack replaces the system call stack, which is what lets a job
/// suspend anywhere and resume exactly where it stopped.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The kind and state of this frame
    pub kind: FrameKind,

    /// Tree the node belongs to
    pub ast: Rc<Ast>,

    /// The node this frame represents
    pub node: NodeId,

    /// Scope to restore when this frame is popped
    pub saved_env: Option<Rc<Scope>>,

    /// Position in the tag stack of the tag this frame pushed
    pub tag_pos: Option<usize>,

    /// Sibling jobs this frame spawned and must see terminated before it pops
    pub children: Vec<JobHandle>,

    /// Whether this frame pushed a backtrace entry
    pub call_site: bool,
}
