//! Test helpers for interpreter tests
//!
//! Programs are built node by node with [`Builder`], serialized to JSON and
//! parsed back (the same path a real front end takes), then run on a
//! simulated-clock scheduler.

use std::cell::RefCell;

use crate::config::SchedulerConfig;
use crate::interpreter::parse_program;
use crate::interpreter::types::{
    Ast, Flavor, Handler, Lit, Node, NodeId, NodeKind, Pattern, Span, Stmt,
};
use crate::scheduler::{JobHandle, Scheduler};

/// Arena builder for syntax trees
#[derive(Default)]
pub struct Builder {
    nodes: RefCell<Vec<Node>>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, kind: NodeKind) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        let id = NodeId(nodes.len() as u32);
        let line = nodes.len();
        nodes.push(Node {
            kind,
            span: Span::new(0, 0, line, 0),
            side_effect_free: false,
        });
        id
    }

    /// Mark a node side-effect-free
    pub fn pure(&self, id: NodeId) -> NodeId {
        self.nodes.borrow_mut()[id.index()].side_effect_free = true;
        id
    }

    /* ===== Leaves ===== */

    pub fn num(&self, n: f64) -> NodeId {
        self.push(NodeKind::Literal { v: Lit::Num(n) })
    }

    pub fn str(&self, s: &str) -> NodeId {
        self.push(NodeKind::Literal {
            v: Lit::Str(s.to_string()),
        })
    }

    pub fn bool(&self, b: bool) -> NodeId {
        self.push(NodeKind::Literal { v: Lit::Bool(b) })
    }

    pub fn local(&self, name: &str) -> NodeId {
        self.push(NodeKind::Local {
            name: name.to_string(),
        })
    }

    /* ===== Stores ===== */

    pub fn var(&self, name: &str, value: NodeId) -> NodeId {
        self.push(NodeKind::Declare {
            name: name.to_string(),
            value: Some(value),
        })
    }

    pub fn assign(&self, name: &str, value: NodeId) -> NodeId {
        self.push(NodeKind::Assign {
            name: name.to_string(),
            value,
        })
    }

    /* ===== Calls ===== */

    /// `name(args)` resolved in scope
    pub fn call(&self, name: &str, args: &[NodeId]) -> NodeId {
        self.push(NodeKind::Call {
            target: None,
            name: name.to_string(),
            args: Some(args.to_vec()),
        })
    }

    /// `target.name(args)`
    pub fn send(&self, target: NodeId, name: &str, args: &[NodeId]) -> NodeId {
        self.push(NodeKind::Call {
            target: Some(target),
            name: name.to_string(),
            args: Some(args.to_vec()),
        })
    }

    /// `target.name` without parentheses
    pub fn slot(&self, target: NodeId, name: &str) -> NodeId {
        self.push(NodeKind::Call {
            target: Some(target),
            name: name.to_string(),
            args: None,
        })
    }

    /// Binary operator `a op b`
    pub fn op(&self, a: NodeId, op: &str, b: NodeId) -> NodeId {
        self.send(a, op, &[b])
    }

    /// `echo(args)`
    pub fn echo(&self, args: &[NodeId]) -> NodeId {
        self.call("echo", args)
    }

    /// `echo("text")`
    pub fn say(&self, text: &str) -> NodeId {
        let s = self.str(text);
        self.echo(&[s])
    }

    /// `sleep(seconds)`
    pub fn sleep(&self, seconds: f64) -> NodeId {
        let n = self.num(seconds);
        self.call("sleep", &[n])
    }

    pub fn list(&self, items: &[NodeId]) -> NodeId {
        self.push(NodeKind::List {
            items: items.to_vec(),
        })
    }

    /* ===== Composites ===== */

    /// Statements with explicit flavors
    pub fn nary(&self, children: &[(NodeId, Flavor)]) -> NodeId {
        self.push(NodeKind::Nary {
            children: children
                .iter()
                .map(|&(exp, flavor)| Stmt { exp, flavor })
                .collect(),
            toplevel: false,
        })
    }

    /// `a; b; c`
    pub fn seq(&self, stmts: &[NodeId]) -> NodeId {
        let children: Vec<_> = stmts.iter().map(|&s| (s, Flavor::Semicolon)).collect();
        self.nary(&children)
    }

    /// `a, b, c,` (every statement in the background)
    pub fn comma(&self, stmts: &[NodeId]) -> NodeId {
        let children: Vec<_> = stmts.iter().map(|&s| (s, Flavor::Comma)).collect();
        self.nary(&children)
    }

    /// Toplevel statement list
    pub fn program(&self, children: &[(NodeId, Flavor)]) -> NodeId {
        self.push(NodeKind::Nary {
            children: children
                .iter()
                .map(|&(exp, flavor)| Stmt { exp, flavor })
                .collect(),
            toplevel: true,
        })
    }

    pub fn pipe(&self, children: &[NodeId]) -> NodeId {
        self.push(NodeKind::Pipe {
            children: children.to_vec(),
        })
    }

    pub fn and(&self, children: &[NodeId]) -> NodeId {
        self.push(NodeKind::And {
            children: children.to_vec(),
        })
    }

    pub fn scope(&self, body: NodeId) -> NodeId {
        self.push(NodeKind::Scope { body })
    }

    pub fn if_(&self, test: NodeId, then: NodeId, else_: Option<NodeId>) -> NodeId {
        self.push(NodeKind::If { test, then, else_ })
    }

    pub fn while_(&self, flavor: Flavor, test: NodeId, body: NodeId) -> NodeId {
        self.push(NodeKind::While { flavor, test, body })
    }

    pub fn foreach(&self, flavor: Flavor, binding: &str, list: NodeId, body: NodeId) -> NodeId {
        self.push(NodeKind::Foreach {
            flavor,
            binding: binding.to_string(),
            list,
            body,
        })
    }

    /* ===== Functions and flow ===== */

    pub fn func(&self, params: &[&str], body: NodeId) -> NodeId {
        self.push(NodeKind::Function {
            params: params.iter().map(|p| p.to_string()).collect(),
            body,
        })
    }

    pub fn ret(&self, value: Option<NodeId>) -> NodeId {
        self.push(NodeKind::Return { value })
    }

    pub fn brk(&self) -> NodeId {
        self.push(NodeKind::Break)
    }

    pub fn cont(&self) -> NodeId {
        self.push(NodeKind::Continue)
    }

    pub fn throw(&self, value: NodeId) -> NodeId {
        self.push(NodeKind::Throw { value })
    }

    /// `throw Error(code, message)`
    pub fn raise(&self, code: &str, message: &str) -> NodeId {
        let code = self.str(code);
        let message = self.str(message);
        let error = self.call("Error", &[code, message]);
        self.throw(error)
    }

    /* ===== Exceptions ===== */

    pub fn try_(&self, body: NodeId, handlers: Vec<Handler>, else_: Option<NodeId>) -> NodeId {
        self.push(NodeKind::Try {
            body,
            handlers,
            else_,
        })
    }

    pub fn finally(&self, body: NodeId, finally: NodeId) -> NodeId {
        self.push(NodeKind::Finally { body, finally })
    }

    /* ===== Tags ===== */

    pub fn tagged(&self, tag: NodeId, body: NodeId) -> NodeId {
        self.push(NodeKind::TaggedStmt { tag, body })
    }

    pub fn wait_until(&self, test: NodeId) -> NodeId {
        self.push(NodeKind::WaitUntil { test })
    }

    pub fn at(&self, test: NodeId, body: NodeId, onleave: Option<NodeId>) -> NodeId {
        self.push(NodeKind::At {
            test,
            body,
            onleave,
        })
    }

    /// Serialize, parse back and validate
    pub fn build(self, root: NodeId) -> Ast {
        let ast = Ast {
            nodes: self.nodes.into_inner(),
            root,
        };
        let json = serde_json::to_string(&ast).expect("AST serialization failed");
        parse_program(&json).expect("AST parse failed")
    }
}

/// Handler `catch (binding: kind) body`
pub fn handler(kind: Option<&str>, binding: Option<&str>, body: NodeId) -> Handler {
    Handler {
        pattern: Pattern {
            kind: kind.map(str::to_string),
            binding: binding.map(str::to_string),
        },
        guard: None,
        body,
    }
}

pub fn scheduler() -> Scheduler {
    Scheduler::new(SchedulerConfig::default())
}

/// Spawn `ast` as job "main" and run until idle
pub fn run(ast: Ast) -> (Scheduler, JobHandle) {
    let mut sched = scheduler();
    let job = sched.spawn("main", ast).expect("spawn failed");
    sched.run_until_idle(10_000).expect("fatal error");
    (sched, job)
}

/// Run a program and return its output lines
pub fn output_of(ast: Ast) -> Vec<String> {
    let (sched, _) = run(ast);
    sched.output().to_vec()
}

pub fn lines(expected: &[&str]) -> Vec<String> {
    expected.iter().map(|s| s.to_string()).collect()
}
