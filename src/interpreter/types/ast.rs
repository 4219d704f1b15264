//! Abstract Syntax Tree node types
//!
//! The tree arrives already parsed and desugared. Nodes live in an arena and
//! refer to each other by [`NodeId`]; the arena is shared between jobs with
//! `Rc<Ast>` and never mutated.

use serde::{Deserialize, Serialize};

/// Source location span for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Span {
    /// Start byte offset
    pub start: usize,
    /// End byte offset
    pub end: usize,
    /// Start line (0-indexed)
    pub line: usize,
    /// Start column (0-indexed)
    pub col: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, col: usize) -> Self {
        Self {
            start,
            end,
            line,
            col,
        }
    }

    /// Create a span that covers both self and other
    pub fn merge(&self, other: &Span) -> Span {
        let (line, col) = if self.start <= other.start {
            (self.line, self.col)
        } else {
            (other.line, other.col)
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line,
            col,
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.col + 1)
    }
}

/// Index of a node in its [`Ast`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Literal constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Lit {
    Nil,
    Bool(bool),
    Num(f64),
    Str(String),
}

/// Sequencing flavor of a composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// `;` - sequential, may yield between children
    #[default]
    Semicolon,
    /// `|` - sequential, never yields
    Pipe,
    /// `,` - concurrent, child runs as a sibling job
    Comma,
    /// `&` - concurrent, all children start together
    And,
}

/// One child of a [`NodeKind::Nary`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub exp: NodeId,
    #[serde(default)]
    pub flavor: Flavor,
}

/// Handler pattern of a `try`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Pattern {
    /// Error code or prototype name to match; any value when absent
    #[serde(default)]
    pub kind: Option<String>,
    /// Name the caught value is bound to
    #[serde(default)]
    pub binding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handler {
    #[serde(default)]
    pub pattern: Pattern,
    #[serde(default)]
    pub guard: Option<NodeId>,
    pub body: NodeId,
}

/// Node kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum NodeKind {
    Literal {
        v: Lit,
    },
    Local {
        name: String,
    },
    Declare {
        name: String,
        #[serde(default)]
        value: Option<NodeId>,
    },
    Assign {
        name: String,
        value: NodeId,
    },
    Call {
        #[serde(default)]
        target: Option<NodeId>,
        name: String,
        /// `None` for a slot read without parentheses
        #[serde(default)]
        args: Option<Vec<NodeId>>,
    },
    List {
        items: Vec<NodeId>,
    },
    Nary {
        children: Vec<Stmt>,
        #[serde(default)]
        toplevel: bool,
    },
    Pipe {
        children: Vec<NodeId>,
    },
    And {
        children: Vec<NodeId>,
    },
    Scope {
        body: NodeId,
    },
    If {
        test: NodeId,
        then: NodeId,
        #[serde(default, rename = "else")]
        else_: Option<NodeId>,
    },
    While {
        #[serde(default)]
        flavor: Flavor,
        test: NodeId,
        body: NodeId,
    },
    Foreach {
        #[serde(default)]
        flavor: Flavor,
        binding: String,
        list: NodeId,
        body: NodeId,
    },
    Function {
        params: Vec<String>,
        body: NodeId,
    },
    Return {
        #[serde(default)]
        value: Option<NodeId>,
    },
    Break,
    Continue,
    Throw {
        value: NodeId,
    },
    Try {
        body: NodeId,
        handlers: Vec<Handler>,
        #[serde(default, rename = "else")]
        else_: Option<NodeId>,
    },
    Finally {
        body: NodeId,
        finally: NodeId,
    },
    TaggedStmt {
        tag: NodeId,
        body: NodeId,
    },
    WaitUntil {
        test: NodeId,
    },
    /// `at (test) body onleave`: runs `body` each time `test` turns true
    /// and `onleave` each time it turns false again
    At {
        test: NodeId,
        body: NodeId,
        #[serde(default)]
        onleave: Option<NodeId>,
    },
}

impl NodeKind {
    /// Child node ids, in evaluation order
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Literal { .. }
            | NodeKind::Local { .. }
            | NodeKind::Break
            | NodeKind::Continue => vec![],
            NodeKind::Declare { value, .. } | NodeKind::Return { value } => {
                value.iter().copied().collect()
            }
            NodeKind::Assign { value, .. } | NodeKind::Throw { value } => vec![*value],
            NodeKind::Call { target, args, .. } => target
                .iter()
                .copied()
                .chain(args.iter().flatten().copied())
                .collect(),
            NodeKind::List { items } => items.clone(),
            NodeKind::Nary { children, .. } => children.iter().map(|s| s.exp).collect(),
            NodeKind::Pipe { children } | NodeKind::And { children } => children.clone(),
            NodeKind::Scope { body } | NodeKind::Function { body, .. } => vec![*body],
            NodeKind::If { test, then, else_ } => {
                let mut ids = vec![*test, *then];
                ids.extend(else_.iter().copied());
                ids
            }
            NodeKind::While { test, body, .. } => vec![*test, *body],
            NodeKind::Foreach { list, body, .. } => vec![*list, *body],
            NodeKind::Try {
                body,
                handlers,
                else_,
            } => {
                let mut ids = vec![*body];
                for h in handlers {
                    ids.extend(h.guard.iter().copied());
                    ids.push(h.body);
                }
                ids.extend(else_.iter().copied());
                ids
            }
            NodeKind::Finally { body, finally } => vec![*body, *finally],
            NodeKind::TaggedStmt { tag, body } => vec![*tag, *body],
            NodeKind::WaitUntil { test } => vec![*test],
            NodeKind::At {
                test,
                body,
                onleave,
            } => std::iter::once(*test)
                .chain(std::iter::once(*body))
                .chain(*onleave)
                .collect(),
        }
    }
}

/// One arena entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub span: Span,
    /// Producer's promise that evaluating this node has no side effect
    #[serde(default)]
    pub side_effect_free: bool,
}

/// Immutable syntax tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    pub nodes: Vec<Node>,
    pub root: NodeId,
}

impl Ast {
    /// Get a node. Ids are checked by [`Ast::validate`] before execution.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.node(id).span
    }

    /// Check that every referenced node exists
    pub fn validate(&self) -> Result<(), String> {
        let len = self.nodes.len();
        if self.root.index() >= len {
            return Err(format!("root {} out of range ({} nodes)", self.root.0, len));
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Some(bad) = node.kind.children().into_iter().find(|c| c.index() >= len) {
                return Err(format!(
                    "node {} refers to missing node {} ({} nodes)",
                    idx, bad.0, len
                ));
            }
        }
        Ok(())
    }
}
