//! Tags: named, hierarchical scopes used to stop, freeze, pause and block
//! groups of jobs.
//!
//! A tag knows nothing about scheduling. State changes are applied to the
//! tag and its dependents, and stop requests are reported through the
//! [`TagSink`] trait, which the scheduler implements.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::interpreter::types::Val;

static NEXT_TAG_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a tag
pub type TagRef = Rc<Tag>;

/// Anonymous tags pushed by control constructs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Loop,
    Function,
}

/// Operation applied to a tag and propagated to its dependents
#[derive(Debug, Clone, PartialEq)]
pub enum TagOp {
    Stop(Val),
    Freeze,
    Unfreeze,
    Pause,
    Resume,
    Block(Val),
    Unblock,
}

impl TagOp {
    /// Stopping operations visit dependents before the tag itself
    pub fn is_stopping(&self) -> bool {
        matches!(
            self,
            TagOp::Stop(_) | TagOp::Freeze | TagOp::Pause | TagOp::Block(_)
        )
    }
}

/// Receiver of the scheduling side effects of tag operations
pub trait TagSink {
    /// Every job whose tag stack contains `tag` must unwind to it
    fn signal_stop(&mut self, tag: &TagRef, payload: &Val);

    /// A frozen/paused/blocked flag changed somewhere
    fn tag_state_changed(&mut self) {}
}

/* ===================== Tag ===================== */

pub struct Tag {
    id: u64,
    name: String,
    parent: Option<Weak<Tag>>,
    flow: Option<FlowKind>,
    frozen: Cell<bool>,
    paused: Cell<bool>,
    blocked: RefCell<Option<Val>>,
    dependents: RefCell<Vec<Weak<Tag>>>,
}

impl Tag {
    fn build(name: String, parent: Option<&TagRef>, flow: Option<FlowKind>) -> TagRef {
        let tag = Rc::new(Tag {
            id: NEXT_TAG_ID.fetch_add(1, Ordering::Relaxed),
            name,
            parent: parent.map(Rc::downgrade),
            flow,
            frozen: Cell::new(false),
            paused: Cell::new(false),
            blocked: RefCell::new(None),
            dependents: RefCell::new(Vec::new()),
        });
        if let Some(parent) = parent {
            parent.register_dependent(&tag);
        }
        tag
    }

    /// Create a root tag
    pub fn new(name: impl Into<String>) -> TagRef {
        Self::build(name.into(), None, None)
    }

    /// Create a tag under `parent`; its name is `parent.name`
    pub fn with_parent(name: &str, parent: &TagRef) -> TagRef {
        Self::build(format!("{}.{}", parent.name, name), Some(parent), None)
    }

    /// Create the anonymous tag of a loop or function call
    pub fn new_flow(kind: FlowKind) -> TagRef {
        let name = match kind {
            FlowKind::Loop => "<loop>",
            FlowKind::Function => "<function>",
        };
        Self::build(name.to_string(), None, Some(kind))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flow(&self) -> Option<FlowKind> {
        self.flow
    }

    pub fn parent(&self) -> Option<TagRef> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn register_dependent(&self, child: &TagRef) {
        self.dependents.borrow_mut().push(Rc::downgrade(child));
    }

    pub fn unregister_dependent(&self, child: &Tag) {
        self.dependents
            .borrow_mut()
            .retain(|d| d.upgrade().is_some_and(|d| !std::ptr::eq(d.as_ref(), child)));
    }

    /// Live dependents, in registration order
    pub fn dependents(&self) -> Vec<TagRef> {
        self.dependents
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /* ===================== Effective state ===================== */

    /// True if this tag or any ancestor is frozen
    pub fn frozen(&self) -> bool {
        self.frozen.get() || self.parent().is_some_and(|p| p.frozen())
    }

    /// True if this tag or any ancestor is paused
    pub fn paused(&self) -> bool {
        self.paused.get() || self.parent().is_some_and(|p| p.paused())
    }

    /// True if this tag or any ancestor is blocked
    pub fn blocked(&self) -> bool {
        self.blocked_payload().is_some()
    }

    /// Payload of the nearest blocked tag on the ancestor chain
    pub fn blocked_payload(&self) -> Option<Val> {
        if let Some(payload) = self.blocked.borrow().as_ref() {
            return Some(payload.clone());
        }
        self.parent().and_then(|p| p.blocked_payload())
    }

    /* ===================== Operations ===================== */

    pub fn stop(self: &Rc<Self>, payload: Val, sink: &mut dyn TagSink) {
        self.propagate(&TagOp::Stop(payload), sink);
    }

    pub fn freeze(self: &Rc<Self>, sink: &mut dyn TagSink) {
        self.propagate(&TagOp::Freeze, sink);
    }

    pub fn unfreeze(self: &Rc<Self>, sink: &mut dyn TagSink) {
        self.propagate(&TagOp::Unfreeze, sink);
    }

    pub fn pause(self: &Rc<Self>, sink: &mut dyn TagSink) {
        self.propagate(&TagOp::Pause, sink);
    }

    pub fn resume(self: &Rc<Self>, sink: &mut dyn TagSink) {
        self.propagate(&TagOp::Resume, sink);
    }

    pub fn block(self: &Rc<Self>, payload: Val, sink: &mut dyn TagSink) {
        self.propagate(&TagOp::Block(payload), sink);
    }

    pub fn unblock(self: &Rc<Self>, sink: &mut dyn TagSink) {
        self.propagate(&TagOp::Unblock, sink);
    }

    /// Apply `op` to this tag and its whole subtree.
    ///
    /// Stopping operations are applied bottom-up so an inner scope is fully
    /// stopped before its enclosing scope is; starting operations top-down so
    /// a child is never released while its parent still holds.
    pub fn propagate(self: &Rc<Self>, op: &TagOp, sink: &mut dyn TagSink) {
        if op.is_stopping() {
            for child in self.dependents() {
                child.propagate(op, sink);
            }
            self.apply(op, sink);
        } else {
            self.apply(op, sink);
            for child in self.dependents() {
                child.propagate(op, sink);
            }
        }
    }

    fn apply(self: &Rc<Self>, op: &TagOp, sink: &mut dyn TagSink) {
        match op {
            TagOp::Stop(payload) => sink.signal_stop(self, payload),
            TagOp::Freeze => self.frozen.set(true),
            TagOp::Unfreeze => self.frozen.set(false),
            TagOp::Pause => self.paused.set(true),
            TagOp::Resume => self.paused.set(false),
            TagOp::Block(payload) => {
                *self.blocked.borrow_mut() = Some(payload.clone());
                sink.signal_stop(self, payload);
            }
            TagOp::Unblock => *self.blocked.borrow_mut() = None,
        }
        if !matches!(op, TagOp::Stop(_)) {
            sink.tag_state_changed();
        }
    }
}

impl Drop for Tag {
    fn drop(&mut self) {
        if let Some(parent) = self.parent() {
            parent.unregister_dependent(self);
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({}#{})", self.name, self.id)
    }
}

/* ===================== Registry ===================== */

/// Named tags, addressable by dotted path
///
/// Entries are held for the scheduler's lifetime. A child only holds its
/// parent weakly, so the registry is what keeps `a` alive (and its frozen,
/// paused and blocked flags meaningful) for as long as `a.b` can be named.
#[derive(Debug, Default)]
pub struct TagRegistry {
    tags: HashMap<String, TagRef>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `a.b.c`, creating `a`, `a.b` and `a.b.c` as needed
    pub fn get_or_create(&mut self, path: &str) -> TagRef {
        if let Some(tag) = self.tags.get(path) {
            return tag.clone();
        }
        let tag = match path.rsplit_once('.') {
            Some((parent_path, leaf)) => {
                let parent = self.get_or_create(parent_path);
                Tag::with_parent(leaf, &parent)
            }
            None => Tag::new(path),
        };
        self.tags.insert(path.to_string(), tag.clone());
        tag
    }

    pub fn lookup(&self, path: &str) -> Option<TagRef> {
        self.tags.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
