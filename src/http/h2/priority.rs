//! HTTP/2 stream priority tree
//!
//! Implements the dependency and weight model of RFC 7540 Section 5.3 as a
//! scheduler. Every node keeps a min-heap of its children keyed by a virtual
//! "level"; each time a child is chosen its level advances by `256 / weight`
//! (the remainder carried as a deficit), so siblings are served in
//! proportion to their weights. A blocked node is never returned, but its
//! children compete in its place.

use super::StreamId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Weight given to streams that do not specify one
pub const DEFAULT_WEIGHT: u16 = 16;

/// Default cap on tree size, the root included
pub const DEFAULT_MAX_STREAMS: usize = 1000;

const ROOT: StreamId = 0;

/// Priority tree errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriorityError {
    /// Every stream in the tree is blocked
    #[error("No stream is eligible to send")]
    Deadlock,

    #[error("Stream {0} is already in the priority tree")]
    DuplicateStream(StreamId),

    #[error("Stream {0} is not in the priority tree")]
    MissingStream(StreamId),

    #[error("Priority tree is full ({0} streams)")]
    TooManyStreams(usize),

    #[error("Weight {0} outside 1-256")]
    BadWeight(u16),

    /// Stream 0 is the root and cannot be changed
    #[error("Stream 0 cannot be prioritized")]
    PseudoStream,

    #[error("Stream {0} cannot depend on itself")]
    PriorityLoop(StreamId),
}

/// Result type for priority tree operations
pub type Result<T> = std::result::Result<T, PriorityError>;

#[derive(Debug)]
struct Node {
    weight: u16,
    parent: StreamId,
    children: Vec<StreamId>,
    queue: BinaryHeap<Reverse<(u64, StreamId)>>,
    active: bool,
    last_weight: u64,
    deficit: u64,
}

impl Node {
    fn new(weight: u16, parent: StreamId) -> Self {
        Node {
            weight,
            parent,
            children: Vec::new(),
            queue: BinaryHeap::new(),
            active: true,
            last_weight: 0,
            deficit: 0,
        }
    }
}

/// Dependency-weighted stream scheduler
#[derive(Debug)]
pub struct PriorityTree {
    nodes: HashMap<StreamId, Node>,
    max_streams: usize,
}

impl PriorityTree {
    /// Create a tree holding only the root
    pub fn new() -> Self {
        Self::with_max_streams(DEFAULT_MAX_STREAMS)
    }

    /// Create a tree that refuses to grow past `max_streams` nodes
    pub fn with_max_streams(max_streams: usize) -> Self {
        let mut root = Node::new(DEFAULT_WEIGHT, ROOT);
        root.active = false;

        let mut nodes = HashMap::new();
        nodes.insert(ROOT, root);
        PriorityTree { nodes, max_streams }
    }

    /// Whether a stream is in the tree
    pub fn contains(&self, stream_id: StreamId) -> bool {
        stream_id != ROOT && self.nodes.contains_key(&stream_id)
    }

    /// Number of streams in the tree, not counting the root
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Whether only the root is left
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a stream is currently blocked
    pub fn is_blocked(&self, stream_id: StreamId) -> Result<bool> {
        Ok(!self.node(stream_id)?.active)
    }

    /// Add a stream; it starts unblocked
    ///
    /// A parent that is not in the tree yet is inserted first with the
    /// default weight and blocked.
    pub fn insert_stream(&mut self, stream_id: StreamId, depends_on: StreamId, weight: u16, exclusive: bool) -> Result<()> {
        if stream_id == ROOT {
            return Err(PriorityError::PseudoStream);
        }
        if self.nodes.contains_key(&stream_id) {
            return Err(PriorityError::DuplicateStream(stream_id));
        }
        if self.nodes.len() >= self.max_streams {
            return Err(PriorityError::TooManyStreams(self.max_streams));
        }
        if depends_on == stream_id {
            return Err(PriorityError::PriorityLoop(stream_id));
        }
        check_weight(weight)?;

        self.ensure_parent(depends_on)?;
        self.nodes.insert(stream_id, Node::new(weight, depends_on));
        if exclusive {
            self.add_child_exclusive(depends_on, stream_id);
        } else {
            self.add_child(depends_on, stream_id);
        }
        Ok(())
    }

    /// Move a stream to a new parent and weight, taking its children along
    ///
    /// When the new parent is one of the stream's own descendants, that
    /// descendant is first moved up to the stream's old parent
    /// (RFC 7540 Section 5.3.3).
    pub fn reprioritize(&mut self, stream_id: StreamId, depends_on: StreamId, weight: u16, exclusive: bool) -> Result<()> {
        if stream_id == ROOT {
            return Err(PriorityError::PseudoStream);
        }
        if !self.nodes.contains_key(&stream_id) {
            return Err(PriorityError::MissingStream(stream_id));
        }
        if depends_on == stream_id {
            return Err(PriorityError::PriorityLoop(stream_id));
        }
        check_weight(weight)?;

        self.ensure_parent(depends_on)?;
        let cycle = self.is_descendant(depends_on, stream_id);

        let old_parent = self.node(stream_id)?.parent;
        self.node_mut(stream_id)?.weight = weight;

        if cycle {
            let new_parent_parent = self.node(depends_on)?.parent;
            self.remove_child(new_parent_parent, depends_on);
            self.add_child(old_parent, depends_on);
        }

        self.remove_child(old_parent, stream_id);
        if exclusive {
            self.add_child_exclusive(depends_on, stream_id);
        } else {
            self.add_child(depends_on, stream_id);
        }
        Ok(())
    }

    /// Remove a stream; its children move to its parent
    pub fn remove_stream(&mut self, stream_id: StreamId) -> Result<()> {
        if stream_id == ROOT {
            return Err(PriorityError::PseudoStream);
        }
        let node = self
            .nodes
            .remove(&stream_id)
            .ok_or(PriorityError::MissingStream(stream_id))?;

        self.remove_child(node.parent, stream_id);
        for child in node.children {
            self.add_child(node.parent, child);
        }
        Ok(())
    }

    /// Mark a stream as having nothing to send
    pub fn block(&mut self, stream_id: StreamId) -> Result<()> {
        if stream_id == ROOT {
            return Err(PriorityError::PseudoStream);
        }
        self.node_mut(stream_id)?.active = false;
        Ok(())
    }

    /// Mark a stream as ready to send
    pub fn unblock(&mut self, stream_id: StreamId) -> Result<()> {
        if stream_id == ROOT {
            return Err(PriorityError::PseudoStream);
        }
        self.node_mut(stream_id)?.active = true;
        Ok(())
    }

    /// Pick the next stream that should send
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<StreamId> {
        self.schedule(ROOT).ok_or(PriorityError::Deadlock)
    }

    fn schedule(&mut self, parent: StreamId) -> Option<StreamId> {
        let mut popped = Vec::new();
        let mut next = None;

        while next.is_none() {
            let Some(Reverse(entry)) = self.nodes.get_mut(&parent).and_then(|n| n.queue.pop()) else {
                break;
            };
            popped.push(entry);

            let child = entry.1;
            let active = self.nodes.get(&child).is_some_and(|n| n.active);
            next = if active { Some(child) } else { self.schedule(child) };
        }

        // Only the last entry popped led somewhere; the rest go back unchanged
        let chosen = if next.is_some() { popped.pop() } else { None };
        if let Some(node) = self.nodes.get_mut(&parent) {
            for entry in popped {
                node.queue.push(Reverse(entry));
            }
        }

        if let Some((level, child)) = chosen {
            let advance = match self.nodes.get_mut(&child) {
                Some(child_node) => {
                    let total = 256 + child_node.deficit;
                    let weight = child_node.weight as u64;
                    child_node.deficit = total % weight;
                    total / weight
                }
                None => 0,
            };
            if let Some(node) = self.nodes.get_mut(&parent) {
                node.last_weight = level;
                node.queue.push(Reverse((level + advance, child)));
            }
        }

        next
    }

    fn ensure_parent(&mut self, parent: StreamId) -> Result<()> {
        if !self.nodes.contains_key(&parent) {
            self.insert_stream(parent, ROOT, DEFAULT_WEIGHT, false)?;
            self.block(parent)?;
        }
        Ok(())
    }

    fn is_descendant(&self, candidate: StreamId, ancestor: StreamId) -> bool {
        let mut current = candidate;
        while current != ROOT {
            let Some(node) = self.nodes.get(&current) else {
                return false;
            };
            current = node.parent;
            if current == ancestor {
                return true;
            }
        }
        false
    }

    fn add_child(&mut self, parent: StreamId, child: StreamId) {
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = parent;
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
            node.queue.push(Reverse((node.last_weight, child)));
        }
    }

    fn add_child_exclusive(&mut self, parent: StreamId, child: StreamId) {
        let old_children = match self.nodes.get_mut(&parent) {
            Some(node) => {
                node.queue.clear();
                node.last_weight = 0;
                std::mem::take(&mut node.children)
            }
            None => return,
        };

        self.add_child(parent, child);
        for old in old_children {
            self.add_child(child, old);
        }
    }

    fn remove_child(&mut self, parent: StreamId, child: StreamId) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|&c| c != child);
            node.queue.retain(|Reverse((_, c))| *c != child);
        }
    }

    fn node(&self, stream_id: StreamId) -> Result<&Node> {
        self.nodes
            .get(&stream_id)
            .ok_or(PriorityError::MissingStream(stream_id))
    }

    fn node_mut(&mut self, stream_id: StreamId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&stream_id)
            .ok_or(PriorityError::MissingStream(stream_id))
    }
}

impl Default for PriorityTree {
    fn default() -> Self {
        Self::new()
    }
}

fn check_weight(weight: u16) -> Result<()> {
    if (1..=256).contains(&weight) {
        Ok(())
    } else {
        Err(PriorityError::BadWeight(weight))
    }
}
