//! Fixed-capacity arena supplying the nodes of the free-block tree.
//!
//! Nodes are handed out by bumping an index into a static array. What happens
//! to a node after it leaves the tree is decided by [`NodeRecycling`]:
//!
//! * [`NodeRecycling::Leak`] never reuses a slot. Every coalesce-then-reinsert
//!   cycle consumes one more slot until [`AllocError::PoolExhausted`].
//! * [`NodeRecycling::Recycle`] threads returned slots onto a free list and
//!   reuses them before bumping.

use crate::AllocError;
use crate::free_tree::FreeBlock;
use kernel_memory_addresses::PhysicalAddress;

/// What to do with a node that has been removed from the tree.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum NodeRecycling {
    /// Removed nodes are abandoned; the pool only ever shrinks.
    #[default]
    Leak,
    /// Removed nodes go onto a free list and are handed out again.
    Recycle,
}

/// Index of a node slot inside a [`NodePool`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One slot: a free block plus its tree relations.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Node {
    pub block: FreeBlock,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
    pub parent: Option<NodeId>,
}

impl Node {
    const EMPTY: Self = Self {
        block: FreeBlock::new(PhysicalAddress::zero(), 0),
        left: None,
        right: None,
        parent: None,
    };

    const fn detached(block: FreeBlock) -> Self {
        Self {
            block,
            left: None,
            right: None,
            parent: None,
        }
    }
}

pub(crate) struct NodePool<const N: usize> {
    nodes: [Node; N],
    /// Next never-used slot.
    next: usize,
    /// Head of the recycled-slot list, linked through `Node::right`.
    free_head: Option<NodeId>,
    free_len: usize,
    recycling: NodeRecycling,
}

impl<const N: usize> NodePool<N> {
    pub const fn new(recycling: NodeRecycling) -> Self {
        const { assert!(N <= u32::MAX as usize, "node pool too large") };
        Self {
            nodes: [Node::EMPTY; N],
            next: 0,
            free_head: None,
            free_len: 0,
            recycling,
        }
    }

    /// Claims a slot for `block`.
    pub fn get(&mut self, block: FreeBlock) -> Result<NodeId, AllocError> {
        if let Some(id) = self.free_head {
            self.free_head = self.nodes[id.index()].right;
            self.free_len -= 1;
            self.nodes[id.index()] = Node::detached(block);
            return Ok(id);
        }

        if self.next >= N {
            return Err(AllocError::PoolExhausted);
        }
        #[allow(clippy::cast_possible_truncation)]
        let id = NodeId(self.next as u32);
        self.next += 1;
        self.nodes[id.index()] = Node::detached(block);
        Ok(id)
    }

    /// Returns a slot that is no longer linked into the tree.
    pub fn put(&mut self, id: NodeId) {
        match self.recycling {
            NodeRecycling::Leak => {}
            NodeRecycling::Recycle => {
                self.nodes[id.index()] = Node::EMPTY;
                self.nodes[id.index()].right = self.free_head;
                self.free_head = Some(id);
                self.free_len += 1;
            }
        }
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Slots that cannot be handed out anymore without recycling.
    #[inline]
    pub const fn used(&self) -> usize {
        self.next - self.free_len
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}
