//! # Free-block index
//!
//! An unbalanced binary search tree of free physical blocks, keyed by
//! `(size, address)` and compared lexicographically. Nodes live in a
//! [`NodePool`] and refer to each other by [`NodeId`], never by pointer.
//!
//! ```text
//!                 (2 pages @ 0x3000)
//!                /                  \
//!   (1 page @ 0x9000)         (4 pages @ 0x1000)
//!                              /
//!                    (2 pages @ 0x7000)
//! ```
//!
//! Left subtrees hold keys that compare lower, right subtrees keys that
//! compare greater or equal. No rebalancing happens; adversarial insertion
//! orders degenerate the tree into a list, which costs time but never
//! correctness.

use crate::AllocError;
use crate::node_pool::{NodeId, NodePool, NodeRecycling};
use core::fmt;
use kernel_memory_addresses::PhysicalAddress;

/// A contiguous run of free physical memory.
///
/// Field order matters: the derived `Ord` compares `size` first, then `addr`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FreeBlock {
    pub size: u64,
    pub addr: PhysicalAddress,
}

impl FreeBlock {
    #[inline]
    #[must_use]
    pub const fn new(addr: PhysicalAddress, size: u64) -> Self {
        Self { size, addr }
    }

    /// First address past the block.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.addr.as_u64() + self.size)
    }
}

impl fmt::Debug for FreeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:#x}", self.addr, self.size)
    }
}

pub struct FreeTree<const N: usize> {
    pool: NodePool<N>,
    root: Option<NodeId>,
    len: usize,
}

impl<const N: usize> FreeTree<N> {
    #[must_use]
    pub const fn new(recycling: NodeRecycling) -> Self {
        Self {
            pool: NodePool::new(recycling),
            root: None,
            len: 0,
        }
    }

    /// Number of blocks in the tree.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pool slots consumed so far (and not recycled).
    #[inline]
    #[must_use]
    pub const fn nodes_used(&self) -> usize {
        self.pool.used()
    }

    #[inline]
    #[must_use]
    pub const fn nodes_capacity(&self) -> usize {
        self.pool.capacity()
    }

    #[inline]
    #[must_use]
    pub fn block(&self, id: NodeId) -> FreeBlock {
        self.pool.node(id).block
    }

    /// Inserts `block` under a fresh pool node.
    ///
    /// # Errors
    /// [`AllocError::PoolExhausted`] when the pool has no slot left; the tree
    /// is unchanged in that case.
    pub fn insert(&mut self, block: FreeBlock) -> Result<NodeId, AllocError> {
        let id = self.pool.get(block)?;
        self.link(id);
        Ok(id)
    }

    /// Smallest block with `size >= requested`, or `None`.
    ///
    /// Follows a single root-to-leaf path: a qualifying node becomes the
    /// current best and the search continues left for a tighter fit; a node
    /// that is too small can only have qualifying blocks on its right.
    #[must_use]
    pub fn find_best_fit(&self, requested: u64) -> Option<NodeId> {
        let mut best: Option<NodeId> = None;
        let mut cursor = self.root;
        while let Some(id) = cursor {
            let node = self.pool.node(id);
            if node.block.size >= requested {
                let better = match best {
                    None => true,
                    Some(b) => node.block.size < self.pool.node(b).block.size,
                };
                if better {
                    best = Some(id);
                }
                cursor = node.left;
            } else {
                cursor = node.right;
            }
        }
        best
    }

    /// Removes the block held by `id` and returns it.
    ///
    /// The pool slot that becomes unlinked goes back to the pool (which may
    /// ignore it, see [`NodeRecycling::Leak`]).
    pub fn remove(&mut self, id: NodeId) -> FreeBlock {
        let block = self.block(id);
        let slot = self.unlink(id);
        self.pool.put(slot);
        block
    }

    /// Replaces the block held by `id`, keeping the slot count unchanged.
    ///
    /// The node is rewritten in place when the new key still sits between its
    /// in-order neighbours. Otherwise the node is unlinked and the freed slot
    /// is linked again under the new key.
    pub fn replace(&mut self, id: NodeId, block: FreeBlock) {
        let fits_left = self.predecessor(id).is_none_or(|p| self.block(p) <= block);
        let fits_right = self.successor(id).is_none_or(|s| block <= self.block(s));
        if fits_left && fits_right {
            self.pool.node_mut(id).block = block;
            return;
        }

        let slot = self.unlink(id);
        self.pool.node_mut(slot).block = block;
        self.link(slot);
    }

    /// The block that starts exactly at `addr`.
    #[must_use]
    pub fn find_starting_at(&self, addr: PhysicalAddress) -> Option<NodeId> {
        self.ids().find(|&id| self.block(id).addr == addr)
    }

    /// The block that ends exactly at `addr`.
    #[must_use]
    pub fn find_ending_at(&self, addr: PhysicalAddress) -> Option<NodeId> {
        self.ids().find(|&id| self.block(id).end() == addr)
    }

    /// Blocks in ascending `(size, address)` order.
    pub fn iter(&self) -> impl Iterator<Item = FreeBlock> + '_ {
        self.ids().map(|id| self.block(id))
    }

    /// Verifies the ordering and parent-link invariants.
    ///
    /// Used by tests and debug assertions; walks the whole tree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if let Some(root) = self.root
            && self.pool.node(root).parent.is_some()
        {
            return false;
        }

        let mut count = 0;
        let mut prev: Option<FreeBlock> = None;
        for id in self.ids() {
            let node = self.pool.node(id);
            for child in [node.left, node.right].into_iter().flatten() {
                if self.pool.node(child).parent != Some(id) {
                    return false;
                }
            }
            if prev.is_some_and(|p| p > node.block) {
                return false;
            }
            prev = Some(node.block);
            count += 1;
        }
        count == self.len
    }

    fn ids(&self) -> InOrder<'_, N> {
        InOrder {
            tree: self,
            next: self.root.map(|r| self.min(r)),
        }
    }

    /// Hangs a detached node under the `(size, address)` ordering.
    fn link(&mut self, id: NodeId) {
        let block = self.block(id);
        self.len += 1;

        let Some(mut current) = self.root else {
            self.root = Some(id);
            return;
        };

        loop {
            let node = self.pool.node(current);
            let next = if block < node.block { node.left } else { node.right };
            match next {
                Some(child) => current = child,
                None => break,
            }
        }

        self.pool.node_mut(id).parent = Some(current);
        let parent = self.pool.node_mut(current);
        if block < parent.block {
            parent.left = Some(id);
        } else {
            parent.right = Some(id);
        }
    }

    /// Removes the block held by `id` from the tree structure and returns the
    /// slot that ended up detached.
    ///
    /// * no children: the node is cut off its parent (or the root cleared);
    /// * one child: the child takes the node's place;
    /// * two children: the in-order successor's block is copied into `id` and
    ///   the successor node, which has no left child, is removed instead.
    fn unlink(&mut self, id: NodeId) -> NodeId {
        let node = *self.pool.node(id);
        match (node.left, node.right) {
            (None, None) => {
                self.replace_child(node.parent, id, None);
            }
            (Some(child), None) | (None, Some(child)) => {
                self.replace_child(node.parent, id, Some(child));
                self.pool.node_mut(child).parent = node.parent;
            }
            (Some(_), Some(right)) => {
                let successor = self.min(right);
                self.pool.node_mut(id).block = self.block(successor);
                return self.unlink(successor);
            }
        }

        self.len -= 1;
        let detached = self.pool.node_mut(id);
        detached.left = None;
        detached.right = None;
        detached.parent = None;
        id
    }

    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: Option<NodeId>) {
        match parent {
            None => self.root = new,
            Some(p) => {
                let parent = self.pool.node_mut(p);
                if parent.left == Some(old) {
                    parent.left = new;
                } else {
                    parent.right = new;
                }
            }
        }
    }

    fn min(&self, mut id: NodeId) -> NodeId {
        while let Some(left) = self.pool.node(id).left {
            id = left;
        }
        id
    }

    fn max(&self, mut id: NodeId) -> NodeId {
        while let Some(right) = self.pool.node(id).right {
            id = right;
        }
        id
    }

    fn successor(&self, id: NodeId) -> Option<NodeId> {
        if let Some(right) = self.pool.node(id).right {
            return Some(self.min(right));
        }
        let mut child = id;
        let mut parent = self.pool.node(id).parent;
        while let Some(p) = parent {
            if self.pool.node(p).left == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.pool.node(p).parent;
        }
        None
    }

    fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        if let Some(left) = self.pool.node(id).left {
            return Some(self.max(left));
        }
        let mut child = id;
        let mut parent = self.pool.node(id).parent;
        while let Some(p) = parent {
            if self.pool.node(p).right == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.pool.node(p).parent;
        }
        None
    }
}

struct InOrder<'t, const N: usize> {
    tree: &'t FreeTree<N>,
    next: Option<NodeId>,
}

impl<const N: usize> Iterator for InOrder<'_, N> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.tree.successor(id);
        Some(id)
    }
}
