// Copyright 2017 Matthew Plant. This file is part of MGF.
//
// MGF is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// MGF is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with MGF. If not, see <http://www.gnu.org/licenses/>.

use std::cmp;

use smallvec::SmallVec;

use crate::bounds::{Bound, BoundedBy, Overlaps, AABB, OBB};
use crate::geom::Pose;
use crate::math::Real;

/// A Bounding Volume Hierarchy.
///
/// Leaves are inserted one at a time. Each insertion descends towards the
/// sibling that grows the least in surface area and the tree is kept height
/// balanced with AVL rotations on the way back up.
#[derive(Clone)]
pub struct BVH<B: Bound, V> {
    root: usize,
    num_leaves: usize,
    nodes: Vec<BVHNode<B, V>>,
}

#[derive(Clone)]
struct BVHNode<B: Bound, V> {
    height: i32,
    parent: usize,
    bounds: B,
    node_type: BVHNodeType<V>,
}

#[derive(Clone, Copy)]
enum BVHNodeType<V> {
    Leaf(V),
    Parent(usize, usize),
}

impl<B: Bound, V: Copy> BVH<B, V> {
    pub fn new() -> Self {
        BVH {
            root: 0,
            num_leaves: 0,
            nodes: Vec::new(),
        }
    }

    pub fn with_capacity(leaves: usize) -> Self {
        BVH {
            root: 0,
            num_leaves: 0,
            nodes: Vec::with_capacity(leaves.saturating_mul(2)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_leaves == 0
    }

    /// Returns the number of bounds inserted into the BVH.
    pub fn len(&self) -> usize {
        self.num_leaves
    }

    /// Height of the tree; a single leaf has height zero.
    pub fn height(&self) -> i32 {
        if self.nodes.is_empty() {
            0
        } else {
            self.nodes[self.root].height
        }
    }

    /// Bounds enclosing every leaf.
    pub fn root_bounds(&self) -> Option<B> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(self.nodes[self.root].bounds)
        }
    }

    fn push_node(&mut self, bounds: B, node_type: BVHNodeType<V>) -> usize {
        let id = self.nodes.len();
        self.nodes.push(BVHNode {
            bounds,
            node_type,
            height: 0,
            parent: 0,
        });
        id
    }

    /// Inserts an item into the BVH, rebalancing if necessary. All IDs returned
    /// prior to insert remain valid afterward.
    pub fn insert<K: BoundedBy<B>>(&mut self, key: &K, val: V) -> usize {
        self.num_leaves += 1;
        let bounds = key.bounds();
        let leaf = self.push_node(bounds, BVHNodeType::Leaf(val));
        if self.nodes.len() == 1 {
            self.root = leaf;
            return leaf;
        }

        let best = self.find_sibling(&bounds);

        // Create a new parent
        let old_parent = self.nodes[best].parent;
        let best_bounds = self.nodes[best].bounds;
        let new_parent = self.push_node(
            B::combine(&bounds, &best_bounds),
            BVHNodeType::Parent(best, leaf),
        );
        self.nodes[new_parent].parent = old_parent;
        self.nodes[new_parent].height = self.nodes[best].height + 1;

        if best != self.root {
            self.replace_child(old_parent, best, new_parent);
        } else {
            self.root = new_parent;
        }
        self.nodes[best].parent = new_parent;
        self.nodes[leaf].parent = new_parent;

        // Walk up the tree fixing the heights and bounds.
        let mut i = new_parent;
        loop {
            self.refresh(i);
            i = self.balance(i);
            if i == self.root {
                break;
            }
            i = self.nodes[i].parent;
        }

        leaf
    }

    /// Descends from the root towards the node whose pairing with `bounds`
    /// adds the least surface area.
    fn find_sibling(&self, bounds: &B) -> usize {
        let mut best = self.root;
        while let BVHNodeType::Parent(child1, child2) = self.nodes[best].node_type {
            let curr_bounds = self.nodes[best].bounds;
            let area = curr_bounds.surface_area();
            let combined_area = B::combine(&curr_bounds, bounds).surface_area();
            let no_descent_cost = combined_area * 2.0;
            let inheritance_cost = (combined_area - area) * 2.0;

            let child_cost = |child: usize| -> Real {
                let node = &self.nodes[child];
                let new_area = B::combine(bounds, &node.bounds).surface_area();
                match node.node_type {
                    BVHNodeType::Parent(_, _) => {
                        new_area - node.bounds.surface_area() + inheritance_cost
                    }
                    BVHNodeType::Leaf(_) => new_area + inheritance_cost,
                }
            };

            let child1_cost = child_cost(child1);
            let child2_cost = child_cost(child2);

            // Descend according to minimum cost
            if no_descent_cost < child1_cost && no_descent_cost < child2_cost {
                break;
            }

            best = if child1_cost < child2_cost { child1 } else { child2 };
        }
        best
    }

    fn replace_child(&mut self, parent: usize, old: usize, new: usize) {
        if let BVHNodeType::Parent(child1, child2) = self.nodes[parent].node_type {
            self.nodes[parent].node_type = if child1 == old {
                BVHNodeType::Parent(new, child2)
            } else {
                BVHNodeType::Parent(child1, new)
            };
        }
    }

    /// Recomputes the height and bounds of a parent node from its children.
    fn refresh(&mut self, i: usize) {
        if let BVHNodeType::Parent(child1, child2) = self.nodes[i].node_type {
            self.nodes[i].height = 1 + cmp::max(self.nodes[child1].height, self.nodes[child2].height);
            self.nodes[i].bounds = B::combine(&self.nodes[child1].bounds, &self.nodes[child2].bounds);
        }
    }

    fn balance(&mut self, a: usize) -> usize {
        if self.nodes[a].height < 2 {
            return a;
        }
        if let BVHNodeType::Parent(b, c) = self.nodes[a].node_type {
            let skew = self.nodes[c].height - self.nodes[b].height;
            if skew > 1 {
                return self.rotate(a, c, b);
            }
            if skew < -1 {
                return self.rotate(a, b, c);
            }
        }
        a
    }

    /// Promotes `up`, a child of `a`, into the place of `a`. `a` keeps its
    /// other child `keep` and adopts the shorter child of `up`.
    fn rotate(&mut self, a: usize, up: usize, keep: usize) -> usize {
        let (f, g) = match self.nodes[up].node_type {
            BVHNodeType::Parent(f, g) => (f, g),
            BVHNodeType::Leaf(_) => return a,
        };

        let parent = self.nodes[a].parent;
        self.nodes[up].parent = parent;
        self.nodes[a].parent = up;
        if self.root == a {
            self.root = up;
        } else {
            self.replace_child(parent, a, up);
        }

        let (stay, moved) = if self.nodes[f].height > self.nodes[g].height {
            (f, g)
        } else {
            (g, f)
        };
        self.nodes[up].node_type = BVHNodeType::Parent(a, stay);
        self.nodes[a].node_type = BVHNodeType::Parent(keep, moved);
        self.nodes[moved].parent = a;
        self.refresh(a);
        self.refresh(up);
        up
    }

    /// Recomputes every bound without changing the topology. Leaf bounds come
    /// from `leaf_bounds`; parents are rebuilt from their children.
    pub fn refit<F: FnMut(V) -> B>(&mut self, mut leaf_bounds: F) {
        if self.nodes.is_empty() {
            return;
        }
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by_key(|&i| self.nodes[i].height);
        for i in order {
            match self.nodes[i].node_type {
                BVHNodeType::Leaf(val) => self.nodes[i].bounds = leaf_bounds(val),
                BVHNodeType::Parent(child1, child2) => {
                    self.nodes[i].bounds =
                        B::combine(&self.nodes[child1].bounds, &self.nodes[child2].bounds)
                }
            }
        }
    }

    /// Calls `callback` with the value of every leaf whose bounds overlap
    /// `query`. Returns whether any leaf did.
    pub fn query<Q, F>(&self, query: &Q, mut callback: F) -> bool
    where
        Q: Overlaps<B>,
        F: FnMut(V),
    {
        if self.is_empty() {
            return false;
        }
        let mut stack = SmallVec::<[usize; 64]>::new();
        stack.push(self.root);
        let mut collided = false;
        while let Some(top) = stack.pop() {
            let node = &self.nodes[top];
            if query.overlaps(&node.bounds) {
                match node.node_type {
                    BVHNodeType::Leaf(val) => {
                        collided = true;
                        callback(val);
                    }
                    BVHNodeType::Parent(lchild, rchild) => {
                        stack.push(lchild);
                        stack.push(rchild);
                    }
                }
            }
        }
        collided
    }
}

impl<B: Bound, V: Copy> Default for BVH<B, V> {
    fn default() -> Self {
        BVH::new()
    }
}

impl<V: Copy> BVH<AABB, V> {
    /// Walks this tree and `other` simultaneously, calling `callback` for
    /// every pair of leaves whose bounds overlap. `other_to_self` maps the
    /// frame of `other` into the frame of this tree.
    pub fn query_pairs<F>(&self, other: &BVH<AABB, V>, other_to_self: &Pose, mut callback: F) -> bool
    where
        F: FnMut(V, V),
    {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        let mut stack = SmallVec::<[(usize, usize); 64]>::new();
        stack.push((self.root, other.root));
        let mut collided = false;
        while let Some((i, j)) = stack.pop() {
            let a = &self.nodes[i];
            let b = &other.nodes[j];
            if !OBB::from_aabb(&b.bounds, other_to_self).overlaps(&a.bounds) {
                continue;
            }
            match (a.node_type, b.node_type) {
                (BVHNodeType::Leaf(va), BVHNodeType::Leaf(vb)) => {
                    collided = true;
                    callback(va, vb);
                }
                (BVHNodeType::Parent(l, r), BVHNodeType::Leaf(_)) => {
                    stack.push((l, j));
                    stack.push((r, j));
                }
                (BVHNodeType::Leaf(_), BVHNodeType::Parent(l, r)) => {
                    stack.push((i, l));
                    stack.push((i, r));
                }
                (BVHNodeType::Parent(al, ar), BVHNodeType::Parent(bl, br)) => {
                    // Split the larger volume first.
                    if a.bounds.surface_area() >= b.bounds.surface_area() {
                        stack.push((al, j));
                        stack.push((ar, j));
                    } else {
                        stack.push((i, bl));
                        stack.push((i, br));
                    }
                }
            }
        }
        collided
    }
}
