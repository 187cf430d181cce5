//! Volume hierarchies over moving boxes.
//!
//! Determinism contract shared by every implementation:
//! - pair identity is canonicalised as `(min_key, max_key)`;
//! - pair lists and query results are sorted ascending;
//! - overlap is inclusive on faces.
//!
//! [`SimpleVbh`] is the all-pairs baseline. [`TreeVbh`] is a dynamic AABB
//! tree (perimeter-cost sibling choice, sibling promotion on removal); the
//! world uses it for the entity broadphase when configured to, and always for
//! the body set of each top entity.

use std::collections::BTreeMap;

use crate::types::Aabb;

/// Keyed box set that reports overlapping pairs.
pub trait Vbh<K: Copy + Ord> {
    /// Insert or move the proxy for `key`.
    fn upsert(&mut self, key: K, aabb: Aabb);
    /// Remove a proxy; returns whether it was present.
    fn remove(&mut self, key: K) -> bool;
    fn get(&self, key: K) -> Option<Aabb>;
    /// Keys whose boxes intersect `aabb`, sorted.
    fn query(&self, aabb: &Aabb) -> Vec<K>;
    /// Canonical, sorted list of overlapping pairs.
    fn collisions(&self) -> Vec<(K, K)>;
    /// Union of every proxy.
    fn bounds(&self) -> Option<Aabb>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// SimpleVbh
// ---------------------------------------------------------------------------

/// All-pairs reference hierarchy. `O(n^2)` pairs, `O(n)` queries.
#[derive(Clone, Debug)]
pub struct SimpleVbh<K> {
    items: BTreeMap<K, Aabb>,
}

impl<K> Default for SimpleVbh<K> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }
}

impl<K: Copy + Ord> SimpleVbh<K> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: Copy + Ord> Vbh<K> for SimpleVbh<K> {
    fn upsert(&mut self, key: K, aabb: Aabb) {
        self.items.insert(key, aabb);
    }

    fn remove(&mut self, key: K) -> bool {
        self.items.remove(&key).is_some()
    }

    fn get(&self, key: K) -> Option<Aabb> {
        self.items.get(&key).copied()
    }

    fn query(&self, aabb: &Aabb) -> Vec<K> {
        self.items
            .iter()
            .filter(|(_, b)| b.intersects(aabb))
            .map(|(k, _)| *k)
            .collect()
    }

    fn collisions(&self) -> Vec<(K, K)> {
        let items: Vec<(K, Aabb)> = self.items.iter().map(|(k, b)| (*k, *b)).collect();
        let mut out = Vec::new();
        for (i, (a, a_bb)) in items.iter().enumerate() {
            for (b, b_bb) in items.iter().skip(i + 1) {
                if a_bb.intersects(b_bb) {
                    out.push((*a, *b));
                }
            }
        }
        out
    }

    fn bounds(&self) -> Option<Aabb> {
        self.items.values().copied().reduce(|a, b| a.union(&b))
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

// ---------------------------------------------------------------------------
// TreeVbh
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
enum NodeKind<K> {
    Leaf(K),
    Branch([usize; 2]),
    Free,
}

#[derive(Clone, Debug)]
struct Node<K> {
    aabb: Aabb,
    parent: Option<usize>,
    kind: NodeKind<K>,
}

/// Dynamic binary AABB tree.
#[derive(Clone, Debug)]
pub struct TreeVbh<K> {
    nodes: Vec<Node<K>>,
    free: Vec<usize>,
    root: Option<usize>,
    leaves: BTreeMap<K, usize>,
}

impl<K> Default for TreeVbh<K> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            leaves: BTreeMap::new(),
        }
    }
}

impl<K: Copy + Ord> TreeVbh<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.leaves.keys().copied()
    }

    /// Pairs `(mine, theirs)` where `map(my box)` intersects one of `other`'s
    /// boxes. `map` moves this tree's boxes into `other`'s frame.
    pub fn collide_vbh<K2: Copy + Ord>(
        &self,
        other: &TreeVbh<K2>,
        map: impl Fn(&Aabb) -> Aabb,
    ) -> Vec<(K, K2)> {
        let mut out = Vec::new();
        for (key, &leaf) in &self.leaves {
            let probe = map(&self.nodes[leaf].aabb);
            for hit in other.query(&probe) {
                out.push((*key, hit));
            }
        }
        out
    }

    fn alloc(&mut self, node: Node<K>) -> usize {
        if let Some(i) = self.free.pop() {
            self.nodes[i] = node;
            i
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, i: usize) {
        self.nodes[i].kind = NodeKind::Free;
        self.nodes[i].parent = None;
        self.free.push(i);
    }

    fn replace_child(&mut self, parent: usize, old: usize, new: usize) {
        if let NodeKind::Branch(children) = &mut self.nodes[parent].kind {
            for c in children.iter_mut() {
                if *c == old {
                    *c = new;
                }
            }
        }
    }

    fn refit(&mut self, mut at: Option<usize>) {
        while let Some(i) = at {
            if let NodeKind::Branch([l, r]) = self.nodes[i].kind {
                self.nodes[i].aabb = self.nodes[l].aabb.union(&self.nodes[r].aabb);
            }
            at = self.nodes[i].parent;
        }
    }

    fn child_cost(&self, child: usize, aabb: &Aabb, inherited: f64) -> f64 {
        let node = &self.nodes[child];
        let grown = node.aabb.union(aabb).perimeter();
        match node.kind {
            NodeKind::Leaf(_) => grown + inherited,
            _ => grown - node.aabb.perimeter() + inherited,
        }
    }

    fn insert_leaf(&mut self, leaf: usize) {
        let Some(root) = self.root else {
            self.nodes[leaf].parent = None;
            self.root = Some(leaf);
            return;
        };
        let aabb = self.nodes[leaf].aabb;

        let mut at = root;
        while let NodeKind::Branch([l, r]) = self.nodes[at].kind {
            let here = self.nodes[at].aabb;
            let combined = here.union(&aabb).perimeter();
            let cost_here = 2.0 * combined;
            let inherited = 2.0 * (combined - here.perimeter());
            let cost_l = self.child_cost(l, &aabb, inherited);
            let cost_r = self.child_cost(r, &aabb, inherited);
            if cost_here < cost_l && cost_here < cost_r {
                break;
            }
            at = if cost_l <= cost_r { l } else { r };
        }

        let sibling = at;
        let old_parent = self.nodes[sibling].parent;
        let branch = self.alloc(Node {
            aabb: self.nodes[sibling].aabb.union(&aabb),
            parent: old_parent,
            kind: NodeKind::Branch([sibling, leaf]),
        });
        self.nodes[sibling].parent = Some(branch);
        self.nodes[leaf].parent = Some(branch);
        match old_parent {
            Some(p) => {
                self.replace_child(p, sibling, branch);
                self.refit(Some(p));
            }
            None => self.root = Some(branch),
        }
    }

    fn remove_leaf(&mut self, leaf: usize) {
        if self.root == Some(leaf) {
            self.root = None;
            return;
        }
        let Some(parent) = self.nodes[leaf].parent else {
            return;
        };
        let NodeKind::Branch([a, b]) = self.nodes[parent].kind else {
            return;
        };
        let sibling = if a == leaf { b } else { a };
        let grand = self.nodes[parent].parent;
        self.nodes[sibling].parent = grand;
        match grand {
            Some(g) => {
                self.replace_child(g, parent, sibling);
                self.refit(Some(g));
            }
            None => self.root = Some(sibling),
        }
        self.release(parent);
    }
}

impl<K: Copy + Ord> Vbh<K> for TreeVbh<K> {
    fn upsert(&mut self, key: K, aabb: Aabb) {
        if let Some(&leaf) = self.leaves.get(&key) {
            if self.nodes[leaf].aabb == aabb {
                return;
            }
            self.remove_leaf(leaf);
            self.nodes[leaf].aabb = aabb;
            self.insert_leaf(leaf);
            return;
        }
        let leaf = self.alloc(Node {
            aabb,
            parent: None,
            kind: NodeKind::Leaf(key),
        });
        self.leaves.insert(key, leaf);
        self.insert_leaf(leaf);
    }

    fn remove(&mut self, key: K) -> bool {
        let Some(leaf) = self.leaves.remove(&key) else {
            return false;
        };
        self.remove_leaf(leaf);
        self.release(leaf);
        true
    }

    fn get(&self, key: K) -> Option<Aabb> {
        self.leaves.get(&key).map(|&i| self.nodes[i].aabb)
    }

    fn query(&self, aabb: &Aabb) -> Vec<K> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.root.into_iter().collect();
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            if !node.aabb.intersects(aabb) {
                continue;
            }
            match node.kind {
                NodeKind::Leaf(k) => out.push(k),
                NodeKind::Branch([l, r]) => {
                    stack.push(l);
                    stack.push(r);
                }
                NodeKind::Free => {}
            }
        }
        out.sort_unstable();
        out
    }

    fn collisions(&self) -> Vec<(K, K)> {
        let mut out = Vec::new();
        for (key, &leaf) in &self.leaves {
            for hit in self.query(&self.nodes[leaf].aabb) {
                if hit > *key {
                    out.push((*key, hit));
                }
            }
        }
        out
    }

    fn bounds(&self) -> Option<Aabb> {
        self.root.map(|r| self.nodes[r].aabb)
    }

    fn len(&self) -> usize {
        self.leaves.len()
    }
}

// ---------------------------------------------------------------------------
// SpatialIndex
// ---------------------------------------------------------------------------

/// Broadphase selected by [`crate::WorldConfig::use_tree_index`].
#[derive(Clone, Debug)]
pub enum SpatialIndex<K> {
    Simple(SimpleVbh<K>),
    Tree(TreeVbh<K>),
}

impl<K: Copy + Ord> SpatialIndex<K> {
    pub fn new(use_tree: bool) -> Self {
        if use_tree {
            SpatialIndex::Tree(TreeVbh::new())
        } else {
            SpatialIndex::Simple(SimpleVbh::new())
        }
    }

    fn inner(&self) -> &dyn Vbh<K> {
        match self {
            SpatialIndex::Simple(v) => v,
            SpatialIndex::Tree(v) => v,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Vbh<K> {
        match self {
            SpatialIndex::Simple(v) => v,
            SpatialIndex::Tree(v) => v,
        }
    }
}

impl<K: Copy + Ord> Vbh<K> for SpatialIndex<K> {
    fn upsert(&mut self, key: K, aabb: Aabb) {
        self.inner_mut().upsert(key, aabb)
    }
    fn remove(&mut self, key: K) -> bool {
        self.inner_mut().remove(key)
    }
    fn get(&self, key: K) -> Option<Aabb> {
        self.inner().get(key)
    }
    fn query(&self, aabb: &Aabb) -> Vec<K> {
        self.inner().query(aabb)
    }
    fn collisions(&self) -> Vec<(K, K)> {
        self.inner().collisions()
    }
    fn bounds(&self) -> Option<Aabb> {
        self.inner().bounds()
    }
    fn len(&self) -> usize {
        self.inner().len()
    }
}
