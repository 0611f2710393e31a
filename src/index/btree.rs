//! B-Tree
//!
//! A classic in-memory B-Tree of minimum degree `t`: every node except the
//! root holds between `t - 1` and `2t - 1` keys, and all leaves sit at the
//! same depth. Insert splits full nodes on the way down and delete tops up
//! thin nodes on the way down, so both are single-pass and O(log n).

use std::cmp::Ordering;
use std::mem;
use std::ops::{Bound, RangeBounds};

struct Node<K, V> {
    keys: Vec<K>,
    vals: Vec<V>,
    children: Vec<Box<Node<K, V>>>,
}

impl<K, V> Node<K, V> {
    fn new() -> Self {
        Self {
            keys: Vec::new(),
            vals: Vec::new(),
            children: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Ordered map backed by a B-Tree
pub struct BTree<K, V> {
    root: Box<Node<K, V>>,
    min_degree: usize,
    len: usize,
}

impl<K: Ord + Clone, V> BTree<K, V> {
    /// Create an empty tree; degrees below 2 are raised to 2
    pub fn new(min_degree: usize) -> Self {
        Self {
            root: Box::new(Node::new()),
            min_degree: min_degree.max(2),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn min_degree(&self) -> usize {
        self.min_degree
    }

    /// Number of levels (1 for a tree that is a single leaf)
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut node = &self.root;
        while let Some(child) = node.children.first() {
            height += 1;
            node = child;
        }
        height
    }

    pub fn clear(&mut self) {
        self.root = Box::new(Node::new());
        self.len = 0;
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn get(&self, key: &K) -> Option<&V> {
        let mut node = &self.root;
        loop {
            match node.keys.binary_search(key) {
                Ok(i) => return Some(&node.vals[i]),
                Err(i) => {
                    if node.is_leaf() {
                        return None;
                    }
                    node = &node.children[i];
                }
            }
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Insert a key, returning the previous value if the key was present
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let t = self.min_degree;

        if self.root.keys.len() == 2 * t - 1 {
            let old_root = mem::replace(&mut self.root, Box::new(Node::new()));
            self.root.children.push(old_root);
            split_child(&mut self.root, 0, t);
        }

        let previous = insert_non_full(&mut self.root, key, value, t);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Remove a key, returning its value if it was present
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = remove_from(&mut self.root, key, self.min_degree);

        // Shrink height when the root has been emptied by a merge
        if self.root.keys.is_empty() && !self.root.is_leaf() {
            let child = self.root.children.remove(0);
            self.root = child;
        }

        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterate entries whose keys fall within `range`, in ascending key order
    pub fn range<R: RangeBounds<K>>(&self, range: R) -> Range<'_, K, V> {
        let end = match range.end_bound() {
            Bound::Included(k) => Bound::Included(k.clone()),
            Bound::Excluded(k) => Bound::Excluded(k.clone()),
            Bound::Unbounded => Bound::Unbounded,
        };

        let mut stack = Vec::new();
        let mut node: &Node<K, V> = &self.root;
        loop {
            let pos = match range.start_bound() {
                Bound::Included(s) => node.keys.partition_point(|k| k < s),
                Bound::Excluded(s) => node.keys.partition_point(|k| k <= s),
                Bound::Unbounded => 0,
            };
            stack.push((node, pos));
            if node.is_leaf() {
                break;
            }
            node = &node.children[pos];
        }

        Range { stack, end }
    }

    /// Iterate all entries in ascending key order
    pub fn iter(&self) -> Range<'_, K, V> {
        self.range(..)
    }

    /// Smallest key in the tree
    pub fn first_key(&self) -> Option<&K> {
        let mut node = &self.root;
        while let Some(child) = node.children.first() {
            node = child;
        }
        node.keys.first()
    }

    /// Largest key in the tree
    pub fn last_key(&self) -> Option<&K> {
        let mut node = &self.root;
        while let Some(child) = node.children.last() {
            node = child;
        }
        node.keys.last()
    }
}

impl<K: Ord + Clone, V> Default for BTree<K, V> {
    fn default() -> Self {
        Self::new(32)
    }
}

/// Ascending iterator over a key range
pub struct Range<'a, K, V> {
    /// (node, index of the next key to yield once children[index] is done)
    stack: Vec<(&'a Node<K, V>, usize)>,
    end: Bound<K>,
}

impl<'a, K: Ord, V> Range<'a, K, V> {
    fn push_leftmost(&mut self, mut node: &'a Node<K, V>) {
        loop {
            self.stack.push((node, 0));
            match node.children.first() {
                Some(child) => node = child,
                None => break,
            }
        }
    }

    fn within_end(&self, key: &K) -> bool {
        match &self.end {
            Bound::Included(end) => key <= end,
            Bound::Excluded(end) => key < end,
            Bound::Unbounded => true,
        }
    }
}

impl<'a, K: Ord, V> Iterator for Range<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (node, idx) = *self.stack.last()?;
            if idx >= node.keys.len() {
                self.stack.pop();
                continue;
            }

            if let Some(top) = self.stack.last_mut() {
                top.1 += 1;
            }
            if !node.is_leaf() {
                self.push_leftmost(&node.children[idx + 1]);
            }

            let key = &node.keys[idx];
            if !self.within_end(key) {
                self.stack.clear();
                return None;
            }
            return Some((key, &node.vals[idx]));
        }
    }
}

// =============================================================================
// Node Surgery
// =============================================================================

/// Split the full child `i` of `parent` around its median key
fn split_child<K, V>(parent: &mut Node<K, V>, i: usize, t: usize) {
    let child = &mut parent.children[i];

    let right_keys = child.keys.split_off(t);
    let right_vals = child.vals.split_off(t);
    let right_children = if child.is_leaf() {
        Vec::new()
    } else {
        child.children.split_off(t)
    };
    let median_key = child.keys.remove(t - 1);
    let median_val = child.vals.remove(t - 1);

    let right = Box::new(Node {
        keys: right_keys,
        vals: right_vals,
        children: right_children,
    });

    parent.keys.insert(i, median_key);
    parent.vals.insert(i, median_val);
    parent.children.insert(i + 1, right);
}

fn insert_non_full<K: Ord, V>(mut node: &mut Node<K, V>, key: K, value: V, t: usize) -> Option<V> {
    loop {
        let mut i = match node.keys.binary_search(&key) {
            Ok(i) => return Some(mem::replace(&mut node.vals[i], value)),
            Err(i) => i,
        };

        if node.is_leaf() {
            node.keys.insert(i, key);
            node.vals.insert(i, value);
            return None;
        }

        if node.children[i].keys.len() == 2 * t - 1 {
            split_child(node, i, t);
            match key.cmp(&node.keys[i]) {
                Ordering::Greater => i += 1,
                Ordering::Equal => return Some(mem::replace(&mut node.vals[i], value)),
                Ordering::Less => {}
            }
        }
        node = &mut node.children[i];
    }
}

fn remove_from<K: Ord, V>(node: &mut Node<K, V>, key: &K, t: usize) -> Option<V> {
    match node.keys.binary_search(key) {
        Ok(i) if node.is_leaf() => {
            node.keys.remove(i);
            Some(node.vals.remove(i))
        }
        Ok(i) => {
            if node.children[i].keys.len() >= t {
                let (k, v) = pop_max(&mut node.children[i], t);
                node.keys[i] = k;
                Some(mem::replace(&mut node.vals[i], v))
            } else if node.children[i + 1].keys.len() >= t {
                let (k, v) = pop_min(&mut node.children[i + 1], t);
                node.keys[i] = k;
                Some(mem::replace(&mut node.vals[i], v))
            } else {
                merge_children(node, i);
                remove_from(&mut node.children[i], key, t)
            }
        }
        Err(_) if node.is_leaf() => None,
        Err(i) => {
            let i = fill_child(node, i, t);
            remove_from(&mut node.children[i], key, t)
        }
    }
}

/// Remove and return the largest entry of a subtree whose root has at least `t` keys
fn pop_max<K, V>(node: &mut Node<K, V>, t: usize) -> (K, V) {
    if node.is_leaf() {
        let last = node.keys.len() - 1;
        return (node.keys.remove(last), node.vals.remove(last));
    }
    let i = fill_child(node, node.children.len() - 1, t);
    pop_max(&mut node.children[i], t)
}

/// Remove and return the smallest entry of a subtree whose root has at least `t` keys
fn pop_min<K, V>(node: &mut Node<K, V>, t: usize) -> (K, V) {
    if node.is_leaf() {
        return (node.keys.remove(0), node.vals.remove(0));
    }
    let i = fill_child(node, 0, t);
    pop_min(&mut node.children[i], t)
}

/// Make sure child `i` has at least `t` keys before descending into it.
/// Returns the index of the child that now covers the original range.
fn fill_child<K, V>(node: &mut Node<K, V>, i: usize, t: usize) -> usize {
    if node.children[i].keys.len() >= t {
        return i;
    }
    if i > 0 && node.children[i - 1].keys.len() >= t {
        borrow_from_left(node, i);
        return i;
    }
    if i + 1 < node.children.len() && node.children[i + 1].keys.len() >= t {
        borrow_from_right(node, i);
        return i;
    }
    if i + 1 < node.children.len() {
        merge_children(node, i);
        i
    } else {
        merge_children(node, i - 1);
        i - 1
    }
}

fn borrow_from_left<K, V>(node: &mut Node<K, V>, i: usize) {
    let (before, after) = node.children.split_at_mut(i);
    let left = &mut before[i - 1];
    let child = &mut after[0];

    let last = left.keys.len() - 1;
    let up_key = left.keys.remove(last);
    let up_val = left.vals.remove(last);
    let down_key = mem::replace(&mut node.keys[i - 1], up_key);
    let down_val = mem::replace(&mut node.vals[i - 1], up_val);

    child.keys.insert(0, down_key);
    child.vals.insert(0, down_val);
    if !left.is_leaf() {
        let moved = left.children.remove(left.children.len() - 1);
        child.children.insert(0, moved);
    }
}

fn borrow_from_right<K, V>(node: &mut Node<K, V>, i: usize) {
    let (before, after) = node.children.split_at_mut(i + 1);
    let child = &mut before[i];
    let right = &mut after[0];

    let up_key = right.keys.remove(0);
    let up_val = right.vals.remove(0);
    let down_key = mem::replace(&mut node.keys[i], up_key);
    let down_val = mem::replace(&mut node.vals[i], up_val);

    child.keys.push(down_key);
    child.vals.push(down_val);
    if !right.is_leaf() {
        let moved = right.children.remove(0);
        child.children.push(moved);
    }
}

/// Merge child `i + 1` and separator `i` into child `i`
fn merge_children<K, V>(node: &mut Node<K, V>, i: usize) {
    let right = node.children.remove(i + 1);
    let sep_key = node.keys.remove(i);
    let sep_val = node.vals.remove(i);

    let left = &mut node.children[i];
    left.keys.push(sep_key);
    left.vals.push(sep_val);

    let right = *right;
    left.keys.extend(right.keys);
    left.vals.extend(right.vals);
    left.children.extend(right.children);
}
