use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Key used for a child whose dimension value is missing.
///
/// Real dimension values are never rendered as `None`, so this key cannot collide
/// with the key of a row that has a value.
pub const NULL_KEY: &str = "null";

/// A keyed, ordered multi-way tree that keeps the top children per level.
///
/// Every level of the tree holds the rows of one drill-down stage. Rows are attached
/// by path, then `prune_by_level` sorts the children of every node and keeps only the
/// configured number of them, level by level.
///
/// Only the root has no `data`. Children are stored as `(key, node)` pairs in a `Vec`
/// so that the order established by sorting is the order seen by `flatten` and
/// `to_nested`. Before the first prune the order is insertion order, which carries
/// no meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingTree<T> {
    data: Option<T>,
    children: Vec<(String, RankingTree<T>)>,
}

/// Serializable shape of a `RankingTree`, returned to callers once drill-down is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedNode<T> {
    pub data: Option<T>,
    pub children: Vec<NestedNode<T>>,
}

impl<T> Default for RankingTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RankingTree<T> {
    /// Create the root of a tree, which holds no data.
    pub fn new() -> Self {
        Self {
            data: None,
            children: Vec::new(),
        }
    }

    pub fn with_data(data: T) -> Self {
        Self {
            data: Some(data),
            children: Vec::new(),
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child(&self, key: &str) -> Option<&RankingTree<T>> {
        self.children
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, child)| child)
    }

    /// Keys of the direct children, in current order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(k, _)| k.as_str())
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &RankingTree<T>)> {
        self.children.iter().map(|(k, child)| (k.as_str(), child))
    }

    /// Number of nodes carrying data in this subtree, including this node.
    pub fn node_count(&self) -> usize {
        let own = usize::from(self.data.is_some());
        own + self
            .children
            .iter()
            .map(|(_, child)| child.node_count())
            .sum::<usize>()
    }

    /// Attach `data` under the node resolved by walking `path` from this node.
    ///
    /// Each segment of `path` selects a child by key. When a segment has no matching
    /// child, the walk stops and the new node is attached to the last node reached,
    /// so a short or malformed path never fails.
    ///
    /// `key` falls back to `NULL_KEY` when absent. Inserting a key that already exists
    /// under the resolved parent replaces that child in place, dropping its subtree.
    ///
    /// Returns the created node.
    pub fn insert<K: AsRef<str>>(
        &mut self,
        data: T,
        key: Option<&str>,
        path: &[K],
    ) -> &mut RankingTree<T> {
        let mut node = self;

        for segment in path {
            match node
                .children
                .iter()
                .position(|(k, _)| k == segment.as_ref())
            {
                Some(index) => node = &mut node.children[index].1,
                None => break,
            }
        }

        let key = key.unwrap_or(NULL_KEY);
        let child = RankingTree::with_data(data);

        let index = match node.children.iter().position(|(k, _)| k == key) {
            Some(index) => {
                node.children[index].1 = child;
                index
            }
            None => {
                node.children.push((key.to_string(), child));
                node.children.len() - 1
            }
        };

        &mut node.children[index].1
    }

    /// Sort and truncate children level by level.
    ///
    /// `sizes[0]` is the number of children kept at this node, `sizes[1]` the number kept
    /// under each surviving child, and so on. `None`, or a level beyond the end of
    /// `sizes`, keeps every child. `compare` returns `Ordering::Less` when the first
    /// payload ranks before the second. Sorting is stable, so ties keep their current
    /// order.
    ///
    /// Running it again with the same `compare` and `sizes` changes nothing.
    pub fn prune_by_level<F>(&mut self, compare: &mut F, sizes: &[Option<usize>])
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        if self.children.is_empty() {
            return;
        }

        let (size, rest) = match sizes.split_first() {
            Some((size, rest)) => (*size, rest),
            None => (None, sizes),
        };

        self.children
            .sort_by(|(_, a), (_, b)| match (a.data.as_ref(), b.data.as_ref()) {
                (Some(a), Some(b)) => compare(a, b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });

        if let Some(size) = size {
            self.children.truncate(size);
        }

        for (_, child) in self.children.iter_mut() {
            child.prune_by_level(compare, rest);
        }
    }

    /// Own data followed by the depth-first flattening of every child, in current order.
    pub fn flatten(&self) -> Vec<&T> {
        let mut out = Vec::with_capacity(self.node_count());
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into<'a>(&'a self, out: &mut Vec<&'a T>) {
        if let Some(data) = self.data.as_ref() {
            out.push(data);
        }

        for (_, child) in self.children.iter() {
            child.flatten_into(out);
        }
    }

    pub fn to_nested(&self) -> NestedNode<T>
    where
        T: Clone,
    {
        NestedNode {
            data: self.data.clone(),
            children: self
                .children
                .iter()
                .map(|(_, child)| child.to_nested())
                .collect(),
        }
    }

    /// Consume the tree into its nested shape.
    pub fn into_nested(self) -> NestedNode<T> {
        NestedNode {
            data: self.data,
            children: self
                .children
                .into_iter()
                .map(|(_, child)| child.into_nested())
                .collect(),
        }
    }
}

impl<T> NestedNode<T> {
    /// Number of nodes carrying data, including this one.
    pub fn node_count(&self) -> usize {
        usize::from(self.data.is_some())
            + self
                .children
                .iter()
                .map(|child| child.node_count())
                .sum::<usize>()
    }
}
