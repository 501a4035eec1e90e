//! Path segments and the PathTree coalescing structure.
//!
//! A path is a sequence of segments from the document root. `PathTree`
//! collects the paths touched by a burst of mutations into the minimal
//! covering set: inserting a path subsumes anything already recorded below
//! it, and is itself a no-op if an ancestor is already present.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel `Index` value standing in for the schema-only `#` wildcard:
/// "every array element", never a concrete element in a mutation or
/// diff path.
pub const ARRAY_WILDCARD: usize = usize::MAX;

/// One step from a parent value into a child: an object key or an array
/// index. The object-key wildcard is the literal key `"*"`; the array
/// wildcard is [`ARRAY_WILDCARD`]; neither appears in a concrete
/// mutation or diff path, only in schema-derived date paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    pub fn key(s: impl Into<String>) -> Self {
        PathSegment::Key(s.into())
    }

    pub fn index(i: usize) -> Self {
        PathSegment::Index(i)
    }
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{k}"),
            PathSegment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

pub type Path = Vec<PathSegment>;

#[derive(Debug, Default)]
struct Node {
    /// `true` if a path terminates exactly here (this node is an endpoint,
    /// not merely an ancestor of one).
    endpoint: bool,
    children: HashMap<PathSegment, Node>,
}

/// Prefix trie over mutation paths; see PathTree and testable
/// properties 3 & 4 (minimality, permutation invariance).
#[derive(Debug, Default)]
pub struct PathTree {
    root: Node,
}

impl PathTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty() && !self.root.endpoint
    }

    /// Insert `path`. If an ancestor of `path` is already an endpoint, this
    /// is a no-op. Otherwise any descendants of `path` are pruned and
    /// `path` becomes the new endpoint.
    pub fn add(&mut self, path: &[PathSegment]) {
        Self::add_at(&mut self.root, path);
    }

    fn add_at(node: &mut Node, path: &[PathSegment]) {
        if node.endpoint {
            // An ancestor already covers this mutation.
            return;
        }
        match path.split_first() {
            None => {
                // This path terminates here: subsume every descendant.
                node.endpoint = true;
                node.children.clear();
            }
            Some((head, rest)) => {
                let child = node.children.entry(head.clone()).or_default();
                Self::add_at(child, rest);
            }
        }
    }

    /// The minimal covering set of endpoint paths, in a deterministic
    /// (lexicographic-by-insertion-independent) order: depth-first, with
    /// children visited in an order derived from sorting their segment's
    /// display form. This keeps `paths()` stable for a given multiset of
    /// inserted paths regardless of insertion order (property 4).
    pub fn paths(&self) -> Vec<Path> {
        let mut out = Vec::new();
        Self::collect(&self.root, &mut Vec::new(), &mut out);
        out
    }

    fn collect(node: &Node, prefix: &mut Path, out: &mut Vec<Path>) {
        if node.endpoint {
            out.push(prefix.clone());
            return;
        }
        let mut keys: Vec<&PathSegment> = node.children.keys().collect();
        keys.sort_by_key(|s| s.to_string());
        for key in keys {
            let child = &node.children[key];
            prefix.push(key.clone());
            Self::collect(child, prefix, out);
            prefix.pop();
        }
    }

    pub fn clear(&mut self) {
        self.root = Node::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(segs: &[&str]) -> Path {
        segs.iter().map(|s| PathSegment::key(*s)).collect()
    }

    #[test]
    fn parent_subsumes_child() {
        let mut t = PathTree::new();
        t.add(&p(&["a", "b"]));
        t.add(&p(&["a"]));
        assert_eq!(t.paths(), vec![p(&["a"])]);
    }

    #[test]
    fn child_after_parent_is_noop() {
        let mut t = PathTree::new();
        t.add(&p(&["a"]));
        t.add(&p(&["a", "b"]));
        assert_eq!(t.paths(), vec![p(&["a"])]);
    }

    #[test]
    fn disjoint_paths_both_kept() {
        let mut t = PathTree::new();
        t.add(&p(&["a"]));
        t.add(&p(&["b"]));
        let mut paths = t.paths();
        paths.sort_by_key(|p| p[0].to_string());
        assert_eq!(paths, vec![p(&["a"]), p(&["b"])]);
    }

    #[test]
    fn permutation_invariant() {
        let mut t1 = PathTree::new();
        t1.add(&p(&["x", "y"]));
        t1.add(&p(&["x", "z"]));
        t1.add(&p(&["w"]));

        let mut t2 = PathTree::new();
        t2.add(&p(&["w"]));
        t2.add(&p(&["x", "z"]));
        t2.add(&p(&["x", "y"]));

        assert_eq!(t1.paths(), t2.paths());
    }

    #[test]
    fn no_ancestor_descendant_pairs_survive() {
        let mut t = PathTree::new();
        for path in [
            p(&["a", "b", "c"]),
            p(&["a", "b"]),
            p(&["d"]),
            p(&["a", "b", "e"]),
        ] {
            t.add(&path);
        }
        let paths = t.paths();
        for (i, pi) in paths.iter().enumerate() {
            for (j, pj) in paths.iter().enumerate() {
                if i == j {
                    continue;
                }
                let shorter_is_prefix = pi.len() <= pj.len() && pi[..] == pj[..pi.len()];
                assert!(!shorter_is_prefix, "{:?} prefixes {:?}", pi, pj);
            }
        }
    }

    fn no_prefix_pairs(paths: &[Path]) -> bool {
        for (i, pi) in paths.iter().enumerate() {
            for (j, pj) in paths.iter().enumerate() {
                if i != j && pi.len() <= pj.len() && pi[..] == pj[..pi.len()] {
                    return false;
                }
            }
        }
        true
    }

    fn path_strategy() -> impl Strategy<Value = Path> {
        proptest::collection::vec("[a-c]", 1..4)
            .prop_map(|segs| segs.into_iter().map(PathSegment::key).collect())
    }

    proptest! {
        /// Property 4: whatever order a batch of paths is inserted in, the
        /// resulting covering set is the same and contains no
        /// ancestor/descendant pair.
        #[test]
        fn permutation_invariant_and_minimal(
            paths in proptest::collection::vec(path_strategy(), 1..10),
            perm_seed in 0u64..10_000,
        ) {
            let mut shuffled = paths.clone();
            // deterministic pseudo-shuffle, not a correctness-relevant RNG
            for i in (1..shuffled.len()).rev() {
                let j = (perm_seed as usize).wrapping_mul(2654435761).wrapping_add(i) % (i + 1);
                shuffled.swap(i, j);
            }

            let mut t1 = PathTree::new();
            for p in &paths {
                t1.add(p);
            }
            let mut t2 = PathTree::new();
            for p in &shuffled {
                t2.add(p);
            }

            prop_assert_eq!(t1.paths(), t2.paths());
            prop_assert!(no_prefix_pairs(&t1.paths()));
        }
    }
}
