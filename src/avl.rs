//! Persistent AVL tree keyed by hash
//!
//! Each bucket of a [`PersistentMap`](crate::PersistentMap) is one of these
//! trees. Nodes are immutable and shared through `Arc`; an insert copies
//! only the O(log n) nodes on the path to the insertion point and reuses
//! every untouched subtree. Keys whose hashes collide are chained in an
//! ordered side-list on the node that owns the hash.

use std::sync::Arc;

pub(crate) type Tree<K, V> = Option<Arc<Node<K, V>>>;

#[derive(Clone)]
pub(crate) struct Entry<K, V> {
    hash: u64,
    key: K,
    value: V,
    /// Different keys with the same hash, in insertion order
    collisions: Option<Arc<Vec<(K, V)>>>,
}

pub(crate) struct Node<K, V> {
    entry: Entry<K, V>,
    height: u32,
    left: Tree<K, V>,
    right: Tree<K, V>,
}

/// How an insert treats an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertMode {
    /// Leave the existing value in place
    AddOnly,
    /// Overwrite the existing value
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    Added,
    Replaced,
    /// Key present and mode was `AddOnly`; the returned tree is the input tree
    Existing,
}

#[inline]
pub(crate) fn height<K, V>(tree: &Tree<K, V>) -> u32 {
    tree.as_ref().map_or(0, |n| n.height)
}

/// Find `key` (with precomputed `hash`) in the tree.
pub(crate) fn find<'a, K: Eq, V>(tree: &'a Tree<K, V>, hash: u64, key: &K) -> Option<&'a V> {
    let mut current = tree.as_ref();
    while let Some(node) = current {
        if hash < node.entry.hash {
            current = node.left.as_ref();
        } else if hash > node.entry.hash {
            current = node.right.as_ref();
        } else {
            if node.entry.key == *key {
                return Some(&node.entry.value);
            }
            return node
                .entry
                .collisions
                .as_ref()?
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v);
        }
    }
    None
}

/// Insert into the tree, returning the new root.
pub(crate) fn insert<K: Eq + Clone, V: Clone>(
    tree: &Tree<K, V>,
    hash: u64,
    key: K,
    value: V,
    mode: InsertMode,
) -> (Tree<K, V>, InsertOutcome) {
    let Some(node) = tree else {
        let entry = Entry {
            hash,
            key,
            value,
            collisions: None,
        };
        return (Some(make(entry, None, None)), InsertOutcome::Added);
    };

    if hash < node.entry.hash {
        let (left, outcome) = insert(&node.left, hash, key, value, mode);
        if outcome == InsertOutcome::Existing {
            return (tree.clone(), outcome);
        }
        let root = balance(node.entry.clone(), left, node.right.clone());
        return (Some(root), outcome);
    }

    if hash > node.entry.hash {
        let (right, outcome) = insert(&node.right, hash, key, value, mode);
        if outcome == InsertOutcome::Existing {
            return (tree.clone(), outcome);
        }
        let root = balance(node.entry.clone(), node.left.clone(), right);
        return (Some(root), outcome);
    }

    // Same hash: the primary entry, a collision, or a new collision.
    let mut entry = node.entry.clone();
    let outcome = if entry.key == key {
        if mode == InsertMode::AddOnly {
            return (tree.clone(), InsertOutcome::Existing);
        }
        entry.value = value;
        InsertOutcome::Replaced
    } else {
        let mut collisions = entry
            .collisions
            .as_ref()
            .map(|c| c.as_ref().clone())
            .unwrap_or_default();
        let outcome = match collisions.iter().position(|(k, _)| *k == key) {
            Some(_) if mode == InsertMode::AddOnly => {
                return (tree.clone(), InsertOutcome::Existing);
            }
            Some(index) => {
                collisions[index].1 = value;
                InsertOutcome::Replaced
            }
            None => {
                collisions.push((key, value));
                InsertOutcome::Added
            }
        };
        entry.collisions = Some(Arc::new(collisions));
        outcome
    };

    let root = make(entry, node.left.clone(), node.right.clone());
    (Some(root), outcome)
}

/// Visit every entry in hash order (collisions after their primary).
pub(crate) fn for_each<K, V>(tree: &Tree<K, V>, f: &mut impl FnMut(u64, &K, &V)) {
    if let Some(node) = tree {
        for_each(&node.left, f);
        f(node.entry.hash, &node.entry.key, &node.entry.value);
        if let Some(collisions) = &node.entry.collisions {
            for (k, v) in collisions.iter() {
                f(node.entry.hash, k, v);
            }
        }
        for_each(&node.right, f);
    }
}

#[inline]
fn make<K, V>(entry: Entry<K, V>, left: Tree<K, V>, right: Tree<K, V>) -> Arc<Node<K, V>> {
    let height = 1 + height(&left).max(height(&right));
    Arc::new(Node {
        entry,
        height,
        left,
        right,
    })
}

/// Rebuild a node, rotating when the child heights differ by more than one.
fn balance<K: Clone, V: Clone>(
    entry: Entry<K, V>,
    left: Tree<K, V>,
    right: Tree<K, V>,
) -> Arc<Node<K, V>> {
    let hl = height(&left);
    let hr = height(&right);

    if hl > hr + 1 {
        if let Some(l) = left.clone() {
            if height(&l.left) >= height(&l.right) {
                // single right rotation
                let new_right = make(entry, l.right.clone(), right);
                return make(l.entry.clone(), l.left.clone(), Some(new_right));
            }
            if let Some(lr) = l.right.clone() {
                // left-right double rotation
                let new_left = make(l.entry.clone(), l.left.clone(), lr.left.clone());
                let new_right = make(entry, lr.right.clone(), right);
                return make(lr.entry.clone(), Some(new_left), Some(new_right));
            }
        }
    } else if hr > hl + 1 {
        if let Some(r) = right.clone() {
            if height(&r.right) >= height(&r.left) {
                // single left rotation
                let new_left = make(entry, left, r.left.clone());
                return make(r.entry.clone(), Some(new_left), r.right.clone());
            }
            if let Some(rl) = r.left.clone() {
                // right-left double rotation
                let new_left = make(entry, left, rl.left.clone());
                let new_right = make(r.entry.clone(), rl.right.clone(), r.right.clone());
                return make(rl.entry.clone(), Some(new_left), Some(new_right));
            }
        }
    }

    make(entry, left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(hashes: impl IntoIterator<Item = u64>) -> Tree<u64, u64> {
        let mut tree = None;
        for h in hashes {
            let (next, outcome) = insert(&tree, h, h, h * 10, InsertMode::AddOnly);
            assert_eq!(outcome, InsertOutcome::Added);
            tree = next;
        }
        tree
    }

    fn assert_balanced<K, V>(tree: &Tree<K, V>) -> u32 {
        match tree {
            None => 0,
            Some(node) => {
                let hl = assert_balanced(&node.left);
                let hr = assert_balanced(&node.right);
                assert!(hl.abs_diff(hr) <= 1, "unbalanced node");
                assert_eq!(node.height, 1 + hl.max(hr));
                node.height
            }
        }
    }

    #[test]
    fn test_sequential_inserts_stay_balanced() {
        let tree = build(0..1000);
        let h = assert_balanced(&tree);
        // AVL height bound: 1.44 * log2(n + 2)
        assert!(h <= 15, "height {h} too large");
        for i in 0..1000 {
            assert_eq!(find(&tree, i, &i), Some(&(i * 10)));
        }
        assert_eq!(find(&tree, 5000, &5000), None);
    }

    #[test]
    fn test_double_rotations() {
        let tree = build([30, 10, 20]);
        assert_balanced(&tree);
        let tree = build([10, 30, 20]);
        assert_balanced(&tree);
        assert_eq!(tree.as_ref().unwrap().entry.hash, 20);
    }

    #[test]
    fn test_insert_does_not_mutate_previous_version() {
        let v1 = build([1, 2, 3]);
        let (v2, _) = insert(&v1, 4, 4, 40, InsertMode::AddOnly);
        let (v3, outcome) = insert(&v2, 2, 2, 99, InsertMode::Replace);
        assert_eq!(outcome, InsertOutcome::Replaced);

        assert_eq!(find(&v1, 4, &4), None);
        assert_eq!(find(&v1, 2, &2), Some(&20));
        assert_eq!(find(&v2, 2, &2), Some(&20));
        assert_eq!(find(&v3, 2, &2), Some(&99));
    }

    #[test]
    fn test_add_only_keeps_existing() {
        let v1 = build([7]);
        let (v2, outcome) = insert(&v1, 7, 7, 1, InsertMode::AddOnly);
        assert_eq!(outcome, InsertOutcome::Existing);
        assert!(Arc::ptr_eq(v1.as_ref().unwrap(), v2.as_ref().unwrap()));
    }

    #[test]
    fn test_hash_collisions_use_side_list() {
        let mut tree: Tree<&str, u32> = None;
        for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
            let (next, outcome) = insert(&tree, 42, key, i as u32, InsertMode::AddOnly);
            assert_eq!(outcome, InsertOutcome::Added);
            tree = next;
        }
        assert_eq!(height(&tree), 1);
        assert_eq!(find(&tree, 42, &"a"), Some(&0));
        assert_eq!(find(&tree, 42, &"c"), Some(&2));
        assert_eq!(find(&tree, 42, &"d"), None);

        let (tree, outcome) = insert(&tree, 42, "b", 9, InsertMode::Replace);
        assert_eq!(outcome, InsertOutcome::Replaced);
        assert_eq!(find(&tree, 42, &"b"), Some(&9));

        let mut seen = Vec::new();
        for_each(&tree, &mut |_, k, v| seen.push((*k, *v)));
        assert_eq!(seen, vec![("a", 0), ("b", 9), ("c", 2)]);
    }
}
