use crate::checkpoint::{Mapping, Node};
use std::collections::VecDeque;

/// Breadth-first search for `key` through nested maps.
///
/// Every map at one depth is checked, in iteration order, before any map one
/// level deeper, so a shallow match always beats a deeper one and ties at the
/// same depth go to the earlier sibling. A stored `null` is returned as a
/// match; `None` only means the key is absent everywhere.
pub fn find_key<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a Node> {
    let mut queue = VecDeque::from([mapping]);

    while let Some(current) = queue.pop_front() {
        if let Some(found) = current.get(key) {
            return Some(found);
        }
        queue.extend(current.iter().filter_map(|(_, node)| node.as_map()));
    }

    None
}
