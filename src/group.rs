/// LiveGrid Grouping Engine
///
/// Converts a flat record sequence into a nested tree of group nodes driven by
/// an ordered list of grouping keys. The tree is what the layout engine draws
/// when the grid is in tree mode: one header row per group node, records as
/// leaves under the innermost groups.
///
/// # Storage
///
/// Group nodes live in a flat arena (`Vec<GroupNode>`) and are referenced by
/// `NodeId`. Every level (the root and each node) owns its ordered child list
/// plus a value → child-index lookup, so re-entering an existing group while
/// building is O(1).
///
/// # Ordering
///
/// Sibling groups keep the order in which their key value was first seen in
/// the input. They are never sorted.
///
/// # Undefined keys
///
/// A record that has no value for the key at some depth is dropped at that
/// branch point, including when the missing key is a nested one: the record
/// is not attached to the parent group either. A composite (array or
/// object) key value is handled the same way. Dropped records are counted
/// in `GroupTree::dropped`.

use crate::value::{FieldValue, GroupKey, Record};
use log::debug;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::rc::Rc;

/// Ordered grouping keys, outermost first. Tree depth equals the key count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupBy {
    keys: Vec<String>,
}

impl GroupBy {
    pub fn new(keys: Vec<String>) -> Self {
        GroupBy { keys }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key used at the given depth, `None` past the innermost level.
    pub fn key_at(&self, depth: usize) -> Option<&str> {
        self.keys.get(depth).map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for GroupBy {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        GroupBy::new(iter.into_iter().map(Into::into).collect())
    }
}

/// Index of a group node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// An entry in a level's child list.
#[derive(Debug, Clone)]
pub enum GroupChild {
    /// A synthetic merge node
    Group(NodeId),
    /// A source record, shared with the provider
    Record(Rc<Record>),
}

impl GroupChild {
    /// True for synthetic group nodes, false for leaf records.
    pub fn is_merge_node(&self) -> bool {
        matches!(self, GroupChild::Group(_))
    }

    pub fn group_id(&self) -> Option<NodeId> {
        match self {
            GroupChild::Group(id) => Some(*id),
            GroupChild::Record(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&Rc<Record>> {
        match self {
            GroupChild::Record(rec) => Some(rec),
            GroupChild::Group(_) => None,
        }
    }
}

/// Ordered children of one tree level with their key lookup.
#[derive(Debug, Clone, Default)]
pub struct Level {
    children: Vec<GroupChild>,
    lookup: HashMap<GroupKey, usize>,
}

impl Level {
    pub fn children(&self) -> &[GroupChild] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Child index of the group holding `value`, if one exists at this level.
    pub fn position(&self, value: &FieldValue) -> Option<usize> {
        self.lookup.get(&value.group_key()?).copied()
    }

    fn group_for(&self, key: &GroupKey) -> Option<NodeId> {
        self.lookup
            .get(key)
            .and_then(|&pos| self.children.get(pos))
            .and_then(GroupChild::group_id)
    }
}

/// One partition for a grouping key at a given depth.
#[derive(Debug, Clone)]
pub struct GroupNode {
    key: FieldValue,
    depth: usize,
    level: Level,
}

impl GroupNode {
    /// The key value shared by every record under this node.
    pub fn key(&self) -> &FieldValue {
        &self.key
    }

    /// 0 for top-level groups.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn children(&self) -> &[GroupChild] {
        self.level.children()
    }

    pub fn level(&self) -> &Level {
        &self.level
    }
}

/// Result of one grouping pass.
///
/// # Examples
///
/// ```
/// use livegrid::{shared_record, FieldValue, GroupBy, GroupTree};
///
/// let records = vec![
///     shared_record([("k", FieldValue::from("b"))]),
///     shared_record([("k", FieldValue::from("a"))]),
///     shared_record([("k", FieldValue::from("b"))]),
/// ];
/// let tree = GroupTree::build(&records, &GroupBy::from_iter(["k"]));
///
/// let keys: Vec<_> = tree.roots().iter()
///     .filter_map(|c| c.group_id())
///     .map(|id| tree.node(id).unwrap().key().clone())
///     .collect();
/// assert_eq!(keys, vec![FieldValue::from("b"), FieldValue::from("a")]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct GroupTree {
    group_by: GroupBy,
    root: Level,
    nodes: Vec<GroupNode>,
    leaf_count: usize,
    dropped: usize,
}

impl GroupTree {
    pub fn new(group_by: GroupBy) -> Self {
        GroupTree {
            group_by,
            ..Self::default()
        }
    }

    /// Group `records` by the keys in `group_by`.
    pub fn build<'a, I>(records: I, group_by: &GroupBy) -> Self
    where
        I: IntoIterator<Item = &'a Rc<Record>>,
    {
        let mut tree = GroupTree::new(group_by.clone());
        for record in records {
            tree.insert(Rc::clone(record));
        }
        debug!(
            "grouped {} records by {:?} into {} groups ({} dropped)",
            tree.leaf_count,
            tree.group_by.keys(),
            tree.nodes.len(),
            tree.dropped
        );
        tree
    }

    /// Place one record in the tree. Returns false if it was dropped.
    pub fn insert(&mut self, record: Rc<Record>) -> bool {
        let mut parent: Option<NodeId> = None;

        for depth in 0..self.group_by.len() {
            // Undefined and composite values have no key
            let (value, key) = match record.get(&self.group_by.keys[depth]) {
                Some(value) => match value.group_key() {
                    Some(key) => (value, key),
                    None => {
                        self.dropped += 1;
                        return false;
                    }
                },
                None => {
                    self.dropped += 1;
                    return false;
                }
            };
            let next = NodeId(self.nodes.len());

            let (id, created) = {
                let level = self.level_mut(parent);
                match level.group_for(&key) {
                    Some(id) => (id, false),
                    None => {
                        level.lookup.insert(key, level.children.len());
                        level.children.push(GroupChild::Group(next));
                        (next, true)
                    }
                }
            };

            if created {
                self.nodes.push(GroupNode {
                    key: value.clone(),
                    depth,
                    level: Level::default(),
                });
            }
            parent = Some(id);
        }

        self.level_mut(parent).children.push(GroupChild::Record(record));
        self.leaf_count += 1;
        true
    }

    fn level_mut(&mut self, parent: Option<NodeId>) -> &mut Level {
        match parent {
            None => &mut self.root,
            Some(id) => &mut self.nodes[id.0].level,
        }
    }

    pub fn group_by(&self) -> &GroupBy {
        &self.group_by
    }

    /// Top-level children: group nodes, or records for an empty `GroupBy`.
    pub fn roots(&self) -> &[GroupChild] {
        self.root.children()
    }

    pub fn root_level(&self) -> &Level {
        &self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&GroupNode> {
        self.nodes.get(id.0)
    }

    /// Children of a node; empty for an unknown id.
    pub fn children_of(&self, id: NodeId) -> &[GroupChild] {
        match self.node(id) {
            Some(node) => node.children(),
            None => &[],
        }
    }

    /// Walk from the top level along the given key values.
    pub fn find(&self, path: &[FieldValue]) -> Option<NodeId> {
        let mut level = &self.root;
        let mut found = None;
        for value in path {
            let id = level.group_for(&value.group_key()?)?;
            level = &self.nodes[id.0].level;
            found = Some(id);
        }
        found
    }

    /// Number of group nodes at all depths.
    pub fn group_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of records placed in the tree.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Number of records dropped for an undefined grouping key.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Nesting depth of the tree (the key count).
    pub fn depth(&self) -> usize {
        self.group_by.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// All leaf records, depth-first in display order.
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves::new(self, self.root.children())
    }

    /// Leaf records under one node, depth-first.
    pub fn node_leaves(&self, id: NodeId) -> Leaves<'_> {
        Leaves::new(self, self.children_of(id))
    }
}

/// Depth-first iterator over leaf records.
pub struct Leaves<'a> {
    tree: &'a GroupTree,
    stack: Vec<std::slice::Iter<'a, GroupChild>>,
}

impl<'a> Leaves<'a> {
    fn new(tree: &'a GroupTree, children: &'a [GroupChild]) -> Self {
        Leaves {
            tree,
            stack: vec![children.iter()],
        }
    }
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a Rc<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(GroupChild::Record(rec)) => return Some(rec),
                Some(GroupChild::Group(id)) => {
                    let children = self.tree.children_of(*id);
                    self.stack.push(children.iter());
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

// Rendered in the merge-node shape the grid front-end expects:
// {"vTableMerge": true, "vtableMergeName": <key>, "children": [...]}
impl Serialize for GroupTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ChildrenView {
            tree: self,
            children: self.root.children(),
        }
        .serialize(serializer)
    }
}

struct ChildrenView<'a> {
    tree: &'a GroupTree,
    children: &'a [GroupChild],
}

impl Serialize for ChildrenView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.children.len()))?;
        for child in self.children {
            seq.serialize_element(&ChildView {
                tree: self.tree,
                child,
            })?;
        }
        seq.end()
    }
}

struct ChildView<'a> {
    tree: &'a GroupTree,
    child: &'a GroupChild,
}

impl Serialize for ChildView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.child {
            GroupChild::Record(rec) => (**rec).serialize(serializer),
            GroupChild::Group(id) => {
                let node = &self.tree.nodes[id.0];
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("vTableMerge", &true)?;
                map.serialize_entry("vtableMergeName", &node.key)?;
                map.serialize_entry(
                    "children",
                    &ChildrenView {
                        tree: self.tree,
                        children: node.children(),
                    },
                )?;
                map.end()
            }
        }
    }
}
