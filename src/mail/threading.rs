use std::collections::{BTreeSet, HashMap};
use std::io::{self, Write};

use serde::ser::{SerializeSeq, SerializeStruct};
use serde::{Serialize, Serializer};

use super::types::MetadataRecord;

/// Stable handle of a container inside its `ThreadTable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId(usize);

/// A node of the reply forest.
///
/// Parent and children are handles into the owning table, so the graph holds
/// no ownership cycles. Invariant: for every child `c` of `x`, `c.parent == x`.
#[derive(Debug, Clone)]
pub struct Container {
    pub message: MetadataRecord,
    parent: Option<ContainerId>,
    children: BTreeSet<ContainerId>,
    elided: bool,
}

impl Container {
    fn new(message: MetadataRecord) -> Self {
        Self {
            message,
            parent: None,
            children: BTreeSet::new(),
            elided: false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_placeholder(&self) -> bool {
        self.message.is_placeholder()
    }

    /// Spliced out of the graph by `prune`
    pub fn is_elided(&self) -> bool {
        self.elided
    }

    pub fn parent(&self) -> Option<ContainerId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = ContainerId> + '_ {
        self.children.iter().copied()
    }
}

/// Message id -> container arena, built fresh for every threading run
#[derive(Debug, Default)]
pub struct ThreadTable {
    ids: HashMap<String, ContainerId>,
    containers: Vec<Container>,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn get(&self, message_id: &str) -> Option<ContainerId> {
        self.ids.get(message_id).copied()
    }

    pub fn container(&self, id: ContainerId) -> &Container {
        &self.containers[id.0]
    }

    fn insert(&mut self, message: MetadataRecord) -> ContainerId {
        let id = ContainerId(self.containers.len());
        self.ids.insert(message.id.clone(), id);
        self.containers.push(Container::new(message));
        id
    }

    fn get_or_placeholder(&mut self, message_id: &str) -> ContainerId {
        match self.get(message_id) {
            Some(id) => id,
            None => self.insert(MetadataRecord::placeholder(message_id)),
        }
    }

    /// Add one message and link its reference chain.
    ///
    /// A placeholder for the same id is promoted in place, keeping its links.
    /// Each reference becomes the parent of the next one, and the last
    /// reference becomes the parent of the message itself.
    pub fn add_message(&mut self, message: MetadataRecord) {
        let container = match self.get(&message.id) {
            Some(id) => {
                let existing = &mut self.containers[id.0];
                if existing.is_placeholder() {
                    existing.message = message.clone();
                } else {
                    log::debug!("duplicate message {}, keeping first", message.id);
                }
                id
            }
            None => self.insert(message.clone()),
        };

        let mut previous: Option<ContainerId> = None;
        for reference in &message.references {
            let current = self.get_or_placeholder(reference);
            if let Some(prev) = previous {
                self.add_child(prev, current);
            }
            previous = Some(current);
        }

        if let Some(prev) = previous {
            self.add_child(prev, container);
        }
    }

    /// Whether `ancestor` reaches `node` by following children links.
    ///
    /// Parent chains are acyclic (`add_child` refuses loops), so the walk
    /// always terminates.
    fn is_ancestor(&self, ancestor: ContainerId, node: ContainerId) -> bool {
        if self.containers[ancestor.0].children.is_empty() {
            return false;
        }

        let mut current = self.containers[node.0].parent;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.containers[id.0].parent;
        }

        false
    }

    /// Whether `from` can reach `to` through its children
    pub fn can_reach(&self, from: ContainerId, to: ContainerId) -> bool {
        from != to && self.is_ancestor(from, to)
    }

    /// Make `child` a child of `parent`, detaching it from any previous parent.
    ///
    /// Refused (returns false) when the link would close a loop, which includes
    /// linking a container to itself. Malformed reference chains are dropped
    /// this way rather than reported.
    pub fn add_child(&mut self, parent: ContainerId, child: ContainerId) -> bool {
        if parent == child || self.can_reach(parent, child) || self.can_reach(child, parent) {
            log::trace!(
                "would loop {} => {}",
                self.containers[parent.0].message.id,
                self.containers[child.0].message.id
            );
            return false;
        }

        if let Some(old) = self.containers[child.0].parent.take() {
            self.containers[old.0].children.remove(&child);
        }
        self.containers[parent.0].children.insert(child);
        self.containers[child.0].parent = Some(parent);
        true
    }

    /// Remove placeholders that carry no structure, returning what should
    /// stand in `id`'s place in its parent's child set.
    ///
    /// A placeholder root with anything but exactly one child is kept, since
    /// promoting its children would split one thread into unrelated roots.
    /// Elided placeholders are flagged and no longer show up in `root_set`.
    ///
    /// Walks the subtree post-order with an explicit stack, so reference
    /// chains of any length are safe.
    pub fn prune(&mut self, id: ContainerId) -> Vec<ContainerId> {
        let mut replaced: HashMap<ContainerId, Vec<ContainerId>> = HashMap::new();
        let mut stack = vec![(id, false)];

        while let Some((current, expanded)) = stack.pop() {
            if !expanded {
                stack.push((current, true));
                stack.extend(self.containers[current.0].children().map(|c| (c, false)));
                continue;
            }

            let old_children: Vec<ContainerId> = self.containers[current.0].children().collect();
            let mut new_children = BTreeSet::new();
            for child in old_children {
                debug_assert_eq!(self.containers[child.0].parent, Some(current));
                new_children.extend(replaced.remove(&child).unwrap_or_default());
            }
            replaced.insert(current, self.splice(current, new_children));
        }

        replaced.remove(&id).unwrap_or_default()
    }

    /// Install the pruned `new_children` under `id`, or elide `id` and hand
    /// them to its parent.
    fn splice(&mut self, id: ContainerId, new_children: BTreeSet<ContainerId>) -> Vec<ContainerId> {
        for &child in &new_children {
            self.containers[child.0].parent = Some(id);
        }

        let container = &mut self.containers[id.0];
        if !container.is_placeholder() || (container.is_root() && new_children.len() != 1) {
            container.children = new_children;
            return vec![id];
        }

        // Elided: hand the children over to whoever owned this placeholder.
        let parent = container.parent.take();
        container.children.clear();
        container.elided = true;
        for &child in &new_children {
            self.containers[child.0].parent = parent;
        }
        new_children.into_iter().collect()
    }

    /// Every container without a parent, in insertion order. Placeholders
    /// elided by `prune` are detached but not roots, so they are skipped.
    pub fn root_set(&self) -> impl Iterator<Item = ContainerId> + '_ {
        self.containers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_root() && !c.elided)
            .map(|(i, _)| ContainerId(i))
    }
}

/// Pruned reply forest produced by `thread`
#[derive(Debug)]
pub struct Forest {
    table: ThreadTable,
    roots: Vec<ContainerId>,
}

impl Forest {
    pub fn roots(&self) -> impl Iterator<Item = Node<'_>> {
        self.roots.iter().map(|&id| Node {
            table: &self.table,
            id,
        })
    }

    /// Number of threads
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn table(&self) -> &ThreadTable {
        &self.table
    }

    pub fn dump(&self, out: &mut impl Write) -> io::Result<()> {
        for root in self.roots() {
            root.dump(out)?;
            writeln!(out, "****")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Forest {
    type Item = Node<'a>;
    type IntoIter = Box<dyn Iterator<Item = Node<'a>> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.roots())
    }
}

/// Borrowed view of one container in a forest
#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
    table: &'a ThreadTable,
    id: ContainerId,
}

impl<'a> Node<'a> {
    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn container(&self) -> &'a Container {
        self.table.container(self.id)
    }

    pub fn message(&self) -> &'a MetadataRecord {
        &self.container().message
    }

    pub fn is_placeholder(&self) -> bool {
        self.container().is_placeholder()
    }

    pub fn parent(&self) -> Option<Node<'a>> {
        let table = self.table;
        self.container().parent.map(|id| Node { table, id })
    }

    pub fn children(&self) -> impl Iterator<Item = Node<'a>> + use<'a> {
        let table = self.table;
        self.container()
            .children()
            .map(move |id| Node { table, id })
    }

    /// This node and everything below it, pre-order, paired with the level
    /// relative to this node
    pub fn walk(&self) -> Walk<'a> {
        Walk {
            stack: vec![(*self, 0)],
        }
    }

    /// Real (non-placeholder) messages in this subtree, including this one
    pub fn message_count(&self) -> usize {
        self.walk().filter(|(n, _)| !n.is_placeholder()).count()
    }

    /// Longest path from this node down to a leaf, in edges
    pub fn depth(&self) -> usize {
        self.walk().map(|(_, level)| level).max().unwrap_or(0)
    }

    pub fn dump(&self, out: &mut impl Write) -> io::Result<()> {
        for (node, level) in self.walk() {
            let padding = "\t".repeat(level);
            let message = node.message();
            match &message.subject {
                None => writeln!(out, "{}[Placeholder {}]", padding, message.id)?,
                Some(subject) => {
                    writeln!(out, "{}Id: {}", padding, message.id)?;
                    writeln!(out, "{}Subject: {}", padding, subject)?;
                }
            }
        }
        Ok(())
    }
}

/// Pre-order walk over a subtree, see `Node::walk`
pub struct Walk<'a> {
    stack: Vec<(Node<'a>, usize)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (Node<'a>, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (node, level) = self.stack.pop()?;
        let children: Vec<Node<'a>> = node.children().collect();
        self.stack
            .extend(children.into_iter().rev().map(|c| (c, level + 1)));
        Some((node, level))
    }
}

/// One line of a serialized thread; nesting is carried by `parent` and `level`
struct NodeEntry<'a> {
    node: Node<'a>,
    level: usize,
}

impl Serialize for NodeEntry<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let message = self.node.message();
        let parent = self.node.parent().map(|p| p.message().id.as_str());
        let mut state = serializer.serialize_struct("Node", 5)?;
        state.serialize_field("id", &message.id)?;
        state.serialize_field("subject", &message.subject)?;
        state.serialize_field("placeholder", &self.node.is_placeholder())?;
        state.serialize_field("parent", &parent)?;
        state.serialize_field("level", &self.level)?;
        state.end()
    }
}

/// A subtree serializes as a flat pre-order list, so deep threads do not
/// nest the output.
impl Serialize for Node<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        for (node, level) in self.walk() {
            seq.serialize_element(&NodeEntry { node, level })?;
        }
        seq.end()
    }
}

impl Serialize for Forest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.roots.len()))?;
        for root in self.roots() {
            seq.serialize_element(&root)?;
        }
        seq.end()
    }
}

/// Thread a batch of records into a pruned forest.
///
/// Yields exactly one node per table root: a placeholder root with zero or
/// several children is kept as a single root rather than split.
pub fn thread<I>(records: I) -> Forest
where
    I: IntoIterator<Item = MetadataRecord>,
{
    let mut table = ThreadTable::new();
    for record in records {
        table.add_message(record);
    }

    let initial_roots: Vec<ContainerId> = table.root_set().collect();
    let mut roots = Vec::with_capacity(initial_roots.len());
    for root in initial_roots {
        let pruned = table.prune(root);
        debug_assert_eq!(pruned.len(), 1);
        roots.extend(pruned);
    }

    log::debug!(
        "threaded {} containers into {} threads",
        table.len(),
        roots.len()
    );

    Forest { table, roots }
}
