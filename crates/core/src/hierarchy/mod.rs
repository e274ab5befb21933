//! The hierarchy store (C4, §4.3): a node index plus parent/child links,
//! orphan ("head") tracking, and optional depth maintenance.
//!
//! Nodes live in an arena (`Vec<Option<Node>>`) rather than behind
//! individually boxed/pinned allocations: the hierarchy never hands out
//! long-lived references into a node across a mutation, so there's nothing
//! for pinning to buy us, and the arena keeps `find_ancestors`/traversal
//! cache-friendly (Design Notes §9).
mod depth;
pub mod edge;
mod traverse;

use std::collections::{BTreeMap, BTreeSet};

use crate::err::Error;
use crate::id::{NodeId, ROOT_NODE_ID};
use crate::trx::{Trx, TrxLabel, TrxState};
use crate::val::TypedObject;

pub use edge::{EdgeConstraint, EdgeDirection, EdgeStore, OnDelete};
pub use traverse::{run, Direction, EdgeFilter, FieldSelector, TraverseCallbacks, TraverseControl, TraverseMode};

type NodeKey = usize;

/// A single node: its typed object, hierarchy links, edge fields, and the
/// traversal visitation label private to this node (C2).
#[derive(Debug)]
pub struct Node {
	pub id: NodeId,
	pub object: TypedObject,
	parents: BTreeSet<NodeId>,
	children: BTreeSet<NodeId>,
	pub edges: EdgeStore,
	pub depth: Option<u32>,
	label: TrxLabel,
}

impl Node {
	fn new(id: NodeId) -> Self {
		Self {
			id,
			object: TypedObject::new(),
			parents: BTreeSet::new(),
			children: BTreeSet::new(),
			edges: EdgeStore::new(),
			depth: None,
			label: TrxLabel::default(),
		}
	}

	pub fn parents(&self) -> impl Iterator<Item = &NodeId> {
		self.parents.iter()
	}

	pub fn children(&self) -> impl Iterator<Item = &NodeId> {
		self.children.iter()
	}
}

/// Governs whether a missing-parent `add`/`set` defaults to `[ROOT]` (§4.3).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RootPolicy {
	DefaultToRoot,
	NoRoot,
}

#[derive(Debug, Default)]
pub struct Hierarchy {
	arena: Vec<Option<Node>>,
	free: Vec<NodeKey>,
	index: BTreeMap<NodeId, NodeKey>,
	heads: BTreeSet<NodeId>,
	edge_constraints: BTreeMap<String, EdgeConstraint>,
	trx: TrxState,
	depth_enabled: bool,
}

impl Hierarchy {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_depth_maintenance(mut self, enabled: bool) -> Self {
		self.depth_enabled = enabled;
		self
	}

	pub fn register_edge_constraint(&mut self, field: impl Into<String>, constraint: EdgeConstraint) {
		self.edge_constraints.insert(field.into(), constraint);
	}

	pub fn edge_constraint(&self, field: &str) -> Option<&EdgeConstraint> {
		self.edge_constraints.get(field)
	}

	pub fn contains(&self, id: &NodeId) -> bool {
		self.index.contains_key(id)
	}

	pub fn get(&self, id: &NodeId) -> Option<&Node> {
		self.index.get(id).and_then(|&k| self.arena[k].as_ref())
	}

	pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
		let key = *self.index.get(id)?;
		self.arena[key].as_mut()
	}

	pub fn get_heads(&self) -> impl Iterator<Item = &NodeId> {
		self.heads.iter()
	}

	/// Every live node id, in ascending order. Used by `snapshot::save` to
	/// walk the hierarchy deterministically.
	pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
		self.index.keys()
	}

	pub fn set_depth_maintenance(&mut self, enabled: bool) {
		self.depth_enabled = enabled;
	}

	/// Recomputes `depth` for every node reachable from a head, in one pass.
	/// `snapshot::load` calls this once after the whole hierarchy has been
	/// rebuilt rather than incrementally per node, since incremental
	/// maintenance during bulk load would redo the same BFS many times over.
	pub fn recompute_all_depths(&mut self) {
		let heads: Vec<NodeId> = self.heads.iter().copied().collect();
		for head in heads {
			depth::recompute_from(self, head);
		}
	}

	fn alloc(&mut self, id: NodeId) -> NodeKey {
		let node = Node::new(id);
		if let Some(key) = self.free.pop() {
			self.arena[key] = Some(node);
			key
		} else {
			self.arena.push(Some(node));
			self.arena.len() - 1
		}
	}

	fn ensure(&mut self, id: NodeId) -> NodeKey {
		if let Some(&key) = self.index.get(&id) {
			return key;
		}
		let key = self.alloc(id);
		self.index.insert(id, key);
		self.heads.insert(id);
		key
	}

	fn sync_head(&mut self, id: NodeId) {
		let empty = self.get(&id).map(|n| n.parents.is_empty()).unwrap_or(false);
		if empty {
			self.heads.insert(id);
		} else {
			self.heads.remove(&id);
		}
	}

	fn link(&mut self, parent: NodeId, child: NodeId) {
		if let Some(n) = self.get_mut(&parent) {
			n.children.insert(child);
		}
		if let Some(n) = self.get_mut(&child) {
			n.parents.insert(parent);
		}
		self.sync_head(child);
	}

	fn unlink(&mut self, parent: NodeId, child: NodeId) {
		if let Some(n) = self.get_mut(&parent) {
			n.children.remove(&child);
		}
		if let Some(n) = self.get_mut(&child) {
			n.parents.remove(&parent);
		}
		self.sync_head(child);
	}

	fn clear_parents(&mut self, id: NodeId) {
		let parents: Vec<NodeId> = self.get(&id).map(|n| n.parents.iter().copied().collect()).unwrap_or_default();
		for p in parents {
			self.unlink(p, id);
		}
	}

	fn clear_children(&mut self, id: NodeId) {
		let children: Vec<NodeId> = self.get(&id).map(|n| n.children.iter().copied().collect()).unwrap_or_default();
		for c in children {
			self.unlink(id, c);
		}
	}

	/// Creates `id` if missing and installs `parents`/`children` **in
	/// addition to** any links the node already had (§4.3 `add`).
	pub fn add(&mut self, id: NodeId, parents: &[NodeId], children: &[NodeId], root_policy: RootPolicy) -> Result<(), Error> {
		let existed = self.contains(&id);
		self.ensure(id);
		if !existed && parents.is_empty() && matches!(root_policy, RootPolicy::DefaultToRoot) && !id.is_root() {
			self.ensure(ROOT_NODE_ID);
			self.link(ROOT_NODE_ID, id);
		}
		for &p in parents {
			self.ensure(p);
			self.link(p, id);
		}
		for &c in children {
			self.ensure(c);
			self.link(id, c);
		}
		if self.depth_enabled {
			depth::recompute_from(self, id);
		}
		Ok(())
	}

	/// Creates `id` if missing; otherwise clears its existing links first
	/// (§4.3 `set`).
	pub fn set(&mut self, id: NodeId, parents: &[NodeId], children: &[NodeId], root_policy: RootPolicy) -> Result<(), Error> {
		let existed = self.contains(&id);
		if existed {
			self.clear_parents(id);
			self.clear_children(id);
		}
		self.ensure(id);
		if parents.is_empty() && matches!(root_policy, RootPolicy::DefaultToRoot) && !id.is_root() {
			self.ensure(ROOT_NODE_ID);
			self.link(ROOT_NODE_ID, id);
		}
		for &p in parents {
			self.ensure(p);
			self.link(p, id);
		}
		for &c in children {
			self.ensure(c);
			self.link(id, c);
		}
		if self.depth_enabled {
			depth::recompute_from(self, id);
		}
		Ok(())
	}

	pub fn set_parents(&mut self, id: NodeId, parents: &[NodeId]) -> Result<(), Error> {
		self.ensure(id);
		self.clear_parents(id);
		for &p in parents {
			self.ensure(p);
			self.link(p, id);
		}
		if self.depth_enabled {
			depth::recompute_from(self, id);
		}
		Ok(())
	}

	pub fn set_children(&mut self, id: NodeId, children: &[NodeId]) -> Result<(), Error> {
		self.ensure(id);
		self.clear_children(id);
		for &c in children {
			self.ensure(c);
			self.link(id, c);
		}
		Ok(())
	}

	/// Removes the given links; missing references are a silent no-op
	/// (§4.3 "consistent with 'noop on absent' policy").
	pub fn del_edges(&mut self, id: NodeId, parents: &[NodeId], children: &[NodeId]) -> Result<(), Error> {
		for &p in parents {
			self.unlink(p, id);
		}
		for &c in children {
			self.unlink(id, c);
		}
		Ok(())
	}

	/// Cascading delete (§4.3): tears down `id`'s edges and links; any child
	/// left with zero parents is recursively deleted. Never touches a
	/// multi-parented child of `id`.
	pub fn del_node(&mut self, id: NodeId) -> Result<(), Error> {
		let mut stack = vec![id];
		while let Some(current) = stack.pop() {
			let key = match self.index.get(&current) {
				Some(&k) => k,
				None => continue,
			};
			let (parents, children): (Vec<NodeId>, Vec<NodeId>) = {
				let node = self.arena[key].as_ref().unwrap();
				(node.parents.iter().copied().collect(), node.children.iter().copied().collect())
			};
			for p in &parents {
				self.unlink(*p, current);
			}
			for c in &children {
				self.unlink(current, c.clone());
				if self.get(c).map(|n| n.parents.is_empty()).unwrap_or(false) {
					stack.push(*c);
				}
			}
			self.index.remove(&current);
			self.heads.remove(&current);
			self.arena[key] = None;
			self.free.push(key);
		}
		Ok(())
	}

	pub fn find_ancestors(&self, id: NodeId) -> Result<Vec<NodeId>, Error> {
		traverse::collect_reachable(self, id, traverse::Direction::Up)
	}

	pub fn find_descendants(&self, id: NodeId) -> Result<Vec<NodeId>, Error> {
		traverse::collect_reachable(self, id, traverse::Direction::Down)
	}

	/// Allocates a traversal lane for use with [`traverse::run`] (C2, §4.2).
	pub fn begin_trx(&mut self) -> Result<Trx, Error> {
		self.trx.begin()
	}

	pub fn end_trx(&mut self, trx: Trx) {
		self.trx.end(trx)
	}

	fn visit(&mut self, trx: Trx, id: NodeId) -> bool {
		let key = match self.index.get(&id) {
			Some(&k) => k,
			None => return false,
		};
		let node = self.arena[key].as_mut().unwrap();
		let state = &self.trx;
		state_visit(state, trx, &mut node.label)
	}

	fn has_visited(&self, trx: Trx, id: NodeId) -> bool {
		match self.get(&id) {
			Some(n) => self.trx.has_visited(trx, &n.label),
			None => false,
		}
	}
}

// Thin indirection so `visit` can borrow `self.trx` immutably while mutating
// a node's label, without fighting the borrow checker over split borrows.
fn state_visit(state: &TrxState, trx: Trx, label: &mut TrxLabel) -> bool {
	state.visit(trx, label)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn id(s: &str) -> NodeId {
		NodeId::parse(s.as_bytes()).unwrap()
	}

	#[test]
	fn add_with_no_parents_defaults_to_root() {
		let mut h = Hierarchy::new();
		h.add(id("a"), &[], &[], RootPolicy::DefaultToRoot).unwrap();
		assert!(h.get(&id("a")).unwrap().parents().any(|p| p.is_root()));
	}

	#[test]
	fn add_preserves_existing_links() {
		let mut h = Hierarchy::new();
		h.add(id("a"), &[id("p1")], &[], RootPolicy::DefaultToRoot).unwrap();
		h.add(id("a"), &[id("p2")], &[], RootPolicy::DefaultToRoot).unwrap();
		let parents: Vec<_> = h.get(&id("a")).unwrap().parents().copied().collect();
		assert_eq!(parents.len(), 2);
	}

	#[test]
	fn set_clears_existing_links_first() {
		let mut h = Hierarchy::new();
		h.add(id("a"), &[id("p1")], &[], RootPolicy::DefaultToRoot).unwrap();
		h.set(id("a"), &[id("p2")], &[], RootPolicy::DefaultToRoot).unwrap();
		let parents: Vec<_> = h.get(&id("a")).unwrap().parents().copied().collect();
		assert_eq!(parents, vec![id("p2")]);
	}

	#[test]
	fn del_edges_silently_ignores_missing_links() {
		let mut h = Hierarchy::new();
		h.add(id("a"), &[], &[], RootPolicy::NoRoot).unwrap();
		assert!(h.del_edges(id("a"), &[id("nope")], &[]).is_ok());
	}

	#[test]
	fn del_node_cascades_to_single_parent_children_only() {
		let mut h = Hierarchy::new();
		h.add(id("a"), &[], &[], RootPolicy::NoRoot).unwrap();
		h.add(id("b"), &[id("a")], &[], RootPolicy::NoRoot).unwrap();
		h.add(id("c"), &[id("a")], &[], RootPolicy::NoRoot).unwrap();
		// "c" gets a second parent, so it should survive "a"'s deletion.
		h.add(id("c"), &[id("other_parent")], &[], RootPolicy::NoRoot).unwrap();

		h.del_node(id("a")).unwrap();

		assert!(!h.contains(&id("a")));
		assert!(!h.contains(&id("b")));
		assert!(h.contains(&id("c")));
	}

	#[test]
	fn get_heads_reports_orphans() {
		let mut h = Hierarchy::new();
		h.add(id("a"), &[], &[], RootPolicy::NoRoot).unwrap();
		h.add(id("b"), &[id("a")], &[], RootPolicy::NoRoot).unwrap();
		let heads: Vec<_> = h.get_heads().copied().collect();
		assert_eq!(heads, vec![id("a")]);
	}

	#[test]
	fn find_descendants_is_transitive() {
		let mut h = Hierarchy::new();
		h.add(id("a"), &[], &[], RootPolicy::NoRoot).unwrap();
		h.add(id("b"), &[id("a")], &[], RootPolicy::NoRoot).unwrap();
		h.add(id("c"), &[id("b")], &[], RootPolicy::NoRoot).unwrap();
		let mut desc = h.find_descendants(id("a")).unwrap();
		desc.sort();
		assert_eq!(desc, vec![id("b"), id("c")]);
	}
}
