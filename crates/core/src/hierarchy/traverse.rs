//! BFS/DFS and expression-driven traversal over the hierarchy and edge
//! fields (C7 core, §4.3). The `find` query engine (crate::query) layers
//! ordering, filtering and field projection on top of [`run`].
use std::collections::VecDeque;

use crate::err::Error;
use crate::hierarchy::Hierarchy;
use crate::id::NodeId;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
	Up,
	Down,
}

/// One of the twelve traversal modes named in §4.3.
#[derive(Debug, Clone)]
pub enum TraverseMode {
	Children,
	Parents,
	BfsAncestors,
	BfsDescendants,
	DfsAncestors,
	DfsDescendants,
	DfsFull,
	RefsViaField(String),
	ArrayViaField(String),
	BfsViaEdgeField(String),
	/// Breadth-first expression traversal: `field_selector` yields the set
	/// of field names to follow from each node.
	BfsExpression,
	/// Depth-first expression traversal, otherwise identical to
	/// `BfsExpression`.
	Expression,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TraverseControl {
	Continue,
	Stop,
}

/// Optional hooks invoked during traversal. `node_cb` may request early
/// termination; the others are pure observers. The hierarchy is threaded
/// into every callback as a plain `&Hierarchy` argument, reborrowed from
/// the runner's own `&mut Hierarchy`, rather than captured by the closure:
/// the runner holds the mutable borrow for the duration of the walk, so a
/// callback that needs to read node data (e.g. to apply a filter) can't
/// also capture the hierarchy itself.
pub struct TraverseCallbacks<'a> {
	pub head_cb: Option<&'a mut dyn FnMut(&Hierarchy, NodeId)>,
	pub node_cb: Option<&'a mut dyn FnMut(&Hierarchy, NodeId) -> TraverseControl>,
	pub child_cb: Option<&'a mut dyn FnMut(&Hierarchy, NodeId, NodeId)>,
}

impl<'a> Default for TraverseCallbacks<'a> {
	fn default() -> Self {
		Self {
			head_cb: None,
			node_cb: None,
			child_cb: None,
		}
	}
}

/// Field-name selector used by expression traversal modes: given the
/// current node id, returns the hierarchy/edge/ref field names to follow.
/// Implemented by `crate::rpn` evaluation against the node's object; kept
/// as a trait object here so this module has no dependency on the RPN
/// compiler.
pub trait FieldSelector {
	fn select(&mut self, hierarchy: &Hierarchy, node: NodeId) -> Vec<String>;
}

/// Decides whether to cross a candidate edge during expression traversal
/// (§4.3 "an optional edge-filter RPN expression decides whether to cross
/// each candidate edge").
pub trait EdgeFilter {
	fn allow(&mut self, hierarchy: &Hierarchy, from: NodeId, field: &str, to: NodeId) -> bool;
}

fn neighbors_of(hierarchy: &Hierarchy, node: NodeId, direction: Direction) -> Vec<NodeId> {
	match hierarchy.get(&node) {
		None => Vec::new(),
		Some(n) => match direction {
			Direction::Up => n.parents().copied().collect(),
			Direction::Down => n.children().copied().collect(),
		},
	}
}

/// Plain BFS/DFS over parent or child links, without the §4.3 "skip self"
/// semantics — used by `find_ancestors`/`find_descendants`, which want the
/// full reachable set including immediate neighbors.
pub(super) fn collect_reachable(hierarchy: &Hierarchy, start: NodeId, direction: Direction) -> Result<Vec<NodeId>, Error> {
	let mut seen = std::collections::BTreeSet::new();
	let mut queue = VecDeque::from([start]);
	let mut out = Vec::new();
	seen.insert(start);
	while let Some(current) = queue.pop_front() {
		for next in neighbors_of(hierarchy, current, direction) {
			if seen.insert(next) {
				out.push(next);
				queue.push_back(next);
			}
		}
	}
	Ok(out)
}

/// Runs one of the twelve traversal modes starting at `start`, invoking
/// `callbacks` along the way. BFS-ancestors/descendants and DFS-full variants
/// mark the start node visited up front and never emit it themselves (§4.3).
pub fn run(
	hierarchy: &mut Hierarchy,
	start: NodeId,
	mode: &TraverseMode,
	callbacks: &mut TraverseCallbacks,
	field_selector: Option<&mut dyn FieldSelector>,
	edge_filter: Option<&mut dyn EdgeFilter>,
) -> Result<(), Error> {
	if let Some(cb) = callbacks.head_cb.as_deref_mut() {
		cb(hierarchy, start);
	}
	match mode {
		TraverseMode::Children => run_flat(hierarchy, start, Direction::Down, callbacks),
		TraverseMode::Parents => run_flat(hierarchy, start, Direction::Up, callbacks),
		TraverseMode::BfsAncestors => run_bfs(hierarchy, start, Direction::Up, callbacks),
		TraverseMode::BfsDescendants => run_bfs(hierarchy, start, Direction::Down, callbacks),
		TraverseMode::DfsAncestors => run_dfs(hierarchy, start, Direction::Up, callbacks),
		TraverseMode::DfsDescendants => run_dfs(hierarchy, start, Direction::Down, callbacks),
		TraverseMode::DfsFull => run_dfs_full(hierarchy, start, callbacks),
		TraverseMode::RefsViaField(field) => run_via_field(hierarchy, start, field, callbacks),
		TraverseMode::ArrayViaField(field) => run_via_field(hierarchy, start, field, callbacks),
		TraverseMode::BfsViaEdgeField(field) => run_bfs_via_edge_field(hierarchy, start, field, callbacks),
		TraverseMode::BfsExpression => run_expression(hierarchy, start, callbacks, field_selector, edge_filter, true),
		TraverseMode::Expression => run_expression(hierarchy, start, callbacks, field_selector, edge_filter, false),
	}
}

fn dispatch_node(hierarchy: &Hierarchy, callbacks: &mut TraverseCallbacks, node: NodeId) -> TraverseControl {
	match callbacks.node_cb.as_deref_mut() {
		Some(cb) => cb(hierarchy, node),
		None => TraverseControl::Continue,
	}
}

fn dispatch_child(hierarchy: &Hierarchy, callbacks: &mut TraverseCallbacks, from: NodeId, to: NodeId) {
	if let Some(cb) = callbacks.child_cb.as_deref_mut() {
		cb(hierarchy, from, to);
	}
}

/// `children`/`parents` modes: emit the immediate neighbors only, no
/// recursion.
fn run_flat(hierarchy: &mut Hierarchy, start: NodeId, direction: Direction, callbacks: &mut TraverseCallbacks) -> Result<(), Error> {
	for next in neighbors_of(hierarchy, start, direction) {
		dispatch_child(hierarchy, callbacks, start, next);
		if dispatch_node(hierarchy, callbacks, next) == TraverseControl::Stop {
			return Ok(());
		}
	}
	Ok(())
}

fn run_bfs(hierarchy: &mut Hierarchy, start: NodeId, direction: Direction, callbacks: &mut TraverseCallbacks) -> Result<(), Error> {
	let trx = hierarchy.begin_trx()?;
	hierarchy.visit(trx, start);
	let mut queue = VecDeque::from([start]);
	while let Some(current) = queue.pop_front() {
		for next in neighbors_of(hierarchy, current, direction) {
			if hierarchy.visit(trx, next) {
				dispatch_child(hierarchy, callbacks, current, next);
				if dispatch_node(hierarchy, callbacks, next) == TraverseControl::Stop {
					hierarchy.end_trx(trx);
					return Ok(());
				}
				queue.push_back(next);
			}
		}
	}
	hierarchy.end_trx(trx);
	Ok(())
}

fn run_dfs(hierarchy: &mut Hierarchy, start: NodeId, direction: Direction, callbacks: &mut TraverseCallbacks) -> Result<(), Error> {
	let trx = hierarchy.begin_trx()?;
	hierarchy.visit(trx, start);
	let mut stack = vec![start];
	while let Some(current) = stack.pop() {
		for next in neighbors_of(hierarchy, current, direction) {
			if hierarchy.visit(trx, next) {
				dispatch_child(hierarchy, callbacks, current, next);
				if dispatch_node(hierarchy, callbacks, next) == TraverseControl::Stop {
					hierarchy.end_trx(trx);
					return Ok(());
				}
				stack.push(next);
			}
		}
	}
	hierarchy.end_trx(trx);
	Ok(())
}

/// `DFS-full`: both parents and children are followed from every node.
fn run_dfs_full(hierarchy: &mut Hierarchy, start: NodeId, callbacks: &mut TraverseCallbacks) -> Result<(), Error> {
	let trx = hierarchy.begin_trx()?;
	hierarchy.visit(trx, start);
	let mut stack = vec![start];
	while let Some(current) = stack.pop() {
		let mut neighbors = neighbors_of(hierarchy, current, Direction::Up);
		neighbors.extend(neighbors_of(hierarchy, current, Direction::Down));
		for next in neighbors {
			if hierarchy.visit(trx, next) {
				dispatch_child(hierarchy, callbacks, current, next);
				if dispatch_node(hierarchy, callbacks, next) == TraverseControl::Stop {
					hierarchy.end_trx(trx);
					return Ok(());
				}
				stack.push(next);
			}
		}
	}
	hierarchy.end_trx(trx);
	Ok(())
}

fn run_via_field(hierarchy: &mut Hierarchy, start: NodeId, field: &str, callbacks: &mut TraverseCallbacks) -> Result<(), Error> {
	let targets: Vec<NodeId> = hierarchy.get(&start).map(|n| n.edges.get_field(field).to_vec()).unwrap_or_default();
	for next in targets {
		dispatch_child(hierarchy, callbacks, start, next);
		if dispatch_node(hierarchy, callbacks, next) == TraverseControl::Stop {
			return Ok(());
		}
	}
	Ok(())
}

fn run_bfs_via_edge_field(hierarchy: &mut Hierarchy, start: NodeId, field: &str, callbacks: &mut TraverseCallbacks) -> Result<(), Error> {
	let trx = hierarchy.begin_trx()?;
	hierarchy.visit(trx, start);
	let mut queue = VecDeque::from([start]);
	while let Some(current) = queue.pop_front() {
		let targets: Vec<NodeId> = hierarchy.get(&current).map(|n| n.edges.get_field(field).to_vec()).unwrap_or_default();
		for next in targets {
			if hierarchy.visit(trx, next) {
				dispatch_child(hierarchy, callbacks, current, next);
				if dispatch_node(hierarchy, callbacks, next) == TraverseControl::Stop {
					hierarchy.end_trx(trx);
					return Ok(());
				}
				queue.push_back(next);
			}
		}
	}
	hierarchy.end_trx(trx);
	Ok(())
}

/// Shared implementation for `BfsExpression`/`Expression`: at each node,
/// evaluate `field_selector` to get a set of field names, resolve each to
/// its candidate neighbors (parents/children/edge fields), run `edge_filter`
/// over each candidate, and union the results into the frontier.
fn run_expression(
	hierarchy: &mut Hierarchy,
	start: NodeId,
	callbacks: &mut TraverseCallbacks,
	field_selector: Option<&mut dyn FieldSelector>,
	mut edge_filter: Option<&mut dyn EdgeFilter>,
	breadth_first: bool,
) -> Result<(), Error> {
	let mut selector = field_selector.ok_or_else(|| Error::InvalidArgument("expression traversal requires a field selector".into()))?;
	let trx = hierarchy.begin_trx()?;
	hierarchy.visit(trx, start);
	let mut frontier = VecDeque::from([start]);
	while let Some(current) = frontier.pop_front() {
		let field_names = selector.select(hierarchy, current);
		let mut candidates = Vec::new();
		for name in &field_names {
			match name.as_str() {
				"parents" => candidates.extend(neighbors_of(hierarchy, current, Direction::Up)),
				"children" => candidates.extend(neighbors_of(hierarchy, current, Direction::Down)),
				field => {
					if let Some(node) = hierarchy.get(&current) {
						candidates.extend(node.edges.get_field(field).iter().copied());
					}
				}
			}
		}
		for next in candidates {
			let allowed = match edge_filter.as_deref_mut() {
				Some(f) => f.allow(hierarchy, current, "", next),
				None => true,
			};
			if !allowed {
				continue;
			}
			if hierarchy.visit(trx, next) {
				dispatch_child(hierarchy, callbacks, current, next);
				if dispatch_node(hierarchy, callbacks, next) == TraverseControl::Stop {
					hierarchy.end_trx(trx);
					return Ok(());
				}
				if breadth_first {
					frontier.push_back(next);
				} else {
					frontier.push_front(next);
				}
			}
		}
	}
	hierarchy.end_trx(trx);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hierarchy::RootPolicy;

	fn id(s: &str) -> NodeId {
		NodeId::parse(s.as_bytes()).unwrap()
	}

	fn chain() -> Hierarchy {
		let mut h = Hierarchy::new();
		h.add(id("a"), &[], &[], RootPolicy::NoRoot).unwrap();
		h.add(id("b"), &[id("a")], &[], RootPolicy::NoRoot).unwrap();
		h.add(id("c"), &[id("b")], &[], RootPolicy::NoRoot).unwrap();
		h
	}

	#[test]
	fn bfs_descendants_skips_start_and_visits_once() {
		let mut h = chain();
		let mut seen = Vec::new();
		{
			let mut cb = |_h: &Hierarchy, n: NodeId| {
				seen.push(n);
				TraverseControl::Continue
			};
			let mut callbacks = TraverseCallbacks {
				node_cb: Some(&mut cb),
				..Default::default()
			};
			run(&mut h, id("a"), &TraverseMode::BfsDescendants, &mut callbacks, None, None).unwrap();
		}
		assert_eq!(seen, vec![id("b"), id("c")]);
	}

	#[test]
	fn node_cb_stop_halts_traversal_early() {
		let mut h = chain();
		let mut seen = Vec::new();
		{
			let mut cb = |_h: &Hierarchy, n: NodeId| {
				seen.push(n);
				TraverseControl::Stop
			};
			let mut callbacks = TraverseCallbacks {
				node_cb: Some(&mut cb),
				..Default::default()
			};
			run(&mut h, id("a"), &TraverseMode::BfsDescendants, &mut callbacks, None, None).unwrap();
		}
		assert_eq!(seen, vec![id("b")]);
	}

	#[test]
	fn children_mode_is_not_recursive() {
		let mut h = chain();
		let mut seen = Vec::new();
		{
			let mut cb = |_h: &Hierarchy, n: NodeId| {
				seen.push(n);
				TraverseControl::Continue
			};
			let mut callbacks = TraverseCallbacks {
				node_cb: Some(&mut cb),
				..Default::default()
			};
			run(&mut h, id("a"), &TraverseMode::Children, &mut callbacks, None, None).unwrap();
		}
		assert_eq!(seen, vec![id("b")]);
	}
}
