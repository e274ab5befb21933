//! Optional depth maintenance (§4.3): `depth = 1 + max(parent.depth)`,
//! recomputed by a BFS from the affected node whenever its parent set may
//! have changed. Skipped during snapshot restore and run once at the end
//! instead (crate::snapshot drives that).
use std::collections::VecDeque;

use crate::hierarchy::Hierarchy;
use crate::id::NodeId;

pub(super) fn recompute_from(hierarchy: &mut Hierarchy, start: NodeId) {
	let mut queue = VecDeque::from([start]);
	while let Some(current) = queue.pop_front() {
		let new_depth = if current.is_root() {
			Some(0)
		} else {
			let parents: Vec<NodeId> = hierarchy.get(&current).map(|n| n.parents().copied().collect()).unwrap_or_default();
			parents.iter().filter_map(|p| hierarchy.get(p).and_then(|n| n.depth)).max().map(|d| d + 1)
		};
		if let Some(node) = hierarchy.get_mut(&current) {
			if node.depth != new_depth {
				node.depth = new_depth;
				let children: Vec<NodeId> = node.children().copied().collect();
				queue.extend(children);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hierarchy::RootPolicy;

	fn id(s: &str) -> NodeId {
		NodeId::parse(s.as_bytes()).unwrap()
	}

	#[test]
	fn depth_is_one_plus_max_parent_depth() {
		let mut h = Hierarchy::new().with_depth_maintenance(true);
		h.add(id("root"), &[], &[], RootPolicy::NoRoot).unwrap();
		h.get_mut(&id("root")).unwrap().depth = Some(0);
		h.add(id("child"), &[id("root")], &[], RootPolicy::NoRoot).unwrap();
		assert_eq!(h.get(&id("child")).unwrap().depth, Some(1));
	}
}
