//! Alias resolution: a flat map from alias string to the `NodeId` it
//! currently names (§4.6 step 2).
use std::collections::BTreeMap;

use crate::id::NodeId;

#[derive(Debug, Default)]
pub struct AliasTable {
	by_alias: BTreeMap<String, NodeId>,
}

impl AliasTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn resolve(&self, alias: &str) -> Option<NodeId> {
		self.by_alias.get(alias).copied()
	}

	/// Binds `alias` to `target`, replacing any previous binding. Modify's
	/// "queue remaining aliases as set-op inserts" step calls this once the
	/// owning node is known (§4.6 step 8).
	pub fn bind(&mut self, alias: impl Into<String>, target: NodeId) {
		self.by_alias.insert(alias.into(), target);
	}

	pub fn unbind(&mut self, alias: &str) -> Option<NodeId> {
		self.by_alias.remove(alias)
	}

	/// Resolves the first alias in `candidates` that already names an
	/// existing node, per §4.6 step 2 ("if any listed alias resolves to an
	/// existing node, replace the candidate NodeId with the alias target").
	pub fn resolve_first_existing<'a>(&self, candidates: impl IntoIterator<Item = &'a str>) -> Option<NodeId> {
		candidates.into_iter().find_map(|a| self.resolve(a))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn id(s: &str) -> NodeId {
		NodeId::parse(s.as_bytes()).unwrap()
	}

	#[test]
	fn bind_then_resolve_round_trips() {
		let mut table = AliasTable::new();
		table.bind("north", id("n1"));
		assert_eq!(table.resolve("north"), Some(id("n1")));
	}

	#[test]
	fn resolve_first_existing_skips_unbound_aliases() {
		let mut table = AliasTable::new();
		table.bind("b", id("n2"));
		let resolved = table.resolve_first_existing(["a", "b", "c"]);
		assert_eq!(resolved, Some(id("n2")));
	}

	#[test]
	fn unbind_removes_the_alias() {
		let mut table = AliasTable::new();
		table.bind("north", id("n1"));
		assert_eq!(table.unbind("north"), Some(id("n1")));
		assert_eq!(table.resolve("north"), None);
	}
}
