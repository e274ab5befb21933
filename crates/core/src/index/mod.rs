//! Auto-indexing (C8, §4.8): amortizes repeated identical filter clauses by
//! caching their materialized result sets, admitting hot clauses and
//! evicting cold ones under a configured capacity.
use std::collections::BTreeMap;
use std::time::Instant;

use crate::cnf::{DEFAULT_MAX_INDICES, INDEX_ADMISSION_THRESHOLD};
use crate::id::NodeId;

/// Identifies a filter clause: the traversal mode, its direction expression
/// (if any), the seed node, an optional order key, and the filter source
/// text (§4.8 "identified by a tuple").
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct IndexKey {
	pub mode: String,
	pub direction_expr: Option<String>,
	pub start: NodeId,
	pub order_key: Option<String>,
	pub filter_source: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MaterializationState {
	Cold,
	Building,
	Ready,
	Evicting,
}

#[derive(Debug)]
pub struct ControlBlock {
	pub state: MaterializationState,
	hit_count: u64,
	taken: u64,
	total: u64,
	last_access: Instant,
	materialized: Vec<NodeId>,
	ordered: Option<Vec<NodeId>>,
}

impl ControlBlock {
	fn new() -> Self {
		Self {
			state: MaterializationState::Cold,
			hit_count: 0,
			taken: 0,
			total: 0,
			last_access: Instant::now(),
			materialized: Vec::new(),
			ordered: None,
		}
	}

	pub fn cardinality(&self) -> usize {
		self.materialized.len()
	}

	pub fn materialized(&self) -> &[NodeId] {
		&self.materialized
	}

	pub fn ordered(&self) -> Option<&[NodeId]> {
		self.ordered.as_deref()
	}

	/// recent-hit-rate × selectivity(total/taken), §4.8's eviction score.
	fn score(&self) -> f64 {
		if self.total == 0 {
			return 0.0;
		}
		let hit_rate = self.hit_count as f64 / self.total as f64;
		let selectivity = if self.taken == 0 { self.total as f64 } else { self.total as f64 / self.taken as f64 };
		hit_rate * selectivity
	}
}

#[derive(Debug)]
pub struct IndexRegistry {
	blocks: BTreeMap<IndexKey, ControlBlock>,
	max_indices: usize,
}

impl Default for IndexRegistry {
	fn default() -> Self {
		Self {
			blocks: BTreeMap::new(),
			max_indices: *DEFAULT_MAX_INDICES,
		}
	}
}

impl IndexRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_max_indices(mut self, max: usize) -> Self {
		self.max_indices = max;
		self
	}

	pub fn disabled(&self) -> bool {
		self.max_indices == 0
	}

	/// Picks the hint with smallest materialized cardinality among `keys`
	/// that are currently `Ready`, per §4.8's cardinality-based selection.
	pub fn choose_hint<'a>(&self, keys: impl IntoIterator<Item = &'a IndexKey>) -> Option<&'a IndexKey> {
		keys.into_iter()
			.filter(|k| matches!(self.blocks.get(*k).map(|b| b.state), Some(MaterializationState::Ready)))
			.min_by_key(|k| self.blocks[*k].cardinality())
	}

	pub fn get(&self, key: &IndexKey) -> Option<&ControlBlock> {
		self.blocks.get(key)
	}

	/// Records one query's usage against `key` (§4.8 step 5: "whichever
	/// hint was chosen accumulates (taken, total); others accumulate
	/// (0, total)"), admitting it to `Building` once its hit rate clears
	/// the configured threshold.
	pub fn record_use(&mut self, key: &IndexKey, taken: u64, total: u64) {
		if self.disabled() {
			return;
		}
		let block = self.blocks.entry(key.clone()).or_insert_with(ControlBlock::new);
		block.taken += taken;
		block.total += total;
		block.hit_count += 1;
		block.last_access = Instant::now();
		if block.state == MaterializationState::Cold && block.hit_count as u32 >= *INDEX_ADMISSION_THRESHOLD {
			block.state = MaterializationState::Building;
		}
	}

	pub fn materialize(&mut self, key: &IndexKey, members: Vec<NodeId>, ordered: Option<Vec<NodeId>>) {
		if self.disabled() {
			return;
		}
		let block = self.blocks.entry(key.clone()).or_insert_with(ControlBlock::new);
		block.materialized = members;
		block.ordered = ordered;
		block.state = MaterializationState::Ready;
		self.evict_over_capacity();
	}

	/// Marks every control block whose materialized set contains `node` as
	/// stale (re-evaluated lazily on next use), per §4.8 consistency policy.
	pub fn invalidate_for_node(&mut self, node: NodeId) {
		for block in self.blocks.values_mut() {
			if block.materialized.contains(&node) {
				block.state = MaterializationState::Cold;
				block.materialized.clear();
				block.ordered = None;
			}
		}
	}

	fn evict_over_capacity(&mut self) {
		while self.blocks.len() > self.max_indices {
			let worst = self
				.blocks
				.iter()
				.min_by(|a, b| a.1.score().partial_cmp(&b.1.score()).unwrap_or(std::cmp::Ordering::Equal))
				.map(|(k, _)| k.clone());
			match worst {
				Some(key) => {
					self.blocks.remove(&key);
				}
				None => break,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key(n: &str) -> IndexKey {
		IndexKey {
			mode: "bfs-descendants".into(),
			direction_expr: None,
			start: NodeId::parse(n.as_bytes()).unwrap(),
			order_key: None,
			filter_source: "1".into(),
		}
	}

	#[test]
	fn admission_promotes_cold_to_building_past_threshold() {
		let mut reg = IndexRegistry::new();
		let k = key("a");
		for _ in 0..*INDEX_ADMISSION_THRESHOLD {
			reg.record_use(&k, 1, 10);
		}
		assert_eq!(reg.get(&k).unwrap().state, MaterializationState::Building);
	}

	#[test]
	fn max_indices_zero_disables_indexing() {
		let mut reg = IndexRegistry::new().with_max_indices(0);
		reg.record_use(&key("a"), 1, 10);
		assert!(reg.get(&key("a")).is_none());
	}

	#[test]
	fn eviction_keeps_registry_within_capacity() {
		let mut reg = IndexRegistry::new().with_max_indices(1);
		reg.materialize(&key("a"), vec![NodeId::parse(b"x").unwrap()], None);
		reg.materialize(&key("b"), vec![NodeId::parse(b"y").unwrap(); 5], None);
		assert_eq!(reg.blocks.len(), 1);
	}

	#[test]
	fn choose_hint_picks_smallest_ready_set() {
		let mut reg = IndexRegistry::new();
		reg.materialize(&key("a"), vec![NodeId::parse(b"x").unwrap(); 3], None);
		reg.materialize(&key("b"), vec![NodeId::parse(b"y").unwrap()], None);
		let keys = vec![key("a"), key("b")];
		let chosen = reg.choose_hint(keys.iter()).unwrap();
		assert_eq!(chosen.start, key("b").start);
	}

	#[test]
	fn invalidate_resets_affected_blocks_to_cold() {
		let mut reg = IndexRegistry::new();
		let node = NodeId::parse(b"x").unwrap();
		reg.materialize(&key("a"), vec![node], None);
		reg.invalidate_for_node(node);
		assert_eq!(reg.get(&key("a")).unwrap().state, MaterializationState::Cold);
	}
}
