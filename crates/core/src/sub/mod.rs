//! Subscriptions & deferred events (C9, §4.9): precheck which markers match
//! before a mutation runs, defer the events it produces, then dispatch them
//! once, de-duplicated per subscription, at command completion.
//!
//! Modeled on the teacher's `dbs::notification::Notification` (an `id` plus
//! an `action`), generalized to the two event kinds this engine produces.
use std::collections::{BTreeMap, BTreeSet};

use crate::hierarchy::Hierarchy;
use crate::id::NodeId;

/// A 32-byte opaque subscription identifier (§4.9).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(pub [u8; 32]);

/// What a marker's anchor node subscribes to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MarkerKind {
	ThisNode,
	Ancestors,
	Descendants,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TriggerKind {
	Created,
	Updated,
	Deleted,
}

#[derive(Debug, Clone)]
struct Marker {
	id: SubscriptionId,
	anchor: NodeId,
	kind: MarkerKind,
}

/// The full set of markers registered across the hierarchy.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
	markers: Vec<Marker>,
}

/// A snapshot of which subscriptions matched a node, taken before a
/// mutation (§4.9 step 1).
#[derive(Debug, Default, Clone)]
pub struct Matched(BTreeSet<SubscriptionId>);

/// Field-change and trigger events accumulated during a single command,
/// flushed once at the end (§4.9 steps 3-5).
#[derive(Debug, Default)]
pub struct DeferredEvents {
	field_changes: BTreeMap<SubscriptionId, BTreeSet<String>>,
	triggers: BTreeMap<SubscriptionId, BTreeSet<(NodeId, TriggerKindOrd)>>,
}

// `TriggerKind` isn't `Ord` (no need outside this dedup set); wrap it locally.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
struct TriggerKindOrd(u8);

impl From<TriggerKind> for TriggerKindOrd {
	fn from(k: TriggerKind) -> Self {
		TriggerKindOrd(match k {
			TriggerKind::Created => 0,
			TriggerKind::Updated => 1,
			TriggerKind::Deleted => 2,
		})
	}
}

impl From<TriggerKindOrd> for TriggerKind {
	fn from(k: TriggerKindOrd) -> Self {
		match k.0 {
			0 => TriggerKind::Created,
			1 => TriggerKind::Updated,
			_ => TriggerKind::Deleted,
		}
	}
}

/// One fully assembled, de-duplicated notification ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedEvent {
	pub subscription: SubscriptionId,
	pub fields_changed: Vec<String>,
	pub triggers: Vec<(NodeId, TriggerKindDisplay)>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TriggerKindDisplay(pub TriggerKind);

impl SubscriptionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, id: SubscriptionId, anchor: NodeId, kind: MarkerKind) {
		self.unregister(id);
		self.markers.push(Marker { id, anchor, kind });
	}

	pub fn unregister(&mut self, id: SubscriptionId) {
		self.markers.retain(|m| m.id != id);
	}

	/// Subscriptions whose marker covers `node`: `ThisNode` markers anchored
	/// exactly there, or `Ancestors`/`Descendants` markers whose subtree
	/// (per the hierarchy's current shape) includes it.
	pub fn precheck(&self, hierarchy: &Hierarchy, node: NodeId) -> Matched {
		let mut out = BTreeSet::new();
		for marker in &self.markers {
			let hit = match marker.kind {
				MarkerKind::ThisNode => marker.anchor == node,
				MarkerKind::Ancestors => hierarchy.find_ancestors(marker.anchor).map(|a| a.contains(&node)).unwrap_or(false),
				MarkerKind::Descendants => hierarchy.find_descendants(marker.anchor).map(|d| d.contains(&node)).unwrap_or(false),
			};
			if hit {
				out.insert(marker.id);
			}
		}
		Matched(out)
	}
}

impl DeferredEvents {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records a field-change event for every subscription that matched in
	/// `precheck` (§4.9 step 3). Parent/child link changes are excluded per
	/// §4.9 ("parents/children fields never publish field-change events
	/// directly") — callers simply never pass those field names here.
	pub fn defer_field_change_events(&mut self, matched: &Matched, field: &str) {
		for &id in &matched.0 {
			self.field_changes.entry(id).or_default().insert(field.to_string());
		}
	}

	/// Records a created/updated/deleted trigger event (§4.9 step 4).
	pub fn defer_trigger_events(&mut self, matched: &Matched, node: NodeId, kind: TriggerKind) {
		for &id in &matched.0 {
			self.triggers.entry(id).or_default().insert((node, kind.into()));
		}
	}

	/// Publishes everything accumulated so far, exactly once per
	/// subscription (§4.9 step 5), then clears the buffer.
	pub fn dispatch_deferred(&mut self) -> Vec<DispatchedEvent> {
		let mut ids: BTreeSet<SubscriptionId> = self.field_changes.keys().copied().collect();
		ids.extend(self.triggers.keys().copied());
		let out = ids
			.into_iter()
			.map(|id| DispatchedEvent {
				subscription: id,
				fields_changed: self.field_changes.remove(&id).map(|s| s.into_iter().collect()).unwrap_or_default(),
				triggers: self
					.triggers
					.remove(&id)
					.map(|s| s.into_iter().map(|(n, k)| (n, TriggerKindDisplay(k.into()))).collect())
					.unwrap_or_default(),
			})
			.collect();
		self.field_changes.clear();
		self.triggers.clear();
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hierarchy::RootPolicy;

	fn id(s: &str) -> NodeId {
		NodeId::parse(s.as_bytes()).unwrap()
	}

	fn sub(n: u8) -> SubscriptionId {
		let mut bytes = [0u8; 32];
		bytes[0] = n;
		SubscriptionId(bytes)
	}

	#[test]
	fn this_node_marker_matches_only_its_anchor() {
		let mut reg = SubscriptionRegistry::new();
		reg.register(sub(1), id("a"), MarkerKind::ThisNode);
		let h = Hierarchy::new();
		assert!(reg.precheck(&h, id("a")).0.contains(&sub(1)));
		assert!(!reg.precheck(&h, id("b")).0.contains(&sub(1)));
	}

	#[test]
	fn descendants_marker_matches_the_whole_subtree() {
		let mut h = Hierarchy::new();
		h.add(id("root"), &[], &[], RootPolicy::NoRoot).unwrap();
		h.add(id("child"), &[id("root")], &[], RootPolicy::NoRoot).unwrap();
		let mut reg = SubscriptionRegistry::new();
		reg.register(sub(2), id("root"), MarkerKind::Descendants);
		assert!(reg.precheck(&h, id("child")).0.contains(&sub(2)));
	}

	#[test]
	fn dispatch_deduplicates_repeated_field_changes() {
		let mut events = DeferredEvents::new();
		let matched = Matched(BTreeSet::from([sub(1)]));
		events.defer_field_change_events(&matched, "score");
		events.defer_field_change_events(&matched, "score");
		events.defer_field_change_events(&matched, "name");
		let dispatched = events.dispatch_deferred();
		assert_eq!(dispatched.len(), 1);
		assert_eq!(dispatched[0].fields_changed, vec!["name".to_string(), "score".to_string()]);
	}

	#[test]
	fn dispatch_clears_state_so_nothing_republishes() {
		let mut events = DeferredEvents::new();
		let matched = Matched(BTreeSet::from([sub(1)]));
		events.defer_trigger_events(&matched, id("a"), TriggerKind::Created);
		assert_eq!(events.dispatch_deferred().len(), 1);
		assert_eq!(events.dispatch_deferred().len(), 0);
	}
}
