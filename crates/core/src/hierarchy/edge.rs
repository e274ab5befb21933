//! Edge fields (C5, §4.4): named, directed, constrained references between
//! nodes, each optionally carrying a metadata object.
use std::collections::BTreeMap;

use crate::err::Error;
use crate::id::NodeId;
use crate::val::TypedObject;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EdgeDirection {
	Single,
	Multi,
}

/// What happens to the reverse side of a bidirectional field when one end
/// is deleted (§4.4 invariant: "deleting a node tears down its edges,
/// removing the reverse entries on peers first").
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OnDelete {
	RemoveReverse,
	Ignore,
}

/// A per-field-name constraint descriptor, registered once for the whole
/// hierarchy (§4.4).
#[derive(Debug, Clone)]
pub struct EdgeConstraint {
	pub direction: EdgeDirection,
	pub reverse_field: Option<String>,
	pub on_delete: OnDelete,
}

impl EdgeConstraint {
	pub fn single(on_delete: OnDelete) -> Self {
		Self {
			direction: EdgeDirection::Single,
			reverse_field: None,
			on_delete,
		}
	}

	pub fn multi(on_delete: OnDelete) -> Self {
		Self {
			direction: EdgeDirection::Multi,
			reverse_field: None,
			on_delete,
		}
	}

	pub fn bidirectional(direction: EdgeDirection, reverse_field: impl Into<String>, on_delete: OnDelete) -> Self {
		Self {
			direction,
			reverse_field: Some(reverse_field.into()),
			on_delete,
		}
	}
}

#[derive(Debug, Default)]
struct EdgeSlot {
	targets: Vec<NodeId>,
	metadata: BTreeMap<NodeId, TypedObject>,
}

/// A node's edge fields, keyed by field name. Lives inside [`super::Node`].
#[derive(Debug, Default)]
pub struct EdgeStore {
	fields: BTreeMap<String, EdgeSlot>,
}

impl EdgeStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&mut self, field: &str, dst: NodeId, direction: EdgeDirection) {
		let slot = self.fields.entry(field.to_string()).or_default();
		if direction == EdgeDirection::Single {
			slot.targets.clear();
			slot.metadata.clear();
		}
		if !slot.targets.contains(&dst) {
			slot.targets.push(dst);
		}
	}

	pub fn remove(&mut self, field: &str, dst: NodeId) {
		if let Some(slot) = self.fields.get_mut(field) {
			slot.targets.retain(|&t| t != dst);
			slot.metadata.remove(&dst);
			if slot.targets.is_empty() {
				self.fields.remove(field);
			}
		}
	}

	pub fn get_field(&self, field: &str) -> &[NodeId] {
		self.fields.get(field).map(|s| s.targets.as_slice()).unwrap_or(&[])
	}

	pub fn has(&self, field: &str, dst: NodeId) -> bool {
		self.fields.get(field).map(|s| s.targets.contains(&dst)).unwrap_or(false)
	}

	pub fn deref_single(&self, field: &str) -> Option<NodeId> {
		self.fields.get(field).and_then(|s| s.targets.first().copied())
	}

	pub fn delete_field_metadata(&mut self, field: &str) {
		if let Some(slot) = self.fields.get_mut(field) {
			slot.metadata.clear();
		}
	}

	pub fn get_edge_metadata(&mut self, field: &str, dst: NodeId, create_if_missing: bool) -> Result<&mut TypedObject, Error> {
		let slot = self.fields.get_mut(field).ok_or_else(|| Error::EdgeFieldNotFound(field.to_string()))?;
		if !slot.targets.contains(&dst) {
			return Err(Error::EdgeFieldNotFound(field.to_string()));
		}
		if create_if_missing {
			Ok(slot.metadata.entry(dst).or_default())
		} else {
			slot.metadata.get_mut(&dst).ok_or_else(|| Error::FieldNotFound(format!("{field}[metadata]")))
		}
	}

	pub fn all_targets(&self) -> impl Iterator<Item = (&str, NodeId)> {
		self.fields.iter().flat_map(|(name, slot)| slot.targets.iter().map(move |&t| (name.as_str(), t)))
	}

	pub fn field_names(&self) -> impl Iterator<Item = &str> {
		self.fields.keys().map(|s| s.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn id(s: &str) -> NodeId {
		NodeId::parse(s.as_bytes()).unwrap()
	}

	#[test]
	fn single_direction_replaces_existing_target() {
		let mut store = EdgeStore::new();
		store.add("owner", id("a"), EdgeDirection::Single);
		store.add("owner", id("b"), EdgeDirection::Single);
		assert_eq!(store.get_field("owner"), &[id("b")]);
	}

	#[test]
	fn multi_direction_accumulates_targets() {
		let mut store = EdgeStore::new();
		store.add("members", id("a"), EdgeDirection::Multi);
		store.add("members", id("b"), EdgeDirection::Multi);
		assert_eq!(store.get_field("members"), &[id("a"), id("b")]);
	}

	#[test]
	fn remove_drops_empty_field_entirely() {
		let mut store = EdgeStore::new();
		store.add("members", id("a"), EdgeDirection::Multi);
		store.remove("members", id("a"));
		assert!(store.get_field("members").is_empty());
		assert_eq!(store.field_names().count(), 0);
	}

	#[test]
	fn metadata_requires_existing_edge() {
		let mut store = EdgeStore::new();
		assert!(store.get_edge_metadata("members", id("a"), true).is_err());
		store.add("members", id("a"), EdgeDirection::Multi);
		assert!(store.get_edge_metadata("members", id("a"), true).is_ok());
	}
}
