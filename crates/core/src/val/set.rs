//! Ordered, homogeneous sets over four element kinds (C1, §3).
use std::collections::BTreeSet;

use crate::err::Error;
use crate::id::NodeId;

#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum SetElement {
	Double(ordered_float::OrderedFloat),
	Long(i64),
	String(String),
	NodeId(NodeId),
}

/// Placeholder ordered-float newtype kept local to avoid pulling in the
/// `ordered-float` crate for a single use site: doubles in a set are sorted
/// by IEEE-754 total order, matching §4.7's sort contract for numeric
/// fields.
pub mod ordered_float {
	#[derive(Debug, Clone, Copy, PartialEq)]
	pub struct OrderedFloat(pub f64);

	impl Eq for OrderedFloat {}

	impl PartialOrd for OrderedFloat {
		fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
			Some(self.cmp(other))
		}
	}

	impl Ord for OrderedFloat {
		fn cmp(&self, other: &Self) -> std::cmp::Ordering {
			self.0.total_cmp(&other.0)
		}
	}

	impl std::hash::Hash for OrderedFloat {
		fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
			self.0.to_bits().hash(state)
		}
	}
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ValueSet {
	kind: Option<&'static str>,
	items: BTreeSet<SetElement>,
}

impl ValueSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &SetElement> {
		self.items.iter()
	}

	fn kind_of(elem: &SetElement) -> &'static str {
		match elem {
			SetElement::Double(_) => "double",
			SetElement::Long(_) => "long",
			SetElement::String(_) => "string",
			SetElement::NodeId(_) => "node_id",
		}
	}

	/// Inserts `elem`, declaring the set's element type on first insert.
	/// Subsequent inserts of a different kind fail with `type_mismatch`
	/// (§4.1 "attempted cross-type insertion fails").
	pub fn insert(&mut self, elem: SetElement) -> Result<bool, Error> {
		let kind = Self::kind_of(&elem);
		match self.kind {
			None => self.kind = Some(kind),
			Some(k) if k != kind => {
				return Err(Error::TypeMismatch {
					expected: k,
					found: kind,
				})
			}
			_ => {}
		}
		Ok(self.items.insert(elem))
	}

	pub fn remove(&mut self, elem: &SetElement) -> bool {
		let removed = self.items.remove(elem);
		if self.items.is_empty() {
			self.kind = None;
		}
		removed
	}

	pub fn contains(&self, elem: &SetElement) -> bool {
		self.items.contains(elem)
	}

	/// Union in place; fails if `other` is non-empty and of a different
	/// declared kind.
	pub fn union(&mut self, other: &ValueSet) -> Result<(), Error> {
		for e in &other.items {
			self.insert(e.clone())?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn declares_type_on_first_insert() {
		let mut s = ValueSet::new();
		assert!(s.insert(SetElement::String("a".into())).unwrap());
		let err = s.insert(SetElement::Long(1)).unwrap_err();
		assert!(matches!(err, Error::TypeMismatch { .. }));
	}

	#[test]
	fn dedups_and_orders() {
		let mut s = ValueSet::new();
		s.insert(SetElement::Long(3)).unwrap();
		s.insert(SetElement::Long(1)).unwrap();
		s.insert(SetElement::Long(1)).unwrap();
		assert_eq!(s.len(), 2);
		let items: Vec<_> = s.iter().cloned().collect();
		assert_eq!(items, vec![SetElement::Long(1), SetElement::Long(3)]);
	}

	#[test]
	fn kind_resets_once_emptied() {
		let mut s = ValueSet::new();
		s.insert(SetElement::Long(1)).unwrap();
		s.remove(&SetElement::Long(1));
		assert!(s.insert(SetElement::String("a".into())).is_ok());
	}
}
