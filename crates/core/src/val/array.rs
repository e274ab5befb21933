//! Ordered arrays with a declared homogeneous element subtype and sparse
//! assignment (§4.1 "Array" operations).
use crate::err::Error;
use crate::val::{Tag, Value};

/// Not `Clone`: elements are `Value`, which is deliberately not `Clone`
/// (see [`crate::val::Value`]).
#[derive(Debug, Default)]
pub struct ValueArray {
	kind: Option<Tag>,
	items: Vec<Value>,
}

impl PartialEq for ValueArray {
	fn eq(&self, other: &Self) -> bool {
		self.items == other.items
	}
}

impl Eq for ValueArray {}

impl ValueArray {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Value> {
		self.items.iter()
	}

	pub fn get(&self, index: usize) -> Option<&Value> {
		self.items.get(index)
	}

	fn check_kind(&mut self, v: &Value) -> Result<(), Error> {
		if matches!(v.tag(), Tag::Null) {
			// Sparse gaps are always allowed regardless of declared kind.
			return Ok(());
		}
		match self.kind {
			None => {
				self.kind = Some(v.tag());
				Ok(())
			}
			Some(k) if k == v.tag() => Ok(()),
			Some(k) => Err(Error::TypeMismatch {
				expected: k.name(),
				found: v.tag().name(),
			}),
		}
	}

	pub fn append(&mut self, v: Value) -> Result<(), Error> {
		self.check_kind(&v)?;
		self.items.push(v);
		Ok(())
	}

	pub fn insert_at(&mut self, index: usize, v: Value) -> Result<(), Error> {
		self.check_kind(&v)?;
		if index >= self.items.len() {
			self.items.resize_with(index, || Value::Null);
			self.items.push(v);
		} else {
			self.items.insert(index, v);
		}
		Ok(())
	}

	/// Assigns at `index`, growing the array with `Null` gaps if necessary
	/// (§4.1 "`assign_at` (may grow sparsely)").
	pub fn assign_at(&mut self, index: usize, v: Value) -> Result<(), Error> {
		self.check_kind(&v)?;
		if index >= self.items.len() {
			self.items.resize_with(index + 1, || Value::Null);
		}
		self.items[index] = v;
		Ok(())
	}

	pub fn remove_at(&mut self, index: usize) -> Result<Value, Error> {
		if index >= self.items.len() {
			return Err(Error::InvalidArgument(format!("array index {index} out of range")));
		}
		let removed = self.items.remove(index);
		if self.items.iter().all(|v| v.is_null()) {
			self.kind = None;
		}
		Ok(removed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn append_declares_kind() {
		let mut a = ValueArray::new();
		a.append(Value::Long(1)).unwrap();
		assert!(matches!(a.append(Value::from_string("x")), Err(Error::TypeMismatch { .. })));
	}

	#[test]
	fn assign_at_grows_sparsely() {
		let mut a = ValueArray::new();
		a.assign_at(3, Value::Long(9)).unwrap();
		assert_eq!(a.len(), 4);
		assert!(a.get(0).unwrap().is_null());
		assert_eq!(a.get(3).unwrap().as_long(), Some(9));
	}

	#[test]
	fn remove_at_shifts_and_resets_kind_when_empty() {
		let mut a = ValueArray::new();
		a.append(Value::Long(1)).unwrap();
		a.remove_at(0).unwrap();
		assert_eq!(a.len(), 0);
		assert!(a.append(Value::from_string("now a string array")).is_ok());
	}

	#[test]
	fn null_gaps_never_conflict_with_declared_kind() {
		let mut a = ValueArray::new();
		a.assign_at(0, Value::Null).unwrap();
		a.assign_at(1, Value::Long(1)).unwrap();
		assert!(a.get(0).unwrap().is_null());
	}
}
