use std::collections::BTreeMap;

use crate::err::Error;
use crate::val::path::{split_path, Part};
use crate::val::set::{SetElement, ValueSet};
use crate::val::{Tag, Value, ValueArray};

/// One slot in a [`TypedObject`]: the value itself plus the opaque 32-bit
/// user-meta word every key carries (§3, §4.1 `user_meta_get/set`).
#[derive(Debug, Default)]
pub struct FieldEntry {
	pub value: Value,
	pub user_meta: u32,
}

impl FieldEntry {
	fn new(value: Value) -> Self {
		Self {
			value,
			user_meta: 0,
		}
	}
}

impl PartialEq for FieldEntry {
	fn eq(&self, other: &Self) -> bool {
		self.value == other.value && self.user_meta == other.user_meta
	}
}

/// A recursive, schemaless keyed container (C3). Invariant: keys never
/// contain NUL bytes (mirrors the teacher's `sql::Object`).
#[derive(Debug, Default, PartialEq)]
pub struct TypedObject(BTreeMap<String, FieldEntry>);

/// Outcome of a "set only if absent/changed" setter (§4.1
/// `set_X_default`/`update_X`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SetOutcome {
	Set,
	AlreadyExists,
}

impl TypedObject {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len_top_level(&self) -> usize {
		self.0.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldEntry)> {
		self.0.iter()
	}

	pub fn top_level_get(&self, key: &str) -> Option<&Value> {
		self.0.get(key).map(|e| &e.value)
	}

	pub fn top_level_get_entry(&self, key: &str) -> Option<&FieldEntry> {
		self.0.get(key)
	}

	fn resolve<'a>(&'a self, parts: &[Part]) -> Option<&'a FieldEntry> {
		let (head, rest) = parts.split_first()?;
		let field = head.as_field()?;
		let entry = self.0.get(field)?;
		if rest.is_empty() {
			Some(entry)
		} else {
			entry.value.as_object()?.resolve(rest)
		}
	}

	fn resolve_mut<'a>(&'a mut self, parts: &[Part], create: bool) -> Result<Option<&'a mut FieldEntry>, Error> {
		let (head, rest) = match parts.split_first() {
			Some(x) => x,
			None => return Ok(None),
		};
		let field = head.as_field().ok_or_else(|| Error::InvalidArgument("wildcard not valid here".into()))?;
		if rest.is_empty() {
			return Ok(Some(self.0.entry(field.to_string()).or_insert_with(FieldEntry::default)));
		}
		let entry = self.0.entry(field.to_string()).or_insert_with(FieldEntry::default);
		match &mut entry.value {
			Value::Object(_) => {}
			Value::Null if create => entry.value = Value::Object(TypedObject::new()),
			Value::Null => return Ok(None),
			_ => {
				return Err(Error::TypeMismatch {
					expected: "object",
					found: entry.value.tag().name(),
				})
			}
		}
		entry.value.as_object_mut().unwrap().resolve_mut(rest, create)
	}

	pub fn get_type(&self, key: &str) -> Result<Tag, Error> {
		let parts = split_path(key)?;
		Ok(self.resolve(&parts).map(|e| e.value.tag()).unwrap_or(Tag::Null))
	}

	pub fn exists(&self, key: &str) -> Result<bool, Error> {
		Ok(self.get_type(key)? != Tag::Null)
	}

	/// Only the first dotted segment must resolve (§4.1).
	pub fn exists_top_level(&self, key_path: &str) -> Result<bool, Error> {
		let parts = split_path(key_path)?;
		let head = parts.first().and_then(Part::as_field).ok_or_else(|| Error::InvalidArgument("empty key".into()))?;
		Ok(self.0.contains_key(head))
	}

	pub fn del(&mut self, key: &str) -> Result<(), Error> {
		let parts = split_path(key)?;
		if parts.len() == 1 {
			let field = parts[0].as_field().ok_or_else(|| Error::InvalidArgument("wildcard not valid here".into()))?;
			if self.0.remove(field).is_none() {
				return Err(Error::FieldNotFound(key.to_string()));
			}
			return Ok(());
		}
		let (last, prefix) = parts.split_last().unwrap();
		let field = last.as_field().ok_or_else(|| Error::InvalidArgument("wildcard not valid here".into()))?;
		match self.resolve_mut(prefix, false)? {
			Some(entry) => match &mut entry.value {
				Value::Object(obj) => {
					if obj.0.remove(field).is_none() {
						return Err(Error::FieldNotFound(key.to_string()));
					}
					Ok(())
				}
				_ => Err(Error::TypeMismatch {
					expected: "object",
					found: entry.value.tag().name(),
				}),
			},
			None => Err(Error::FieldNotFound(key.to_string())),
		}
	}

	pub fn get_double(&self, key: &str) -> Result<f64, Error> {
		self.get_typed(key, Tag::Double, Value::as_double)
	}

	pub fn get_long(&self, key: &str) -> Result<i64, Error> {
		self.get_typed(key, Tag::Long, Value::as_long)
	}

	pub fn get_string(&self, key: &str) -> Result<String, Error> {
		self.get_typed(key, Tag::String, |v| v.as_str().map(str::to_string))
	}

	fn get_typed<T>(&self, key: &str, want: Tag, extract: impl Fn(&Value) -> Option<T>) -> Result<T, Error> {
		let parts = split_path(key)?;
		match self.resolve(&parts) {
			None => Err(Error::FieldNotFound(key.to_string())),
			Some(entry) => extract(&entry.value).ok_or_else(|| Error::TypeMismatch {
				expected: want.name(),
				found: entry.value.tag().name(),
			}),
		}
	}

	pub fn get_object(&self, key: &str) -> Result<&TypedObject, Error> {
		let parts = split_path(key)?;
		match self.resolve(&parts) {
			None => Err(Error::FieldNotFound(key.to_string())),
			Some(entry) => entry.value.as_object().ok_or_else(|| Error::TypeMismatch {
				expected: "object",
				found: entry.value.tag().name(),
			}),
		}
	}

	/// Generic path setter: intermediate segments auto-create nested objects
	/// (§4.1 "Mid-path creation is permitted for setters only").
	pub fn set(&mut self, key: &str, value: Value) -> Result<(), Error> {
		let parts = split_path(key)?;
		let (last, prefix) = parts.split_last().unwrap();
		let field = last.as_field().ok_or_else(|| Error::InvalidArgument("wildcard not valid here".into()))?;
		if prefix.is_empty() {
			self.0.entry(field.to_string()).or_default().value = value;
			return Ok(());
		}
		let entry = self.resolve_mut(prefix, true)?.expect("create=true always yields an entry");
		let obj = entry.value.as_object_mut().ok_or_else(|| Error::TypeMismatch {
			expected: "object",
			found: entry.value.tag().name(),
		})?;
		obj.0.entry(field.to_string()).or_default().value = value;
		Ok(())
	}

	/// Sets only if the current tag is NULL (§4.1 `set_X_default`).
	pub fn set_default(&mut self, key: &str, value: Value) -> Result<SetOutcome, Error> {
		if self.exists(key)? {
			return Ok(SetOutcome::AlreadyExists);
		}
		self.set(key, value)?;
		Ok(SetOutcome::Set)
	}

	/// Sets only if the value differs from the current one (§4.1
	/// `update_X`).
	pub fn update(&mut self, key: &str, value: Value) -> Result<SetOutcome, Error> {
		let parts = split_path(key)?;
		if let Some(entry) = self.resolve(&parts) {
			if entry.value == value {
				return Ok(SetOutcome::AlreadyExists);
			}
		}
		self.set(key, value)?;
		Ok(SetOutcome::Set)
	}

	/// If absent, initializes to `default` before applying `delta`. Returns
	/// the value before the delta was applied.
	pub fn increment_long(&mut self, key: &str, default: i64, delta: i64) -> Result<i64, Error> {
		let parts = split_path(key)?;
		let prev = match self.resolve(&parts) {
			Some(e) if !e.value.is_null() => e
				.value
				.as_long()
				.ok_or_else(|| Error::TypeMismatch {
					expected: "longlong",
					found: e.value.tag().name(),
				})?,
			_ => default,
		};
		self.set(key, Value::Long(prev + delta))?;
		Ok(prev)
	}

	pub fn increment_double(&mut self, key: &str, default: f64, delta: f64) -> Result<f64, Error> {
		let parts = split_path(key)?;
		let prev = match self.resolve(&parts) {
			Some(e) if !e.value.is_null() => e
				.value
				.as_double()
				.ok_or_else(|| Error::TypeMismatch {
					expected: "double",
					found: e.value.tag().name(),
				})?,
			_ => default,
		};
		self.set(key, Value::Double(prev + delta))?;
		Ok(prev)
	}

	pub fn user_meta_get(&self, key: &str) -> Result<u32, Error> {
		let parts = split_path(key)?;
		self.resolve(&parts).map(|e| e.user_meta).ok_or_else(|| Error::FieldNotFound(key.to_string()))
	}

	pub fn user_meta_set(&mut self, key: &str, meta: u32) -> Result<(), Error> {
		let parts = split_path(key)?;
		let (last, prefix) = parts.split_last().unwrap();
		let field = last.as_field().ok_or_else(|| Error::InvalidArgument("wildcard not valid here".into()))?;
		let target: &mut BTreeMap<String, FieldEntry> = if prefix.is_empty() {
			&mut self.0
		} else {
			let entry = self.resolve_mut(prefix, false)?.ok_or_else(|| Error::FieldNotFound(key.to_string()))?;
			&mut entry.value.as_object_mut().ok_or_else(|| Error::TypeMismatch {
				expected: "object",
				found: entry.value.tag().name(),
			})?.0
		};
		let entry = target.get_mut(field).ok_or_else(|| Error::FieldNotFound(key.to_string()))?;
		entry.user_meta = meta;
		Ok(())
	}

	/// For OBJECT: key count; STRING: byte length; SET/ARRAY: element count;
	/// POINTER: delegates to the ops vtable (§4.1 `len`).
	pub fn len(&self, key: Option<&str>) -> Result<usize, Error> {
		let value = match key {
			None => return Ok(self.0.len()),
			Some(key) => {
				let parts = split_path(key)?;
				&self.resolve(&parts).ok_or_else(|| Error::FieldNotFound(key.to_string()))?.value
			}
		};
		Ok(match value {
			Value::Object(o) => o.0.len(),
			Value::Str(s) => s.text.len(),
			Value::Set(s) => s.len(),
			Value::Array(a) => a.len(),
			Value::Pointer(p) => p.len(),
			_ => {
				return Err(Error::WrongType {
					expected: "object, string, set, array or pointer",
				})
			}
		})
	}

	/// Adds `elem` to the SET at `key`, creating it if absent.
	pub fn set_add(&mut self, key: &str, elem: SetElement) -> Result<(), Error> {
		let parts = split_path(key)?;
		let (last, prefix) = parts.split_last().unwrap();
		let field = last.as_field().ok_or_else(|| Error::InvalidArgument("wildcard not valid here".into()))?;
		let target = if prefix.is_empty() {
			&mut self.0
		} else {
			let entry = self.resolve_mut(prefix, true)?.unwrap();
			&mut entry.value.as_object_mut().ok_or_else(|| Error::TypeMismatch {
				expected: "object",
				found: entry.value.tag().name(),
			})?.0
		};
		let entry = target.entry(field.to_string()).or_default();
		if entry.value.is_null() {
			entry.value = Value::Set(ValueSet::new());
		}
		match &mut entry.value {
			Value::Set(s) => s.insert(elem).map(|_| ()),
			_ => Err(Error::TypeMismatch {
				expected: "set",
				found: entry.value.tag().name(),
			}),
		}
	}

	pub fn set_remove(&mut self, key: &str, elem: &SetElement) -> Result<bool, Error> {
		let parts = split_path(key)?;
		match self.resolve_mut(&parts, false)? {
			Some(entry) => match &mut entry.value {
				Value::Set(s) => Ok(s.remove(elem)),
				_ => Err(Error::TypeMismatch {
					expected: "set",
					found: entry.value.tag().name(),
				}),
			},
			None => Ok(false),
		}
	}

	/// Runs `f` against the ARRAY value at `key`, creating an empty array
	/// there first if the current tag is NULL (array-push/insert-at/
	/// remove-at in `modify` use this rather than read-clone-writeback,
	/// since `Value` is deliberately not `Clone`).
	pub fn with_array_mut<R>(&mut self, key: &str, f: impl FnOnce(&mut ValueArray) -> R) -> Result<R, Error> {
		let parts = split_path(key)?;
		let entry = self.resolve_mut(&parts, true)?.expect("create=true always yields an entry");
		if entry.value.is_null() {
			entry.value = Value::Array(ValueArray::new());
		}
		let arr = entry.value.as_array_mut().ok_or_else(|| Error::TypeMismatch {
			expected: "array",
			found: entry.value.tag().name(),
		})?;
		Ok(f(arr))
	}

	/// Iteration is insertion-order-independent and stable under concurrent
	/// read-only access (§4.1 `foreach_key`). Any intervening mutation may
	/// invalidate iteration, which Rust's borrow checker enforces statically
	/// by requiring the iterator's lifetime not to outlive an `&self` hold.
	pub fn foreach_key(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(|k| k.as_str())
	}

	pub fn foreach_value_of_type(&self, tag: Tag) -> impl Iterator<Item = (&str, &Value)> {
		self.0.iter().filter_map(move |(k, e)| (e.value.tag() == tag).then(|| (k.as_str(), &e.value)))
	}
}
