//! The typed object store (C3, §4.1).
//!
//! A [`TypedObject`] is a schemaless, recursive, keyed container: every key
//! maps to a tagged [`Value`] plus an opaque 32-bit user-meta word. This
//! mirrors the teacher's `sql::Value`/`sql::Object` split, but as a flat
//! tagged sum (Design Notes §9: "a tagged sum rather than a pointer union")
//! so destructor dispatch for [`Tag::Pointer`] values is exhaustive and
//! checked at compile time by the match in `Value::drop` semantics (we rely
//! on Rust's own `Drop` for non-pointer values and only need explicit
//! teardown for the pointer ops vtable, see [`pointer`]).
mod array;
mod object;
mod path;
mod pointer;
mod reply;
mod set;

pub use array::ValueArray;
pub use object::{FieldEntry, SetOutcome, TypedObject};
pub use path::Part;
pub use pointer::{PointerOps, PointerSlot, PointerType, PointerTypeRegistry, REGISTRY as POINTER_REGISTRY};
pub use reply::{reply_with_object, ReplyValue, ReplyWriter};
pub use set::ordered_float::OrderedFloat;
pub use set::{SetElement, ValueSet};

use crate::id::NodeId;

/// The tag of a [`Value`], i.e. its declared kind independent of payload.
/// `NULL` doubles as "absent" per §4.1 (`get_type` returns `NULL` for a
/// missing key).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Tag {
	Null,
	Double,
	Long,
	String,
	Object,
	Set,
	Array,
	Pointer,
}

impl Tag {
	pub fn name(&self) -> &'static str {
		match self {
			Tag::Null => "null",
			Tag::Double => "double",
			Tag::Long => "longlong",
			Tag::String => "string",
			Tag::Object => "object",
			Tag::Set => "set",
			Tag::Array => "array",
			Tag::Pointer => "pointer",
		}
	}
}

/// A language tag carried alongside a localized string, per §3 ("optional
/// language tag for localized text subtype").
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct LocalizedString {
	pub lang: Option<String>,
	pub text: String,
}

/// `user_meta` value marking a top-level OBJECT field as the "localized
/// text" subtype (§3, §4.7 sorting contract): its children are plain string
/// values keyed by language code rather than a regular nested object.
pub const LOCALIZED_TEXT_META: u32 = 1;

#[derive(Debug)]
#[non_exhaustive]
pub enum Value {
	Null,
	Double(f64),
	Long(i64),
	Str(LocalizedString),
	Object(TypedObject),
	Set(ValueSet),
	Array(ValueArray),
	Pointer(PointerSlot),
}

impl Default for Value {
	fn default() -> Self {
		Value::Null
	}
}

impl Value {
	pub fn tag(&self) -> Tag {
		match self {
			Value::Null => Tag::Null,
			Value::Double(_) => Tag::Double,
			Value::Long(_) => Tag::Long,
			Value::Str(_) => Tag::String,
			Value::Object(_) => Tag::Object,
			Value::Set(_) => Tag::Set,
			Value::Array(_) => Tag::Array,
			Value::Pointer(_) => Tag::Pointer,
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	pub fn as_double(&self) -> Option<f64> {
		match self {
			Value::Double(v) => Some(*v),
			_ => None,
		}
	}

	pub fn as_long(&self) -> Option<i64> {
		match self {
			Value::Long(v) => Some(*v),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::Str(v) => Some(&v.text),
			_ => None,
		}
	}

	pub fn as_object(&self) -> Option<&TypedObject> {
		match self {
			Value::Object(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_object_mut(&mut self) -> Option<&mut TypedObject> {
		match self {
			Value::Object(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_array(&self) -> Option<&ValueArray> {
		match self {
			Value::Array(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_array_mut(&mut self) -> Option<&mut ValueArray> {
		match self {
			Value::Array(v) => Some(v),
			_ => None,
		}
	}

	pub fn from_string<S: Into<String>>(s: S) -> Self {
		Value::Str(LocalizedString {
			lang: None,
			text: s.into(),
		})
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Double(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Long(v)
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::from_string(v)
	}
}

impl From<NodeId> for Value {
	fn from(v: NodeId) -> Self {
		Value::from_string(v.to_string())
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Value::Null, Value::Null) => true,
			(Value::Double(a), Value::Double(b)) => a == b,
			(Value::Long(a), Value::Long(b)) => a == b,
			(Value::Str(a), Value::Str(b)) => a == b,
			(Value::Object(a), Value::Object(b)) => a == b,
			(Value::Set(a), Value::Set(b)) => a == b,
			(Value::Array(a), Value::Array(b)) => a == b,
			// Pointer identity, not payload equality: two pointer slots with
			// the same opaque handle are considered equal only if they are
			// literally the same handle. Used by `update_X`'s "unchanged"
			// check, which never applies to pointers.
			(Value::Pointer(_), Value::Pointer(_)) => false,
			_ => false,
		}
	}
}
