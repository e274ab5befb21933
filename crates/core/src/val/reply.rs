//! Reply-writing abstraction (§4.1, §6) decoupled from the wire format: the
//! connection layer supplies a [`ReplyWriter`] that knows how to serialize
//! onto its own framed protocol, while this module only walks the object
//! tree and decides what to emit, including wildcard expansion.
use crate::err::Error;
use crate::val::object::TypedObject;
use crate::val::path::{split_path, Part};
use crate::val::{LocalizedString, Tag, Value};

/// A sink for a reply stream. Implementations live in the connection layer;
/// this trait exists so `val` and `hierarchy` can produce replies without
/// depending on the wire codec.
pub trait ReplyWriter {
	fn write_null(&mut self);
	fn write_double(&mut self, v: f64);
	fn write_long(&mut self, v: i64);
	fn write_string(&mut self, lang: Option<&str>, text: &str);
	/// `len` is `None` when the array/object's size isn't known up front
	/// (streamed); implementations that require a length should buffer.
	fn write_array_start(&mut self, len: Option<usize>);
	fn write_array_end(&mut self);
	fn write_map_start(&mut self, len: Option<usize>);
	fn write_map_end(&mut self);
	fn write_error(&mut self, message: &str);
}

/// An owned, in-memory mirror of what would be written to a [`ReplyWriter`],
/// used by tests and by callers (e.g. subscription dispatch) that need the
/// reply as a value rather than as wire bytes.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ReplyValue {
	Null,
	Double(f64),
	Long(i64),
	String(Option<String>, String),
	Array(Vec<ReplyValue>),
	Map(Vec<(String, ReplyValue)>),
	Error(String),
}

impl ReplyWriter for Vec<ReplyValue> {
	fn write_null(&mut self) {
		self.push(ReplyValue::Null);
	}
	fn write_double(&mut self, v: f64) {
		self.push(ReplyValue::Double(v));
	}
	fn write_long(&mut self, v: i64) {
		self.push(ReplyValue::Long(v));
	}
	fn write_string(&mut self, lang: Option<&str>, text: &str) {
		self.push(ReplyValue::String(lang.map(str::to_string), text.to_string()));
	}
	fn write_array_start(&mut self, _len: Option<usize>) {}
	fn write_array_end(&mut self) {}
	fn write_map_start(&mut self, _len: Option<usize>) {}
	fn write_map_end(&mut self) {}
	fn write_error(&mut self, message: &str) {
		self.push(ReplyValue::Error(message.to_string()));
	}
}

fn write_scalar(writer: &mut dyn ReplyWriter, value: &Value) -> Result<(), Error> {
	match value {
		Value::Null => writer.write_null(),
		Value::Double(v) => writer.write_double(*v),
		Value::Long(v) => writer.write_long(*v),
		Value::Str(LocalizedString { lang, text }) => writer.write_string(lang.as_deref(), text),
		Value::Array(arr) => {
			writer.write_array_start(Some(arr.len()));
			for item in arr.iter() {
				write_scalar(writer, item)?;
			}
			writer.write_array_end();
		}
		Value::Set(set) => {
			writer.write_array_start(Some(set.len()));
			for elem in set.iter() {
				match elem {
					crate::val::SetElement::Double(d) => writer.write_double(d.0),
					crate::val::SetElement::Long(l) => writer.write_long(*l),
					crate::val::SetElement::String(s) => writer.write_string(None, s),
					crate::val::SetElement::NodeId(id) => writer.write_string(None, &id.to_string()),
				}
			}
			writer.write_array_end();
		}
		Value::Object(obj) => {
			writer.write_map_start(Some(obj.len_top_level()));
			for (k, entry) in obj.iter() {
				writer.write_string(None, k);
				write_scalar(writer, &entry.value)?;
			}
			writer.write_map_end();
		}
		Value::Pointer(p) => p.reply(writer)?,
	}
	Ok(())
}

/// Implements the wildcard reply contract of §4.1: a key path containing one
/// or more `*` segments expands to a map keyed by every matching field name
/// at that level, recursing for trailing segments. A path with no wildcard
/// behaves like a plain `get`.
pub fn reply_with_object(obj: &TypedObject, key_path: &str, writer: &mut dyn ReplyWriter) -> Result<(), Error> {
	let parts = split_path(key_path)?;
	reply_parts(obj, &parts, writer)
}

fn reply_parts(obj: &TypedObject, parts: &[Part], writer: &mut dyn ReplyWriter) -> Result<(), Error> {
	match parts.split_first() {
		None => Err(Error::InvalidArgument("empty key".into())),
		Some((Part::Wildcard, rest)) => {
			let matches: Vec<_> = obj.iter().collect();
			writer.write_map_start(Some(matches.len()));
			for (k, entry) in matches {
				writer.write_string(None, k);
				if rest.is_empty() {
					write_scalar(writer, &entry.value)?;
				} else {
					match &entry.value {
						Value::Object(child) => reply_parts(child, rest, writer)?,
						Value::Null => writer.write_null(),
						_ => {
							return Err(Error::TypeMismatch {
								expected: "object",
								found: entry.value.tag().name(),
							})
						}
					}
				}
			}
			writer.write_map_end();
			Ok(())
		}
		Some((Part::Field(field), rest)) => {
			let entry = match obj.top_level_get_entry(field) {
				Some(e) => e,
				None => {
					writer.write_null();
					return Ok(());
				}
			};
			if rest.is_empty() {
				write_scalar(writer, &entry.value)
			} else {
				match &entry.value {
					Value::Object(child) => reply_parts(child, rest, writer),
					Value::Null => {
						writer.write_null();
						Ok(())
					}
					_ => Err(Error::TypeMismatch {
						expected: "object",
						found: entry.value.tag().name(),
					}),
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn obj_with(pairs: &[(&str, Value)]) -> TypedObject {
		let mut o = TypedObject::new();
		for (k, v) in pairs {
			o.set(k, clone_value(v)).unwrap();
		}
		o
	}

	// Value is intentionally not Clone (pointer ownership); tests only ever
	// need to duplicate plain scalars.
	fn clone_value(v: &Value) -> Value {
		match v {
			Value::Long(n) => Value::Long(*n),
			Value::Double(n) => Value::Double(*n),
			Value::Str(s) => Value::from_string(s.text.clone()),
			Value::Null => Value::Null,
			_ => unimplemented!("test helper only covers scalars"),
		}
	}

	#[test]
	fn plain_key_reply_is_a_single_scalar() {
		let obj = obj_with(&[("name", Value::from_string("north"))]);
		let mut out = Vec::new();
		reply_with_object(&obj, "name", &mut out).unwrap();
		assert_eq!(out, vec![ReplyValue::String(None, "north".into())]);
	}

	#[test]
	fn wildcard_expands_to_a_map_of_all_fields() {
		let obj = obj_with(&[("a", Value::Long(1)), ("b", Value::Long(2))]);
		let mut out = Vec::new();
		reply_with_object(&obj, "*", &mut out).unwrap();
		assert_eq!(
			out,
			vec![
				ReplyValue::String(None, "a".into()),
				ReplyValue::Long(1),
				ReplyValue::String(None, "b".into()),
				ReplyValue::Long(2),
			]
		);
	}

	#[test]
	fn missing_field_replies_null_rather_than_erroring() {
		let obj = TypedObject::new();
		let mut out = Vec::new();
		reply_with_object(&obj, "missing", &mut out).unwrap();
		assert_eq!(out, vec![ReplyValue::Null]);
	}
}
