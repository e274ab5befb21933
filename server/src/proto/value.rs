//! TLV value encoding for message bodies (§6): a flat sequence of typed
//! values, each led by a one-byte type tag. Arrays may declare their
//! length up front or be written with a postponed length, terminated by
//! an `array_end` marker — [`FrameValueWriter`] picks whichever the
//! caller's [`graphdb_core::val::ReplyWriter::write_array_start`] call
//! asked for.
use graphdb_core::val::ReplyWriter;
use graphdb_core::Error;

const TAG_NULL: u8 = 0;
const TAG_ERROR: u8 = 1;
const TAG_DOUBLE: u8 = 2;
const TAG_LONG: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_ARRAY: u8 = 5;
const TAG_ARRAY_END: u8 = 6;

const ARRAY_LEN_POSTPONED: u32 = u32::MAX;

/// A decoded incoming argument. Outgoing replies are written straight to
/// wire bytes by [`FrameValueWriter`] instead of building this enum, since
/// the reply side only ever produces values, never inspects them.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
	Null,
	Error(i32, String),
	Double(f64),
	Long(i64),
	String(String),
	Array(Vec<WireValue>),
}

impl WireValue {
	pub fn as_str(&self) -> Result<&str, Error> {
		match self {
			WireValue::String(s) => Ok(s),
			_ => Err(Error::InvalidArgument("expected a string argument".into())),
		}
	}

	pub fn as_long(&self) -> Result<i64, Error> {
		match self {
			WireValue::Long(v) => Ok(*v),
			_ => Err(Error::InvalidArgument("expected a long argument".into())),
		}
	}

	pub fn as_double(&self) -> Result<f64, Error> {
		match self {
			WireValue::Double(v) => Ok(*v),
			_ => Err(Error::InvalidArgument("expected a double argument".into())),
		}
	}

	pub fn as_array(&self) -> Result<&[WireValue], Error> {
		match self {
			WireValue::Array(items) => Ok(items),
			_ => Err(Error::InvalidArgument("expected an array argument".into())),
		}
	}
}

fn read_u8(input: &[u8], pos: &mut usize) -> Result<u8, Error> {
	let b = *input.get(*pos).ok_or(Error::MalformedFrame)?;
	*pos += 1;
	Ok(b)
}

fn read_bytes<'a>(input: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], Error> {
	let end = pos.checked_add(len).ok_or(Error::MalformedFrame)?;
	let slice = input.get(*pos..end).ok_or(Error::MalformedFrame)?;
	*pos = end;
	Ok(slice)
}

fn read_u32(input: &[u8], pos: &mut usize) -> Result<u32, Error> {
	Ok(u32::from_le_bytes(read_bytes(input, pos, 4)?.try_into().unwrap()))
}

fn read_i32(input: &[u8], pos: &mut usize) -> Result<i32, Error> {
	Ok(i32::from_le_bytes(read_bytes(input, pos, 4)?.try_into().unwrap()))
}

fn read_i64(input: &[u8], pos: &mut usize) -> Result<i64, Error> {
	Ok(i64::from_le_bytes(read_bytes(input, pos, 8)?.try_into().unwrap()))
}

fn read_f64(input: &[u8], pos: &mut usize) -> Result<f64, Error> {
	Ok(f64::from_le_bytes(read_bytes(input, pos, 8)?.try_into().unwrap()))
}

fn read_string(input: &[u8], pos: &mut usize) -> Result<String, Error> {
	let len = read_u32(input, pos)? as usize;
	let bytes = read_bytes(input, pos, len)?;
	String::from_utf8(bytes.to_vec()).map_err(|_| Error::MalformedFrame)
}

pub fn decode_value(input: &[u8], pos: &mut usize) -> Result<WireValue, Error> {
	match read_u8(input, pos)? {
		TAG_NULL => Ok(WireValue::Null),
		TAG_ERROR => {
			let code = read_i32(input, pos)?;
			let msg = read_string(input, pos)?;
			Ok(WireValue::Error(code, msg))
		}
		TAG_DOUBLE => Ok(WireValue::Double(read_f64(input, pos)?)),
		TAG_LONG => Ok(WireValue::Long(read_i64(input, pos)?)),
		TAG_STRING => Ok(WireValue::String(read_string(input, pos)?)),
		TAG_ARRAY => {
			let len = read_u32(input, pos)?;
			let mut items = Vec::new();
			if len == ARRAY_LEN_POSTPONED {
				loop {
					if input.get(*pos).copied() == Some(TAG_ARRAY_END) {
						*pos += 1;
						break;
					}
					items.push(decode_value(input, pos)?);
				}
			} else {
				items.reserve(len as usize);
				for _ in 0..len {
					items.push(decode_value(input, pos)?);
				}
			}
			Ok(WireValue::Array(items))
		}
		_ => Err(Error::MalformedFrame),
	}
}

/// Decodes every value in one reassembled message body in sequence.
pub fn decode_message(input: &[u8]) -> Result<Vec<WireValue>, Error> {
	let mut pos = 0;
	let mut values = Vec::new();
	while pos < input.len() {
		values.push(decode_value(input, &mut pos)?);
	}
	Ok(values)
}

pub fn encode_value(out: &mut Vec<u8>, v: &WireValue) {
	match v {
		WireValue::Null => out.push(TAG_NULL),
		WireValue::Error(code, msg) => {
			out.push(TAG_ERROR);
			out.extend_from_slice(&code.to_le_bytes());
			out.extend_from_slice(&(msg.len() as u32).to_le_bytes());
			out.extend_from_slice(msg.as_bytes());
		}
		WireValue::Double(v) => {
			out.push(TAG_DOUBLE);
			out.extend_from_slice(&v.to_le_bytes());
		}
		WireValue::Long(v) => {
			out.push(TAG_LONG);
			out.extend_from_slice(&v.to_le_bytes());
		}
		WireValue::String(s) => {
			out.push(TAG_STRING);
			out.extend_from_slice(&(s.len() as u32).to_le_bytes());
			out.extend_from_slice(s.as_bytes());
		}
		WireValue::Array(items) => {
			out.push(TAG_ARRAY);
			out.extend_from_slice(&(items.len() as u32).to_le_bytes());
			for item in items {
				encode_value(out, item);
			}
		}
	}
}

/// Writes reply values straight onto the wire, implementing
/// [`ReplyWriter`] so `query::find` and `val::reply_with_object` can target
/// this connection's output buffer with no intermediate value tree.
pub struct FrameValueWriter<'a> {
	out: &'a mut Vec<u8>,
	/// One entry per open array/map, `true` if it was opened with a
	/// postponed length and therefore needs an `array_end` marker.
	postponed: Vec<bool>,
}

impl<'a> FrameValueWriter<'a> {
	pub fn new(out: &'a mut Vec<u8>) -> Self {
		Self { out, postponed: Vec::new() }
	}
}

impl<'a> ReplyWriter for FrameValueWriter<'a> {
	fn write_null(&mut self) {
		self.out.push(TAG_NULL);
	}

	fn write_double(&mut self, v: f64) {
		self.out.push(TAG_DOUBLE);
		self.out.extend_from_slice(&v.to_le_bytes());
	}

	fn write_long(&mut self, v: i64) {
		self.out.push(TAG_LONG);
		self.out.extend_from_slice(&v.to_le_bytes());
	}

	fn write_string(&mut self, _lang: Option<&str>, text: &str) {
		self.out.push(TAG_STRING);
		self.out.extend_from_slice(&(text.len() as u32).to_le_bytes());
		self.out.extend_from_slice(text.as_bytes());
	}

	fn write_array_start(&mut self, len: Option<usize>) {
		self.out.push(TAG_ARRAY);
		match len {
			Some(l) => self.out.extend_from_slice(&(l as u32).to_le_bytes()),
			None => self.out.extend_from_slice(&ARRAY_LEN_POSTPONED.to_le_bytes()),
		}
		self.postponed.push(len.is_none());
	}

	fn write_array_end(&mut self) {
		if self.postponed.pop().unwrap_or(false) {
			self.out.push(TAG_ARRAY_END);
		}
	}

	fn write_map_start(&mut self, len: Option<usize>) {
		// Wire maps are just arrays of `[key, value]` pairs (matching
		// `lscmd`'s `[[id, name], …]` shape): each entry doubles the
		// declared element count.
		self.write_array_start(len.map(|l| l * 2));
	}

	fn write_map_end(&mut self) {
		self.write_array_end();
	}

	fn write_error(&mut self, message: &str) {
		self.out.push(TAG_ERROR);
		self.out.extend_from_slice(&0i32.to_le_bytes());
		self.out.extend_from_slice(&(message.len() as u32).to_le_bytes());
		self.out.extend_from_slice(message.as_bytes());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scalar_values_round_trip() {
		let mut buf = Vec::new();
		encode_value(&mut buf, &WireValue::Long(42));
		encode_value(&mut buf, &WireValue::String("hi".into()));
		let decoded = decode_message(&buf).unwrap();
		assert_eq!(decoded, vec![WireValue::Long(42), WireValue::String("hi".into())]);
	}

	#[test]
	fn fixed_length_array_round_trips() {
		let mut buf = Vec::new();
		encode_value(&mut buf, &WireValue::Array(vec![WireValue::Long(1), WireValue::Long(2)]));
		let decoded = decode_message(&buf).unwrap();
		assert_eq!(decoded, vec![WireValue::Array(vec![WireValue::Long(1), WireValue::Long(2)])]);
	}

	#[test]
	fn postponed_length_array_writer_emits_terminator() {
		let mut out = Vec::new();
		{
			let mut w = FrameValueWriter::new(&mut out);
			w.write_array_start(None);
			w.write_long(1);
			w.write_long(2);
			w.write_array_end();
		}
		let mut pos = 0;
		assert_eq!(read_u8(&out, &mut pos).unwrap(), TAG_ARRAY);
		assert_eq!(read_u32(&out, &mut pos).unwrap(), ARRAY_LEN_POSTPONED);
		assert_eq!(decode_value(&out, &mut pos).unwrap(), WireValue::Long(1));
		assert_eq!(decode_value(&out, &mut pos).unwrap(), WireValue::Long(2));
		assert_eq!(read_u8(&out, &mut pos).unwrap(), TAG_ARRAY_END);
	}

	#[test]
	fn fixed_length_array_writer_has_no_terminator() {
		let mut out = Vec::new();
		{
			let mut w = FrameValueWriter::new(&mut out);
			w.write_array_start(Some(1));
			w.write_long(7);
			w.write_array_end();
		}
		assert_eq!(out.len(), 1 + 4 + (1 + 8));
	}
}
