//! NodeId: a 10-byte node identifier (§3). Ordering is a plain byte-wise
//! memcmp over all 10 bytes, which `derive(Ord)` over `[u8; 10]` gives us for
//! free.
use std::fmt;

use crate::err::Error;

pub const NODE_ID_LEN: usize = 10;

/// `"root" + zero padding`, per §3.
pub const ROOT_NODE_ID: NodeId = NodeId([b'r', b'o', b'o', b't', 0, 0, 0, 0, 0, 0]);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct NodeId(pub [u8; NODE_ID_LEN]);

impl NodeId {
	/// Builds a NodeId from up to 10 bytes, right-padding shorter input with
	/// zero bytes (§8 boundary behavior). Longer input is an argument error:
	/// truncating silently would make two distinct ids collide.
	pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
		if bytes.len() > NODE_ID_LEN {
			return Err(Error::InvalidNodeId);
		}
		let mut buf = [0u8; NODE_ID_LEN];
		buf[..bytes.len()].copy_from_slice(bytes);
		Ok(NodeId(buf))
	}

	pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
		&self.0
	}

	/// The first up to 2 bytes, conventionally the node's type prefix.
	pub fn type_prefix(&self) -> &[u8] {
		let end = self.0.iter().take(2).take_while(|b| **b != 0).count();
		&self.0[..end]
	}

	pub fn is_root(&self) -> bool {
		*self == ROOT_NODE_ID
	}
}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "NodeId({:?})", String::from_utf8_lossy(&self.0))
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// Trailing zero padding is not printable; stop at the first NUL.
		let end = self.0.iter().position(|b| *b == 0).unwrap_or(NODE_ID_LEN);
		write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
	}
}

impl TryFrom<&[u8]> for NodeId {
	type Error = Error;
	fn try_from(bytes: &[u8]) -> Result<Self, Error> {
		NodeId::parse(bytes)
	}
}

impl TryFrom<&str> for NodeId {
	type Error = Error;
	fn try_from(s: &str) -> Result<Self, Error> {
		NodeId::parse(s.as_bytes())
	}
}

impl From<NodeId> for Vec<u8> {
	fn from(id: NodeId) -> Self {
		id.0.to_vec()
	}
}

/// Splits a bytestring of concatenated 10-byte NodeIds (§4.7 seed encoding).
pub fn parse_seed_ids(bytes: &[u8]) -> Result<Vec<NodeId>, Error> {
	if bytes.len() % NODE_ID_LEN != 0 {
		return Err(Error::InvalidArgument(
			"seed bytestring length is not a multiple of 10".into(),
		));
	}
	bytes.chunks(NODE_ID_LEN).map(NodeId::parse).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_pads_with_zeros() {
		let id = NodeId::parse(b"K1").unwrap();
		assert_eq!(id.0, [b'K', b'1', 0, 0, 0, 0, 0, 0, 0, 0]);
	}

	#[test]
	fn parse_rejects_oversized_input() {
		assert!(NodeId::parse(b"01234567890").is_err());
	}

	#[test]
	fn ordering_is_memcmp() {
		let a = NodeId::parse(b"a").unwrap();
		let b = NodeId::parse(b"b").unwrap();
		assert!(a < b);
	}

	#[test]
	fn display_stops_at_padding() {
		let id = NodeId::parse(b"K1").unwrap();
		assert_eq!(id.to_string(), "K1");
	}

	#[test]
	fn root_is_recognised() {
		assert!(ROOT_NODE_ID.is_root());
		assert_eq!(ROOT_NODE_ID.to_string(), "root");
	}

	#[test]
	fn seed_bytestring_roundtrip() {
		let a = NodeId::parse(b"a").unwrap();
		let b = NodeId::parse(b"b").unwrap();
		let mut bytes = Vec::new();
		bytes.extend_from_slice(a.as_bytes());
		bytes.extend_from_slice(b.as_bytes());
		let parsed = parse_seed_ids(&bytes).unwrap();
		assert_eq!(parsed, vec![a, b]);
	}
}
