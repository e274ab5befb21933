//! The engine's error taxonomy (§7). Every fallible public operation returns
//! `Result<_, Error>`; variants group by the kind of failure, not by the
//! subsystem that raised it, so callers can match on "not found" once instead
//! of per component.
use thiserror::Error;

use crate::id::NodeId;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	// -- Argument --
	#[error("wrong number of arguments")]
	WrongArity,
	#[error("invalid traversal direction or mode: {0}")]
	InvalidDirection(String),
	#[error("invalid order token: {0}")]
	InvalidOrder(String),
	#[error("invalid modify type code: {0}")]
	InvalidTypeCode(char),
	#[error("could not parse node id from input")]
	InvalidNodeId,
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
	#[error("offset -1 without an order is not a valid combination")]
	OffsetWithoutOrder,

	// -- Not-found --
	#[error("node {0} not found")]
	NodeNotFound(NodeId),
	#[error("field not found: {0}")]
	FieldNotFound(String),
	#[error("alias not found: {0}")]
	AliasNotFound(String),
	#[error("edge field not found: {0}")]
	EdgeFieldNotFound(String),
	#[error("index not found")]
	IndexNotFound,

	// -- Already-exists --
	#[error("already exists")]
	AlreadyExists,

	// -- Type-mismatch --
	#[error("type mismatch: expected {expected}, found {found}")]
	TypeMismatch {
		expected: &'static str,
		found: &'static str,
	},
	#[error("wrong key kind: expected {expected} at top level")]
	WrongType { expected: &'static str },

	// -- Compilation --
	#[error("rpn compile error at position {position:?}: {message}")]
	CompileError {
		position: Option<usize>,
		message: String,
	},

	// -- Runtime --
	#[error("rpn stack underflow")]
	StackUnderflow,
	#[error("undefined register {0}")]
	UndefinedRegister(u8),
	#[error("unsupported rpn operator: {0}")]
	UnsupportedOperator(String),
	#[error("arithmetic domain error")]
	ArithmeticDomain,
	#[error("traversal encountered an unreachable expression field: {0}")]
	UnreachableExpressionField(String),

	// -- Resource --
	#[error("out of memory")]
	OutOfMemory,
	#[error("no free stream slots on this connection")]
	StreamSlotsExhausted,
	#[error("too many concurrent traversals: visitation lanes exhausted")]
	TraversalLanesExhausted,

	// -- Protocol --
	#[error("crc mismatch on incoming frame")]
	CrcMismatch,
	#[error("malformed frame")]
	MalformedFrame,
	#[error("unknown command id {0}")]
	UnknownCommand(u8),

	// -- Snapshot --
	#[error("unsupported snapshot version: {0}")]
	UnsupportedSnapshotVersion(u32),
	#[error("corrupt snapshot: {0}")]
	CorruptSnapshot(String),

	#[error("{0}")]
	Other(String),
}

impl Error {
	/// True for errors that, per §7, are reported inline per-triplet or
	/// per-node and must not abort the whole command.
	pub fn is_recoverable_per_item(&self) -> bool {
		!matches!(
			self,
			Error::CrcMismatch
				| Error::MalformedFrame
				| Error::UnknownCommand(_)
				| Error::OutOfMemory
				| Error::StreamSlotsExhausted
		)
	}
}
