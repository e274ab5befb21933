//! The server binary's error type (§7): wraps the engine's error taxonomy
//! and adds the I/O failures only the network layer can produce.
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	#[error(transparent)]
	Core(#[from] graphdb_core::Error),
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Mirrors `graphdb_core::Error::is_recoverable_per_item` for the one
	/// error kind the core doesn't know about: a transport failure is never
	/// recoverable, it always closes the connection (§7).
	pub fn is_connection_fatal(&self) -> bool {
		match self {
			Error::Io(_) => true,
			Error::Core(e) => !e.is_recoverable_per_item(),
		}
	}
}
