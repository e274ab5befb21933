//! Per-connection state machine (§4.10, §5, §5.1): reassembles frames
//! sharing a `seqno` into one message, dispatches it against the shared
//! engine, and streams the reply back out under its own stream slot.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::command;
use crate::engine::Engine;
use crate::err::Error;
use crate::proto::codec::{self, flags, FrameError};

const STREAM_SLOT_BITS: usize = 64;

/// Tracks which of the connection's (at most 64) concurrent outgoing
/// streams are in use (§4.10, §5.1). A stream is a reserved response
/// sequence context; it is freed once its writer emits the LAST frame.
struct StreamSlots {
	bits: AtomicU64,
}

impl StreamSlots {
	fn new() -> Self {
		Self { bits: AtomicU64::new(0) }
	}

	fn claim(&self) -> Result<u32, Error> {
		let mut current = self.bits.load(Ordering::Acquire);
		loop {
			let free_bit = (!current).trailing_zeros();
			if free_bit as usize >= STREAM_SLOT_BITS {
				return Err(Error::Core(graphdb_core::Error::StreamSlotsExhausted));
			}
			let desired = current | (1u64 << free_bit);
			match self.bits.compare_exchange_weak(current, desired, Ordering::AcqRel, Ordering::Acquire) {
				Ok(_) => return Ok(free_bit),
				Err(observed) => current = observed,
			}
		}
	}

	fn free(&self, slot: u32) {
		self.bits.fetch_and(!(1u64 << slot), Ordering::AcqRel);
	}
}

/// Frames sharing a `seqno` accumulate here until the one carrying LAST
/// arrives (§6: "the server reassembles until LAST").
#[derive(Default)]
struct Reassembly {
	pending: HashMap<u32, (u8, Vec<u8>)>,
}

impl Reassembly {
	fn push(&mut self, header: &codec::Header, payload: Vec<u8>) -> Option<(u8, Vec<u8>)> {
		let entry = self.pending.entry(header.seqno).or_insert_with(|| (header.cmd, Vec::new()));
		entry.1.extend_from_slice(&payload);
		if header.is_last() {
			self.pending.remove(&header.seqno)
		} else {
			None
		}
	}
}

/// Drives one client connection to completion. `S` is generic so tests can
/// drive the loop over an in-memory duplex pipe instead of a real socket.
pub struct Connection<S> {
	stream: S,
	engine: Arc<Mutex<Engine>>,
	streams: StreamSlots,
	reassembly: Reassembly,
}

impl Connection<TcpStream> {
	pub fn new(stream: TcpStream, engine: Arc<Mutex<Engine>>) -> Self {
		Self { stream, engine, streams: StreamSlots::new(), reassembly: Reassembly::default() }
	}
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
	#[cfg(test)]
	fn from_stream(stream: S, engine: Arc<Mutex<Engine>>) -> Self {
		Self { stream, engine, streams: StreamSlots::new(), reassembly: Reassembly::default() }
	}

	/// Runs the read-dispatch-write loop until the peer closes the
	/// connection or a protocol error forces a close (§7: any CRC mismatch
	/// closes the connection).
	pub async fn run(mut self) {
		loop {
			match self.serve_one().await {
				Ok(true) => continue,
				Ok(false) => break,
				Err(e) => {
					warn!(error = %e, "closing connection after protocol error");
					break;
				}
			}
		}
	}

	/// Reads and reassembles one message, dispatches it, writes the reply.
	/// Returns `Ok(false)` on a clean peer close.
	async fn serve_one(&mut self) -> Result<bool, FrameError> {
		let (header, payload) = match codec::read_frame(&mut self.stream).await {
			Ok(v) => v,
			Err(FrameError::Eof) => return Ok(false),
			Err(e) => return Err(e),
		};
		let Some((cmd, message)) = self.reassembly.push(&header, payload) else {
			return Ok(true);
		};

		let stream_slot = self.streams.claim();
		let seqno = header.seqno;

		// The command handler runs to completion before the next frame is
		// read (§5: "All command handlers run to completion before the next
		// is dispatched") — the lock is held for exactly this call.
		let result = {
			let mut engine = self.engine.lock().await;
			command::dispatch(&mut engine, cmd, &message)
		};

		let reply = match result {
			Ok(body) => body,
			Err(e) => {
				let mut body = Vec::new();
				let mut w = crate::proto::value::FrameValueWriter::new(&mut body);
				use graphdb_core::val::ReplyWriter;
				w.write_error(&e.to_string());
				body
			}
		};

		codec::write_frame(&mut self.stream, cmd, flags::FIRST | flags::LAST | flags::REQ_RES, seqno, reply.len() as u32, &reply)
			.await
			.map_err(FrameError::from)?;

		if let Ok(slot) = stream_slot {
			self.streams.free(slot);
		}
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use tokio::io::{duplex, AsyncWriteExt};

	#[tokio::test]
	async fn ping_round_trips_over_a_duplex_pipe() {
		let (client, server) = duplex(4096);
		let engine = Arc::new(Mutex::new(Engine::new(Arc::new(graphdb_core::snapshot::InMemoryReplicationSink::new()))));
		let conn = Connection::from_stream(server, engine);
		let handle = tokio::spawn(conn.run());

		let mut client = client;
		codec::write_frame(&mut client, command::CMD_PING, flags::FIRST | flags::LAST, 1, 0, &[]).await.unwrap();
		let (header, payload) = codec::read_frame(&mut client).await.unwrap();
		assert_eq!(header.cmd, command::CMD_PING);
		let decoded = crate::proto::value::decode_message(&payload).unwrap();
		assert_eq!(decoded, vec![crate::proto::value::WireValue::String("PONG".into())]);

		drop(client);
		handle.await.unwrap();
	}

	/// Two unrelated commands sharing one connection run to completion in
	/// order (§5: no handler may suspend while holding a partially-mutated
	/// hierarchy state), and the second sees the first's mutation.
	#[tokio::test]
	async fn modify_then_object_get_see_each_others_state_in_sequence() {
		let (client, server) = duplex(4096);
		let engine = Arc::new(Mutex::new(Engine::new(Arc::new(graphdb_core::snapshot::InMemoryReplicationSink::new()))));
		let conn = Connection::from_stream(server, engine);
		let handle = tokio::spawn(conn.run());

		let mut client = client;
		let mut body = Vec::new();
		for v in [
			crate::proto::value::WireValue::String("n1".into()),
			crate::proto::value::WireValue::String("".into()),
			crate::proto::value::WireValue::String("s".into()),
			crate::proto::value::WireValue::String("name".into()),
			crate::proto::value::WireValue::String("alice".into()),
		] {
			crate::proto::value::encode_value(&mut body, &v);
		}
		codec::write_frame(&mut client, command::CMD_MODIFY, flags::FIRST | flags::LAST, 1, body.len() as u32, &body).await.unwrap();
		let (header, _payload) = codec::read_frame(&mut client).await.unwrap();
		assert_eq!(header.cmd, command::CMD_MODIFY);

		let mut body = Vec::new();
		crate::proto::value::encode_value(&mut body, &crate::proto::value::WireValue::String("n1".into()));
		crate::proto::value::encode_value(&mut body, &crate::proto::value::WireValue::String("name".into()));
		codec::write_frame(&mut client, command::CMD_OBJECT_GET, flags::FIRST | flags::LAST, 2, body.len() as u32, &body).await.unwrap();
		let (header, payload) = codec::read_frame(&mut client).await.unwrap();
		assert_eq!(header.cmd, command::CMD_OBJECT_GET);
		let decoded = crate::proto::value::decode_message(&payload).unwrap();
		assert_eq!(decoded, vec![crate::proto::value::WireValue::String("alice".into())]);

		drop(client);
		handle.await.unwrap();
	}

	/// A message split across two frames sharing a `seqno` is reassembled
	/// before dispatch (§6: "the server reassembles until LAST").
	#[tokio::test]
	async fn multi_frame_message_is_reassembled_before_dispatch() {
		let (client, server) = duplex(4096);
		let engine = Arc::new(Mutex::new(Engine::new(Arc::new(graphdb_core::snapshot::InMemoryReplicationSink::new()))));
		let conn = Connection::from_stream(server, engine);
		let handle = tokio::spawn(conn.run());

		let mut client = client;
		let mut full = Vec::new();
		crate::proto::value::encode_value(&mut full, &crate::proto::value::WireValue::String("hello".into()));
		let (first_half, second_half) = full.split_at(full.len() / 2);

		codec::write_frame(&mut client, command::CMD_ECHO, flags::FIRST, 9, full.len() as u32, first_half).await.unwrap();
		codec::write_frame(&mut client, command::CMD_ECHO, flags::LAST, 9, full.len() as u32, second_half).await.unwrap();

		let (header, payload) = codec::read_frame(&mut client).await.unwrap();
		assert_eq!(header.cmd, command::CMD_ECHO);
		let decoded = crate::proto::value::decode_message(&payload).unwrap();
		assert_eq!(decoded, vec![crate::proto::value::WireValue::Array(vec![crate::proto::value::WireValue::String("hello".into())])]);

		drop(client);
		handle.await.unwrap();
	}

	/// A frame with a corrupted checksum closes the connection outright
	/// (§7: "any CRC mismatch closes the connection") instead of being
	/// skipped or replied to with an error frame.
	#[tokio::test]
	async fn crc_mismatch_closes_the_connection_without_a_reply() {
		let (client, server) = duplex(4096);
		let engine = Arc::new(Mutex::new(Engine::new(Arc::new(graphdb_core::snapshot::InMemoryReplicationSink::new()))));
		let conn = Connection::from_stream(server, engine);
		let handle = tokio::spawn(conn.run());

		let mut client = client;
		let mut frame = codec::encode_frame(command::CMD_PING, flags::FIRST | flags::LAST, 1, 0, &[]);
		let last = frame.len() - 1;
		frame[last] ^= 0xff;
		client.write_all(&frame).await.unwrap();
		drop(client);

		// The connection loop must exit (on the CRC error) rather than hang
		// waiting for a reply that `serve_one` never produces.
		handle.await.unwrap();
	}
}
