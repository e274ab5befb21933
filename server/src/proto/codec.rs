//! The wire frame (§6, §4.10): `{ u8 cmd; u8 flags; u32 seqno_le; u16
//! frame_bsize_le; u32 msg_bsize_le; u32 chk_le; }` followed by the frame's
//! payload bytes. `chk` is a CRC-32C over the whole frame with the `chk`
//! field itself zeroed during computation; a mismatch is a protocol error
//! that closes the connection (§7).
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 16;

/// Distinguishes a transport failure (connection reset, EOF) from a
/// protocol failure (bad checksum) so the caller can log each correctly;
/// both close the connection per §7.
#[derive(Debug)]
pub enum FrameError {
	Io(std::io::Error),
	Eof,
	CrcMismatch,
}

impl From<std::io::Error> for FrameError {
	fn from(e: std::io::Error) -> Self {
		if e.kind() == std::io::ErrorKind::UnexpectedEof {
			FrameError::Eof
		} else {
			FrameError::Io(e)
		}
	}
}

impl std::fmt::Display for FrameError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			FrameError::Io(e) => write!(f, "i/o error: {e}"),
			FrameError::Eof => write!(f, "connection closed"),
			FrameError::CrcMismatch => write!(f, "crc mismatch on incoming frame"),
		}
	}
}

pub mod flags {
	pub const FIRST: u8 = 0b0000_0001;
	pub const LAST: u8 = 0b0000_0010;
	pub const REQ_RES: u8 = 0b0000_0100;
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
	pub cmd: u8,
	pub flags: u8,
	pub seqno: u32,
	pub frame_bsize: u16,
	pub msg_bsize: u32,
	pub chk: u32,
}

impl Header {
	pub fn is_first(&self) -> bool {
		self.flags & flags::FIRST != 0
	}

	pub fn is_last(&self) -> bool {
		self.flags & flags::LAST != 0
	}

	pub fn is_response(&self) -> bool {
		self.flags & flags::REQ_RES != 0
	}
}

fn decode_header(bytes: &[u8; HEADER_LEN]) -> Header {
	Header {
		cmd: bytes[0],
		flags: bytes[1],
		seqno: u32::from_le_bytes(bytes[2..6].try_into().unwrap()),
		frame_bsize: u16::from_le_bytes(bytes[6..8].try_into().unwrap()),
		msg_bsize: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
		chk: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
	}
}

/// Builds one complete frame, computing `chk` over the assembled bytes with
/// the checksum field zeroed.
pub fn encode_frame(cmd: u8, flag_bits: u8, seqno: u32, msg_bsize: u32, payload: &[u8]) -> Vec<u8> {
	let frame_bsize = (HEADER_LEN + payload.len()) as u16;
	let mut buf = Vec::with_capacity(frame_bsize as usize);
	buf.push(cmd);
	buf.push(flag_bits);
	buf.extend_from_slice(&seqno.to_le_bytes());
	buf.extend_from_slice(&frame_bsize.to_le_bytes());
	buf.extend_from_slice(&msg_bsize.to_le_bytes());
	buf.extend_from_slice(&0u32.to_le_bytes());
	buf.extend_from_slice(payload);
	let chk = crc32c::crc32c(&buf);
	buf[12..16].copy_from_slice(&chk.to_le_bytes());
	buf
}

/// Reads one frame off `stream`, verifying its checksum.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<(Header, Vec<u8>), FrameError> {
	let mut header_buf = [0u8; HEADER_LEN];
	stream.read_exact(&mut header_buf).await?;
	let header = decode_header(&header_buf);
	let payload_len = (header.frame_bsize as usize).saturating_sub(HEADER_LEN);
	let mut payload = vec![0u8; payload_len];
	stream.read_exact(&mut payload).await?;

	let mut check_buf = Vec::with_capacity(header.frame_bsize as usize);
	check_buf.extend_from_slice(&header_buf[..12]);
	check_buf.extend_from_slice(&[0u8; 4]);
	check_buf.extend_from_slice(&payload);
	if crc32c::crc32c(&check_buf) != header.chk {
		return Err(FrameError::CrcMismatch);
	}
	Ok((header, payload))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
	stream: &mut W,
	cmd: u8,
	flag_bits: u8,
	seqno: u32,
	msg_bsize: u32,
	payload: &[u8],
) -> std::io::Result<()> {
	let buf = encode_frame(cmd, flag_bits, seqno, msg_bsize, payload);
	stream.write_all(&buf).await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encode_then_decode_header_round_trips() {
		let frame = encode_frame(7, flags::FIRST | flags::LAST, 42, 3, b"abc");
		let header = decode_header(&frame[..HEADER_LEN].try_into().unwrap());
		assert_eq!(header.cmd, 7);
		assert_eq!(header.flags, flags::FIRST | flags::LAST);
		assert_eq!(header.seqno, 42);
		assert_eq!(header.frame_bsize as usize, HEADER_LEN + 3);
		assert_eq!(header.msg_bsize, 3);
	}

	#[test]
	fn flipping_a_payload_byte_breaks_the_checksum() {
		let mut frame = encode_frame(1, flags::FIRST | flags::LAST, 1, 3, b"abc");
		let last = frame.len() - 1;
		frame[last] ^= 0xff;
		let header = decode_header(&frame[..HEADER_LEN].try_into().unwrap());
		let mut check_buf = Vec::new();
		check_buf.extend_from_slice(&frame[..12]);
		check_buf.extend_from_slice(&[0u8; 4]);
		check_buf.extend_from_slice(&frame[HEADER_LEN..]);
		assert_ne!(crc32c::crc32c(&check_buf), header.chk);
	}
}
