//! `ByteConn`: one non-blocking bidirectional byte stream with inbound/outbound buffers and
//! half-close bits.

use crate::buffer::Buffer;
use log::{debug, trace};
use std::{
	io::{ErrorKind, Read, Write},
	net::TcpStream,
	os::unix::io::{AsRawFd, RawFd},
};

pub use nix::poll::PollFlags;

/// One non-blocking bidirectional byte stream with inbound/outbound buffers and half-close bits.
///
/// Invariant: when `fd` is `-1`, both `can_recv` and `can_send` are false and no further I/O is
/// attempted; the buffers may still hold bytes but are never mutated again.
#[derive(Debug)]
pub struct ByteConn {
	sock: Option<TcpStream>,
	inbuf: Buffer,
	outbuf: Buffer,
	can_recv: bool,
	can_send: bool,
}

impl ByteConn {
	pub fn new(sock: TcpStream) -> Self {
		Self { sock: Some(sock), inbuf: Buffer::new(), outbuf: Buffer::new(), can_recv: true, can_send: true }
	}

	pub fn fd(&self) -> RawFd {
		self.sock.as_ref().map_or(-1, AsRawFd::as_raw_fd)
	}

	/// The event mask this connection wants `poll(2)` to wait on.
	///
	/// Always includes error/hangup; includes readable iff recv is still open and not hung;
	/// includes writable iff send is still open and there's something buffered to write.
	pub fn events(&self) -> PollFlags {
		if self.is_hung() {
			return PollFlags::empty();
		}
		let mut flags = PollFlags::POLLHUP | PollFlags::POLLERR;
		if self.can_recv {
			flags |= PollFlags::POLLIN;
		}
		if self.can_send && !self.outbuf.is_empty() {
			flags |= PollFlags::POLLOUT;
		}
		flags
	}

	/// Service one readiness notification: at most one non-blocking read and one non-blocking
	/// write. Returns `true` on a hard failure (hangup/error, or an allocation failure while
	/// growing a buffer), in which case the caller should hang this connection.
	pub fn poll(&mut self, revents: PollFlags) -> bool {
		let Some(sock) = self.sock.as_mut() else { return true };

		if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL) {
			debug!("fd {}: hangup/error event", sock.as_raw_fd());
			return true;
		}

		if revents.contains(PollFlags::POLLIN) && self.can_recv {
			match self.inbuf.fill_with(|space| sock.read(space)) {
				Ok(0) => {
					trace!("fd {}: zero-byte read, half-closing recv", sock.as_raw_fd());
					self.can_recv = false;
				},
				Ok(n) => trace!("fd {}: read {n} bytes", sock.as_raw_fd()),
				Err(err) if err.kind() == ErrorKind::WouldBlock => (),
				Err(err) => {
					debug!("fd {}: read failed: {err}", sock.as_raw_fd());
					return true;
				},
			}
		}

		if revents.contains(PollFlags::POLLOUT) && self.can_send {
			let data = self.outbuf.filled();
			if !data.is_empty() {
				match sock.write(data) {
					Ok(0) => {
						trace!("fd {}: zero-byte write, half-closing send", sock.as_raw_fd());
						self.can_send = false;
					},
					Ok(n) => {
						trace!("fd {}: wrote {n} bytes", sock.as_raw_fd());
						self.outbuf.consume(n);
					},
					Err(err) if err.kind() == ErrorKind::WouldBlock => (),
					Err(err) => {
						debug!("fd {}: write failed: {err}", sock.as_raw_fd());
						return true;
					},
				}
			}
		}

		false
	}

	/// Buffer bytes for sending; never blocks.
	pub fn send(&mut self, bytes: &[u8]) {
		if self.can_send {
			self.outbuf.append(bytes);
		}
	}

	/// The bytes currently buffered for reading, without consuming them.
	pub fn peek_in(&self) -> &[u8] {
		self.inbuf.filled()
	}

	/// Drop the first `n` buffered inbound bytes.
	pub fn consume(&mut self, n: usize) {
		self.inbuf.consume(n);
	}

	/// Take ownership of every buffered inbound byte, leaving the inbound buffer empty.
	pub fn consume_all(&mut self) -> Vec<u8> {
		self.inbuf.take_all()
	}

	pub fn ends_with(&self, suffix: &[u8]) -> bool {
		self.inbuf.ends_with(suffix)
	}

	/// Index one past the first `\n` in the inbound buffer, if any.
	pub fn line_end(&self) -> Option<usize> {
		self.inbuf.line_end()
	}

	pub fn inbound_len(&self) -> usize {
		self.inbuf.len()
	}

	pub fn outbound_is_empty(&self) -> bool {
		self.outbuf.is_empty()
	}

	/// Half-close both directions and close the underlying descriptor. Idempotent.
	pub fn hang(&mut self) {
		if let Some(sock) = self.sock.take() {
			trace!("fd {}: hanging up", sock.as_raw_fd());
			// dropping the socket closes its fd
		}
		self.can_recv = false;
		self.can_send = false;
	}

	pub fn is_hung(&self) -> bool {
		self.sock.is_none() || (!self.can_recv && !self.can_send)
	}
}
