//! Owned file descriptors and the SIGCHLD notification descriptor.

use log::warn;
use nix::sys::{
	signal::{SigSet, Signal},
	signalfd::{signalfd, SfdFlags},
};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

/// An owned file descriptor.
///
/// The contained fd is not used except to call close(3) when the struct is dropped.
#[derive(Debug)]
pub struct Fd(RawFd);

impl AsRawFd for Fd {
	fn as_raw_fd(&self) -> RawFd {
		self.0
	}
}

impl IntoRawFd for Fd {
	fn into_raw_fd(self) -> RawFd {
		let fd = self.0;
		std::mem::forget(self);
		fd
	}
}

impl FromRawFd for Fd {
	unsafe fn from_raw_fd(fd: RawFd) -> Self {
		Self(fd)
	}
}

impl Drop for Fd {
	fn drop(&mut self) {
		match nix::unistd::close(self.0) {
			Ok(()) => (),
			Err(err) => warn!("error closing {self:?}: {err}"),
		}
	}
}

/// Block `SIGCHLD` on the calling thread and return a file descriptor that becomes readable
/// whenever a child exits.
///
/// Registering this descriptor alongside the listening socket and client connections lets the
/// event loop reap judge children in ordinary control flow instead of inside an
/// async-signal-unsafe handler.
pub fn catch_sigchld() -> nix::Result<Fd> {
	let mut signals = SigSet::empty();
	signals.add(Signal::SIGCHLD);
	signals.thread_block()?;
	let fd = signalfd(-1, &signals, SfdFlags::SFD_CLOEXEC | SfdFlags::SFD_NONBLOCK)?;
	// Safety: signalfd returns a newly created file descriptor which we immediately wrap.
	Ok(unsafe { Fd::from_raw_fd(fd) })
}

/// Drain every pending signal from a signalfd created by [`catch_sigchld`].
///
/// Level-triggered `poll` will keep reporting the descriptor readable until every queued
/// `signalfd_siginfo` record has been read out, even though a single reap pass handles all
/// currently-exited children.
pub fn drain_signalfd(fd: &Fd) {
	// struct signalfd_siginfo is 128 bytes on every Linux arch; oversize slightly and loop
	// until a short read (or EAGAIN) tells us the queue is empty.
	let mut buf = [0u8; 128];
	loop {
		match nix::unistd::read(fd.as_raw_fd(), &mut buf) {
			Ok(n) if n == buf.len() => continue,
			_ => break,
		}
	}
}
