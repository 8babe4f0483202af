//! Per-connection state machine driving command framing and body capture.

use crate::conn::ByteConn;
use std::time::Instant;

/// Maximum length of a request line's content, excluding the terminating `\n`.
pub const MAX_LINE_LEN: usize = 255;

/// Maximum size a `submit` body may grow to before completion is observed.
pub const MAX_BODY_LEN: usize = 65_536;

/// Default end marker used when a `submit` header supplies no sixth field.
pub const DEFAULT_END_MARKER: &[u8] = b"EOF\n";

/// A connection's place in the request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	/// Waiting for a complete `\n`-terminated command line.
	AwaitLine,
	/// Header parsed as `submit`; waiting for the body to reach its end marker.
	AwaitBody,
	/// Handler has run; waiting for the reply to drain before hanging up.
	Done,
}

/// Per-connection bookkeeping owned by the poll loop.
#[derive(Debug)]
pub struct Row {
	pub conn: ByteConn,
	pub phase: Phase,
	pub started_at: Instant,
	pub request_line: Vec<u8>,
}

impl Row {
	pub fn new(conn: ByteConn) -> Self {
		Self { conn, phase: Phase::AwaitLine, started_at: Instant::now(), request_line: Vec::new() }
	}
}

/// The first whitespace-delimited token of a request line.
pub fn command(line: &[u8]) -> Option<&[u8]> {
	line.split(|b: &u8| b.is_ascii_whitespace()).find(|tok| !tok.is_empty())
}

/// Split a line into at most `n` whitespace-delimited fields after skipping the command token,
/// mirroring repeated `sscanf("%s")` calls. Returns fewer than `n` strs if the line runs out.
pub fn fields<'a>(line: &'a [u8], n: usize) -> Vec<&'a str> {
	line.split(|b: &u8| b.is_ascii_whitespace())
		.filter(|tok| !tok.is_empty())
		.skip(1) // the command itself
		.take(n)
		.filter_map(|tok| std::str::from_utf8(tok).ok())
		.collect()
}

/// Compute a `submit` header's end marker: skip the first five whitespace-delimited fields
/// (`submit user pass contest lang`); everything from the sixth field to end-of-line is the
/// custom marker. If there is no sixth field, the default marker is `EOF\n`.
pub fn end_marker(header: &[u8]) -> Vec<u8> {
	let mut rest = header;
	for _ in 0..5 {
		rest = skip_token(rest);
		rest = skip_whitespace(rest);
	}
	if rest.is_empty() {
		DEFAULT_END_MARKER.to_vec()
	} else {
		rest.to_vec()
	}
}

fn skip_token(s: &[u8]) -> &[u8] {
	let i = s.iter().position(|b| b.is_ascii_whitespace()).unwrap_or(s.len());
	&s[i..]
}

fn skip_whitespace(s: &[u8]) -> &[u8] {
	let i = s.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(s.len());
	&s[i..]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn command_is_first_token() {
		assert_eq!(command(b"submit alice hunter2 demo sh\n"), Some(&b"submit"[..]));
		assert_eq!(command(b"  report demo\n"), Some(&b"report"[..]));
	}

	#[test]
	fn end_marker_defaults_without_sixth_field() {
		assert_eq!(end_marker(b"submit alice hunter2 demo sh\n"), b"EOF\n".to_vec());
	}

	#[test]
	fn end_marker_uses_custom_marker_through_end_of_line() {
		assert_eq!(end_marker(b"submit alice hunter2 demo sh MYEOF\n"), b"MYEOF\n".to_vec());
	}

	#[test]
	fn end_marker_custom_marker_may_contain_spaces() {
		assert_eq!(end_marker(b"submit alice hunter2 demo sh END OF FILE\n"), b"END OF FILE\n".to_vec());
	}

	#[test]
	fn fields_extracts_submit_arguments() {
		let f = fields(b"submit alice hunter2 demo sh END\n", 4);
		assert_eq!(f, vec!["alice", "hunter2", "demo", "sh"]);
	}

	#[test]
	fn fields_returns_fewer_when_line_is_short() {
		let f = fields(b"register alice\n", 2);
		assert_eq!(f, vec!["alice"]);
	}
}
