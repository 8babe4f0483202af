//! Black-box scenarios driving `register`/`report`/`submit` over loopback TCP against a real
//! `PollLoop`, matching the "end-to-end scenarios" and framing properties.

mod support;

use std::{
	io::{Read, Write},
	thread,
	time::Duration,
};
use support::{roundtrip, TestServer};

#[test]
fn s1_register_happy_path() {
	let server = TestServer::start(&["demo"]);
	let mut conn = server.connect();
	let reply = roundtrip(&mut conn, b"register alice hunter2\n");
	assert!(String::from_utf8_lossy(&reply).starts_with("register: user alice added."));
	assert_eq!(std::fs::read_to_string(server.dir.path().join("USERS")).unwrap(), "alice hunter2\n");
}

#[test]
fn s2_register_rejects_short_username() {
	let server = TestServer::start(&["demo"]);
	let mut conn = server.connect();
	let reply = roundtrip(&mut conn, b"register abc x\n");
	assert_eq!(String::from_utf8_lossy(&reply), "register: username is too short!\n");
	assert!(!server.dir.path().join("USERS").exists());
}

#[test]
fn s3_submit_frames_correctly_and_is_queued() {
	let server = TestServer::start(&["demo"]);
	server.install_dummy_judge(2);

	let mut reg = server.connect();
	roundtrip(&mut reg, b"register alice hunter2\n");

	// the end marker is the header's sixth field through its own trailing '\n', i.e. "END\n";
	// the body must end with that literal sequence for submission to complete without relying
	// on a connection close.
	let mut sub = server.connect();
	let reply = roundtrip(&mut sub, b"submit alice hunter2 demo sh END\n#!/bin/sh\necho hi\nEND\n");
	let reply_text = String::from_utf8_lossy(&reply);
	assert!(reply_text.contains("submission queued."), "unexpected reply: {reply_text}");

	let source = std::fs::read_to_string(server.dir.path().join("logs/demo-alice.sh")).unwrap();
	assert_eq!(source, "#!/bin/sh\necho hi\n");

	// the dummy judge is still sleeping, so `report` should list alice as waiting.
	let mut rep = server.connect();
	let report = roundtrip(&mut rep, b"report demo\n");
	let report_text = String::from_utf8_lossy(&report);
	assert!(report_text.contains("alice\t") && report_text.contains("# Waiting"), "unexpected report: {report_text}");
}

#[test]
fn s4_dual_submit_rejected_while_pending() {
	let server = TestServer::start(&["demo"]);
	server.install_dummy_judge(2);

	let mut reg = server.connect();
	roundtrip(&mut reg, b"register alice hunter2\n");

	let mut first = server.connect();
	let reply1 = roundtrip(&mut first, b"submit alice hunter2 demo sh END\n#!/bin/sh\necho hi\nEND\n");
	assert!(String::from_utf8_lossy(&reply1).contains("submission queued."));

	let mut second = server.connect();
	let reply2 = roundtrip(&mut second, b"submit alice hunter2 demo sh END\n#!/bin/sh\necho bye\nEND\n");
	assert_eq!(String::from_utf8_lossy(&reply2), "submit: pending submission, wait!\n");

	// the rejected second submission must not have clobbered the first one's source file.
	let source = std::fs::read_to_string(server.dir.path().join("logs/demo-alice.sh")).unwrap();
	assert_eq!(source, "#!/bin/sh\necho hi\n");
}

/// Property 1: the first command line recovered equals the bytes up to and including the first
/// `\n`, however the stream is chunked, and no later bytes are consumed early.
#[test]
fn line_framing_holds_under_arbitrary_chunking() {
	let server = TestServer::start(&["demo"]);
	let mut conn = server.connect();

	// dribble the command line in one byte at a time; the server must not dispatch (and so must
	// not reply or close) until the trailing '\n' lands.
	let line = b"register alice hunter2\n";
	for &byte in &line[..line.len() - 1] {
		conn.write_all(&[byte]).unwrap();
		thread::sleep(Duration::from_millis(5));
	}
	conn.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
	let mut probe = [0u8; 1];
	match conn.read(&mut probe) {
		Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => (),
		other => panic!("server replied before the command line was complete: {other:?}"),
	}

	conn.write_all(&line[line.len() - 1..]).unwrap();
	let mut reply = Vec::new();
	conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
	let _ = conn.read_to_end(&mut reply);
	assert!(String::from_utf8_lossy(&reply).starts_with("register: user alice added."));
}

/// Property 2: for a body `B` and end marker `M`, sending `header\n` + `B` + `M` in any chunking
/// yields a stored source file byte-identical to `B`.
#[test]
fn end_marker_framing_holds_under_arbitrary_chunking() {
	let server = TestServer::start(&["demo"]);
	server.install_dummy_judge(2);

	let mut reg = server.connect();
	roundtrip(&mut reg, b"register alice hunter2\n");

	let header = b"submit alice hunter2 demo sh MARKER\n";
	let body = b"#!/bin/sh\necho one\necho two\n";
	// the end marker runs from the header's sixth field through its own trailing '\n'.
	let marker = b"MARKER\n";

	let mut conn = server.connect();
	let mut whole = Vec::new();
	whole.extend_from_slice(header);
	whole.extend_from_slice(body);
	whole.extend_from_slice(marker);

	// split into small, uneven chunks crossing the header/body/marker boundaries
	for chunk in whole.chunks(7) {
		conn.write_all(chunk).unwrap();
		thread::sleep(Duration::from_millis(2));
	}
	let mut reply = Vec::new();
	conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
	let _ = conn.read_to_end(&mut reply);
	assert!(String::from_utf8_lossy(&reply).contains("submission queued."));

	let stored = std::fs::read(server.dir.path().join("logs/demo-alice.sh")).unwrap();
	assert_eq!(stored, body);
}

/// Property 5: a connection with no phase-completing input within 10s of acceptance is closed by
/// the next tick. Slow by necessity (the timeout itself is 10s); this mirrors the reference
/// implementation's own inactivity bound.
#[test]
fn idle_connection_is_closed_after_ten_seconds() {
	let server = TestServer::start(&["demo"]);
	let mut conn = server.connect();
	conn.set_read_timeout(Some(Duration::from_secs(15))).unwrap();
	let mut buf = [0u8; 16];
	let n = conn.read(&mut buf).unwrap_or(0);
	assert_eq!(n, 0, "expected the server to close the idle connection");
}
