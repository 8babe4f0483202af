//! Shared scaffolding for the black-box scenario tests: a `PollLoop` bound to an OS-assigned
//! loopback port and ticked from a background thread, plus a process-wide lock serializing the
//! tests that need to `set_current_dir` (the server resolves `<contest>.stat` and contest
//! directories relative to its working directory, matching the reference implementation).

use ctjudge::{config::Config, poll_loop::PollLoop};
use std::{
	io::{Read, Write},
	net::TcpStream,
	path::PathBuf,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

/// Serializes every test in this binary that calls `std::env::set_current_dir`, since the
/// working directory is process-global and `cargo test` runs test functions on separate threads.
pub static CWD_LOCK: Mutex<()> = Mutex::new(());

/// A running server plus the directory its relative paths (logs, stats) resolve against.
///
/// Holds `CWD_LOCK` for its entire lifetime, not just `start`, since the background tick thread
/// keeps reading/writing cwd-relative paths for as long as it runs.
pub struct TestServer {
	pub addr: std::net::SocketAddr,
	pub dir: tempfile::TempDir,
	stop: Arc<AtomicBool>,
	thread: Option<std::thread::JoinHandle<()>>,
	_cwd_guard: std::sync::MutexGuard<'static, ()>,
}

impl TestServer {
	/// Bind a `PollLoop` on an OS-assigned port inside a fresh temp directory (which becomes the
	/// process's working directory for the test's duration) and tick it on a background thread.
	pub fn start(contests: &[&str]) -> Self {
		let guard = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
		let dir = tempfile::tempdir().unwrap();
		std::env::set_current_dir(dir.path()).unwrap();

		let config = Config {
			contests: contests.iter().map(|s| s.to_string()).collect(),
			port: 0,
			sandbox_uid: nix::unistd::getuid().as_raw(),
			sandbox_gid: nix::unistd::getgid().as_raw(),
			users_path: PathBuf::from("USERS"),
			logs_dir: PathBuf::from("logs"),
		};
		let mut poll_loop = PollLoop::bind(config).expect("binding the test server failed");
		let addr = poll_loop.local_addr().unwrap();

		let stop = Arc::new(AtomicBool::new(false));
		let stop_clone = Arc::clone(&stop);
		let thread = std::thread::spawn(move || {
			while !stop_clone.load(Ordering::Relaxed) {
				// `tick` itself only blocks up to its 1-second poll timeout, so polling `stop`
				// once per tick shuts the thread down promptly without a second signal.
				let _ = poll_loop.tick();
			}
		});

		Self { addr, dir, stop, thread: Some(thread), _cwd_guard: guard }
	}

	/// Create `<dir>/test`, a shell script standing in for the judge binary (`execvp("./test",
	/// ...)` in `JudgeDriver::start` resolves relative to the server's cwd). Sleeping keeps a
	/// submission visibly "judging" long enough for a test to observe it before it's reaped.
	pub fn install_dummy_judge(&self, sleep_secs: u64) {
		let path = self.dir.path().join("test");
		std::fs::write(&path, format!("#!/bin/sh\nsleep {sleep_secs}\nprintf '0/0\\t0.00\\t# .\\n'\n")).unwrap();
		use std::os::unix::fs::PermissionsExt;
		std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
	}

	pub fn connect(&self) -> TcpStream {
		TcpStream::connect(self.addr).expect("connecting to the test server failed")
	}
}

impl Drop for TestServer {
	fn drop(&mut self) {
		self.stop.store(true, Ordering::Relaxed);
		if let Some(thread) = self.thread.take() {
			let _ = thread.join();
		}
	}
}

/// Write `request` then read until the peer closes its write side, returning whatever bytes it
/// sent back. Used for the synchronous `register`/`report` handlers and for `submit` once its
/// body has been sent in full.
pub fn roundtrip(stream: &mut TcpStream, request: &[u8]) -> Vec<u8> {
	stream.write_all(request).unwrap();
	let mut reply = Vec::new();
	stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
	let _ = stream.read_to_end(&mut reply);
	reply
}
