//! The sandboxed execution primitive `ct_exec`, and `slaughter`, the mechanism used to reap
//! grandchildren a judged program leaves behind.

use log::{debug, warn};
use nix::{
	fcntl::{open, OFlag},
	sys::{
		resource::{setrlimit, Resource},
		signal::{kill, Signal},
		stat::Mode,
		wait::{waitpid, WaitPidFlag, WaitStatus},
	},
	unistd::{chdir, close, dup2, execvp, fork, nice, setgid, setuid, ForkResult, Gid, Pid, Uid},
};
use std::{
	ffi::CString,
	path::Path,
	time::{Duration, Instant},
};

/// Open-file-descriptor limit applied to a sandboxed run.
const MAX_OPEN_FILES: u64 = 12;
/// File-size limit (bytes) applied to a sandboxed run.
const MAX_FILE_SIZE: u64 = 4 << 20;
/// Virtual address space limit (bytes) applied to a sandboxed run.
const MAX_ADDRESS_SPACE: u64 = 500 << 20;
/// Process-count limit applied to a sandboxed run.
const MAX_NPROC: u64 = 12;

/// Wall-clock budget for one sandboxed run.
const RUN_TIMEOUT: Duration = Duration::from_millis(2000);
/// Sleep between non-blocking `waitpid` polls while a run is in flight.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Outcome of one sandboxed run, before the caller maps it onto a verdict character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
	/// Exited with status 0 and was not signalled.
	Success,
	/// Exceeded the wall-clock budget; the process (and its grandchildren) were killed.
	Timeout,
	/// Exited nonzero, or was killed by a signal.
	RuntimeError,
	/// `fork` itself failed.
	ForkFailed,
}

/// stdio redirection targets for a sandboxed run, each a path (or `/dev/null`).
pub struct Stdio<'a> {
	pub stdin: &'a Path,
	pub stdout: &'a Path,
	pub stderr: &'a Path,
}

/// Fork, drop privileges to `uid`/`gid` in the child, apply resource limits, redirect stdio, and
/// `exec` `argv` with `cwd` as the working directory. The parent waits up to [`RUN_TIMEOUT`],
/// polling every [`WAIT_POLL_INTERVAL`]; on timeout it kills the child and runs [`slaughter`] to
/// reap any grandchildren the sandboxed program left behind.
pub fn ct_exec(argv: &[String], cwd: &Path, uid: Uid, gid: Gid, stdio: &Stdio<'_>) -> RunOutcome {
	// Safety: between fork and exec/exit the child touches only async-signal-safe syscalls
	// (chdir, nice, setrlimit, setgid/setuid, dup2, open, execvp) and never returns to Rust
	// code that could allocate or take a lock held by another (nonexistent, single-threaded at
	// fork time) thread.
	match unsafe { fork() } {
		Ok(ForkResult::Child) => {
			run_child(argv, cwd, uid, gid, stdio);
			std::process::exit(1); // run_child only returns on failure
		},
		Ok(ForkResult::Parent { child }) => wait_with_timeout(child, uid, gid),
		Err(err) => {
			warn!("ct_exec: fork failed: {err}");
			RunOutcome::ForkFailed
		},
	}
}

/// Runs entirely in the forked child; never returns except by exec or process::exit.
fn run_child(argv: &[String], cwd: &Path, uid: Uid, gid: Gid, stdio: &Stdio<'_>) -> ! {
	let fail = || std::process::exit(1);
	if chdir(cwd).is_err() {
		fail();
	}
	let _ = nice(1);
	for (resource, limit) in [
		(Resource::RLIMIT_NOFILE, MAX_OPEN_FILES),
		(Resource::RLIMIT_FSIZE, MAX_FILE_SIZE),
		(Resource::RLIMIT_AS, MAX_ADDRESS_SPACE),
		(Resource::RLIMIT_NPROC, MAX_NPROC),
	] {
		let _ = setrlimit(resource, limit, limit);
	}
	// order matters: drop the group before the user, or the later setuid would no longer have
	// permission to change the group.
	if setgid(gid).is_err() || setuid(uid).is_err() {
		fail();
	}
	if redirect_stdio(stdio).is_err() {
		fail();
	}
	let Ok(prog) = CString::new(argv[0].as_bytes()) else { fail() };
	let argv_c: Vec<CString> = match argv.iter().map(|s| CString::new(s.as_bytes())).collect() {
		Ok(v) => v,
		Err(_) => fail(),
	};
	let _ = execvp(&prog, &argv_c);
	fail()
}

fn redirect_stdio(stdio: &Stdio<'_>) -> nix::Result<()> {
	let stdin = open(stdio.stdin, OFlag::O_RDONLY, Mode::empty())?;
	dup2(stdin, 0)?;
	let _ = close(stdin);
	let stdout = open(stdio.stdout, OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC, Mode::from_bits_truncate(0o600))?;
	dup2(stdout, 1)?;
	let _ = close(stdout);
	let stderr = open(stdio.stderr, OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC, Mode::from_bits_truncate(0o600))?;
	dup2(stderr, 2)?;
	let _ = close(stderr);
	Ok(())
}

fn wait_with_timeout(child: Pid, uid: Uid, gid: Gid) -> RunOutcome {
	let start = Instant::now();
	loop {
		match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
			Ok(WaitStatus::StillAlive) => {
				if start.elapsed() >= RUN_TIMEOUT {
					return kill_and_reap(child, start, uid, gid);
				}
				std::thread::sleep(WAIT_POLL_INTERVAL);
			},
			Ok(WaitStatus::Exited(_, 0)) => return RunOutcome::Success,
			Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => return RunOutcome::RuntimeError,
			Ok(_) => std::thread::sleep(WAIT_POLL_INTERVAL),
			Err(err) => {
				warn!("ct_exec: waitpid failed: {err}");
				return RunOutcome::RuntimeError;
			},
		}
	}
}

fn kill_and_reap(child: Pid, start: Instant, uid: Uid, gid: Gid) -> RunOutcome {
	debug!("ct_exec: pid {child} exceeded the {RUN_TIMEOUT:?} budget, killing");
	slaughter(uid, gid);
	let _ = kill(child, Signal::SIGKILL);
	while start.elapsed() < RUN_TIMEOUT * 2 {
		match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
			Ok(WaitStatus::StillAlive) => std::thread::sleep(WAIT_POLL_INTERVAL),
			_ => break,
		}
	}
	RunOutcome::Timeout
}

/// Kill every process owned by the sandbox uid, three times over, to reap detached grandchildren
/// the judged program may have spawned and left running. `kill(-1, SIGKILL)` only targets
/// processes owned by the caller's own uid, so each attempt forks a helper that drops to the
/// sandbox identity before issuing the kill.
pub fn slaughter(uid: Uid, gid: Gid) {
	for attempt in 0..3 {
		// Safety: see the note on `ct_exec`'s fork; this child only calls setgid/setuid/kill/exit.
		match unsafe { fork() } {
			Ok(ForkResult::Child) => {
				if setgid(gid).is_err() || setuid(uid).is_err() {
					std::process::exit(1);
				}
				let _ = kill(Pid::from_raw(-1), Signal::SIGKILL);
				std::process::exit(0);
			},
			Ok(ForkResult::Parent { child }) => {
				let _ = waitpid(child, None);
			},
			Err(err) => warn!("slaughter: fork attempt {attempt} failed: {err}"),
		}
	}
}
