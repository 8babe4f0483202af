//! Fork/exec of the judging subprocess; asynchronous completion via the SIGCHLD descriptor;
//! result append to per-contest stats.

use crate::{config::Config, submission::SubmissionQueue};
use log::{debug, info, warn};
use nix::{
	fcntl::{open, OFlag},
	sys::{
		stat::Mode,
		wait::{waitpid, WaitPidFlag, WaitStatus},
	},
	unistd::{dup2, execvp, fork, ForkResult},
};
use std::{
	ffi::CString,
	fs::OpenOptions,
	io::{self, BufRead, BufReader, Write},
	path::PathBuf,
};

/// Path (relative to the server's working directory) to the judge binary, exec'd via `execvp`.
const JUDGE_BIN: &str = "./test";

/// At most one child judge process at a time: `{ child_pid, active_slot }`. Invariant: if a
/// child is running, `active_slot` names a valid submission in the queue.
#[derive(Debug, Default)]
pub struct JudgeDriver {
	child: Option<nix::unistd::Pid>,
	active_slot: Option<usize>,
}

impl JudgeDriver {
	pub fn is_running(&self) -> bool {
		self.child.is_some()
	}

	/// Fork and exec the judge binary against the lowest-index pending submission. Does nothing
	/// if a judge is already running or the queue is empty.
	pub fn start(&mut self, config: &Config, queue: &SubmissionQueue) {
		if self.is_running() {
			return;
		}
		let Some(idx) = queue.first() else { return };
		let submission = queue.get(idx).expect("first() named a valid slot");

		let result_path = config.logs_dir.join("test.out");
		match spawn_judge(&submission.contest, &submission.source_path, &submission.language, &result_path) {
			Ok(child) => {
				info!(
					"judging started: pid={child} slot={idx} user={} contest={} lang={}",
					submission.user, submission.contest, submission.language
				);
				self.child = Some(child);
				self.active_slot = Some(idx);
			},
			Err(err) => warn!("failed to start judge for slot {idx}: {err}"),
		}
	}

	/// Non-blockingly check whether the running child has exited; if so, record its result and
	/// start the next pending submission. Never blocks; tolerates unavailable files silently.
	pub fn reap(&mut self, config: &Config, queue: &mut SubmissionQueue) {
		let Some(child) = self.child else { return };
		match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
			Ok(WaitStatus::StillAlive) => return,
			Ok(_status) => (),
			Err(err) => {
				warn!("reap: waitpid({child}) failed: {err}");
				return;
			},
		}

		if let Some(idx) = self.active_slot.take() {
			if let Some(submission) = queue.get(idx) {
				if let Err(err) = record_result(config, submission) {
					debug!("reap: could not record result for slot {idx}: {err}");
				}
			}
			queue.clear(idx);
		}
		self.child = None;

		self.start(config, queue);
	}
}

fn spawn_judge(
	contest: &str,
	source_path: &std::path::Path,
	lang: &str,
	result_path: &std::path::Path,
) -> io::Result<nix::unistd::Pid> {
	// Safety: between fork and exec/exit the child only opens a file, dup2s it onto stdout, and
	// calls execvp; it never returns to arbitrary Rust code.
	match unsafe { fork() } {
		Ok(ForkResult::Child) => {
			let fail = || std::process::exit(1);
			let Ok(out) = open(result_path, OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC, Mode::from_bits_truncate(0o600))
			else {
				fail()
			};
			if dup2(out, 1).is_err() {
				fail();
			}
			let Ok(prog) = CString::new(JUDGE_BIN) else { fail() };
			let argv: Vec<CString> = [JUDGE_BIN, contest, source_path.to_str().unwrap_or(""), lang]
				.into_iter()
				.map(CString::new)
				.collect::<Result<_, _>>()
				.unwrap_or_else(|_| fail());
			let _ = execvp(&prog, &argv);
			fail();
		},
		Ok(ForkResult::Parent { child }) => Ok(child),
		Err(err) => Err(io::Error::from(err)),
	}
}

fn record_result(config: &Config, submission: &crate::submission::Submission) -> io::Result<()> {
	let result_path = config.logs_dir.join("test.out");
	let first_line = match std::fs::File::open(&result_path) {
		Ok(file) => BufReader::new(file).lines().next().transpose()?,
		Err(err) if err.kind() == io::ErrorKind::NotFound => None,
		Err(err) => return Err(err),
	};
	let Some(first_line) = first_line else { return Ok(()) };

	let submitted_at = submission.submitted_at.duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs();
	let stat_path: PathBuf = format!("{}.stat", submission.contest).into();
	let mut stat = OpenOptions::new().create(true).append(true).open(stat_path)?;
	writeln!(stat, "{}\t{}\t{}", submission.user, submitted_at, first_line)?;
	Ok(())
}
