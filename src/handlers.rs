//! The three command handlers: `register`, `report`, `submit`.

use crate::{
	config::Config,
	judge_driver::JudgeDriver,
	languages,
	submission::{Submission, SubmissionQueue},
	users,
};
use log::info;
use std::{
	fs::{self, OpenOptions},
	io::{Read, Write},
	path::PathBuf,
	time::SystemTime,
};

/// `register <user> <pass>`. Validates fields present, `4 <= len(user) <= 16`, username
/// character set, and non-existence, in that order, appending on success.
pub fn register(users_path: &std::path::Path, user: Option<&str>, pass: Option<&str>) -> String {
	let (Some(user), Some(_pass)) = (user, pass) else {
		return "register: insufficient arguments!\n".to_string();
	};
	if user.len() < 4 {
		return "register: username is too short!\n".to_string();
	}
	if user.len() > 16 {
		return "register: username too long!\n".to_string();
	}
	if !user.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
		return "register: username can contain only [a-zA-Z0-9_.]!\n".to_string();
	}
	match users::login(users_path, user, None) {
		Ok(true) => return "register: user exists!\n".to_string(),
		Ok(false) => (),
		Err(_) => return "register: user exists!\n".to_string(),
	}
	let pass = pass.unwrap();
	match users::add(users_path, user, pass) {
		Ok(()) => format!("register: user {user} added.\n"),
		Err(_) => "register: cannot write!\n".to_string(),
	}
}

/// `report <contest>`. Streams the contest's `.stat` file (if any) followed by one `# Waiting`
/// line per currently-queued submission for that contest, in that order.
pub fn report(contest: Option<&str>, queue: &SubmissionQueue) -> Vec<u8> {
	let Some(contest) = contest else {
		return b"report: insufficient arguments!\n".to_vec();
	};
	let mut out = Vec::new();
	let stat_path = format!("{contest}.stat");
	if let Ok(mut file) = fs::File::open(&stat_path) {
		let _ = file.read_to_end(&mut out);
	}
	for submission in queue.iter() {
		if submission.contest == contest {
			let submitted_at = submission.submitted_at.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs();
			out.extend_from_slice(format!("{}\t{}\t-\t-\t# Waiting\n", submission.user, submitted_at).as_bytes());
		}
	}
	out
}

/// Parsed `submit` header fields.
pub struct SubmitHeader<'a> {
	pub user: Option<&'a str>,
	pub pass: Option<&'a str>,
	pub contest: Option<&'a str>,
	pub lang: Option<&'a str>,
}

/// `submit <user> <pass> <contest> <lang> [end-marker...]`. On success writes the body (with any
/// trailing end marker already stripped by the caller) to `logs/<contest>-<user>.<lang>` and
/// enqueues a [`Submission`]. If the queue is full the file is still left on disk — a
/// preserved-but-suspect reference behavior (see DESIGN.md).
pub fn submit(
	config: &Config,
	queue: &mut SubmissionQueue,
	judge: &mut JudgeDriver,
	header: &SubmitHeader<'_>,
	body: &[u8],
) -> String {
	let (Some(user), Some(pass), Some(contest), Some(lang)) = (header.user, header.pass, header.contest, header.lang)
	else {
		return "submit: insufficient arguments!\n".to_string();
	};
	if !config.is_open_contest(contest) {
		return "submit: contest is not open!\n".to_string();
	}
	if !languages::is_supported(lang) {
		return "submit: unknown language!\n".to_string();
	}
	match users::login(&config.users_path, user, Some(pass)) {
		Ok(true) => (),
		_ => return "submit: failed to log in!\n".to_string(),
	}
	if queue.contains(user, contest) {
		return "submit: pending submission, wait!\n".to_string();
	}

	if let Err(err) = ensure_logs_dir(&config.logs_dir) {
		info!("submit: could not create logs dir: {err}");
		return "submit: cannot write!\n".to_string();
	}
	let source_path: PathBuf = config.logs_dir.join(format!("{contest}-{user}.{lang}"));
	if let Err(err) = write_source(&source_path, body) {
		info!("submit: could not write {}: {err}", source_path.display());
		return "submit: cannot write!\n".to_string();
	}

	let submission = Submission {
		user: user.to_string(),
		contest: contest.to_string(),
		language: lang.to_string(),
		source_path,
		submitted_at: SystemTime::now(),
	};
	let reply = match queue.push(submission) {
		Some(_) => "submit: submission queued.\n".to_string(),
		None => "submit: too many submissions, retry later!\n".to_string(),
	};
	if !judge.is_running() {
		judge.start(config, queue);
	}
	reply
}

fn ensure_logs_dir(dir: &std::path::Path) -> std::io::Result<()> {
	if dir.is_dir() {
		return Ok(());
	}
	fs::create_dir(dir)?;
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
	}
	Ok(())
}

fn write_source(path: &std::path::Path, body: &[u8]) -> std::io::Result<()> {
	let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
	file.write_all(body)?;
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		file.set_permissions(fs::Permissions::from_mode(0o600))?;
	}
	Ok(())
}
