//! Process arguments, environment overrides, sandbox identity, listening port.

use clap::Parser;
use std::path::PathBuf;

/// contest judge server
#[derive(Debug, Parser)]
#[command(name = "server")]
pub struct ServerArgs {
	/// TCP port to listen on
	#[arg(long, env = "CT_PORT", default_value_t = 40)]
	pub port: u16,

	/// path to the credential file
	#[arg(long = "users", env = "CT_USERS", default_value = "USERS")]
	pub users_path: PathBuf,

	/// directory to store submission sources and judge scratch output
	#[arg(long = "logs-dir", env = "CT_LOGS_DIR", default_value = "logs")]
	pub logs_dir: PathBuf,

	/// unprivileged uid the judge sandbox runs as
	#[arg(long = "sandbox-uid", env = "CT_SANDBOX_UID", default_value_t = 12345)]
	pub sandbox_uid: u32,

	/// unprivileged gid the judge sandbox runs as
	#[arg(long = "sandbox-gid", env = "CT_SANDBOX_GID", default_value_t = 12345)]
	pub sandbox_gid: u32,

	/// names of the contests this server accepts submissions for
	#[arg(required = true)]
	pub contests: Vec<String>,
}

/// Immutable configuration assembled once at process start and shared by reference for the life
/// of the server; never mutated, so no synchronization is needed to read it from the
/// SIGCHLD-driven reap path or the regular tick path.
#[derive(Debug, Clone)]
pub struct Config {
	pub contests: Vec<String>,
	pub port: u16,
	pub sandbox_uid: u32,
	pub sandbox_gid: u32,
	pub users_path: PathBuf,
	pub logs_dir: PathBuf,
}

impl Config {
	pub fn is_open_contest(&self, contest: &str) -> bool {
		self.contests.iter().any(|c| c == contest)
	}
}

impl From<ServerArgs> for Config {
	fn from(args: ServerArgs) -> Self {
		Self {
			contests: args.contests,
			port: args.port,
			sandbox_uid: args.sandbox_uid,
			sandbox_gid: args.sandbox_gid,
			users_path: args.users_path,
			logs_dir: args.logs_dir,
		}
	}
}


/// judge one submission against a contest's test cases
#[derive(Debug, Parser)]
#[command(name = "test")]
pub struct JudgeArgs {
	/// directory of numbered test cases
	pub contest: PathBuf,
	/// path to the submitted source (or, with `elf`, the compiled binary)
	pub program: PathBuf,
	/// submission language, one of c, c++, py, py2, py3, sh, elf
	pub lang: String,

	/// unprivileged uid to run the submission as
	#[arg(long = "sandbox-uid", env = "CT_SANDBOX_UID", default_value_t = 12345)]
	pub sandbox_uid: u32,
	/// unprivileged gid to run the submission as
	#[arg(long = "sandbox-gid", env = "CT_SANDBOX_GID", default_value_t = 12345)]
	pub sandbox_gid: u32,
}
