//! Entry point for the one-shot judge child: install, compile/interpret, and score one
//! submission against a contest's test cases, then print exactly one result line.

use clap::Parser;
use ctjudge::{config::JudgeArgs, judge_run};
use nix::unistd::{Gid, Uid};
use std::io::Write;

fn main() {
	env_logger::init();
	let args = JudgeArgs::parse();
	let uid = Uid::from_raw(args.sandbox_uid);
	let gid = Gid::from_raw(args.sandbox_gid);

	match judge_run::run(&args.contest, &args.program, &args.lang, uid, gid) {
		Ok(line) => {
			print!("{line}");
			let _ = std::io::stdout().flush();
		},
		Err(err) => log::warn!("judge: failed to run: {err}"),
	}
}
