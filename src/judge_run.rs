//! The one-shot judge: install a submission into a scratch directory, compile or interpret it,
//! run it against each of a contest's test cases under the sandbox, and score the result.

use crate::{
	languages,
	sandbox::{self, RunOutcome, Stdio},
};
use log::debug;
use nix::unistd::{chown, Gid, Uid};
use std::{
	fs::{self, File},
	io::{self, BufRead, BufReader, Read},
	os::unix::fs::PermissionsExt,
	path::{Path, PathBuf},
	time::{Duration, Instant},
};

/// Per-case outcome, reduced to the character that appears in the final verdict string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
	Pass,
	Fail,
	Timeout,
	RuntimeError,
	CompileError,
}

impl Verdict {
	fn as_char(self) -> char {
		match self {
			Verdict::Pass => 'P',
			Verdict::Fail => 'F',
			Verdict::Timeout => 'T',
			Verdict::RuntimeError => 'R',
			Verdict::CompileError => 'E',
		}
	}
}

/// Judge `program` (source, or an `elf` binary) written in `lang` against every test case found
/// under `contest_dir`, running each case as `sandbox_uid`/`sandbox_gid`. Returns the single
/// result line the judge binary prints to stdout; never returns `Err` for submission-side
/// failures (those become verdict characters), only for scratch-directory setup failures the
/// caller cannot recover from.
pub fn run(contest_dir: &Path, program: &Path, lang: &str, sandbox_uid: Uid, sandbox_gid: Gid) -> io::Result<String> {
	let scratch = scratch_dir();
	create_sandboxed_dir(&scratch, sandbox_uid, sandbox_gid)?;
	let result = judge_in_scratch(&scratch, contest_dir, program, lang, sandbox_uid, sandbox_gid);
	if let Err(err) = fs::remove_dir_all(&scratch) {
		debug!("judge_run: could not remove scratch dir {}: {err}", scratch.display());
	}
	result
}

fn judge_in_scratch(
	scratch: &Path,
	contest_dir: &Path,
	program: &Path,
	lang: &str,
	uid: Uid,
	gid: Gid,
) -> io::Result<String> {
	let src_path = scratch.join(source_filename(lang));
	install_sandboxed(program, &src_path, 0o600, uid, gid)?;

	let artifact_path = scratch.join("prog.run");
	let compile_error = match languages::compile_argv(lang, path_str(&src_path), path_str(&artifact_path)) {
		Some(argv) => {
			let stdio = Stdio { stdin: Path::new("/dev/null"), stdout: Path::new("/dev/null"), stderr: Path::new("/dev/null") };
			sandbox::ct_exec(&argv, scratch, uid, gid, &stdio) != RunOutcome::Success
		},
		None => {
			install_sandboxed(&src_path, &artifact_path, 0o700, uid, gid)?;
			false
		},
	};

	let run_argv = languages::run_argv(lang, path_str(&artifact_path));
	let cases = discover_cases(contest_dir);

	let mut score: u32 = 0;
	let mut verdicts = String::new();
	let mut elapsed = Duration::ZERO;

	for case in &cases {
		let input_path = scratch.join(".i");
		install_sandboxed(&case.input, &input_path, 0o600, uid, gid)?;

		let verdict = if compile_error {
			Verdict::CompileError
		} else {
			let output_path = scratch.join(".o");
			let start = Instant::now();
			let stdio = Stdio { stdin: &input_path, stdout: &output_path, stderr: Path::new("/dev/null") };
			let outcome = sandbox::ct_exec(&run_argv, scratch, uid, gid, &stdio);
			elapsed += start.elapsed();
			match outcome {
				RunOutcome::Timeout => Verdict::Timeout,
				RunOutcome::RuntimeError | RunOutcome::ForkFailed => Verdict::RuntimeError,
				RunOutcome::Success => match &case.expected {
					Some(expected) => {
						if files_equal_by_line(expected, &output_path) {
							score += 1;
							Verdict::Pass
						} else {
							Verdict::Fail
						}
					},
					None => score_with_verifier(case.verifier.as_deref().expect("discovery guarantees output or verifier"), &output_path, scratch, uid, gid, &mut score),
				},
			}
		};
		verdicts.push(verdict.as_char());
	}

	let score_line = format!(
		"{score}/{}\t{}.{:02}\t# {verdicts}{}\n",
		cases.len(),
		elapsed.as_secs(),
		elapsed.subsec_millis() / 10,
		if verdicts.chars().all(|c| c == 'P') { "." } else { "!" },
	);
	Ok(score_line)
}

fn score_with_verifier(verifier: &Path, output_path: &Path, scratch: &Path, uid: Uid, gid: Gid, score: &mut u32) -> Verdict {
	let verifier_path = scratch.join(".v");
	if install_sandboxed(verifier, &verifier_path, 0o700, uid, gid).is_err() {
		return Verdict::Fail;
	}
	let result_path = scratch.join(".r");
	let stdio = Stdio { stdin: output_path, stdout: &result_path, stderr: Path::new("/dev/null") };
	let argv = vec![path_str(&verifier_path).to_string()];
	let outcome = sandbox::ct_exec(&argv, scratch, uid, gid, &stdio);
	if let Some(points) = read_integer_prefix(&result_path) {
		*score += points;
	}
	if outcome == RunOutcome::Success {
		Verdict::Pass
	} else {
		Verdict::Fail
	}
}

struct Case {
	input: PathBuf,
	expected: Option<PathBuf>,
	verifier: Option<PathBuf>,
}

/// `<contest>/NN` (required), `<contest>/NNo` (expected output), `<contest>/NNv` (verifier).
/// Stops at the first index whose input is missing, or which has neither output nor verifier.
fn discover_cases(contest_dir: &Path) -> Vec<Case> {
	let mut cases = Vec::new();
	for i in 0.. {
		let input = contest_dir.join(format!("{i:02}"));
		if !input.is_file() {
			break;
		}
		let expected = contest_dir.join(format!("{i:02}o"));
		let verifier = contest_dir.join(format!("{i:02}v"));
		let expected = expected.is_file().then_some(expected);
		let verifier = verifier.is_file().then_some(verifier);
		if expected.is_none() && verifier.is_none() {
			break;
		}
		cases.push(Case { input, expected, verifier });
	}
	cases
}

fn source_filename(lang: &str) -> &'static str {
	match lang {
		"c" => "prog.c",
		"c++" => "prog.cpp",
		"py" | "py2" | "py3" => "prog.py",
		"sh" => "prog.sh",
		"elf" => "prog.elf",
		_ => "prog",
	}
}

fn path_str(path: &Path) -> &str {
	path.to_str().unwrap_or("")
}

fn create_sandboxed_dir(path: &Path, uid: Uid, gid: Gid) -> io::Result<()> {
	fs::create_dir(path)?;
	fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
	chown(path, Some(uid), Some(gid)).map_err(io::Error::from)
}

fn install_sandboxed(src: &Path, dst: &Path, mode: u32, uid: Uid, gid: Gid) -> io::Result<()> {
	fs::copy(src, dst)?;
	fs::set_permissions(dst, fs::Permissions::from_mode(mode))?;
	chown(dst, Some(uid), Some(gid)).map_err(io::Error::from)
}

/// Compares two files line by line (not byte-for-byte), so a missing trailing newline on either
/// side does not fail an otherwise-identical comparison.
fn files_equal_by_line(expected: &Path, actual: &Path) -> bool {
	let (Ok(a), Ok(b)) = (File::open(expected), File::open(actual)) else { return false };
	let mut a_lines = BufReader::new(a).lines();
	let mut b_lines = BufReader::new(b).lines();
	loop {
		match (a_lines.next(), b_lines.next()) {
			(None, None) => return true,
			(Some(Ok(l)), Some(Ok(r))) if l == r => continue,
			_ => return false,
		}
	}
}

/// Reads a leading base-10 integer from a verifier's result file. Non-integer or absent content
/// contributes no score.
fn read_integer_prefix(path: &Path) -> Option<u32> {
	let mut contents = String::new();
	File::open(path).ok()?.read_to_string(&mut contents).ok()?;
	let digits: String = contents.chars().take_while(|c| c.is_ascii_digit()).collect();
	digits.parse().ok()
}

fn scratch_dir() -> PathBuf {
	let pid = std::process::id() % 1_000_000;
	PathBuf::from(format!("/tmp/ct{pid:06}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn files_equal_by_line_ignores_trailing_newline_presence() {
		let dir = tempfile::tempdir().unwrap();
		let a = dir.path().join("a");
		let b = dir.path().join("b");
		std::fs::write(&a, "hello\nworld\n").unwrap();
		std::fs::write(&b, "hello\nworld").unwrap();
		assert!(files_equal_by_line(&a, &b));
	}

	#[test]
	fn files_equal_by_line_detects_mismatch() {
		let dir = tempfile::tempdir().unwrap();
		let a = dir.path().join("a");
		let b = dir.path().join("b");
		std::fs::write(&a, "hello\n").unwrap();
		std::fs::write(&b, "goodbye\n").unwrap();
		assert!(!files_equal_by_line(&a, &b));
	}

	#[test]
	fn read_integer_prefix_tolerates_non_integer_content() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("r");
		std::fs::write(&path, "not a number\n").unwrap();
		assert_eq!(read_integer_prefix(&path), None);
	}

	#[test]
	fn read_integer_prefix_reads_leading_digits() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("r");
		std::fs::write(&path, "7 out of 10\n").unwrap();
		assert_eq!(read_integer_prefix(&path), Some(7));
	}

	#[test]
	fn discover_cases_stops_at_first_gap() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("00"), "in\n").unwrap();
		std::fs::write(dir.path().join("00o"), "out\n").unwrap();
		std::fs::write(dir.path().join("01"), "in\n").unwrap();
		// no 01o or 01v: discovery stops here
		std::fs::write(dir.path().join("02"), "in\n").unwrap();
		std::fs::write(dir.path().join("02o"), "out\n").unwrap();
		let cases = discover_cases(dir.path());
		assert_eq!(cases.len(), 1);
	}

	#[test]
	fn source_filename_matches_known_languages() {
		assert_eq!(source_filename("c"), "prog.c");
		assert_eq!(source_filename("py3"), "prog.py");
		assert_eq!(source_filename("elf"), "prog.elf");
	}
}
