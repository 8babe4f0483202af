//! Append-only credential file: `login(user, pass)`, `add(user, pass)`.

use std::{
	fs::{File, OpenOptions},
	io::{self, BufRead, BufReader, Write},
	path::Path,
};

/// Check whether `user`/`pass` is a valid login against the credential file at `path`.
///
/// If `pass` is `None`, only the username's existence is checked (used by `register`'s
/// duplicate-user check); a password is always supplied for `submit`'s login check. A missing
/// credential file is treated as "no such user" rather than an error.
pub fn login(path: &Path, user: &str, pass: Option<&str>) -> io::Result<bool> {
	let file = match File::open(path) {
		Ok(file) => file,
		Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
		Err(err) => return Err(err),
	};
	let mut logged_in = false;
	for line in BufReader::new(file).lines() {
		let line = line?;
		let mut fields = line.split_whitespace();
		let (Some(line_user), Some(line_pass)) = (fields.next(), fields.next()) else { continue };
		if line_user == user {
			logged_in = match pass {
				Some(pass) => pass == line_pass,
				None => true,
			};
		}
	}
	Ok(logged_in)
}

/// Append a `user pass\n` line to the credential file, creating it if absent.
pub fn add(path: &Path, user: &str, pass: &str) -> io::Result<()> {
	let mut file = OpenOptions::new().create(true).append(true).open(path)?;
	writeln!(file, "{user} {pass}")?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::NamedTempFile;

	#[test]
	fn login_checks_username_and_password() {
		let tmp = NamedTempFile::new().unwrap();
		add(tmp.path(), "alice", "hunter2").unwrap();
		assert!(login(tmp.path(), "alice", Some("hunter2")).unwrap());
		assert!(!login(tmp.path(), "alice", Some("wrong")).unwrap());
		assert!(!login(tmp.path(), "bob", Some("anything")).unwrap());
	}

	#[test]
	fn login_with_no_password_only_checks_existence() {
		let tmp = NamedTempFile::new().unwrap();
		add(tmp.path(), "alice", "hunter2").unwrap();
		assert!(login(tmp.path(), "alice", None).unwrap());
		assert!(!login(tmp.path(), "bob", None).unwrap());
	}

	#[test]
	fn login_against_missing_file_fails_without_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("USERS");
		assert!(!login(&path, "alice", Some("hunter2")).unwrap());
	}

	#[test]
	fn add_appends_without_truncating() {
		let tmp = NamedTempFile::new().unwrap();
		add(tmp.path(), "alice", "hunter2").unwrap();
		add(tmp.path(), "bob", "swordfish").unwrap();
		let contents = std::fs::read_to_string(tmp.path()).unwrap();
		assert_eq!(contents, "alice hunter2\nbob swordfish\n");
	}
}
