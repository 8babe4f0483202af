//! Per-language compile/interpret argv templates, with `SRC`/`OUT` token substitution.

/// A single templated argv token: either a literal, or a placeholder filled in at invocation
/// time with the source path (`Src`) or the compiled-artifact path (`Out`).
#[derive(Debug, Clone, Copy)]
pub enum Token {
	Lit(&'static str),
	Src,
	Out,
}

fn render(template: &[Token], src: &str, out: &str) -> Vec<String> {
	template
		.iter()
		.map(|tok| match tok {
			Token::Lit(s) => s.to_string(),
			Token::Src => src.to_string(),
			Token::Out => out.to_string(),
		})
		.collect()
}

/// The languages `submit` accepts.
pub const SUPPORTED: &[&str] = &["c", "c++", "py", "py2", "py3", "sh", "elf"];

pub fn is_supported(lang: &str) -> bool {
	SUPPORTED.contains(&lang)
}

/// The compiler invocation for a language, if it needs compiling. `None` means the source is
/// copied verbatim to the artifact path (interpreted languages, or a submitted `elf` binary).
pub fn compile_template(lang: &str) -> Option<&'static [Token]> {
	const CC: &[Token] = &[Token::Lit("cc"), Token::Lit("-O2"), Token::Lit("-o"), Token::Out, Token::Src];
	const CXX: &[Token] = &[Token::Lit("c++"), Token::Lit("-O2"), Token::Lit("-o"), Token::Out, Token::Src];
	match lang {
		"c" => Some(CC),
		"c++" => Some(CXX),
		_ => None,
	}
}

/// The interpreter invocation for a language, if it's interpreted. `None` means the compiled (or
/// copied) artifact at `OUT` is executed directly.
pub fn interpret_template(lang: &str) -> Option<&'static [Token]> {
	const SH: &[Token] = &[Token::Lit("sh"), Token::Src];
	const PY: &[Token] = &[Token::Lit("python"), Token::Src];
	const PY2: &[Token] = &[Token::Lit("python2"), Token::Src];
	const PY3: &[Token] = &[Token::Lit("python3"), Token::Src];
	match lang {
		"sh" => Some(SH),
		"py" => Some(PY),
		"py2" => Some(PY2),
		"py3" => Some(PY3),
		_ => None,
	}
}

/// Build the argv used to run a submission once it's installed at `artifact_path` in the
/// sandbox scratch directory (compiled, interpreted, or copied per §4.8).
pub fn run_argv(lang: &str, artifact_path: &str) -> Vec<String> {
	match interpret_template(lang) {
		Some(template) => render(template, artifact_path, artifact_path),
		None => vec![artifact_path.to_string()],
	}
}

pub fn compile_argv(lang: &str, src_path: &str, artifact_path: &str) -> Option<Vec<String>> {
	compile_template(lang).map(|template| render(template, src_path, artifact_path))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn c_compiles_with_substituted_paths() {
		let argv = compile_argv("c", "/tmp/p.c", "/tmp/.x").unwrap();
		assert_eq!(argv, vec!["cc", "-O2", "-o", "/tmp/.x", "/tmp/p.c"]);
	}

	#[test]
	fn sh_has_no_compile_step_and_runs_via_interpreter() {
		assert!(compile_argv("sh", "/tmp/p.sh", "/tmp/.x").is_none());
		assert_eq!(run_argv("sh", "/tmp/.x"), vec!["sh", "/tmp/.x"]);
	}

	#[test]
	fn elf_runs_the_artifact_directly() {
		assert!(compile_argv("elf", "/tmp/p.elf", "/tmp/.x").is_none());
		assert_eq!(run_argv("elf", "/tmp/.x"), vec!["/tmp/.x"]);
	}

	#[test]
	fn all_supported_languages_are_recognized() {
		for lang in SUPPORTED {
			assert!(is_supported(lang));
		}
		assert!(!is_supported("rust"));
	}
}
