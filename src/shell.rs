//! Shell-quoting helpers
//!
//! Syntax validation and word extraction go through `shlex`; splitting a
//! compound command keeps each word's original quoting so fragments can be
//! shown and re-evaluated exactly as written.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("Syntax error: unbalanced quotes or trailing escape")]
    Unbalanced,
}

/// Check that a command tokenizes under shell quoting rules
pub fn validate_syntax(command: &str) -> Result<(), SyntaxError> {
    shlex::split(command).map(|_| ()).ok_or(SyntaxError::Unbalanced)
}

/// Shell words with quotes removed, `None` on unbalanced quoting
pub fn words(command: &str) -> Option<Vec<String>> {
    shlex::split(command)
}

/// Lowercased base name of the program word (`/usr/bin/SUDO` -> `sudo`)
pub fn program_name(word: &str) -> String {
    let base = Path::new(word)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(word);
    base.to_lowercase()
}

/// Lowercased program names of the command, leading `VAR=value` assignments skipped
pub fn program_words(command: &str) -> Vec<String> {
    words(command)
        .unwrap_or_default()
        .into_iter()
        .skip_while(|w| is_assignment(w))
        .collect()
}

/// Wrappers that run their first operand as the real program
pub const TRANSPARENT_WRAPPERS: &[&str] =
    &["nice", "time", "command", "env", "nohup", "exec", "builtin", "xargs"];

/// Options of `sudo` and the wrappers that consume the following word
fn value_options(wrapper: &str) -> &'static [&'static str] {
    match wrapper {
        "sudo" => &["-u", "-g", "-h", "-p", "-C", "-U", "-r", "-t"],
        "nice" => &["-n"],
        "env" => &["-u", "-C", "-S"],
        "time" => &["-o", "-f"],
        "exec" => &["-a"],
        "xargs" => &["-n", "-I", "-d", "-L", "-P", "-s", "-a", "-E"],
        _ => &[],
    }
}

/// Index of the word that actually runs once wrappers are peeled off
///
/// Transparent wrappers, and `sudo` when `peel_sudo` is set, are skipped
/// together with their options and any `VAR=value` words after them. A
/// wrapper with nothing left to run is its own program.
pub fn effective_program_index(words: &[String], peel_sudo: bool) -> Option<usize> {
    let mut idx = 0;
    loop {
        let program = program_name(words.get(idx)?);
        let peel = (program == "sudo" && peel_sudo) || TRANSPARENT_WRAPPERS.contains(&program.as_str());
        if !peel {
            return Some(idx);
        }

        let options = value_options(&program);
        let mut next = idx + 1;
        while let Some(word) = words.get(next) {
            if options.contains(&word.as_str()) {
                next += 2;
            } else if word.starts_with('-') || is_assignment(word) {
                next += 1;
            } else {
                break;
            }
        }
        if next >= words.len() {
            return Some(idx);
        }
        idx = next;
    }
}

pub fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Split a compound command on unquoted `&&`, `;` and `|`
///
/// Separators are discarded, words inside a fragment are re-joined with a
/// single space and keep their quotes. Empty fragments are dropped. Input
/// with unbalanced quotes comes back as a single trimmed fragment so the
/// evaluator rejects it on syntax.
pub fn split_commands(command: &str) -> Vec<String> {
    if command.trim().is_empty() {
        return Vec::new();
    }

    let mut fragments = Vec::new();
    let mut words: Vec<String> = Vec::new();
    let mut word = String::new();
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();

    let end_word = |word: &mut String, words: &mut Vec<String>| {
        if !word.is_empty() {
            words.push(std::mem::take(word));
        }
    };
    let end_fragment = |words: &mut Vec<String>, fragments: &mut Vec<String>| {
        if !words.is_empty() {
            fragments.push(words.join(" "));
            words.clear();
        }
    };

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                word.push(c);
                if c == q {
                    quote = None;
                } else if c == '\\' && q == '"' {
                    if let Some(next) = chars.next() {
                        word.push(next);
                    }
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    word.push(c);
                }
                '\\' => {
                    word.push(c);
                    if let Some(next) = chars.next() {
                        word.push(next);
                    }
                }
                ';' | '|' => {
                    end_word(&mut word, &mut words);
                    end_fragment(&mut words, &mut fragments);
                }
                '&' if chars.peek() == Some(&'&') => {
                    chars.next();
                    end_word(&mut word, &mut words);
                    end_fragment(&mut words, &mut fragments);
                }
                c if c.is_whitespace() => end_word(&mut word, &mut words),
                c => word.push(c),
            },
        }
    }

    if quote.is_some() {
        return vec![command.trim().to_string()];
    }

    end_word(&mut word, &mut words);
    end_fragment(&mut words, &mut fragments);
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_split_mixed_separators() {
        assert_eq!(
            split_commands("cd /tmp && ls -la ; echo 'test' | cat"),
            vec!["cd /tmp", "ls -la", "echo 'test'", "cat"]
        );
        assert_eq!(
            split_commands("ls -la && cd /tmp ; echo 'done'"),
            vec!["ls -la", "cd /tmp", "echo 'done'"]
        );
        assert_eq!(split_commands("ps aux | grep python"), vec!["ps aux", "grep python"]);
    }

    #[test]
    fn test_split_keeps_quoted_separators() {
        assert_eq!(
            split_commands(r#"echo "hello world" && ls -la"#),
            vec![r#"echo "hello world""#, "ls -la"]
        );
        assert_eq!(
            split_commands("echo 'a && b; c | d'"),
            vec!["echo 'a && b; c | d'"]
        );
        assert_eq!(split_commands(r"echo a\;b"), vec![r"echo a\;b"]);
    }

    #[test]
    fn test_split_edge_cases() {
        assert!(split_commands("").is_empty());
        assert!(split_commands("   ").is_empty());
        assert!(split_commands(" ; && | ").is_empty());
        assert_eq!(split_commands("ls -la"), vec!["ls -la"]);
        assert_eq!(split_commands("ls;pwd"), vec!["ls", "pwd"]);
        assert_eq!(split_commands("true || false"), vec!["true", "false"]);
        assert_eq!(split_commands("echo 'open"), vec!["echo 'open"]);
    }

    #[test]
    fn test_syntax_validation() {
        for ok in ["ls -la", "echo 'hello world'", r#"grep "pattern" file.txt"#] {
            assert_eq!(validate_syntax(ok), Ok(()));
        }
        for bad in ["echo 'unclosed quote", r#"echo "another unclosed quote"#, "echo 'mixed quotes\""] {
            assert_eq!(validate_syntax(bad), Err(SyntaxError::Unbalanced));
        }
    }

    #[test]
    fn test_program_words() {
        assert_eq!(program_words("FOO=1 BAR=2 make all"), vec!["make", "all"]);
        assert_eq!(program_words("ls a=b"), vec!["ls", "a=b"]);
        assert!(program_words("'unbalanced").is_empty());
        assert_eq!(program_name("/usr/bin/SUDO"), "sudo");
    }

    #[test]
    fn test_effective_program_index() {
        let program = |command: &str, peel_sudo: bool| {
            let words = program_words(command);
            effective_program_index(&words, peel_sudo).map(|i| words[i].clone())
        };

        assert_eq!(program("ls -la", false).as_deref(), Some("ls"));
        assert_eq!(program("nice -n 10 rm -rf x", false).as_deref(), Some("rm"));
        assert_eq!(program("env FOO=1 -u BAR time -p rm x", false).as_deref(), Some("rm"));
        assert_eq!(program("nohup /usr/bin/xargs -I {} rm {}", false).as_deref(), Some("rm"));
        assert_eq!(program("sudo -u root rm data.txt", true).as_deref(), Some("rm"));
        assert_eq!(program("sudo -u root rm data.txt", false).as_deref(), Some("sudo"));
        assert_eq!(program("command sudo ls", false).as_deref(), Some("sudo"));
        assert_eq!(program("nice", false).as_deref(), Some("nice"));
        assert_eq!(program("", false), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_fragments_are_trimmed_and_separator_free(
            parts in prop::collection::vec("[a-z]{1,6}( [a-z0-9-]{1,6}){0,3}", 1..6),
            seps in prop::collection::vec(prop::sample::select(vec![" && ", " ; ", " | ", ";", "|"]), 5),
        ) {
            let mut command = String::new();
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    command.push_str(seps[i - 1]);
                }
                command.push_str(part);
            }

            let fragments = split_commands(&command);

            prop_assert_eq!(fragments.len(), parts.len());
            for (fragment, part) in fragments.iter().zip(parts.iter()) {
                prop_assert_eq!(fragment, part);
            }
        }
    }
}
