//! Shell-style word splitting for command strings.
//!
//! Commands are executed without a shell, so `salt * test.ping` must reach
//! the process with a literal `*`. Splitting follows POSIX quoting via
//! [`shlex`].

use crate::error::{OrchestratorError, Result};

/// Splits a command line into words.
///
/// ```
/// use saltmm_orchestrator::words::split;
///
/// let argv = split("salt * cmd.run 'echo hi'").unwrap();
/// assert_eq!(argv, vec!["salt", "*", "cmd.run", "echo hi"]);
/// ```
pub fn split(line: &str) -> Result<Vec<String>> {
    shlex::split(line)
        .ok_or_else(|| OrchestratorError::validation(format!("unbalanced quoting in command: {line}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words() {
        assert_eq!(split("pkill salt-master").unwrap(), vec!["pkill", "salt-master"]);
        assert_eq!(split("  salt-minion   -d ").unwrap(), vec!["salt-minion", "-d"]);
        assert!(split("").unwrap().is_empty());
    }

    #[test]
    fn test_glob_is_literal() {
        assert_eq!(
            split("salt * config.get transport").unwrap(),
            vec!["salt", "*", "config.get", "transport"]
        );
    }

    #[test]
    fn test_quotes() {
        assert_eq!(
            split(r#"sh -c "echo \"hi\" && exit 3""#).unwrap(),
            vec!["sh", "-c", r#"echo "hi" && exit 3"#]
        );
        assert_eq!(split("echo ''").unwrap(), vec!["echo", ""]);
        assert_eq!(split(r"a\ b c").unwrap(), vec!["a b", "c"]);
    }

    #[test]
    fn test_unbalanced_quotes() {
        let err = split("echo 'oops").unwrap_err();
        assert!(err.to_string().contains("unbalanced quoting"));
        assert!(split("echo \"oops").is_err());
    }
}
