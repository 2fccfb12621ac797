//! Shell completions generation.

use clap::CommandFactory;
use clap_complete::Shell;

use crate::cli::args::Cli;
use crate::error::SyncError;

/// Generate the completion script for `shell`.
///
/// # Errors
///
/// Returns an error if the generated script is not valid UTF-8.
pub fn completions(shell: Shell) -> Result<String, SyncError> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    let mut buf = Vec::new();
    clap_complete::generate(shell, &mut cmd, name, &mut buf);
    String::from_utf8(buf)
        .map_err(|e| SyncError::Config(format!("Completion script is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_completions_mention_commands() {
        let script = completions(Shell::Bash).unwrap();
        assert!(script.contains("portal-sync"));
        assert!(script.contains("enqueue"));
        assert!(script.contains("daemon"));
    }
}
