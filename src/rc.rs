//! C7 — Runtime-config driver.
//!
//! Parses `.jinjaformrc`: one directive per non-blank, non-`#`-comment
//! line, grammar `<VERB> [ARG]`. Absent file means a documented default
//! sequence instead of an error, mirroring the original `jinjaform`
//! tool treating no rc file as "just build and run terraform".

use std::fs;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GitCheckClean,
    GitCheckBranch(String),
    GitCheckRemote,
    WorkspaceCreate,
    TerraformRun,
    Run(String),
}

#[derive(Debug, Error)]
pub enum RcError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unrecognized directive on line {line}: {text}")]
    UnknownVerb { line: usize, text: String },

    #[error("GIT_CHECK_BRANCH requires a branch name argument (line {line})")]
    MissingBranchArg { line: usize },

    #[error("WORKSPACE_CREATE must appear exactly once, found {count}")]
    WorkspaceCreateCount { count: usize },

    #[error("TERRAFORM_RUN must appear exactly once, found {count}")]
    TerraformRunCount { count: usize },

    #[error("WORKSPACE_CREATE must precede TERRAFORM_RUN")]
    OutOfOrder,
}

fn default_commands() -> Vec<Command> {
    vec![
        Command::GitCheckClean,
        Command::GitCheckBranch("main".to_string()),
        Command::GitCheckRemote,
        Command::WorkspaceCreate,
        Command::TerraformRun,
    ]
}

/// Reads and validates the command list from `path`, or the default
/// sequence if `path` does not exist.
pub fn load(path: &Path) -> Result<Vec<Command>, RcError> {
    if !path.is_file() {
        return Ok(default_commands());
    }

    let text = fs::read_to_string(path).map_err(|source| RcError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut commands = Vec::new();
    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = index + 1;
        let mut parts = line.splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or("");
        let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

        let command = match verb {
            "GIT_CHECK_CLEAN" => Command::GitCheckClean,
            "GIT_CHECK_BRANCH" => Command::GitCheckBranch(
                arg.ok_or(RcError::MissingBranchArg { line: line_no })?
                    .to_string(),
            ),
            "GIT_CHECK_REMOTE" => Command::GitCheckRemote,
            "WORKSPACE_CREATE" => Command::WorkspaceCreate,
            "TERRAFORM_RUN" => Command::TerraformRun,
            "RUN" => Command::Run(arg.unwrap_or("").to_string()),
            other => {
                return Err(RcError::UnknownVerb {
                    line: line_no,
                    text: other.to_string(),
                })
            }
        };
        commands.push(command);
    }

    validate(&commands)?;
    Ok(commands)
}

fn validate(commands: &[Command]) -> Result<(), RcError> {
    let workspace_count = commands.iter().filter(|c| **c == Command::WorkspaceCreate).count();
    if workspace_count != 1 {
        return Err(RcError::WorkspaceCreateCount { count: workspace_count });
    }
    let terraform_count = commands.iter().filter(|c| **c == Command::TerraformRun).count();
    if terraform_count != 1 {
        return Err(RcError::TerraformRunCount { count: terraform_count });
    }

    let workspace_index = commands.iter().position(|c| *c == Command::WorkspaceCreate).unwrap();
    let terraform_index = commands.iter().position(|c| *c == Command::TerraformRun).unwrap();
    if workspace_index > terraform_index {
        return Err(RcError::OutOfOrder);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_rc_file_yields_default_sequence() {
        let dir = tempdir().unwrap();
        let commands = load(&dir.path().join(".jinjaformrc")).unwrap();
        assert_eq!(commands, default_commands());
    }

    #[test]
    fn parses_verbs_and_comments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".jinjaformrc");
        fs::write(
            &path,
            "# comment\nGIT_CHECK_CLEAN\nGIT_CHECK_BRANCH release\nWORKSPACE_CREATE\nRUN echo hi\nTERRAFORM_RUN\n",
        )
        .unwrap();

        let commands = load(&path).unwrap();
        assert_eq!(
            commands,
            vec![
                Command::GitCheckClean,
                Command::GitCheckBranch("release".to_string()),
                Command::WorkspaceCreate,
                Command::Run("echo hi".to_string()),
                Command::TerraformRun,
            ]
        );
    }

    #[test]
    fn workspace_create_must_precede_terraform_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".jinjaformrc");
        fs::write(&path, "TERRAFORM_RUN\nWORKSPACE_CREATE\n").unwrap();
        assert!(matches!(load(&path), Err(RcError::OutOfOrder)));
    }

    #[test]
    fn duplicate_workspace_create_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".jinjaformrc");
        fs::write(&path, "WORKSPACE_CREATE\nWORKSPACE_CREATE\nTERRAFORM_RUN\n").unwrap();
        assert!(matches!(load(&path), Err(RcError::WorkspaceCreateCount { count: 2 })));
    }

    #[test]
    fn unknown_verb_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".jinjaformrc");
        fs::write(&path, "FROBNICATE\n").unwrap();
        assert!(matches!(load(&path), Err(RcError::UnknownVerb { .. })));
    }
}
