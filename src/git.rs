//! C8 — Git preflight.
//!
//! Only engaged for `apply`-bearing invocations. Shells out to the
//! system `git` binary for each check the runtime config asked for;
//! a failed check aborts unless `JINJAFORM_GIT_FORCE=1` is set.

use std::env;
use std::process::Command;

use thiserror::Error;

use crate::config::GIT_FORCE_VAR;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to invoke git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("working tree is not clean")]
    NotClean,

    #[error("current branch is {actual}, expected {expected}")]
    WrongBranch { expected: String, actual: String },

    #[error("local branch is not up to date with its remote")]
    RemoteDiverged,
}

fn forced() -> bool {
    env::var(GIT_FORCE_VAR).as_deref() == Ok("1")
}

fn run(args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git").args(args).output().map_err(GitError::Spawn)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn check_clean() -> Result<(), GitError> {
    if forced() {
        return Ok(());
    }
    let status = run(&["status", "--porcelain"])?;
    if status.is_empty() {
        Ok(())
    } else {
        Err(GitError::NotClean)
    }
}

pub fn check_branch(expected: &str) -> Result<(), GitError> {
    if forced() {
        return Ok(());
    }
    let actual = run(&["rev-parse", "--abbrev-ref", "HEAD"])?;
    if actual == expected {
        Ok(())
    } else {
        Err(GitError::WrongBranch {
            expected: expected.to_string(),
            actual,
        })
    }
}

pub fn check_remote() -> Result<(), GitError> {
    if forced() {
        return Ok(());
    }
    Command::new("git")
        .args(["remote", "update"])
        .output()
        .map_err(GitError::Spawn)?;

    let local = run(&["rev-parse", "@"])?;
    let upstream = run(&["rev-parse", "@{u}"])?;
    if local == upstream {
        Ok(())
    } else {
        Err(GitError::RemoteDiverged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_flag_bypasses_every_check() {
        unsafe {
            env::set_var(GIT_FORCE_VAR, "1");
        }
        assert!(check_clean().is_ok());
        assert!(check_branch("does-not-matter").is_ok());
        assert!(check_remote().is_ok());
        unsafe {
            env::remove_var(GIT_FORCE_VAR);
        }
    }
}
