//! Resolves the handful of paths every other module needs: the current
//! working directory, the project root (nearest ancestor holding a
//! `.jinjaformrc`), and the workspace/cache directories derived from them.
//!
//! Mirrors `jinjaform/config.py` from the original tool, but as an
//! explicit struct instead of module-level process state.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const RC_FILENAME: &str = ".jinjaformrc";
pub const WORKSPACE_DIRNAME: &str = ".jinjaform";
pub const TERRAFORM_STATE_DIRNAME: &str = ".terraform";
pub const TERRAFORM_BIN_VAR: &str = "JINJAFORM_TERRAFORM_BIN";
pub const GIT_FORCE_VAR: &str = "JINJAFORM_GIT_FORCE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JINJAFORM_TERRAFORM_BIN environment variable missing")]
    MissingTerraformBin,

    #[error("not in deployment target directory, aborting")]
    NotInDeploymentTarget,

    #[error("failed to resolve current directory: {0}")]
    Cwd(#[source] std::io::Error),
}

/// All paths a workspace build needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Paths {
    pub cwd: PathBuf,
    pub project_root: PathBuf,
    pub jinjaform_dir: PathBuf,
    pub jinjaform_root: PathBuf,
    pub terraform_dir: PathBuf,
    pub terraform_bin: String,
}

impl Paths {
    /// Resolves `cwd`, walks upward for `.jinjaformrc` to find the project
    /// root, and derives the workspace/cache directories from both.
    ///
    /// Fails if `cwd` is not strictly inside a project root (the project
    /// root itself, or any directory with no `.jinjaformrc` ancestor, is
    /// not a deployment target).
    pub fn discover() -> Result<Self, ConfigError> {
        let cwd = env::current_dir().map_err(ConfigError::Cwd)?;
        let project_root = find_project_root(&cwd).ok_or(ConfigError::NotInDeploymentTarget)?;
        if project_root == cwd {
            return Err(ConfigError::NotInDeploymentTarget);
        }

        let terraform_bin =
            env::var(TERRAFORM_BIN_VAR).map_err(|_| ConfigError::MissingTerraformBin)?;

        let jinjaform_dir = cwd.join(WORKSPACE_DIRNAME);
        let jinjaform_root = project_root.join(WORKSPACE_DIRNAME);
        let terraform_dir = jinjaform_dir.join(TERRAFORM_STATE_DIRNAME);

        Ok(Self {
            cwd,
            project_root,
            jinjaform_dir,
            jinjaform_root,
            terraform_dir,
            terraform_bin,
        })
    }

    pub fn modules_cache_dir(&self) -> PathBuf {
        self.jinjaform_root.join("modules")
    }

    pub fn plugins_cache_dir(&self) -> PathBuf {
        self.jinjaform_root.join("plugins")
    }

    pub fn jinja_extensions_dir(&self) -> PathBuf {
        self.project_root.join(".jinja")
    }

    pub fn rc_path(&self) -> PathBuf {
        self.project_root.join(RC_FILENAME)
    }

    /// The environment a child process (the IaC binary) should inherit:
    /// the parent's own environment plus whatever overrides were derived
    /// during workspace assembly (plugin cache dir, AWS credentials, ...).
    pub fn child_env(&self, overrides: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = env::vars().collect();
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

/// Walks from `start` upward looking for a directory containing
/// `.jinjaformrc`. Returns `None` if no ancestor has one.
fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut current = start;
    loop {
        if current.join(RC_FILENAME).is_file() {
            return Some(current.to_path_buf());
        }
        current = current.parent()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn finds_project_root_several_levels_up() {
        let root = tempdir().unwrap();
        fs::write(root.path().join(RC_FILENAME), "").unwrap();
        let leaf = root.path().join("env").join("dev");
        fs::create_dir_all(&leaf).unwrap();

        let found = find_project_root(&leaf).unwrap();
        assert_eq!(found, root.path());
    }

    #[test]
    fn no_rc_file_means_no_project_root() {
        let root = tempdir().unwrap();
        assert!(find_project_root(root.path()).is_none());
    }

    #[test]
    fn stops_at_nearest_ancestor() {
        let root = tempdir().unwrap();
        fs::write(root.path().join(RC_FILENAME), "").unwrap();
        let nested = root.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join(RC_FILENAME), "").unwrap();

        let found = find_project_root(&nested).unwrap();
        assert_eq!(found, nested);
    }
}
