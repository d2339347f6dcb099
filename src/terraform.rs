//! C9 — IaC exec wrapper.
//!
//! Spawns the configured Terraform binary, forwards its exit status
//! verbatim, and caches `terraform fmt` output in memory keyed by input
//! text (the original tool formats the same generated fragments on
//! every invocation; a cache avoids re-shelling out for identical
//! input).

use std::collections::HashMap;
use std::ffi::OsStr;
use std::process::Command;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerraformError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
}

/// Spawns `binary` with `args` and `env`, waits for it to exit, and
/// returns its exit code. A child killed by a signal is reported as
/// exit code 1, matching the original's catch-all handling of anything
/// other than a normal exit.
pub fn run<I, S, K, V>(binary: &str, args: I, env: &HashMap<K, V>) -> Result<i32, TerraformError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let mut command = Command::new(binary);
    command.args(args);
    command.env_clear();
    for (key, value) in env {
        command.env(key, value);
    }

    let status = command.status().map_err(|source| TerraformError::Spawn {
        binary: binary.to_string(),
        source,
    })?;

    Ok(status.code().unwrap_or(1))
}

/// An in-memory `terraform fmt` cache, keyed by the exact input text.
#[derive(Default)]
pub struct FmtCache {
    entries: Mutex<HashMap<String, String>>,
}

impl FmtCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Formats `source` through `terraform fmt -`, caching the result
    /// so repeated calls with identical text skip the subprocess.
    pub fn fmt(&self, binary: &str, source: &str) -> Result<String, TerraformError> {
        if let Some(cached) = self.entries.lock().unwrap().get(source) {
            return Ok(cached.clone());
        }

        use std::io::Write;
        use std::process::Stdio;

        let mut child = Command::new(binary)
            .args(["fmt", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source_err| TerraformError::Spawn {
                binary: binary.to_string(),
                source: source_err,
            })?;

        if let Some(stdin) = child.stdin.as_mut() {
            let _ = stdin.write_all(source.as_bytes());
        }

        let output = child.wait_with_output().map_err(|source_err| TerraformError::Spawn {
            binary: binary.to_string(),
            source: source_err,
        })?;

        let formatted = if output.status.success() {
            String::from_utf8_lossy(&output.stdout).to_string()
        } else {
            source.to_string()
        };

        self.entries
            .lock()
            .unwrap()
            .insert(source.to_string(), formatted.clone());
        Ok(formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_cache_returns_same_value_without_recomputing() {
        let cache = FmtCache::new();
        // "true" exits 0 but emits nothing on stdout, so the cached
        // entry after a successful run is the empty string; this test
        // only exercises the cache path, not real terraform formatting.
        let first = cache.fmt("/bin/true", "resource \"x\" \"y\" {}\n").unwrap();
        let second = cache.fmt("/bin/true", "resource \"x\" \"y\" {}\n").unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.entries.lock().unwrap().len(), 1);
    }
}
