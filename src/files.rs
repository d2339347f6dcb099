//! C1 — File Collector.
//!
//! Walks from `cwd` up to `project_root`, bucketing every regular,
//! non-hidden file by its lowercased name into one of three disjoint
//! buckets: `.tfvars`, `.tf`, or "other". Each bucket maps a filename to
//! the ordered list of absolute source paths that contributed to it,
//! leaf-to-root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Filename (lowercase) -> absolute source paths, leaf-to-root.
pub type Bucket = BTreeMap<String, Vec<PathBuf>>;

#[derive(Debug, Default)]
pub struct Collected {
    pub tfvars: Bucket,
    pub templates: Bucket,
    pub other: Bucket,
}

/// Walks the ancestor chain from `cwd` up to and including `project_root`,
/// bucketing files by extension. Entries are visited in sorted order
/// within a directory; directories are visited leaf-to-root.
pub fn collect(cwd: &Path, project_root: &Path) -> Result<Collected, CollectError> {
    let mut collected = Collected::default();
    let mut current = cwd.to_path_buf();

    loop {
        let mut names: Vec<String> = fs::read_dir(&current)
            .map_err(|source| CollectError::ReadDir {
                path: current.clone(),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();

        for name in names {
            let lower = name.to_lowercase();
            let source = current.join(&name);
            let bucket = if lower.ends_with(".tfvars") {
                &mut collected.tfvars
            } else if lower.ends_with(".tf") {
                &mut collected.templates
            } else {
                &mut collected.other
            };
            bucket.entry(lower).or_default().push(source);
        }

        if current == project_root {
            break;
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    Ok(collected)
}
