//! C6 — Workspace Assembler.
//!
//! Cleans and rebuilds `<cwd>/.jinjaform`, combining every same-named
//! `.tfvars`/`.tf`/other file collected by [`crate::files`] into one
//! workspace file apiece, with `.tf` fragments passing through the
//! Template Renderer (C3) and Configuration Extractor (C4) via the
//! Multi-Template Orchestrator (C5) first.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::config::Paths;
use crate::extractor::{self, ExtractedMetadata};
use crate::files::{self, Collected};
use crate::orchestrator::Orchestrator;
use crate::render::Extensions;
use crate::store::VariableStore;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to collect input files: {0}")]
    Collect(#[from] files::CollectError),

    #[error("failed to prepare workspace: {0}")]
    Io(#[source] std::io::Error),

    #[error("rendering failed:\n{0}")]
    RenderAggregate(String),
}

fn io(err: std::io::Error) -> WorkspaceError {
    WorkspaceError::Io(err)
}

/// Result of a successful `create`: the Extracted Metadata gathered
/// while rendering, plus the environment overrides the child Terraform
/// process must inherit — currently just `TF_PLUGIN_CACHE_DIR`, per the
/// §4.6 prerequisite that the plugin cache directory is exported to the
/// child's environment, not merely created on disk.
pub struct Built {
    pub metadata: Arc<ExtractedMetadata>,
    pub env: HashMap<String, String>,
}

/// Removes every direct child of the workspace directory except
/// `.terraform`. Idempotent: a missing workspace directory is not an
/// error.
pub fn clean(paths: &Paths) -> Result<(), WorkspaceError> {
    let dir = &paths.jinjaform_dir;
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir).map_err(io)? {
        let entry = entry.map_err(io)?;
        if entry.file_name() == ".terraform" {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().map_err(io)?;
        let result = if file_type.is_symlink() || file_type.is_file() {
            fs::remove_file(&path)
        } else {
            fs::remove_dir_all(&path)
        };
        match result {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io(err)),
        }
    }
    Ok(())
}

fn provenance_path(project_root: &Path, source: &Path) -> String {
    source
        .strip_prefix(project_root)
        .unwrap_or(source)
        .display()
        .to_string()
}

fn write_combined(
    out_path: &Path,
    contributions: &[(PathBuf, String)],
    project_root: &Path,
    with_provenance: bool,
) -> Result<(), WorkspaceError> {
    let mut combined = String::new();
    for (source, contents) in contributions {
        if with_provenance {
            combined.push_str(&format!(
                "# jinjaform: {}\n",
                provenance_path(project_root, source)
            ));
        }
        combined.push_str(contents);
        if !contents.ends_with('\n') {
            combined.push('\n');
        }
    }
    fs::write(out_path, combined).map_err(io)
}

/// Parses `tfvars_text` (a single fragment) and returns its top-level
/// `key = value` pairs, best-effort.
fn top_level_tfvars(text: &str) -> HashMap<String, hcl::Value> {
    use hcl::eval::{Context, Evaluate};

    let ctx = Context::new();
    hcl::from_str::<hcl::Body>(text)
        .map(|body| {
            body.into_iter()
                .filter_map(|structure| match structure {
                    hcl::Structure::Attribute(attr) => {
                        attr.expr.evaluate(&ctx).ok().map(|v| (attr.key.to_string(), v))
                    }
                    hcl::Structure::Block(_) => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Creates the workspace directory structure, writes combined variable
/// and "other" files, renders and writes combined template files, and
/// returns the Extracted Metadata gathered along the way.
pub fn create(
    paths: &Paths,
    store: Arc<VariableStore>,
    extensions: Arc<Extensions>,
) -> Result<Built, WorkspaceError> {
    fs::create_dir_all(&paths.jinjaform_dir).map_err(io)?;
    let terraform_dir = &paths.terraform_dir;
    fs::create_dir_all(terraform_dir).map_err(io)?;

    let modules_cache = paths.modules_cache_dir();
    let plugins_cache = paths.plugins_cache_dir();
    fs::create_dir_all(&modules_cache).map_err(io)?;
    fs::create_dir_all(&plugins_cache).map_err(io)?;

    let modules_link = terraform_dir.join("modules");
    if !modules_link.exists() {
        symlink(&modules_cache, &modules_link).map_err(io)?;
    }

    let root_link = paths.jinjaform_dir.join(".root");
    if !root_link.exists() {
        symlink(&paths.project_root, &root_link).map_err(io)?;
    }

    let collected: Collected = files::collect(&paths.cwd, &paths.project_root)?;
    let metadata = Arc::new(ExtractedMetadata::new());

    // §4.6 step 2: combine .tfvars files, feeding terraform.tfvars's
    // resolved top-level keys into the store before any worker starts.
    for (name, sources) in &collected.tfvars {
        let fragments: Vec<(PathBuf, String)> = sources
            .iter()
            .map(|path| fs::read_to_string(path).map(|text| (path.clone(), text)))
            .collect::<Result<_, _>>()
            .map_err(io)?;

        if name == "terraform.tfvars" {
            // Leaf wins: fragments are written leaf-to-root, but
            // set_value calls go root-to-leaf so the leaf fragment's
            // call happens last.
            for (_, contents) in fragments.iter().rev() {
                for (key, value) in top_level_tfvars(contents) {
                    store.set_value(&key, value);
                }
            }
        }

        let out_path = paths.jinjaform_dir.join(name);
        write_combined(&out_path, &fragments, &paths.project_root, true)?;
    }

    // §4.6 step 3/4: register and render every .tf source, then write
    // combined outputs only if every worker succeeded.
    let mut orchestrator = Orchestrator::new();
    let mut templates_by_source: HashMap<PathBuf, String> = HashMap::new();
    for sources in collected.templates.values() {
        for source in sources {
            let relative = provenance_path(&paths.project_root, source);
            orchestrator.register(relative.clone(), source.clone());
            templates_by_source.insert(source.clone(), relative);
        }
    }

    let result = orchestrator.start(Arc::clone(&store), Arc::clone(&metadata), extensions);
    if !result.success() {
        return Err(WorkspaceError::RenderAggregate(result.errors().join("\n")));
    }

    let rendered_by_source: HashMap<String, String> = result
        .outputs
        .into_iter()
        .filter_map(|o| o.rendered.map(|r| (o.source, r)))
        .collect();

    for (name, sources) in &collected.templates {
        let fragments: Vec<(PathBuf, String)> = sources
            .iter()
            .map(|source| {
                let relative = templates_by_source.get(source).cloned().unwrap_or_default();
                let rendered = rendered_by_source.get(&relative).cloned().unwrap_or_default();
                (source.clone(), rendered)
            })
            .collect();
        let out_path = paths.jinjaform_dir.join(name);
        write_combined(&out_path, &fragments, &paths.project_root, true)?;
    }

    // §4.6 step 6: combine "other" files verbatim, no provenance header.
    for (name, sources) in &collected.other {
        let fragments: Vec<(PathBuf, String)> = sources
            .iter()
            .map(|path| fs::read_to_string(path).map(|text| (path.clone(), text)))
            .collect::<Result<_, _>>()
            .map_err(io)?;
        let out_path = paths.jinjaform_dir.join(name);
        write_combined(&out_path, &fragments, &paths.project_root, false)?;
    }

    let mut env = HashMap::new();
    env.insert(
        "TF_PLUGIN_CACHE_DIR".to_string(),
        plugins_cache.display().to_string(),
    );

    Ok(Built { metadata, env })
}
