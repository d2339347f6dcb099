//! C3 — Template Renderer.
//!
//! Renders a single source template through a `minijinja::Environment`
//! configured with strict-undefined semantics, backing `var.*` lookups
//! onto a worker's handle into the shared `VariableStore`. Extension
//! scripts under `.jinja/{filters,tests,context}` are compiled once by
//! the caller (see [`Extensions::load`]) and registered into each
//! worker's own environment, since `minijinja::Environment` is not
//! `Sync` across threads holding distinct `var` bindings.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minijinja::value::{Object, Value as MjValue};
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use rhai::{Engine, Scope, AST};
use thiserror::Error;

use crate::store::{VariableStore, WorkerId};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("var.{name} cannot be resolved in {source}")]
    UnresolvedVariable { name: String, source: String },

    #[error("failed to render {source}: {message}")]
    Template { source: String, message: String },
}

/// Binds one worker's lookups to the shared store. Every `var.<name>`
/// access in a template becomes `VariableStore::lookup(worker, name)`.
#[derive(Debug)]
struct VarProxy {
    store: Arc<VariableStore>,
    worker: WorkerId,
}

impl fmt::Display for VarProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var")
    }
}

impl Object for VarProxy {
    fn get_value(self: &Arc<Self>, key: &MjValue) -> Option<MjValue> {
        let name = key.as_str()?;
        match self.store.lookup(self.worker, name) {
            Ok(value) => Some(hcl_to_minijinja(&value)),
            Err(_) => None,
        }
    }
}

fn hcl_to_minijinja(value: &hcl::Value) -> MjValue {
    match value {
        hcl::Value::Null => MjValue::from(()),
        hcl::Value::Bool(b) => MjValue::from(*b),
        hcl::Value::Number(n) => n
            .as_f64()
            .map(MjValue::from)
            .unwrap_or_else(|| MjValue::from(n.to_string())),
        hcl::Value::String(s) => MjValue::from(s.as_str()),
        hcl::Value::Array(items) => {
            MjValue::from(items.iter().map(hcl_to_minijinja).collect::<Vec<_>>())
        }
        hcl::Value::Object(map) => {
            let entries: Vec<(String, MjValue)> = map
                .iter()
                .map(|(k, v)| (k.clone(), hcl_to_minijinja(v)))
                .collect();
            MjValue::from_iter(entries)
        }
    }
}

/// Compiled `.jinja/{filters,tests,context}` scripts, loaded once per
/// workspace build and shared (read-only) across every worker.
#[derive(Default)]
pub struct Extensions {
    filters: HashMap<String, (Arc<Engine>, Arc<AST>)>,
    tests: HashMap<String, (Arc<Engine>, Arc<AST>)>,
    context_functions: HashMap<String, (Arc<Engine>, Arc<AST>)>,
    context_values: HashMap<String, rhai::Dynamic>,
}

impl Extensions {
    /// Compiles every `.rhai` script under `root/.jinja/{filters,tests,context}`.
    /// A missing directory is not an error; templates simply render
    /// without that category of extension.
    pub fn load(root: &Path) -> Result<Self, RenderError> {
        let mut extensions = Extensions::default();
        extensions.load_category(&root.join("filters"), Category::Filter)?;
        extensions.load_category(&root.join("tests"), Category::Test)?;
        extensions.load_context(&root.join("context"))?;
        Ok(extensions)
    }

    fn load_category(&mut self, dir: &Path, category: Category) -> Result<(), RenderError> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in read_rhai_scripts(dir)? {
            let engine = Arc::new(Engine::new());
            let source = fs::read_to_string(&entry).map_err(|source| RenderError::Read {
                path: entry.clone(),
                source,
            })?;
            let ast = engine.compile(&source).map_err(|err| RenderError::Template {
                source: entry.display().to_string(),
                message: err.to_string(),
            })?;
            let ast = Arc::new(ast);
            for name in ast.iter_functions().map(|f| f.name.to_string()) {
                let slot = (Arc::clone(&engine), Arc::clone(&ast));
                match category {
                    Category::Filter => self.filters.insert(name, slot),
                    Category::Test => self.tests.insert(name, slot),
                };
            }
        }
        Ok(())
    }

    fn load_context(&mut self, dir: &Path) -> Result<(), RenderError> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in read_rhai_scripts(dir)? {
            let engine = Engine::new();
            let source = fs::read_to_string(&entry).map_err(|source| RenderError::Read {
                path: entry.clone(),
                source,
            })?;
            let ast = engine.compile(&source).map_err(|err| RenderError::Template {
                source: entry.display().to_string(),
                message: err.to_string(),
            })?;
            let mut scope = Scope::new();
            let engine = Arc::new(engine);
            let functions: Vec<String> = ast.iter_functions().map(|f| f.name.to_string()).collect();
            let ast = Arc::new(ast);
            // Evaluating the AST against a fresh scope runs its top-level
            // statements, which is how a context script publishes plain
            // variables (as opposed to functions) for templates to read.
            if engine.eval_ast_with_scope::<rhai::Dynamic>(&mut scope, &ast).is_ok() {
                for (name, _, value) in scope.iter() {
                    self.context_values.insert(name.to_string(), value.clone());
                }
            }
            for name in functions {
                self.context_functions
                    .insert(name, (Arc::clone(&engine), Arc::clone(&ast)));
            }
        }
        Ok(())
    }
}

enum Category {
    Filter,
    Test,
}

fn read_rhai_scripts(dir: &Path) -> Result<Vec<PathBuf>, RenderError> {
    let mut scripts: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| RenderError::Read {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("rhai"))
        .collect();
    scripts.sort();
    Ok(scripts)
}

fn call_rhai(engine: &Engine, ast: &AST, name: &str, args: Vec<rhai::Dynamic>) -> Result<rhai::Dynamic, String> {
    let mut scope = Scope::new();
    engine
        .call_fn(&mut scope, ast, name, args)
        .map_err(|err| err.to_string())
}

fn rhai_to_minijinja(value: rhai::Dynamic) -> MjValue {
    if let Some(b) = value.clone().try_cast::<bool>() {
        return MjValue::from(b);
    }
    if let Some(i) = value.clone().try_cast::<i64>() {
        return MjValue::from(i);
    }
    if let Some(f) = value.clone().try_cast::<f64>() {
        return MjValue::from(f);
    }
    if let Some(s) = value.clone().try_cast::<String>() {
        return MjValue::from(s);
    }
    MjValue::from(value.to_string())
}

fn minijinja_to_rhai(value: &MjValue) -> rhai::Dynamic {
    if value.is_none() {
        return rhai::Dynamic::UNIT;
    }
    if let Ok(b) = bool::try_from(value.clone()) {
        return rhai::Dynamic::from(b);
    }
    if let Ok(i) = i64::try_from(value.clone()) {
        return rhai::Dynamic::from(i);
    }
    if let Ok(f) = f64::try_from(value.clone()) {
        return rhai::Dynamic::from(f);
    }
    if let Some(s) = value.as_str() {
        return rhai::Dynamic::from(s.to_string());
    }
    rhai::Dynamic::from(value.to_string())
}

/// Builds the per-worker environment and renders `source` at `path`.
/// `source` is only used for error messages (the original relative or
/// absolute path, whichever the caller wants reported).
pub fn render(
    store: Arc<VariableStore>,
    worker: WorkerId,
    extensions: &Extensions,
    path: &Path,
    source: &str,
) -> Result<String, RenderError> {
    let text = fs::read_to_string(path).map_err(|err| RenderError::Read {
        path: path.to_path_buf(),
        source: err,
    })?;

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    // §4.3 requires trailing-newline preservation; minijinja's default
    // strips a template's final newline the way jinja2 does.
    env.set_keep_trailing_newline(true);

    for (name, (engine, ast)) in &extensions.filters {
        let engine = Arc::clone(engine);
        let ast = Arc::clone(ast);
        let name = name.clone();
        env.add_filter(name.clone(), move |value: MjValue| -> Result<MjValue, minijinja::Error> {
            let args = vec![minijinja_to_rhai(&value)];
            call_rhai(&engine, &ast, &name, args)
                .map(rhai_to_minijinja)
                .map_err(|message| minijinja::Error::new(ErrorKind::InvalidOperation, message))
        });
    }

    for (name, (engine, ast)) in &extensions.tests {
        let engine = Arc::clone(engine);
        let ast = Arc::clone(ast);
        let name_owned = name.clone();
        env.add_test(name.clone(), move |value: MjValue| -> bool {
            let args = vec![minijinja_to_rhai(&value)];
            call_rhai(&engine, &ast, &name_owned, args)
                .map(|v| v.cast::<bool>())
                .unwrap_or(false)
        });
    }

    for (name, (engine, ast)) in &extensions.context_functions {
        let engine = Arc::clone(engine);
        let ast = Arc::clone(ast);
        let name_owned = name.clone();
        env.add_function(name.clone(), move |args: Vec<MjValue>| -> Result<MjValue, minijinja::Error> {
            let rhai_args = args.iter().map(minijinja_to_rhai).collect();
            call_rhai(&engine, &ast, &name_owned, rhai_args)
                .map(rhai_to_minijinja)
                .map_err(|message| minijinja::Error::new(ErrorKind::InvalidOperation, message))
        });
    }

    // Rendering context: process environment variables plus `var`,
    // mirroring the teacher's own `HashMap<String, Value>` context
    // built up before `tmpl.render(ctx)` in its main rendering path.
    let mut ctx: HashMap<String, MjValue> = env::vars()
        .map(|(key, value)| (key, MjValue::from(value)))
        .collect();

    for (name, value) in &extensions.context_values {
        ctx.insert(name.clone(), rhai_to_minijinja(value.clone()));
    }

    let proxy = MjValue::from_object(VarProxy {
        store: Arc::clone(&store),
        worker,
    });
    ctx.insert("var".to_string(), proxy);

    let template_name = "__jinjaform_template__";
    env.add_template(template_name, &text)
        .map_err(|err| RenderError::Template {
            source: source.to_string(),
            message: err.to_string(),
        })?;

    let tmpl = env
        .get_template(template_name)
        .map_err(|err| RenderError::Template {
            source: source.to_string(),
            message: err.to_string(),
        })?;

    match tmpl.render(&ctx) {
        Ok(rendered) => Ok(rendered),
        Err(err) => {
            if matches!(err.kind(), ErrorKind::UndefinedError) {
                let name = store
                    .last_unresolved(worker)
                    .unwrap_or_else(|| "?".to_string());
                Err(RenderError::UnresolvedVariable {
                    name,
                    source: source.to_string(),
                })
            } else {
                Err(RenderError::Template {
                    source: source.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn renders_plain_template_without_variables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.tf");
        fs::write(&path, "resource \"null_resource\" \"x\" {}\n").unwrap();

        let store = Arc::new(VariableStore::new());
        let worker = WorkerId(0);
        store.register_worker(worker);
        let extensions = Extensions::default();

        let rendered = render(store, worker, &extensions, &path, "main.tf").unwrap();
        assert_eq!(rendered, "resource \"null_resource\" \"x\" {}\n");
    }

    #[test]
    fn resolves_var_lookup_against_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.tf");
        fs::write(&path, "region = \"{{ var.region }}\"\n").unwrap();

        let store = Arc::new(VariableStore::new());
        let worker = WorkerId(0);
        store.register_worker(worker);
        store.define("region", Some(hcl::Value::String("eu-west-1".into())));
        let extensions = Extensions::default();

        let rendered = render(store, worker, &extensions, &path, "main.tf").unwrap();
        assert_eq!(rendered, "region = \"eu-west-1\"\n");
    }

    #[test]
    fn unresolved_variable_produces_precise_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.tf");
        fs::write(&path, "region = \"{{ var.region }}\"\n").unwrap();

        let store = Arc::new(VariableStore::new());
        let worker = WorkerId(0);
        store.register_worker(worker);
        let extensions = Extensions::default();

        let err = render(store, worker, &extensions, &path, "env/dev/main.tf").unwrap_err();
        match err {
            RenderError::UnresolvedVariable { name, source } => {
                assert_eq!(name, "region");
                assert_eq!(source, "env/dev/main.tf");
            }
            other => panic!("expected UnresolvedVariable, got {other:?}"),
        }
    }

    #[test]
    fn missing_jinja_extension_directories_are_not_fatal() {
        let dir = tempdir().unwrap();
        let extensions = Extensions::load(&dir.path().join(".jinja")).unwrap();
        assert!(extensions.filters.is_empty());
        assert!(extensions.tests.is_empty());
    }
}
