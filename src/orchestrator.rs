//! C5 — Multi-Template Orchestrator.
//!
//! Spawns one OS thread per registered template, lets them all run to
//! completion independently (a sibling's failure never short-circuits
//! the others), and aggregates results purely from each thread's
//! `JoinHandle`. The only cross-thread coordination happens inside the
//! shared `VariableStore` and `ExtractedMetadata`; the orchestrator
//! itself holds no mutex.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crate::extractor::{self, ExtractedMetadata};
use crate::render::{self, Extensions};
use crate::store::{VariableStore, WorkerId};

pub struct Registered {
    pub source: String,
    pub path: PathBuf,
}

/// Collects registrations before `start()` spawns their workers.
#[derive(Default)]
pub struct Orchestrator {
    registered: Vec<Registered>,
}

pub struct WorkerOutcome {
    pub source: String,
    pub rendered: Option<String>,
    pub error: Option<String>,
}

pub struct RunResult {
    pub outputs: Vec<WorkerOutcome>,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.outputs.iter().all(|o| o.error.is_none())
    }

    pub fn errors(&self) -> Vec<String> {
        self.outputs
            .iter()
            .filter_map(|o| o.error.clone())
            .collect()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a template to render. Does not start it.
    pub fn register(&mut self, source: impl Into<String>, path: PathBuf) {
        self.registered.push(Registered {
            source: source.into(),
            path,
        });
    }

    /// Spawns every registered worker, waits for all of them, and
    /// returns the aggregated rendered output and error list. Every
    /// worker is joined regardless of whether earlier ones failed.
    pub fn start(
        self,
        store: Arc<VariableStore>,
        metadata: Arc<ExtractedMetadata>,
        extensions: Arc<Extensions>,
    ) -> RunResult {
        for (index, _) in self.registered.iter().enumerate() {
            store.register_worker(WorkerId(index));
        }

        let handles: Vec<_> = self
            .registered
            .into_iter()
            .enumerate()
            .map(|(index, registered)| {
                let store = Arc::clone(&store);
                let metadata = Arc::clone(&metadata);
                let extensions = Arc::clone(&extensions);
                thread::spawn(move || run_worker(index, registered, store, metadata, extensions))
            })
            .collect();

        let outputs = handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|_| WorkerOutcome {
                source: "<unknown>".to_string(),
                rendered: None,
                error: Some("worker thread panicked".to_string()),
            }))
            .collect();

        RunResult { outputs }
    }
}

fn run_worker(
    index: usize,
    registered: Registered,
    store: Arc<VariableStore>,
    metadata: Arc<ExtractedMetadata>,
    extensions: Arc<Extensions>,
) -> WorkerOutcome {
    let worker = WorkerId(index);
    let guard = WorkerDoneGuard {
        store: Arc::clone(&store),
        worker,
    };

    let result = render::render(
        Arc::clone(&store),
        worker,
        &extensions,
        &registered.path,
        &registered.source,
    );

    let outcome = match result {
        Ok(rendered) => match extractor::extract(&rendered, &store, worker, &metadata) {
            Ok(()) => WorkerOutcome {
                source: registered.source,
                rendered: Some(rendered),
                error: None,
            },
            Err(err) => WorkerOutcome {
                source: registered.source,
                rendered: None,
                error: Some(err.to_string()),
            },
        },
        Err(err) => WorkerOutcome {
            source: registered.source,
            rendered: None,
            error: Some(err.to_string()),
        },
    };

    drop(guard);
    outcome
}

/// Guarantees `VariableStore::worker_done` runs on every exit path out
/// of `run_worker`, including an early return inside a future refactor.
struct WorkerDoneGuard {
    store: Arc<VariableStore>,
    worker: WorkerId,
}

impl Drop for WorkerDoneGuard {
    fn drop(&mut self) {
        self.store.worker_done(self.worker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &std::path::Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn all_templates_render_when_independent() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.tf", "a = 1\n");
        let b = write(dir.path(), "b.tf", "b = 2\n");

        let mut orchestrator = Orchestrator::new();
        orchestrator.register("a.tf", a);
        orchestrator.register("b.tf", b);

        let store = Arc::new(VariableStore::new());
        let metadata = Arc::new(ExtractedMetadata::new());
        let extensions = Arc::new(Extensions::default());

        let result = orchestrator.start(store, metadata, extensions);
        assert!(result.success());
        assert_eq!(result.outputs.len(), 2);
    }

    #[test]
    fn cross_template_variable_dependency_resolves() {
        let dir = tempdir().unwrap();
        let definer = write(dir.path(), "vars.tf", "variable \"region\" { default = \"eu-west-1\" }\n");
        let consumer = write(dir.path(), "main.tf", "region = \"{{ var.region }}\"\n");

        let mut orchestrator = Orchestrator::new();
        orchestrator.register("vars.tf", definer);
        orchestrator.register("main.tf", consumer);

        let store = Arc::new(VariableStore::new());
        let metadata = Arc::new(ExtractedMetadata::new());
        let extensions = Arc::new(Extensions::default());

        let result = orchestrator.start(store, metadata, extensions);
        assert!(result.success());
        let rendered: Vec<_> = result
            .outputs
            .iter()
            .filter_map(|o| o.rendered.as_deref())
            .collect();
        assert!(rendered.iter().any(|r| r.contains("eu-west-1")));
    }

    #[test]
    fn mutual_dependency_deadlocks_and_both_fail() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.tf", "a = \"{{ var.b }}\"\n");
        let b = write(dir.path(), "b.tf", "b = \"{{ var.a }}\"\n");

        let mut orchestrator = Orchestrator::new();
        orchestrator.register("a.tf", a);
        orchestrator.register("b.tf", b);

        let store = Arc::new(VariableStore::new());
        let metadata = Arc::new(ExtractedMetadata::new());
        let extensions = Arc::new(Extensions::default());

        let result = orchestrator.start(store, metadata, extensions);
        assert!(!result.success());
        assert_eq!(result.errors().len(), 2);
    }
}
