//! C2 — Variable Store.
//!
//! A thread-safe `name -> value` map with a blocking `lookup`, used to
//! resolve `var.*` references across concurrently-rendering templates.
//! One mutex guards all fields; it is never held across a wait. Waiting
//! happens on a one-shot `Event` per outstanding lookup, so the mutex
//! itself never blocks a thread for longer than it takes to inspect or
//! mutate the store's state.
//!
//! Deadlock detection: a worker is *free* if it has no outstanding
//! lookup registered as a waiter. Whenever the set of blocked/free
//! workers can have changed (a new waiter was added, a worker finished,
//! or a waiter detached itself on waking), the store checks whether any
//! worker is still free. If none is, no further `define` can ever
//! happen, so every pending wait is woken (cancelled) rather than left
//! to hang forever.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use hcl::Value;

/// Identifies one renderer worker. Assigned by the orchestrator when it
/// registers a template; stable for the worker's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

/// A one-shot wake signal. Signaling after the waiter has already woken
/// is harmless (`Condvar::notify_all` on an already-true flag is a
/// no-op from the waiter's perspective).
#[derive(Debug, Default)]
struct Event {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl Event {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn signal(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        *signaled = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            signaled = self.condvar.wait(signaled).unwrap();
        }
    }
}

#[derive(Debug, Default, Clone)]
struct VarRecord {
    defined: bool,
    default: Option<Value>,
    value: Option<Value>,
}

impl VarRecord {
    /// `None` means "not yet defined, caller must wait". `Some(Ok(v))`
    /// means resolved. `Some(Err(()))` means defined but neither a
    /// variable-file value nor a default was ever supplied.
    fn try_resolve(&self) -> Option<Result<Value, ()>> {
        if !self.defined {
            return None;
        }
        match self.value.clone().or_else(|| self.default.clone()) {
            Some(v) => Some(Ok(v)),
            None => Some(Err(())),
        }
    }
}

struct Waiter {
    worker: WorkerId,
    event: Arc<Event>,
}

#[derive(Default)]
struct Inner {
    vars: HashMap<String, VarRecord>,
    waiters: HashMap<String, Vec<Waiter>>,
    workers: std::collections::HashSet<WorkerId>,
    blocked: HashMap<WorkerId, String>,
    unresolved: HashMap<WorkerId, String>,
}

impl Inner {
    /// After any state change that could affect which workers are free,
    /// check whether the whole store has deadlocked and if so cancel
    /// every outstanding wait.
    fn check_deadlock(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        let any_free = self.workers.iter().any(|w| !self.blocked.contains_key(w));
        if !any_free {
            for (_, waiters) in self.waiters.drain() {
                for waiter in waiters {
                    waiter.event.signal();
                }
            }
        }
    }
}

#[derive(Default)]
pub struct VariableStore {
    inner: Mutex<Inner>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker as live. Must be called before that worker's
    /// first `lookup` so deadlock detection can account for it.
    pub fn register_worker(&self, worker: WorkerId) {
        self.inner.lock().unwrap().workers.insert(worker);
    }

    /// Records a variable-file-supplied value. Non-blocking; does not
    /// mark the variable as declared.
    pub fn set_value(&self, name: &str, value: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.vars.entry(name.to_string()).or_default().value = Some(value);
    }

    /// Marks a variable as declared, optionally with a default, and
    /// wakes every worker currently waiting on it. Broadcasts even when
    /// `default` is `None`, so a waiter that wakes up for an
    /// undefaulted, valueless variable fails immediately instead of
    /// waiting for `worker_done` to trigger deadlock detection as a
    /// side effect.
    pub fn define(&self, name: &str, default: Option<Value>) {
        let mut inner = self.inner.lock().unwrap();
        {
            let record = inner.vars.entry(name.to_string()).or_default();
            record.defined = true;
            if record.default.is_none() {
                record.default = default;
            }
        }
        if let Some(waiters) = inner.waiters.remove(name) {
            for waiter in waiters {
                waiter.event.signal();
            }
        }
    }

    /// Blocks `worker` until `name` becomes defined or a deadlock is
    /// declared, then resolves it: the variable-file value if set, else
    /// the default if set, else fails naming `name`.
    pub fn lookup(&self, worker: WorkerId, name: &str) -> Result<Value, String> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(resolved) = inner.vars.get(name).and_then(VarRecord::try_resolve) {
            return resolved.map_err(|()| name.to_string());
        }

        let event = Event::new();
        inner
            .waiters
            .entry(name.to_string())
            .or_default()
            .push(Waiter {
                worker,
                event: Arc::clone(&event),
            });
        inner.blocked.insert(worker, name.to_string());
        inner.check_deadlock();
        drop(inner);

        event.wait();

        let mut inner = self.inner.lock().unwrap();
        inner.blocked.remove(&worker);
        if let Some(list) = inner.waiters.get_mut(name) {
            list.retain(|w| w.worker != worker);
            if list.is_empty() {
                inner.waiters.remove(name);
            }
        }
        inner.check_deadlock();

        let resolved = inner.vars.get(name).and_then(VarRecord::try_resolve);
        match resolved {
            Some(Ok(v)) => Ok(v),
            _ => {
                inner.unresolved.insert(worker, name.to_string());
                Err(name.to_string())
            }
        }
    }

    /// Called once by each worker on completion, on every exit path.
    /// Removes it from the live registry and re-checks for deadlock,
    /// since one fewer worker can tip the balance to "no worker free".
    pub fn worker_done(&self, worker: WorkerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.workers.remove(&worker);
        inner.blocked.remove(&worker);
        inner.check_deadlock();
    }

    /// The last variable name `worker` failed to resolve, if any. Used
    /// by the renderer to build a precise `var.<name> cannot be
    /// resolved in <source>` error after an undefined-name render
    /// failure.
    pub fn last_unresolved(&self, worker: WorkerId) -> Option<String> {
        self.inner.lock().unwrap().unresolved.get(&worker).cloned()
    }
}
