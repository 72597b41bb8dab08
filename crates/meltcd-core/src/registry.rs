//! The set of managed applications and their reconciliation tasks.
//!
//! Mutations of the set take the write lock; status reads take the read lock
//! plus each application's own status lock. The loops never touch the
//! registry lock, so a slow fetch or apply cannot block callers.

use crate::application::{AppStatus, Application, Health, Spec};
use crate::error::{MeltcdError, Result};
use crate::reconcile::{Backends, Reconciler};
use crate::store::SpecStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct Runner {
    stop: watch::Sender<bool>,
    sync: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Runner {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

struct Entry {
    spec: Spec,
    status: Arc<RwLock<AppStatus>>,
    runner: Option<Runner>,
    /// Held by a loop for the length of each tick. A loop restarted while
    /// its predecessor is still applying waits here for its first tick.
    turn: Arc<Mutex<()>>,
}

impl Entry {
    fn new(spec: Spec) -> Self {
        Self {
            spec,
            status: Arc::new(RwLock::new(AppStatus::default())),
            runner: None,
            turn: Arc::new(Mutex::new(())),
        }
    }

    fn is_running(&self) -> bool {
        self.runner.as_ref().is_some_and(Runner::is_running)
    }

    async fn snapshot(&self) -> Application {
        let status = self.status.read().await;
        Application::from_parts(&self.spec, &status, self.is_running())
    }
}

#[derive(Default)]
struct Inner {
    apps: HashMap<String, Entry>,
    /// Loops told to stop that may still be finishing a tick.
    stopping: Vec<JoinHandle<()>>,
}

impl Inner {
    fn retire(&mut self, runner: Runner) {
        let _ = runner.stop.send(true);
        self.stopping.retain(|h| !h.is_finished());
        self.stopping.push(runner.handle);
    }

    fn specs(&self) -> Vec<Spec> {
        self.apps.values().map(|e| e.spec.clone()).collect()
    }
}

pub struct Registry {
    inner: RwLock<Inner>,
    backends: Backends,
    store: Option<SpecStore>,
}

impl Registry {
    pub fn new(backends: Backends) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            backends,
            store: None,
        }
    }

    /// Persist the spec list to `store` on every create, update and delete.
    pub fn with_store(mut self, store: SpecStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a new application. It does not run until [`start`](Self::start).
    pub async fn create(&self, spec: Spec) -> Result<Application> {
        spec.validate()?;
        let mut inner = self.inner.write().await;
        if inner.apps.contains_key(&spec.name) {
            return Err(MeltcdError::DuplicateName(spec.name));
        }

        let mut specs = inner.specs();
        specs.push(spec.clone());
        self.persist(&specs)?;

        info!(app = %spec.name, repo = %spec.source.repo_url, path = %spec.source.path, "application created");
        let entry = Entry::new(spec);
        let app = entry.snapshot().await;
        inner.apps.insert(app.name.clone(), entry);
        Ok(app)
    }

    /// Replace an application's source and refresh interval. Live state is
    /// carried over. A loop that was started and not stopped is restarted
    /// with the new spec, including one that suspended on a bad interval.
    pub async fn update(&self, spec: Spec) -> Result<Application> {
        spec.validate()?;
        let mut inner = self.inner.write().await;
        if !inner.apps.contains_key(&spec.name) {
            return Err(MeltcdError::NotFound(spec.name));
        }

        let specs: Vec<Spec> = inner
            .apps
            .values()
            .map(|e| {
                if e.spec.name == spec.name {
                    spec.clone()
                } else {
                    e.spec.clone()
                }
            })
            .collect();
        self.persist(&specs)?;

        let Some(entry) = inner.apps.get_mut(&spec.name) else {
            return Err(MeltcdError::NotFound(spec.name));
        };
        let previous = entry.status.read().await.clone();
        let status = AppStatus {
            health: Health::Progressing,
            live_state: previous.live_state,
            last_synced_at: previous.last_synced_at,
            last_error: None,
            warnings: previous.warnings,
        };
        entry.spec = spec;
        entry.status = Arc::new(RwLock::new(status));

        let old = entry.runner.take();
        let restart = old.is_some();
        if restart {
            entry.runner = Some(self.spawn(entry));
        }
        let app = entry.snapshot().await;
        if let Some(runner) = old {
            inner.retire(runner);
        }

        info!(app = %app.name, restarted = restart, "application updated");
        Ok(app)
    }

    /// Stop the application's loop (without waiting for it) and forget it.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.apps.contains_key(name) {
            return Err(MeltcdError::NotFound(name.to_string()));
        }

        let specs: Vec<Spec> = inner
            .specs()
            .into_iter()
            .filter(|s| s.name != name)
            .collect();
        self.persist(&specs)?;

        let removed = inner.apps.remove(name);
        if let Some(runner) = removed.and_then(|e| e.runner) {
            inner.retire(runner);
        }
        info!(app = %name, "application deleted");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Application> {
        let inner = self.inner.read().await;
        match inner.apps.get(name) {
            Some(entry) => Ok(entry.snapshot().await),
            None => Err(MeltcdError::NotFound(name.to_string())),
        }
    }

    /// Snapshots of every application, sorted by name.
    pub async fn list(&self) -> Vec<Application> {
        let inner = self.inner.read().await;
        let mut apps = Vec::with_capacity(inner.apps.len());
        for entry in inner.apps.values() {
            apps.push(entry.snapshot().await);
        }
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        apps
    }

    /// Spawn the application's loop. A no-op when it is already running.
    pub async fn start(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.apps.get_mut(name) else {
            return Err(MeltcdError::NotFound(name.to_string()));
        };
        if entry.is_running() {
            return Ok(());
        }
        entry.runner = Some(self.spawn(entry));
        Ok(())
    }

    /// Signal the loop to stop after any in-flight tick. Returns immediately
    /// and is safe to call on an application that is not running.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.apps.get_mut(name) else {
            return Err(MeltcdError::NotFound(name.to_string()));
        };
        let runner = entry.runner.take();
        if let Some(runner) = runner {
            info!(app = %name, "stopping reconciliation loop");
            inner.retire(runner);
        }
        Ok(())
    }

    /// Request an immediate tick. Returns false when the loop is not running.
    pub async fn sync(&self, name: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        let Some(entry) = inner.apps.get(name) else {
            return Err(MeltcdError::NotFound(name.to_string()));
        };
        match &entry.runner {
            Some(runner) if runner.is_running() => {
                runner.sync.notify_one();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Load persisted specs into the registry without starting them.
    /// Invalid or duplicate records are skipped with a warning.
    pub async fn restore(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let specs = store.load()?;
        let mut inner = self.inner.write().await;
        let mut restored = 0;
        for spec in specs {
            if let Err(e) = spec.validate() {
                warn!(app = %spec.name, error = %e, "skipping invalid application record");
                continue;
            }
            if inner.apps.contains_key(&spec.name) {
                warn!(app = %spec.name, "skipping duplicate application record");
                continue;
            }
            inner.apps.insert(spec.name.clone(), Entry::new(spec));
            restored += 1;
        }
        info!(count = restored, path = %store.path().display(), "restored applications");
        Ok(restored)
    }

    /// Start every application that is not already running.
    pub async fn start_all(&self) -> usize {
        let mut inner = self.inner.write().await;
        let mut started = 0;
        for entry in inner.apps.values_mut() {
            if !entry.is_running() {
                entry.runner = Some(self.spawn(entry));
                started += 1;
            }
        }
        started
    }

    /// Stop every loop and wait for in-flight ticks to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.write().await;
            let runners: Vec<Runner> = inner
                .apps
                .values_mut()
                .filter_map(|e| e.runner.take())
                .collect();
            for runner in runners {
                inner.retire(runner);
            }
            std::mem::take(&mut inner.stopping)
        };

        info!(loops = handles.len(), "waiting for reconciliation loops to stop");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "reconciliation loop panicked");
            }
        }
    }

    fn spawn(&self, entry: &Entry) -> Runner {
        let (stop, stop_rx) = watch::channel(false);
        let sync = Arc::new(Notify::new());
        let reconciler = Reconciler::new(&entry.spec, self.backends.clone(), entry.status.clone())
            .with_turn(entry.turn.clone());
        let handle = tokio::spawn(reconciler.run(stop_rx, sync.clone()));
        Runner { stop, sync, handle }
    }

    fn persist(&self, specs: &[Spec]) -> Result<()> {
        match &self.store {
            Some(store) => store.save(specs),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
