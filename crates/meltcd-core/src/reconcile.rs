//! Per-application reconciliation loop.
//!
//! States: `Progressing` (initial, or apply in flight) → `Healthy` | `Degraded`,
//! re-entered freely on every tick. `Suspended` is terminal and only reached
//! when the refresh interval cannot be parsed.
//!
//! Each tick: fetch → parse → compare with live state → apply on drift.
//! Failures are logged and surface only through [`AppStatus`]; nothing is
//! returned to the caller of [`Reconciler::run`]. A failed tick is retried on
//! the next one, with no backoff.

use crate::apply::Applier;
use crate::application::{AppStatus, Health, Source, Spec};
use crate::credential::CredentialStore;
use crate::duration::{format_interval, parse_refresh_interval};
use crate::error::{MeltcdError, Result};
use crate::manifest;
use crate::source::SourceFetcher;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// The collaborators every loop talks to. Cheap to clone; shared by all
/// applications of a registry.
#[derive(Clone)]
pub struct Backends {
    pub fetcher: Arc<dyn SourceFetcher>,
    pub applier: Arc<dyn Applier>,
    pub credentials: Arc<dyn CredentialStore>,
}

/// Result of a single tick, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    InSync,
    Applied { services: usize, warnings: Vec<String> },
    FetchFailed(String),
    ParseFailed(String),
    ApplyFailed(String),
    /// The refresh interval is invalid; nothing was fetched.
    Suspended,
}

pub struct Reconciler {
    name: String,
    source: Source,
    interval: Result<Duration>,
    backends: Backends,
    status: Arc<RwLock<AppStatus>>,
    turn: Arc<Mutex<()>>,
}

impl Reconciler {
    /// The refresh interval is parsed here; a bad value makes [`run`](Self::run)
    /// suspend the application instead of ticking.
    pub fn new(spec: &Spec, backends: Backends, status: Arc<RwLock<AppStatus>>) -> Self {
        Self {
            name: spec.name.clone(),
            source: spec.source.clone(),
            interval: parse_refresh_interval(&spec.refresh_timer),
            backends,
            status,
            turn: Arc::new(Mutex::new(())),
        }
    }

    /// Share the lock a tick holds from fetch to health update. Loops of
    /// the same application that overlap during a restart take turns on it.
    pub fn with_turn(mut self, turn: Arc<Mutex<()>>) -> Self {
        self.turn = turn;
        self
    }

    /// Tick every refresh interval until `stop` flips to true or its sender
    /// is dropped. The first tick fires immediately. `sync` forces an
    /// immediate tick and restarts the interval.
    ///
    /// Stop is only observed between ticks: an in-flight fetch or apply
    /// always runs to completion.
    pub async fn run(self, mut stop: watch::Receiver<bool>, sync: Arc<Notify>) {
        let interval = match &self.interval {
            Ok(interval) => *interval,
            Err(e) => {
                error!(app = %self.name, kind = e.kind(), error = %e, "suspending application");
                self.fail(e).await;
                return;
            }
        };

        info!(app = %self.name, repo = %self.source.repo_url, interval = %format_interval(interval), "reconciliation loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
                _ = sync.notified() => {
                    debug!(app = %self.name, "sync requested");
                    ticker.reset();
                }
                _ = ticker.tick() => {}
            }

            let outcome = {
                let _turn = self.turn.lock().await;
                self.tick().await
            };
            debug!(app = %self.name, outcome = ?outcome, "tick finished");
        }

        info!(app = %self.name, "reconciliation loop stopped");
    }

    /// Run one fetch → parse → compare → apply cycle.
    pub async fn tick(&self) -> TickOutcome {
        if self.interval.is_err() {
            return TickOutcome::Suspended;
        }

        let credential = self
            .backends
            .credentials
            .find_credential(self.source.credential_key());

        let raw = match self
            .backends
            .fetcher
            .fetch(&self.source, credential.as_ref())
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(app = %self.name, repo = %self.source.repo_url, kind = e.kind(), error = %e, "failed to fetch manifest");
                self.fail(&e).await;
                return TickOutcome::FetchFailed(e.to_string());
            }
        };

        let target = match manifest::parse(&self.name, &raw) {
            Ok(defs) => defs,
            Err(e) => {
                warn!(app = %self.name, path = %self.source.path, kind = e.kind(), error = %e, "failed to parse manifest");
                self.fail(&e).await;
                return TickOutcome::ParseFailed(e.to_string());
            }
        };

        {
            let mut status = self.status.write().await;
            if status.live_state.as_deref() == Some(target.as_slice()) {
                self.transition(&mut status, Health::Healthy);
                status.last_error = None;
                status.last_synced_at = Some(Utc::now());
                return TickOutcome::InSync;
            }
            info!(app = %self.name, services = target.len(), "live state out of sync, applying");
            self.transition(&mut status, Health::Progressing);
        }

        // The status lock is released while the backend works so readers
        // can observe `Progressing`.
        match self.backends.applier.apply(&target).await {
            Ok(report) => {
                let mut status = self.status.write().await;
                let services = target.len();
                status.live_state = Some(target);
                status.warnings = report.warnings.clone();
                status.last_error = None;
                status.last_synced_at = Some(Utc::now());
                self.transition(&mut status, Health::Healthy);
                info!(app = %self.name, services, "applied new target state");
                TickOutcome::Applied {
                    services,
                    warnings: report.warnings,
                }
            }
            Err(e) => {
                error!(app = %self.name, kind = e.kind(), error = %e, "apply failed, will retry on next tick");
                self.fail(&e).await;
                TickOutcome::ApplyFailed(e.to_string())
            }
        }
    }

    /// Fatal errors suspend the application; everything else degrades it
    /// until the next tick.
    async fn fail(&self, e: &MeltcdError) {
        let to = if e.is_fatal() {
            Health::Suspended
        } else {
            Health::Degraded
        };
        let mut status = self.status.write().await;
        self.transition(&mut status, to);
        status.last_error = Some(e.to_string());
    }

    fn transition(&self, status: &mut AppStatus, to: Health) {
        if status.health != to {
            info!(app = %self.name, from = %status.health, to = %to, "health changed");
            status.health = to;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
