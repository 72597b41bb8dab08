use anyhow::Context;
use meltcd_core::apply::SwarmApplier;
use meltcd_core::config::{Config, WarnLevel};
use meltcd_core::credential::{CredentialStore, StaticCredentials};
use meltcd_core::paths;
use meltcd_core::reconcile::Backends;
use meltcd_core::registry::Registry;
use meltcd_core::source::GitFetcher;
use meltcd_core::store::SpecStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub fn run(home: &Path) -> anyhow::Result<()> {
    let config = Config::load(home).context("failed to load config")?;
    for w in config.validate() {
        if w.level == WarnLevel::Warning {
            warn!("config: {}", w.message);
        }
    }
    config.ensure_valid()?;

    let credentials = StaticCredentials::load(&paths::credentials_path(home))
        .context("failed to load credentials")?;
    let fetcher = match &config.git.binary {
        Some(binary) => GitFetcher::new(binary, config.git.timeout()),
        None => GitFetcher::discover(config.git.timeout())?,
    };
    let applier = SwarmApplier::new(
        &config.docker.endpoint,
        config.docker.api_version.as_deref(),
        config.docker.timeout(),
    )?;

    info!(
        home = %home.display(),
        endpoint = %config.docker.endpoint,
        credentials = credentials.len(),
        "starting meltcd"
    );

    let credentials: Arc<dyn CredentialStore> = Arc::new(credentials);
    let registry = Registry::new(Backends {
        fetcher: Arc::new(fetcher),
        applier: Arc::new(applier),
        credentials,
    })
    .with_store(SpecStore::new(paths::applications_path(home)));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let restored = registry
            .restore()
            .await
            .context("failed to load applications")?;
        if restored == 0 {
            warn!("no applications configured; add one with `meltcd apps add`");
        }
        let started = registry.start_all().await;
        info!(started, "reconciliation loops running, press Ctrl-C to stop");

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        info!("shutting down");
        registry.shutdown().await;

        for app in registry.list().await {
            info!(app = %app.name, health = %app.health, live = %app.live_summary(), "final status");
        }
        Ok(())
    })
}
