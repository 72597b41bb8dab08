use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use meltcd_core::application::{Source, Spec, DEFAULT_REFRESH_TIMER};
use meltcd_core::duration::parse_refresh_interval;
use meltcd_core::paths;
use meltcd_core::store::SpecStore;
use meltcd_core::MeltcdError;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum AppsSubcommand {
    /// List persisted applications
    List,

    /// Register a new application
    Add {
        /// Unique application name
        name: String,
        /// Git repository URL
        #[arg(long)]
        repo: String,
        /// Manifest path relative to the repository root
        #[arg(long)]
        path: String,
        /// Branch, tag or commit (default: the remote's default branch)
        #[arg(long)]
        revision: Option<String>,
        /// URL to look up credentials by, when it differs from --repo
        #[arg(long)]
        credential: Option<String>,
        /// How often to reconcile, e.g. 30s, 3m, 1h30m
        #[arg(long, default_value = DEFAULT_REFRESH_TIMER)]
        refresh: String,
    },

    /// Remove an application record
    Remove { name: String },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(home: &Path, subcmd: AppsSubcommand, json: bool) -> anyhow::Result<()> {
    let store = SpecStore::new(paths::applications_path(home));
    match subcmd {
        AppsSubcommand::List => list(&store, json),
        AppsSubcommand::Add {
            name,
            repo,
            path,
            revision,
            credential,
            refresh,
        } => {
            let mut source = Source::new(repo, path);
            source.target_revision = revision.unwrap_or_default();
            source.credential = credential;
            add(&store, Spec::new(name, source).with_refresh_timer(refresh), json)
        }
        AppsSubcommand::Remove { name } => remove(&store, &name),
    }
}

// ---------------------------------------------------------------------------
// list / add / remove
// ---------------------------------------------------------------------------

fn load(store: &SpecStore) -> anyhow::Result<Vec<Spec>> {
    store
        .load()
        .with_context(|| format!("failed to read {}", store.path().display()))
}

fn list(store: &SpecStore, json: bool) -> anyhow::Result<()> {
    let mut specs = load(store)?;
    specs.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        return print_json(&specs);
    }
    if specs.is_empty() {
        println!("No applications.");
        return Ok(());
    }

    let rows = specs
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.source.repo_url.clone(),
                s.source.path.clone(),
                or_dash(&s.source.target_revision),
                s.refresh_timer.clone(),
            ]
        })
        .collect();
    print_table(&["NAME", "REPO", "PATH", "REVISION", "REFRESH"], rows);
    Ok(())
}

fn add(store: &SpecStore, spec: Spec, json: bool) -> anyhow::Result<()> {
    spec.validate()?;
    let mut specs = load(store)?;
    if specs.iter().any(|s| s.name == spec.name) {
        return Err(MeltcdError::DuplicateName(spec.name).into());
    }
    if let Err(e) = parse_refresh_interval(&spec.refresh_timer) {
        eprintln!("warning: {e}; the application will be suspended when started");
    }

    specs.push(spec.clone());
    store.save(&specs)?;

    if json {
        print_json(&spec)
    } else {
        println!("Added application '{}'.", spec.name);
        Ok(())
    }
}

fn remove(store: &SpecStore, name: &str) -> anyhow::Result<()> {
    let mut specs = load(store)?;
    let before = specs.len();
    specs.retain(|s| s.name != name);
    if specs.len() == before {
        return Err(MeltcdError::NotFound(name.to_string()).into());
    }
    store.save(&specs)?;
    println!("Removed application '{name}'.");
    Ok(())
}
