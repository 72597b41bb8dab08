use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use meltcd_core::manifest;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum ManifestSubcommand {
    /// Parse a manifest file and show the services it would deploy
    Check {
        /// Path to the compose-style manifest
        file: PathBuf,
        /// Application name used to scope service names (default: file stem)
        #[arg(long)]
        app: Option<String>,
    },
}

pub fn run(subcmd: ManifestSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ManifestSubcommand::Check { file, app } => check(&file, app.as_deref(), json),
    }
}

fn check(file: &Path, app: Option<&str>, json: bool) -> anyhow::Result<()> {
    let raw = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let app = match app {
        Some(name) => name.to_string(),
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "app".to_string()),
    };
    let defs = manifest::parse(&app, &raw)?;

    if json {
        return print_json(&defs);
    }

    let rows = defs
        .iter()
        .map(|d| {
            let ports = d
                .ports
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            vec![
                d.name.clone(),
                d.image.clone(),
                d.replicas.to_string(),
                crate::output::or_dash(&ports),
            ]
        })
        .collect();
    print_table(&["SERVICE", "IMAGE", "REPLICAS", "PORTS"], rows);
    Ok(())
}
