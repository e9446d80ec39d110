// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! tether CLI
//!
//! Replays relationship scripts against a schema and checks schemas for
//! inverse resolution problems. Set `RUST_LOG` to see graph passes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tether_config_fs::FsConfigStore;
use tether_core::{ConfigService, SchemaRegistry, StoreConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod check;
mod script;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Resolve every declared relationship and print its inverse
    Check {
        /// Schema JSON file
        #[clap(long)]
        schema: PathBuf,
    },
    /// Replay a script of pushes and local edits, printing each dump as a JSON line
    Replay {
        /// Schema JSON file
        #[clap(long)]
        schema: PathBuf,
        /// Script JSON file
        #[clap(long)]
        script: PathBuf,
        /// Directory holding `store.json`; defaults apply when omitted
        #[clap(long)]
        config_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match args.cmd {
        Command::Check { schema } => {
            let schema = load_schema(&schema)?;
            let failures = check::check(&schema, &mut out)?;
            if failures > 0 {
                bail!("{failures} relationship(s) failed to resolve");
            }
        }
        Command::Replay {
            schema,
            script,
            config_dir,
        } => {
            let schema = load_schema(&schema)?;
            let config = load_config(config_dir.as_deref())?;
            let bytes =
                fs::read(&script).with_context(|| format!("reading {}", script.display()))?;
            let steps = script::parse(&bytes)?;
            info!(steps = steps.len(), "replaying");
            script::Replay::new(schema, config).run(&steps, &mut out)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn load_schema(path: &Path) -> Result<SchemaRegistry> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    SchemaRegistry::from_json(&bytes).with_context(|| format!("parsing {}", path.display()))
}

fn load_config(dir: Option<&Path>) -> Result<StoreConfig> {
    let Some(dir) = dir else {
        return Ok(StoreConfig::default());
    };
    let service = ConfigService::new(FsConfigStore::with_base(dir)?);
    service
        .load_store_config()
        .with_context(|| format!("loading store config from {}", dir.display()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn config_dir_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("store.json"), br#"{"max_batch_size": 4}"#).unwrap();
        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.max_batch_size, Some(4));
        assert_eq!(load_config(None).unwrap(), StoreConfig::default());
    }

    #[test]
    fn args_parse_replay() {
        let args = Args::parse_from([
            "tether", "replay", "--schema", "s.json", "--script", "ops.json",
        ]);
        assert!(matches!(args.cmd, Command::Replay { config_dir: None, .. }));
    }
}
