//! Cascade CLI.
//!
//! # Responsibility
//! - Run the save / get / merge probe against either child variant.
//! - Print one deterministic `key=value` line per step.

use anyhow::{Context, Result};
use cascade_core::db::{open_db, open_db_in_memory};
use cascade_core::{
    core_version, default_log_level, init_logging, ChildMapping, ChildRecord, EmbeddedChild,
    MergeOutcome, Parent, ParentId, ParentService, ReferencedChild, SqliteParentRepository,
};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cascade")]
#[command(about = "Probe parent/child save and merge behaviour")]
struct Cli {
    /// Absolute directory for rolling log files. Logging is off when unset.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log level for `--log-dir`. Defaults to debug in debug builds.
    #[arg(long, global = true, requires = "log_dir")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Save a parent with two children, then merge unchanged and edited copies.
    Probe {
        #[arg(long, value_enum, default_value_t = Variant::Referenced)]
        variant: Variant,

        /// SQLite file to use. An in-memory database is used when unset.
        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(long, default_value_t = 1)]
        parent_id: ParentId,

        /// Print the final aggregate as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the core version.
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    Referenced,
    Embedded,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        let log_dir = log_dir
            .to_str()
            .context("log directory must be valid UTF-8")?;
        init_logging(level, log_dir).map_err(anyhow::Error::msg)?;
    }

    match cli.command {
        Command::Version => {
            println!("cascade_core version={}", core_version());
        }
        Command::Probe {
            variant,
            db,
            parent_id,
            json,
        } => {
            let conn = match &db {
                Some(path) => open_db(path)
                    .with_context(|| format!("failed to open `{}`", path.display()))?,
                None => open_db_in_memory().context("failed to open in-memory database")?,
            };
            info!("event=cli_probe module=cli status=start variant={variant:?}");
            let writes = match variant {
                Variant::Referenced => run_probe(
                    &conn,
                    parent_id,
                    vec![
                        ReferencedChild::new(1, "c1desc"),
                        ReferencedChild::new(2, "c2desc"),
                    ],
                    |child| child.description = Some("modified".to_string()),
                    json,
                )?
                .write_count(),
                Variant::Embedded => run_probe(
                    &conn,
                    parent_id,
                    vec![
                        EmbeddedChild::new(1, "c1desc"),
                        EmbeddedChild::new(2, "c2desc"),
                    ],
                    |child| child.description = Some("modified".to_string()),
                    json,
                )?
                .write_count(),
            };
            info!("event=cli_probe module=cli status=ok variant={variant:?} child_writes={writes}");
        }
    }

    Ok(())
}

/// Outcomes of the two probe merges.
#[derive(Debug)]
struct ProbeReport<C> {
    unchanged: MergeOutcome<C>,
    edited: MergeOutcome<C>,
}

impl<C: ChildRecord> ProbeReport<C> {
    /// Child rows written across both merges.
    fn write_count(&self) -> usize {
        self.unchanged.change_set.write_count() + self.edited.change_set.write_count()
    }
}

fn run_probe<C>(
    conn: &Connection,
    parent_id: ParentId,
    children: Vec<C>,
    edit: impl Fn(&mut C),
    json: bool,
) -> Result<ProbeReport<C>>
where
    C: ChildMapping + Serialize,
{
    let service = ParentService::new(SqliteParentRepository::<C>::try_new(conn)?);

    let parent = Parent::with_children(parent_id, "p1desc", children);
    service.save(&parent)?;
    println!(
        "step=save parent_id={parent_id} strategy={:?} children={}",
        C::STRATEGY,
        parent.children.len()
    );

    let loaded = service.get(parent_id)?;
    println!(
        "step=get parent_id={parent_id} children={}",
        loaded.children.len()
    );

    let mut detached = loaded.clone();
    detached.description = Some("modified".to_string());
    let unchanged = service.merge(&detached)?;
    println!("{}", merge_line("merge_unchanged", &unchanged));

    if let Some(last) = detached.children.last_mut() {
        edit(last);
    }
    let edited = service.merge(&detached)?;
    println!("{}", merge_line("merge_edited", &edited));

    if json {
        println!("{}", serde_json::to_string_pretty(&edited.parent)?);
    }
    Ok(ProbeReport { unchanged, edited })
}

fn merge_line<C>(step: &str, outcome: &MergeOutcome<C>) -> String {
    format!(
        "step={step} parent_id={} inserted={} deleted={} updated={} unchanged={} children={}",
        outcome.parent.id,
        outcome.change_set.to_insert.len(),
        outcome.change_set.to_delete.len(),
        outcome.change_set.to_update.len(),
        outcome.change_set.unchanged,
        outcome.parent.children.len()
    )
}
