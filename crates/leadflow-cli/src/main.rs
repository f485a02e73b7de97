//! # leadflow
//!
//! Command-line front end for the leadflow engine. Results go to stdout as
//! JSON, logs to stderr.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use leadflow_core::logging::{LogOutput, init_subscriber};
use leadflow_core::{ContactId, ContactStatus, UserId};
use leadflow_engine::{LeadEngine, PerContactResult, SweepOptions};
use leadflow_settings::{LeadflowSettings, LogFormat, expand_home, load_settings};
use leadflow_store::{ConnectionConfig, Store, migrations};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

/// Lead routing and lifecycle rules for a CRM database.
#[derive(Parser, Debug)]
#[command(name = "leadflow", version, about)]
struct Cli {
    /// Path to the `SQLite` database (overrides settings).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `leadflow_engine=trace` (overrides settings).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the database schema.
    Migrate,
    /// Assign contacts to owners.
    Assign {
        #[command(subcommand)]
        mode: AssignCommand,
    },
    /// Remove a contact's owner.
    Unassign {
        contact: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: String,
    },
    /// Accept an assignment as its owner.
    Accept { contact: String, user: String },
    /// Close an assignment as done.
    Complete {
        contact: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Show a user's open assignments and caps.
    Workload { user: String },
    /// Recompute a contact's lead score.
    Score {
        contact: String,
        /// Ignore the rescore cooldown.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Explain a contact's stored score without rescoring.
    Analyze { contact: String },
    /// Change a contact's status by hand.
    Status {
        contact: String,
        #[arg(value_parser = parse_status)]
        new_status: ContactStatus,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        actor: String,
        /// Allow an edge no transition rule declares.
        #[arg(long)]
        force: bool,
    },
    /// Run one automatic transition pass for a contact.
    Evaluate { contact: String },
    /// Rescore and re-evaluate many contacts.
    Sweep {
        /// Ignore the rescore cooldown.
        #[arg(long)]
        force: bool,
        /// Restrict the sweep to these contacts (repeatable).
        #[arg(long = "contact")]
        contacts: Vec<String>,
    },
    /// Print a contact's assignments, history and lifecycle events.
    History { contact: String },
}

#[derive(Subcommand, Debug)]
enum AssignCommand {
    /// Route through the assignment rules.
    Auto {
        contact: String,
        /// Request context as `key=value` (repeatable).
        #[arg(long = "ctx", value_parser = parse_key_val)]
        context: Vec<(String, Value)>,
    },
    /// Assign to a given user.
    Manual {
        contact: String,
        user: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Assign many contacts to one user.
    Bulk {
        user: String,
        #[arg(long)]
        actor: String,
        #[arg(required = true)]
        contacts: Vec<String>,
    },
}

fn parse_status(s: &str) -> std::result::Result<ContactStatus, String> {
    s.parse().map_err(|e: leadflow_core::CoreError| e.to_string())
}

/// `key=value`; the value is read as JSON when it parses, else as text.
fn parse_key_val(s: &str) -> std::result::Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
    Ok((key.to_owned(), value))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{text}");
    Ok(())
}

fn per_contact<T: Serialize>(results: Vec<PerContactResult<T>>) -> Value {
    let items: Vec<Value> = results
        .into_iter()
        .map(|r| match r.outcome {
            Ok(result) => json!({"contact_id": r.contact_id, "ok": true, "result": result}),
            Err(err) => json!({"contact_id": r.contact_id, "ok": false, "error": err.to_string()}),
        })
        .collect();
    Value::Array(items)
}

fn open_store(settings: &LeadflowSettings) -> Result<(Store, PathBuf)> {
    let path = expand_home(&settings.database.path);
    ensure_parent_dir(&path)?;
    let config = ConnectionConfig {
        pool_size: settings.database.pool_size,
        busy_timeout_ms: settings.database.busy_timeout_ms,
    };
    let store = Store::open(&path.to_string_lossy(), &config)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok((store, path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut settings, load_error) = match load_settings() {
        Ok(settings) => (settings, None),
        Err(err) => (LeadflowSettings::default(), Some(err)),
    };
    if let Some(db) = &cli.db {
        settings.database.path = db.to_string_lossy().into_owned();
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    if cli.json_logs {
        settings.logging.format = LogFormat::Json;
    }
    let output = match settings.logging.format {
        LogFormat::Json => LogOutput::Json,
        LogFormat::Compact => LogOutput::Compact,
    };
    init_subscriber(&settings.logging.level, output);
    if let Some(err) = load_error {
        warn!(error = %err, "failed to load settings, using defaults");
    }

    let (store, path) = open_store(&settings)?;
    if matches!(cli.command, Command::Migrate) {
        let conn = store.conn().context("failed to get a database connection")?;
        let version = migrations::current_version(&conn).context("failed to read schema version")?;
        info!(path = %path.display(), version, "database ready");
        return print_json(&json!({"path": path, "schema_version": version}));
    }

    let engine = LeadEngine::new(store, settings);
    run(&engine, cli.command).await
}

async fn run(engine: &LeadEngine, command: Command) -> Result<()> {
    match command {
        Command::Migrate => Ok(()),
        Command::Assign { mode } => assign(engine, mode),
        Command::Unassign { contact, actor, reason } => {
            engine
                .unassign(&contact.as_str().into(), &actor.into(), &reason)
                .with_context(|| format!("failed to unassign {contact}"))?;
            print_json(&json!({"contact_id": contact, "unassigned": true}))
        }
        Command::Accept { contact, user } => {
            let assignment = engine
                .accept_assignment(&contact.as_str().into(), &user.into())
                .with_context(|| format!("failed to accept {contact}"))?;
            print_json(&assignment)
        }
        Command::Complete { contact, actor, note } => {
            engine
                .complete_assignment(&contact.as_str().into(), &actor.into(), note.as_deref())
                .with_context(|| format!("failed to complete assignment of {contact}"))?;
            print_json(&json!({"contact_id": contact, "completed": true}))
        }
        Command::Workload { user } => {
            let load = engine
                .get_workload(&user.as_str().into())
                .with_context(|| format!("failed to read workload of {user}"))?;
            print_json(&load)
        }
        Command::Score { contact, force, reason } => {
            let outcome = engine
                .score_contact(&contact.as_str().into(), force, reason.as_deref())
                .with_context(|| format!("failed to score {contact}"))?;
            print_json(&outcome)
        }
        Command::Analyze { contact } => {
            let analysis = engine
                .analyze_score(&contact.as_str().into())
                .with_context(|| format!("failed to analyze {contact}"))?;
            print_json(&analysis)
        }
        Command::Status {
            contact,
            new_status,
            reason,
            actor,
            force,
        } => {
            let change = engine
                .change_status(&contact.as_str().into(), new_status, &reason, &actor.into(), force)
                .with_context(|| format!("failed to move {contact} to {new_status}"))?;
            print_json(&change)
        }
        Command::Evaluate { contact } => {
            let outcome = engine
                .evaluate_transitions(&contact.as_str().into())
                .with_context(|| format!("failed to evaluate transitions of {contact}"))?;
            print_json(&outcome)
        }
        Command::Sweep { force, contacts } => {
            let contact_ids =
                (!contacts.is_empty()).then(|| contacts.into_iter().map(ContactId::from).collect());
            let report = engine
                .sweep(SweepOptions { contact_ids, force })
                .await
                .context("sweep failed")?;
            print_json(&report)
        }
        Command::History { contact } => {
            let trail = engine
                .contact_history(&contact.as_str().into())
                .with_context(|| format!("failed to read history of {contact}"))?;
            print_json(&trail)
        }
    }
}

fn assign(engine: &LeadEngine, mode: AssignCommand) -> Result<()> {
    match mode {
        AssignCommand::Auto { contact, context } => {
            let context: Map<String, Value> = context.into_iter().collect();
            let result = engine
                .assign_automatically(&contact.as_str().into(), &context)
                .with_context(|| format!("automatic assignment of {contact} failed"))?;
            print_json(&result)
        }
        AssignCommand::Manual {
            contact,
            user,
            actor,
            reason,
        } => {
            let result = engine
                .assign_manually(
                    &contact.as_str().into(),
                    &user.as_str().into(),
                    &actor.into(),
                    reason.as_deref(),
                )
                .with_context(|| format!("failed to assign {contact} to {user}"))?;
            print_json(&result)
        }
        AssignCommand::Bulk {
            user,
            actor,
            contacts,
        } => {
            let ids: Vec<ContactId> = contacts.into_iter().map(ContactId::from).collect();
            let results = engine
                .bulk_assign(&ids, &UserId::from(user.as_str()), &actor.into())
                .with_context(|| format!("bulk assignment to {user} failed"))?;
            print_json(&per_contact(results))
        }
    }
}
