use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use labelkit_api::{AppConfig, LabelkitApi, RecordPrintRequest, RefreshRequest};
use labelkit_core::{FilterMode, PrintStatus, RosterFilter};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "lk")]
#[command(about = "Membership label ledger and roster reconciliation")]
struct Cli {
    /// Configuration file; falls back to `./labelkit.toml`.
    #[arg(long, env = "LABELKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured ledger database.
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Print {
        #[command(subcommand)]
        command: PrintCommand,
    },
    Import {
        #[command(subcommand)]
        command: ImportCommand,
    },
    Extract {
        #[command(subcommand)]
        command: ExtractCommand,
    },
    Roster {
        #[command(subcommand)]
        command: RosterCommand,
    },
    Attestation(AttestationArgs),
    Split(SplitArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum PrintCommand {
    Record(PrintRecordArgs),
    List(PrintListArgs),
}

#[derive(Debug, Args)]
struct PrintRecordArgs {
    #[arg(long)]
    surname: String,
    #[arg(long)]
    given_name: String,
    #[arg(long, default_value = "")]
    dob: String,
    #[arg(long, default_value = "")]
    expiration: String,
    #[arg(long, default_value = "")]
    email: String,
    #[arg(long, default_value = "")]
    amount: String,
    /// Label payload file; only its checksum is stored.
    #[arg(long)]
    payload_file: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = StatusArg::Printed)]
    status: StatusArg,
}

#[derive(Debug, Args)]
struct PrintListArgs {
    #[arg(long)]
    expiration: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Printed,
    Simulated,
}

impl From<StatusArg> for PrintStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Printed => Self::Printed,
            StatusArg::Simulated => Self::Simulated,
        }
    }
}

#[derive(Debug, Subcommand)]
enum ImportCommand {
    /// Record a `nom;prenom` list as already printed.
    Names(ImportNamesArgs),
    /// Import the configured auto-import file when present.
    Auto(ImportAutoArgs),
}

#[derive(Debug, Args)]
struct ImportNamesArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long, default_value = "")]
    expiration: String,
    /// Roster used to resolve dates of birth unknown to the ledger.
    #[arg(long)]
    roster: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImportAutoArgs {
    #[arg(long)]
    roster: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum ExtractCommand {
    /// Three-line-per-member payment listing.
    Lines(ExtractArgs),
    /// Multi-row block workbook.
    Blocks(ExtractArgs),
}

#[derive(Debug, Args)]
struct ExtractArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Subcommand)]
enum RosterCommand {
    Refresh(RosterRefreshArgs),
    Cache(RosterCacheArgs),
    Cached,
}

#[derive(Debug, Args)]
struct RosterRefreshArgs {
    #[arg(long)]
    roster: PathBuf,
    #[arg(long)]
    updates: Option<PathBuf>,
    #[arg(long)]
    validation: Option<PathBuf>,
    #[arg(long)]
    surname: Option<String>,
    #[arg(long)]
    given_name: Option<String>,
    #[arg(long)]
    expiration: Option<String>,
    #[arg(long, value_enum, default_value_t = ModeArg::ToPrint)]
    mode: ModeArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    ToPrint,
    AlreadyPrinted,
    All,
}

impl From<ModeArg> for FilterMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::ToPrint => Self::ToPrint,
            ModeArg::AlreadyPrinted => Self::AlreadyPrinted,
            ModeArg::All => Self::All,
        }
    }
}

#[derive(Debug, Args)]
struct RosterCacheArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct AttestationArgs {
    #[arg(long)]
    surname: String,
    #[arg(long)]
    given_name: String,
    #[arg(long)]
    dob: Option<String>,
    #[arg(long)]
    expiration: Option<String>,
}

#[derive(Debug, Args)]
struct SplitArgs {
    #[arg(long)]
    name: String,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    // stdout carries the JSON contract; diagnostics go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LABELKIT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    debug!(db = %config.database_path.display(), "configuration resolved");
    let api = LabelkitApi::new(config);

    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Print { command } => run_print(command, &api),
        Command::Import { command } => run_import(command, &api),
        Command::Extract { command } => run_extract(command, &api),
        Command::Roster { command } => run_roster(command, &api),
        Command::Attestation(args) => run_attestation(&args, &api),
        Command::Split(args) => {
            let (surname, given_name) = api.config().name_splitter().split(&args.name);
            emit_json(serde_json::json!({
                "input": args.name,
                "surname": surname,
                "given_name": given_name
            }))
        }
    }
}

fn run_db(command: DbCommand, api: &LabelkitApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_legacy": status.inferred_from_legacy
            }))
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migrate result")?)
        }
        DbCommand::Backup(args) => {
            api.backup(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = api.integrity_check()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
    }
}

fn run_print(command: PrintCommand, api: &LabelkitApi) -> Result<()> {
    match command {
        PrintCommand::Record(args) => {
            let payload = args
                .payload_file
                .as_ref()
                .map(|path| {
                    fs::read(path)
                        .with_context(|| format!("failed to read payload file {}", path.display()))
                })
                .transpose()?;
            let status = PrintStatus::from(args.status);
            let id = api.record_print(RecordPrintRequest {
                surname: args.surname,
                given_name: args.given_name,
                dob: args.dob,
                expiration: args.expiration,
                email: args.email,
                amount: args.amount,
                payload,
                status,
            })?;
            emit_json(serde_json::json!({
                "id": id,
                "status": status.as_str()
            }))
        }
        PrintCommand::List(args) => {
            let events = api.list_prints(args.expiration.as_deref())?;
            emit_json(serde_json::json!({
                "count": events.len(),
                "events": events
            }))
        }
    }
}

fn run_import(command: ImportCommand, api: &LabelkitApi) -> Result<()> {
    let (summary, file) = match command {
        ImportCommand::Names(args) => {
            let roster = args.roster.as_deref().map(|path| api.load_roster(path)).transpose()?;
            let summary = api.import_printed_names(&args.file, &args.expiration, roster.as_deref())?;
            (summary, args.file)
        }
        ImportCommand::Auto(args) => {
            let roster = args.roster.as_deref().map(|path| api.load_roster(path)).transpose()?;
            (api.auto_import(roster.as_deref())?, api.config().auto_import_file.clone())
        }
    };
    emit_json(serde_json::json!({
        "file": file,
        "imported": summary.imported,
        "skipped": summary.skipped
    }))
}

fn run_extract(command: ExtractCommand, api: &LabelkitApi) -> Result<()> {
    let result = match command {
        ExtractCommand::Lines(args) => api.extract_line_file(&args.file)?,
        ExtractCommand::Blocks(args) => api.extract_block_file(&args.file)?,
    };
    emit_json(serde_json::json!({
        "count": result.records.len(),
        "export_path": result.export_path,
        "records": result.records
    }))
}

fn run_roster(command: RosterCommand, api: &LabelkitApi) -> Result<()> {
    match command {
        RosterCommand::Refresh(args) => {
            let report = api.refresh(&RefreshRequest {
                roster_path: args.roster,
                updates_path: args.updates,
                validation_path: args.validation,
                filter: RosterFilter {
                    surname: args.surname,
                    given_name: args.given_name,
                    expiration: args.expiration,
                    mode: args.mode.into(),
                },
            })?;
            emit_json(serde_json::to_value(&report).context("failed to serialize roster report")?)
        }
        RosterCommand::Cache(args) => {
            let metadata = api.cache_roster(&args.file)?;
            emit_json(serde_json::to_value(&metadata).context("failed to serialize cache metadata")?)
        }
        RosterCommand::Cached => match api.cached_roster()? {
            Some((metadata, records)) => emit_json(serde_json::json!({
                "cached": true,
                "metadata": metadata,
                "rows": records.len()
            })),
            None => emit_json(serde_json::json!({ "cached": false })),
        },
    }
}

fn run_attestation(args: &AttestationArgs, api: &LabelkitApi) -> Result<()> {
    let preview = api.attestation(
        &args.surname,
        &args.given_name,
        args.dob.as_deref(),
        args.expiration.as_deref(),
    )?;
    match preview {
        Some(preview) => emit_json(serde_json::json!({
            "found": true,
            "file_stem": preview.file_stem,
            "subject": preview.subject,
            "body": preview.body,
            "context": preview.context
        })),
        None => emit_json(serde_json::json!({ "found": false })),
    }
}
