//! Retention Lifecycle Core - scheduled retention runs and operator commands
//!
//! The main entry point for rl-core, handling:
//! - The periodic retention run (warnings, grace, deletion/anonymization)
//! - Legal holds and deletion approvals
//! - Entity lifecycle intake (creation and activity reports)
//! - Schedule inspection, audit verification, policy checks

use clap::{Args, Parser, Subcommand};
use rl_common::{EntityRef, EntityType, OutputFormat, RunId, ScheduleId, ShardSpec, SCHEMA_VERSION};
use rl_core::audit::{audit_check, audit_dir, AuditLog};
use rl_core::clock::{Clock, SystemClock};
use rl_core::config::{load_config, ResolvedConfig};
use rl_core::executor::{DeletionExecutor, FileEntityStore, HookRegistry};
use rl_core::exit_codes::ExitCode;
use rl_core::hold::LegalHoldManager;
use rl_core::lifecycle::{IntakeOutcome, ScheduleService};
use rl_core::logging::{get_host_id, init_logging, LogConfig, LogContext, LogFormat, LogLevel};
use rl_core::notify::{OutboxDispatcher, WarningDispatcher};
use rl_core::orchestrator::{Orchestrator, RunOptions, RunSummary};
use rl_core::registry::PolicyRegistry;
use rl_core::schedule::{RetentionSchedule, ScheduleStatus};
use rl_core::store::{FileScheduleStore, ScheduleFilter, ScheduleStore};
use rl_config::resolve_paths;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Retention Lifecycle Core - policy-driven retention, legal holds and audited deletion
#[derive(Parser)]
#[command(name = "rl-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Directory holding policies.json and retention.toml
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Directory holding schedules, audit logs, entities and the outbox
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q warnings only, -qq errors only, -qqq silent)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    quiet: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// One retention pass: warnings, grace transitions, deletions
    Run(RunArgs),

    /// Apply or release legal holds
    Hold(HoldArgs),

    /// Record manual approval for a deletion
    Approve(ApproveArgs),

    /// Report entity lifecycle events
    Entity(EntityArgs),

    /// Inspect and maintain schedules
    Schedule(ScheduleArgs),

    /// Audit log verification
    Audit(AuditArgs),

    /// Inspect and validate retention policies
    Policy(PolicyArgs),

    /// Print version information
    Version,
}

// ============================================================================
// Command argument structs
// ============================================================================

#[derive(Args, Debug)]
struct RunArgs {
    /// Evaluate every gate and report, change nothing
    #[arg(long)]
    dry_run: bool,

    /// Only process schedules of this category
    #[arg(long)]
    category: Option<String>,

    /// Only process schedules of this entity type
    #[arg(long)]
    entity_type: Option<String>,

    /// Only process this hash partition of entities (index/count)
    #[arg(long)]
    shard: Option<ShardSpec>,

    /// Send due warnings only; skip the deletion batch
    #[arg(long)]
    warning_only: bool,

    /// Ignore the auto-delete switches (never bypasses holds or approval)
    #[arg(long)]
    force: bool,

    /// Evaluate as of this date (YYYY-MM-DD)
    #[arg(long)]
    today: Option<NaiveDate>,
}

#[derive(Args, Debug)]
struct HoldArgs {
    #[command(subcommand)]
    command: HoldCommands,
}

#[derive(Subcommand, Debug)]
enum HoldCommands {
    /// Suspend deletion of a schedule
    Apply {
        /// Schedule id (rs-…) or entity reference (type:id)
        target: String,
        /// Who is applying the hold
        #[arg(long)]
        by: String,
        /// Case or matter reference
        #[arg(long)]
        reason: String,
    },
    /// Lift a hold; the schedule returns to active with its dates unchanged
    Release {
        /// Schedule id (rs-…) or entity reference (type:id)
        target: String,
        /// Who is releasing the hold
        #[arg(long)]
        by: String,
    },
}

#[derive(Args, Debug)]
struct ApproveArgs {
    /// Schedule id (rs-…) or entity reference (type:id)
    target: String,

    /// Who approves the deletion
    #[arg(long)]
    by: String,
}

#[derive(Args, Debug)]
struct EntityArgs {
    #[command(subcommand)]
    command: EntityCommands,
}

#[derive(Subcommand, Debug)]
enum EntityCommands {
    /// Start tracking an entity
    Created {
        /// Entity reference (type:id)
        entity: EntityRef,
        /// Data category (selects the retention policy)
        #[arg(long)]
        category: String,
        /// Creation date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// JSON document to store in the reference entity store
        #[arg(long)]
        document: Option<PathBuf>,
    },
    /// Report activity on a tracked entity
    Activity {
        /// Entity reference (type:id)
        entity: EntityRef,
        /// Activity date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Args, Debug)]
struct ScheduleArgs {
    #[command(subcommand)]
    command: ScheduleCommands,
}

#[derive(Subcommand, Debug)]
enum ScheduleCommands {
    /// Show one schedule
    Show {
        /// Schedule id (rs-…) or entity reference (type:id)
        target: String,
    },
    /// List schedules
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        shard: Option<ShardSpec>,
    },
    /// Re-pin a schedule to the category's active policy and recompute dates
    Rebase {
        /// Schedule id (rs-…) or entity reference (type:id)
        target: String,
    },
}

#[derive(Args, Debug)]
struct AuditArgs {
    #[command(subcommand)]
    command: AuditCommands,
}

#[derive(Subcommand, Debug)]
enum AuditCommands {
    /// Verify the hash chain and recompute every evidence hash
    Verify,
}

#[derive(Args, Debug)]
struct PolicyArgs {
    #[command(subcommand)]
    command: PolicyCommands,
}

#[derive(Subcommand, Debug)]
enum PolicyCommands {
    /// List configured policies
    List,
    /// Validate policies.json and retention.toml
    Check,
}

// ============================================================================
// Signal handling
// ============================================================================

static CANCEL: AtomicBool = AtomicBool::new(false);

/// Sets the cancel flag; the orchestrator checks it between schedules.
extern "C" fn handle_sigint(_: libc::c_int) {
    CANCEL.store(true, Ordering::SeqCst);
}

fn install_sigint_handler() {
    unsafe {
        // SAFETY: handle_sigint only stores to an atomic, which is
        // async-signal-safe.
        let handler = handle_sigint as *const () as libc::sighandler_t;
        if libc::signal(libc::SIGINT, handler) == libc::SIG_ERR {
            tracing::warn!("failed to install SIGINT handler; Ctrl-C aborts immediately");
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let cli_level = (cli.global.verbose > 0 || cli.global.quiet > 0)
        .then(|| LogLevel::from_verbosity(cli.global.verbose, cli.global.quiet));
    // JSON payloads imply JSONL logs unless RL_LOG_FORMAT says otherwise.
    let implied_format = (cli.global.format.is_machine()
        && std::env::var_os("RL_LOG_FORMAT").is_none())
    .then_some(LogFormat::Jsonl);
    init_logging(&LogConfig::from_env(cli_level, implied_format));

    let exit_code = match &cli.command {
        Commands::Run(args) => run_retention(&cli.global, args),
        Commands::Hold(args) => run_hold(&cli.global, args),
        Commands::Approve(args) => run_approve(&cli.global, args),
        Commands::Entity(args) => run_entity(&cli.global, args),
        Commands::Schedule(args) => run_schedule(&cli.global, args),
        Commands::Audit(args) => run_audit(&cli.global, args),
        Commands::Policy(args) => run_policy(&cli.global, args),
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Engine wiring
// ============================================================================

/// Everything a command needs, built from the resolved configuration.
struct Engine {
    config: ResolvedConfig,
    store: Arc<dyn ScheduleStore>,
    registry: Arc<PolicyRegistry>,
    clock: Arc<dyn Clock>,
    host_id: String,
}

impl Engine {
    fn open(global: &GlobalOpts) -> Result<Self, rl_common::Error> {
        let paths = resolve_paths(global.config_dir.as_deref(), global.data_dir.as_deref());
        let config = load_config(&paths)?;
        let registry = PolicyRegistry::from_file(config.policies.clone())?;
        let store = FileScheduleStore::open(&config.data_dir)?;
        Ok(Engine {
            config,
            store: Arc::new(store),
            registry: Arc::new(registry),
            clock: Arc::new(SystemClock),
            host_id: get_host_id(),
        })
    }

    fn log_context(&self) -> LogContext {
        LogContext::new(RunId::new().to_string(), self.host_id.clone())
    }

    fn holds(&self) -> LegalHoldManager {
        LegalHoldManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
            self.config.settings.claim_ttl(),
            self.log_context(),
        )
    }

    fn intake(&self) -> ScheduleService {
        ScheduleService::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
            self.log_context(),
        )
    }

    fn entities(&self) -> Result<FileEntityStore, rl_common::Error> {
        FileEntityStore::open(&self.config.data_dir, &self.config.settings)
            .map_err(|e| rl_common::Error::Config(format!("entity store: {}", e)))
    }

    /// Accepts a schedule id or an entity reference.
    fn find(&self, target: &str) -> Result<RetentionSchedule, rl_common::Error> {
        let found = match ScheduleId::parse(target) {
            Some(id) => self.store.get(&id)?,
            None => match target.parse::<EntityRef>() {
                Ok(entity) => self.store.get_by_entity(&entity)?,
                Err(_) => None,
            },
        };
        found.ok_or_else(|| rl_common::Error::ScheduleNotFound(target.to_string()))
    }
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_retention(global: &GlobalOpts, args: &RunArgs) -> ExitCode {
    let engine = match Engine::open(global) {
        Ok(e) => e,
        Err(e) => return output_error(global, "run", e),
    };
    let settings = engine.config.settings.clone();
    let data_dir = engine.config.data_dir.clone();

    let entities = match engine.entities() {
        Ok(e) => e,
        Err(e) => return output_error(global, "run", e),
    };
    let executor = DeletionExecutor::new(
        HookRegistry::new().with_fallback(Arc::new(entities)),
        settings.hook_timeout(),
    );
    let dispatcher: Arc<dyn WarningDispatcher> = Arc::new(OutboxDispatcher::new(&data_dir));
    let audit = match AuditLog::open(&audit_dir(&data_dir), settings.audit_max_bytes) {
        Ok(a) => a,
        Err(e) => return output_error(global, "run", e.into()),
    };

    let entity_type = match args.entity_type.as_deref().map(parse_entity_type).transpose() {
        Ok(t) => t,
        Err(message) => return args_error(global, "run", &message),
    };
    let opts = RunOptions {
        dry_run: args.dry_run,
        warning_only: args.warning_only,
        force: args.force,
        filter: ScheduleFilter {
            category: args.category.clone(),
            entity_type,
            shard: args.shard,
            status: None,
        },
        today: args.today,
    };

    install_sigint_handler();
    let mut orchestrator = Orchestrator::new(
        Arc::clone(&engine.store),
        Arc::clone(&engine.registry),
        executor,
        dispatcher,
        audit,
        settings,
        Arc::clone(&engine.clock),
        engine.host_id.clone(),
    );

    match orchestrator.run(&opts, &CANCEL) {
        Ok(summary) => {
            output(
                global,
                "run",
                &summary,
                || run_summary_line(&summary),
                || run_summary_md(&summary),
            );
            if summary.interrupted {
                ExitCode::Interrupted
            } else if summary.counts.failed > 0 {
                ExitCode::PartialFail
            } else {
                ExitCode::Clean
            }
        }
        Err(e) => output_error(global, "run", e.into()),
    }
}

fn run_summary_line(s: &RunSummary) -> String {
    let mut line = format!(
        "[{}] run {}: advanced={} skipped_on_hold={} failed={} deferred_for_approval={}",
        s.run_id,
        s.today,
        s.counts.advanced,
        s.counts.skipped_on_hold,
        s.counts.failed,
        s.counts.deferred_for_approval
    );
    if s.dry_run {
        line.push_str(&format!(
            " would_warn={} would_delete={} would_anonymize={}",
            s.counts.would_warn, s.counts.would_delete, s.counts.would_anonymize
        ));
    }
    if s.interrupted {
        line.push_str(" (interrupted)");
    }
    line
}

fn run_summary_md(s: &RunSummary) -> String {
    let mut out = format!("# Retention run {}\n\n", s.run_id);
    out.push_str(&format!("Date: {}", s.today));
    if s.dry_run {
        out.push_str(" (dry run)");
    }
    if s.warning_only {
        out.push_str(" (warnings only)");
    }
    out.push_str("\n\n| advanced | skipped on hold | failed | deferred for approval |\n");
    out.push_str("|---|---|---|---|\n");
    out.push_str(&format!(
        "| {} | {} | {} | {} |\n",
        s.counts.advanced, s.counts.skipped_on_hold, s.counts.failed, s.counts.deferred_for_approval
    ));
    if s.counts.deferred_auto_delete > 0 || s.counts.conflicts > 0 {
        out.push_str(&format!(
            "\nAuto-delete disabled: {}. Conflicts: {}.\n",
            s.counts.deferred_auto_delete, s.counts.conflicts
        ));
    }
    if s.dry_run {
        out.push_str(&format!(
            "\nWould warn {}, enter grace {}, delete {}, anonymize {}.\n",
            s.counts.would_warn,
            s.counts.would_enter_grace,
            s.counts.would_delete,
            s.counts.would_anonymize
        ));
    }
    if !s.overdue.is_empty() {
        out.push_str("\n## Overdue pending approval\n\n");
        for item in &s.overdue {
            out.push_str(&format!(
                "- {} `{}` ({}): due {}, {} days overdue\n",
                item.schedule_id, item.entity, item.category, item.deletion_date, item.days_overdue
            ));
        }
    }
    if !s.failures.is_empty() {
        out.push_str("\n## Failures\n\n");
        for f in &s.failures {
            out.push_str(&format!(
                "- {} `{}` [{}] E{}: {}\n",
                f.schedule_id, f.entity, f.stage, f.code, f.error
            ));
        }
    }
    if s.interrupted {
        out.push_str("\nRun interrupted; remaining schedules are picked up next run.\n");
    }
    out
}

fn run_hold(global: &GlobalOpts, args: &HoldArgs) -> ExitCode {
    let engine = match Engine::open(global) {
        Ok(e) => e,
        Err(e) => return output_error(global, "hold", e),
    };
    let (command, result) = match &args.command {
        HoldCommands::Apply { target, by, reason } => (
            "hold apply",
            engine
                .find(target)
                .and_then(|s| Ok(engine.holds().apply_hold(&s.id, by, reason)?)),
        ),
        HoldCommands::Release { target, by } => (
            "hold release",
            engine
                .find(target)
                .and_then(|s| Ok(engine.holds().release_hold(&s.id, by)?)),
        ),
    };
    output_schedule(global, command, result)
}

fn run_approve(global: &GlobalOpts, args: &ApproveArgs) -> ExitCode {
    let engine = match Engine::open(global) {
        Ok(e) => e,
        Err(e) => return output_error(global, "approve", e),
    };
    let result = engine
        .find(&args.target)
        .and_then(|s| Ok(engine.holds().approve(&s.id, &args.by)?));
    output_schedule(global, "approve", result)
}

fn run_entity(global: &GlobalOpts, args: &EntityArgs) -> ExitCode {
    let engine = match Engine::open(global) {
        Ok(e) => e,
        Err(e) => return output_error(global, "entity", e),
    };
    let today = engine.clock.today();

    let (command, result) = match &args.command {
        EntityCommands::Created {
            entity,
            category,
            date,
            document,
        } => {
            let stored = match document {
                Some(path) => store_document(&engine, entity, path),
                None => Ok(()),
            };
            (
                "entity created",
                stored.and_then(|()| {
                    Ok(engine
                        .intake()
                        .entity_created(entity, category, date.unwrap_or(today))?)
                }),
            )
        }
        EntityCommands::Activity { entity, date } => (
            "entity activity",
            engine
                .intake()
                .entity_activity(entity, date.unwrap_or(today))
                .map_err(rl_common::Error::from),
        ),
    };
    output_intake(global, command, result)
}

fn store_document(
    engine: &Engine,
    entity: &EntityRef,
    path: &Path,
) -> Result<(), rl_common::Error> {
    let content = std::fs::read_to_string(path)?;
    let document: serde_json::Value = serde_json::from_str(&content)?;
    engine
        .entities()?
        .put(entity, &document)
        .map_err(|e| rl_common::Error::Storage(e.to_string()))
}

fn run_schedule(global: &GlobalOpts, args: &ScheduleArgs) -> ExitCode {
    let engine = match Engine::open(global) {
        Ok(e) => e,
        Err(e) => return output_error(global, "schedule", e),
    };
    match &args.command {
        ScheduleCommands::Show { target } => output_schedule(global, "schedule show", engine.find(target)),
        ScheduleCommands::Rebase { target } => {
            let result = engine
                .find(target)
                .and_then(|s| Ok(engine.intake().rebase_schedule(&s.id)?));
            output_intake(global, "schedule rebase", result)
        }
        ScheduleCommands::List {
            category,
            entity_type,
            status,
            shard,
        } => {
            let filter = match build_filter(category, entity_type, status, shard) {
                Ok(f) => f,
                Err(message) => return args_error(global, "schedule list", &message),
            };
            match engine.store.list(&filter) {
                Ok(schedules) => {
                    let payload = ScheduleList {
                        count: schedules.len(),
                        filter,
                        schedules,
                    };
                    output(
                        global,
                        "schedule list",
                        &payload,
                        || format!("{} schedules", payload.count),
                        || schedule_list_md(&payload.schedules),
                    );
                    ExitCode::Clean
                }
                Err(e) => output_error(global, "schedule list", e.into()),
            }
        }
    }
}

#[derive(Serialize)]
struct ScheduleList {
    count: usize,
    filter: ScheduleFilter,
    schedules: Vec<RetentionSchedule>,
}

fn build_filter(
    category: &Option<String>,
    entity_type: &Option<String>,
    status: &Option<String>,
    shard: &Option<ShardSpec>,
) -> Result<ScheduleFilter, String> {
    Ok(ScheduleFilter {
        category: category.clone(),
        entity_type: entity_type.as_deref().map(parse_entity_type).transpose()?,
        status: status
            .as_deref()
            .map(|s| s.parse::<ScheduleStatus>())
            .transpose()?,
        shard: *shard,
    })
}

fn parse_entity_type(s: &str) -> Result<EntityType, String> {
    EntityType::parse(s).ok_or_else(|| format!("invalid entity type: {:?}", s))
}

fn schedule_list_md(schedules: &[RetentionSchedule]) -> String {
    let mut out = String::from("| schedule | entity | category | status | deletion date |\n");
    out.push_str("|---|---|---|---|---|\n");
    for s in schedules {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            s.id, s.entity, s.category, s.status, s.dates.deletion_date
        ));
    }
    out
}

fn run_audit(global: &GlobalOpts, args: &AuditArgs) -> ExitCode {
    match args.command {
        AuditCommands::Verify => run_audit_verify(global),
    }
}

fn run_audit_verify(global: &GlobalOpts) -> ExitCode {
    let paths = resolve_paths(global.config_dir.as_deref(), global.data_dir.as_deref());
    let config = match load_config(&paths) {
        Ok(c) => c,
        Err(e) => return output_error(global, "audit verify", e.into()),
    };
    match audit_check(&audit_dir(&config.data_dir)) {
        Ok(report) => {
            let clean = report.is_clean();
            output(
                global,
                "audit verify",
                &report,
                || {
                    format!(
                        "audit verify: {} ({} entries, {} records, {} mismatches)",
                        if clean { "OK" } else { "FAILED" },
                        report.chain.entries_verified,
                        report.records_checked,
                        report.mismatches.len()
                    )
                },
                || {
                    let mut out = String::from("# Audit Verification\n\n");
                    out.push_str(&format!(
                        "Status: {}\n\nEntries verified: {}\nRecords checked: {}\n",
                        if clean { "valid" } else { "INVALID" },
                        report.chain.entries_verified,
                        report.records_checked
                    ));
                    if let Some(link) = &report.chain.broken_link {
                        out.push_str(&format!(
                            "\nChain broken at {}:{} ({:?})\n",
                            link.file, link.line, link.break_type
                        ));
                    }
                    for m in &report.mismatches {
                        out.push_str(&format!("\n- {}\n", m.to_error()));
                    }
                    out
                },
            );
            if clean {
                ExitCode::Clean
            } else {
                ExitCode::VerificationFailed
            }
        }
        Err(e) => output_error(global, "audit verify", e.into()),
    }
}

fn run_policy(global: &GlobalOpts, args: &PolicyArgs) -> ExitCode {
    let engine = match Engine::open(global) {
        Ok(e) => e,
        Err(e) => return output_error(global, "policy", e),
    };
    match args.command {
        PolicyCommands::List => {
            let policies: Vec<_> = engine.registry.policies().cloned().collect();
            output(
                global,
                "policy list",
                &serde_json::json!({ "count": policies.len(), "policies": policies }),
                || format!("{} policies", policies.len()),
                || {
                    let mut out = String::from(
                        "| policy | active | retention | warning | grace | action | auto-delete | approval |\n|---|---|---|---|---|---|---|---|\n",
                    );
                    for p in &policies {
                        out.push_str(&format!(
                            "| {} | {} | {} | {} | {} | {:?} | {} | {} |\n",
                            p.id(),
                            p.active,
                            p.retention_period,
                            p.warning_period,
                            p.grace_period,
                            p.terminal_action(),
                            p.auto_delete_enabled,
                            p.require_manual_approval
                        ));
                    }
                    out
                },
            );
            ExitCode::Clean
        }
        PolicyCommands::Check => {
            let snapshot = engine.config.snapshot();
            output(
                global,
                "policy check",
                &serde_json::json!({ "status": "valid", "config": snapshot }),
                || format!("policy check: OK ({} policies)", snapshot.policy_count),
                || {
                    format!(
                        "# Configuration Validation\n\nStatus: valid\nPolicies: {}\nSettings: {}\nData dir: {}\n",
                        snapshot
                            .policies_path
                            .as_ref()
                            .map_or("none (empty policy set)".to_string(), |p| p.display().to_string()),
                        snapshot
                            .settings_path
                            .as_ref()
                            .map_or("built-in defaults".to_string(), |p| p.display().to_string()),
                        snapshot.data_dir.display()
                    )
                },
            );
            ExitCode::Clean
        }
    }
}

fn print_version(global: &GlobalOpts) {
    let version_info = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "rl_core_version": env!("CARGO_PKG_VERSION"),
    });

    match global.format {
        OutputFormat::Json => println!("{}", to_json(&version_info)),
        OutputFormat::Exitcode => {}
        _ => {
            println!("rl-core {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {}", SCHEMA_VERSION);
        }
    }
}

// ============================================================================
// Output helpers
// ============================================================================

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        format!("{{\"error\": \"serialization failed: {}\"}}", e)
    })
}

/// Print a command payload on stdout in the selected format.
fn output<T, S, M>(global: &GlobalOpts, command: &str, payload: &T, summary: S, md: M)
where
    T: Serialize,
    S: FnOnce() -> String,
    M: FnOnce() -> String,
{
    match global.format {
        OutputFormat::Json => {
            let envelope = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "command": command,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "result": payload,
            });
            println!("{}", to_json(&envelope));
        }
        OutputFormat::Summary => println!("{}", summary()),
        OutputFormat::Md => print!("{}", md()),
        OutputFormat::Exitcode => {}
    }
}

fn output_schedule(
    global: &GlobalOpts,
    command: &str,
    result: Result<RetentionSchedule, rl_common::Error>,
) -> ExitCode {
    match result {
        Ok(schedule) => {
            output(
                global,
                command,
                &schedule,
                || format!("{}: {} {} {}", command, schedule.id, schedule.entity, schedule.status),
                || schedule_md(&schedule),
            );
            ExitCode::Clean
        }
        Err(e) => output_error(global, command, e),
    }
}

fn output_intake(
    global: &GlobalOpts,
    command: &str,
    result: Result<IntakeOutcome, rl_common::Error>,
) -> ExitCode {
    match result {
        Ok(outcome) => {
            let label = match &outcome {
                IntakeOutcome::Created(_) => "created",
                IntakeOutcome::Updated(_) => "updated",
                IntakeOutcome::Unchanged(_) => "unchanged",
            };
            let schedule = outcome.schedule();
            output(
                global,
                command,
                &outcome,
                || format!("{}: {} {} ({})", command, schedule.id, schedule.entity, label),
                || format!("Outcome: {}\n\n{}", label, schedule_md(schedule)),
            );
            ExitCode::Clean
        }
        Err(e) => output_error(global, command, e),
    }
}

fn schedule_md(s: &RetentionSchedule) -> String {
    let mut out = format!("# Schedule {}\n\n", s.id);
    out.push_str(&format!("- Entity: `{}`\n", s.entity));
    out.push_str(&format!("- Category: {} ({})\n", s.category, s.policy_id));
    out.push_str(&format!("- Status: {}\n", s.status));
    out.push_str(&format!("- Last activity: {}\n", s.last_activity_date));
    out.push_str(&format!("- Warning date: {}\n", s.dates.warning_date));
    out.push_str(&format!("- Retention end: {}\n", s.dates.retention_end_date));
    out.push_str(&format!("- Deletion date: {}\n", s.dates.deletion_date));
    if let Some(reason) = &s.legal_hold_reason {
        out.push_str(&format!(
            "- Legal hold: {} (by {})\n",
            reason,
            s.legal_hold_applied_by.as_deref().unwrap_or("unknown")
        ));
    }
    if let Some(by) = &s.approved_by {
        out.push_str(&format!("- Approved by: {}\n", by));
    }
    out
}

/// Reject a flag value clap accepted but the engine cannot use.
fn args_error(global: &GlobalOpts, command: &str, message: &str) -> ExitCode {
    match global.format {
        OutputFormat::Json => {
            let response = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "command": command,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "status": "error",
                "exit_code": ExitCode::ArgsError.code_name(),
                "error": { "message": message },
            });
            eprintln!("{}", to_json(&response));
        }
        OutputFormat::Exitcode => {}
        _ => eprintln!("error: {}", message),
    }
    ExitCode::ArgsError
}

/// Report an error on stderr and map it to an exit code.
fn output_error(global: &GlobalOpts, command: &str, error: rl_common::Error) -> ExitCode {
    let exit_code = ExitCode::for_error(&error);
    match global.format {
        OutputFormat::Json => {
            let response = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "command": command,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "status": "error",
                "exit_code": exit_code.code_name(),
                "error": error.to_structured(),
                "remediation": error.remediation(),
            });
            eprintln!("{}", to_json(&response));
        }
        OutputFormat::Exitcode => {}
        _ => eprintln!("{}", error.format_human()),
    }
    exit_code
}
