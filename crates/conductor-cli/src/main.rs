//! Conductor CLI - development-session orchestration
//!
//! Usage:
//!   conductor init                         Create .conductor/config.toml
//!   conductor session start <request>      Start a session
//!   conductor plan log <overview>          Log a new plan version
//!   conductor critic spawn <kind> <name>   Register a critic
//!   conductor task create <name>           Add a task to the graph
//!   conductor qa spawn <name>              Register the final QA reviewer
//!   conductor event list                   Show recent events

mod exit;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use conductor_core::{
    ConductorConfig, ConductorError, CriticId, CriticKind, CriticResult, EventLevel, FileChange,
    IssueCounts, QaId, QaResult, SessionId, SessionStatus, TaskId, TaskPhase,
};
use conductor_orchestrator::{Engine, EngineOptions, Timeline};
use conductor_store::StorageMode;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "conductor")]
#[command(author, version, about = "Development-session orchestration")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Session to act on (defaults to the most recently started)
    #[arg(long, global = true)]
    session: Option<String>,

    /// Workspace root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .conductor/config.toml
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Session lifecycle
    Session {
        #[command(subcommand)]
        action: SessionCommands,
    },

    /// Plan versions
    Plan {
        #[command(subcommand)]
        action: PlanCommands,
    },

    /// Review workers
    Critic {
        #[command(subcommand)]
        action: CriticCommands,
    },

    /// Task graph and TDD phases
    Task {
        #[command(subcommand)]
        action: TaskCommands,
    },

    /// Final quality gate
    Qa {
        #[command(subcommand)]
        action: QaCommands,
    },

    /// Event log
    Event {
        #[command(subcommand)]
        action: EventCommands,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Start a new session
    Start {
        /// What the session is meant to deliver
        request: String,

        /// Maximum unreported critics at once
        #[arg(long)]
        critic_concurrency: Option<usize>,

        /// Accept out-of-order TDD phases
        #[arg(long)]
        no_tdd: bool,

        /// Make QA optional
        #[arg(long)]
        no_qa: bool,

        /// Minimum passing QA score
        #[arg(long)]
        qa_threshold: Option<u8>,
    },

    /// Show session status
    Status,

    /// End the session
    End {
        /// completed, failed or cancelled
        status: String,

        /// Closing note
        #[arg(long)]
        summary: Option<String>,
    },

    /// List recent sessions
    List {
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Write the session timeline to .conductor/
    Timeline,
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Log a new plan version
    Log {
        overview: String,

        /// Component name (repeatable)
        #[arg(long = "component")]
        components: Vec<String>,

        /// Planned change as kind:path, e.g. create:src/cache.rs (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,
    },

    /// Show the current plan
    Show {
        /// Show every version
        #[arg(long)]
        history: bool,
    },
}

#[derive(Subcommand)]
enum CriticCommands {
    /// Register a critic
    Spawn {
        /// structural-design, test-discipline, dependency-hygiene, security,
        /// performance, or any custom name
        kind: String,
        name: String,
    },

    /// Deliver a critic's findings
    Report {
        id: String,
        findings: String,

        #[arg(long, default_value = "0")]
        critical: u32,

        #[arg(long, default_value = "0")]
        major: u32,

        #[arg(long, default_value = "0")]
        minor: u32,

        /// The critic did not finish in time
        #[arg(long)]
        timed_out: bool,
    },

    /// Log a synthesis over reported critics
    Synthesize { narrative: String },

    /// List critics
    List,
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Create a task
    Create {
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Task this one depends on (repeatable)
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
    },

    /// Start a task (phase red)
    Start { id: String },

    /// Move a task to a TDD phase
    Phase { id: String, phase: String },

    /// Send a task back to red
    Reopen { id: String, reason: String },

    /// Add a dependency to a pending task
    Depend { id: String, on: String },

    /// Show the task graph
    Graph,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Verdict {
    Pass,
    Fail,
}

#[derive(Subcommand)]
enum QaCommands {
    /// Register a QA reviewer
    Spawn {
        name: String,

        /// Run QA even though the session does not require it
        #[arg(long = "override")]
        override_not_required: bool,
    },

    /// Deliver a QA verdict
    Report {
        id: String,
        score: u8,
        verdict: Verdict,

        #[arg(long, default_value = "")]
        notes: String,
    },

    /// List QA reviews
    List,
}

#[derive(Subcommand)]
enum EventCommands {
    /// Append a note to the event log
    Log {
        message: String,

        #[arg(long, default_value = "info")]
        level: String,
    },

    /// Show recent events, newest first
    List {
        #[arg(short = 'n', long)]
        count: Option<usize>,

        #[arg(long)]
        min_level: Option<String>,
    },
}

/// Everything a command needs
struct App {
    engine: Engine,
    config: ConductorConfig,
    root: PathBuf,
    json: bool,
    session: Option<String>,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = ConductorConfig::load_or_default(&cli.root)?;
        let store = StorageMode::Journal(config.journal_path(&cli.root)).open();
        let engine = Engine::open(store, EngineOptions::from_config(&config)).await?;
        debug!("Using {}", engine.store_description());

        Ok(Self {
            engine,
            config,
            root: cli.root.clone(),
            json: cli.json,
            session: cli.session.clone(),
        })
    }

    /// Explicit `--session`, else the most recently started session
    async fn session_id(&self) -> Result<SessionId> {
        if let Some(id) = &self.session {
            return Ok(id.parse::<SessionId>()?);
        }
        match self.engine.current_session().await {
            Some(id) => Ok(id),
            None => Err(ConductorError::not_found("Session", "current"))
                .context("no session yet; run `conductor session start <request>`"),
        }
    }

    /// Print `value` as JSON, or run `human` for text output
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("warning: logging unavailable: {}", e);
    }

    let json = cli.json;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err, json);
            ExitCode::from(exit::code_of(&err))
        }
    }
}

fn report_error(err: &anyhow::Error, json: bool) {
    let kind = exit::engine_error(err)
        .map(|e| e.kind().as_str())
        .unwrap_or("unexpected");

    if json {
        let body = serde_json::json!({
            "error": {
                "kind": kind,
                "message": format!("{:#}", err),
            }
        });
        println!("{}", body);
    } else {
        eprintln!("error[{}]: {:#}", kind, err);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { force } = cli.command {
        return cmd_init(&cli.root, force, cli.json);
    }

    let ctx = App::open(&cli).await?;
    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Session { action } => cmd_session(&ctx, action).await,
        Commands::Plan { action } => cmd_plan(&ctx, action).await,
        Commands::Critic { action } => cmd_critic(&ctx, action).await,
        Commands::Task { action } => cmd_task(&ctx, action).await,
        Commands::Qa { action } => cmd_qa(&ctx, action).await,
        Commands::Event { action } => cmd_event(&ctx, action).await,
    }
}

fn cmd_init(root: &std::path::Path, force: bool, json: bool) -> Result<()> {
    let path = ConductorConfig::path(root);
    let created = if path.exists() && !force {
        false
    } else {
        ConductorConfig::write_default(root)?;
        true
    };

    if json {
        println!(
            "{}",
            serde_json::json!({ "config": path, "created": created })
        );
    } else if created {
        println!("Initialized Conductor in {}", root.display());
        println!("Created:");
        println!("  {}", path.display());
    } else {
        println!("Already initialized: {} (use --force to overwrite)", path.display());
    }
    Ok(())
}

async fn cmd_session(ctx: &App, action: SessionCommands) -> Result<()> {
    match action {
        SessionCommands::Start {
            request,
            critic_concurrency,
            no_tdd,
            no_qa,
            qa_threshold,
        } => {
            let mut config = ctx.config.session_config();
            if let Some(limit) = critic_concurrency {
                config = config.with_critic_concurrency(limit);
            }
            if no_tdd {
                config = config.with_tdd_enforced(false);
            }
            if no_qa {
                config = config.with_qa_required(false);
            }
            if let Some(threshold) = qa_threshold {
                config = config.with_qa_pass_threshold(threshold);
            }

            let id = ctx.engine.start_session(&request, config).await?;
            ctx.emit(&serde_json::json!({ "session_id": id }), || {
                println!("Started session {}", id);
            })
        }

        SessionCommands::Status => {
            let id = ctx.session_id().await?;
            let session = ctx.engine.status(&id).await?;
            let summary = ctx.engine.summary(&id).await?;
            let max_score = ctx.config.qa.max_score;
            ctx.emit(
                &serde_json::json!({ "session": session, "summary": summary }),
                || {
                    println!("Conductor Session {}", session.id);
                    println!("====================================");
                    println!("Request:  {}", session.request);
                    println!("Status:   {}", session.status);
                    println!(
                        "Started:  {}",
                        session.started_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    if let Some(ended) = session.ended_at {
                        println!("Ended:    {}", ended.format("%Y-%m-%d %H:%M:%S UTC"));
                    }
                    match summary.plan_version {
                        Some(v) => println!("Plan:     v{}", v),
                        None => println!("Plan:     none"),
                    }
                    println!(
                        "Critics:  {} spawned, {} reported, {} abandoned ({} slots free)",
                        summary.critics_spawned,
                        summary.critics_reported,
                        summary.critics_abandoned,
                        summary.available_critic_slots
                    );
                    println!(
                        "Tasks:    {} pending ({} ready), {} in progress, {} done",
                        summary.tasks_pending,
                        summary.tasks_ready,
                        summary.tasks_in_progress,
                        summary.tasks_done
                    );
                    println!("QA:       {}", qa_line(summary.qa_verdict.as_ref(), max_score));
                    println!("Events:   {}", summary.event_count);
                },
            )
        }

        SessionCommands::End { status, summary } => {
            let id = ctx.session_id().await?;
            let status: SessionStatus = status.parse()?;
            ctx.engine.end_session(&id, status, summary).await?;
            ctx.emit(
                &serde_json::json!({ "session_id": id, "status": status }),
                || println!("Session {} {}", id, status),
            )
        }

        SessionCommands::List { count } => {
            let sessions = ctx.engine.list_sessions(count).await;
            ctx.emit(&sessions, || {
                if sessions.is_empty() {
                    println!("No sessions");
                }
                for s in &sessions {
                    println!(
                        "{}  {:<9}  {}",
                        s.id,
                        s.status.to_string(),
                        s.request.lines().next().unwrap_or("")
                    );
                }
            })
        }

        SessionCommands::Timeline => {
            let id = ctx.session_id().await?;
            let session = ctx.engine.status(&id).await?;
            let mut events = ctx.engine.get_events(&id, usize::MAX, None).await?;
            events.reverse();

            let timeline = Timeline::new(ctx.root.join(conductor_core::CONDUCTOR_DIR));
            let path = timeline.write(&session, &events).await?;
            ctx.emit(&serde_json::json!({ "timeline": path }), || {
                println!("Wrote {}", path.display())
            })
        }
    }
}

/// QA verdict against the configured score ceiling
fn qa_line(verdict: Option<&QaResult>, max_score: u8) -> String {
    match verdict {
        Some(v) => format!(
            "{} ({}/{})",
            if v.passed { "passed" } else { "failed" },
            v.score,
            max_score
        ),
        None => "not reported".to_string(),
    }
}

async fn cmd_plan(ctx: &App, action: PlanCommands) -> Result<()> {
    let id = ctx.session_id().await?;
    match action {
        PlanCommands::Log {
            overview,
            components,
            files,
        } => {
            let file_changes = files
                .iter()
                .map(|f| f.parse::<FileChange>())
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let version = ctx
                .engine
                .log_plan(&id, &overview, components, file_changes)
                .await?;
            ctx.emit(&serde_json::json!({ "version": version }), || {
                println!("Logged plan v{}", version)
            })
        }

        PlanCommands::Show { history } => {
            let plans = if history {
                ctx.engine.plan_history(&id).await?
            } else {
                vec![ctx.engine.get_plan(&id).await?]
            };
            ctx.emit(&plans, || {
                for plan in &plans {
                    println!("Plan v{}", plan.version);
                    println!("  {}", plan.overview);
                    if !plan.components.is_empty() {
                        println!("  Components: {}", plan.components.join(", "));
                    }
                    for change in &plan.file_changes {
                        println!("  - {} {}", change.kind, change.path);
                    }
                }
            })
        }
    }
}

async fn cmd_critic(ctx: &App, action: CriticCommands) -> Result<()> {
    let id = ctx.session_id().await?;
    match action {
        CriticCommands::Spawn { kind, name } => {
            let kind: CriticKind = kind.parse()?;
            let critic = ctx.engine.spawn_critic(&id, kind, &name).await?;
            ctx.emit(&serde_json::json!({ "critic_id": critic.to_string() }), || {
                println!("Spawned {}", critic)
            })
        }

        CriticCommands::Report {
            id: critic,
            findings,
            critical,
            major,
            minor,
            timed_out,
        } => {
            let critic: CriticId = critic.parse()?;
            let mut result = CriticResult::new(findings, IssueCounts::new(critical, major, minor));
            result.timed_out = timed_out;
            let outcome = ctx.engine.report_critic(&id, critic, result).await?;
            ctx.emit(&serde_json::json!({ "outcome": outcome }), || {
                println!("Recorded report from {} ({:?})", critic, outcome)
            })
        }

        CriticCommands::Synthesize { narrative } => {
            ctx.engine.log_synthesis(&id, &narrative).await?;
            let synthesis = ctx.engine.synthesis(&id).await?;
            ctx.emit(&synthesis, || println!("Logged synthesis"))
        }

        CriticCommands::List => {
            let critics = ctx.engine.critics(&id).await?;
            ctx.emit(&critics, || {
                for c in &critics {
                    let issues = c
                        .result
                        .as_ref()
                        .map(|r| r.issues.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<10} {:<20} {:<10} {}{}",
                        c.id.to_string(),
                        c.kind.to_string(),
                        c.state.to_string(),
                        issues,
                        if c.late { " (late)" } else { "" }
                    );
                }
            })
        }
    }
}

fn parse_task_id(s: &str) -> Result<TaskId> {
    Ok(s.parse::<TaskId>()?)
}

async fn cmd_task(ctx: &App, action: TaskCommands) -> Result<()> {
    let id = ctx.session_id().await?;
    match action {
        TaskCommands::Create {
            name,
            description,
            depends_on,
        } => {
            let deps = depends_on
                .iter()
                .map(|d| parse_task_id(d.as_str()))
                .collect::<Result<Vec<_>>>()?;
            let task = ctx.engine.create_task(&id, &name, &description, deps).await?;
            ctx.emit(&serde_json::json!({ "task_id": task.to_string() }), || {
                println!("Created {}", task)
            })
        }

        TaskCommands::Start { id: task } => {
            let task = parse_task_id(&task)?;
            ctx.engine.start_task(&id, task).await?;
            let task = ctx.engine.get_task(&id, task).await?;
            ctx.emit(&task, || println!("Started {} (red)", task.id))
        }

        TaskCommands::Phase { id: task, phase } => {
            let task = parse_task_id(&task)?;
            let phase: TaskPhase = phase.parse()?;
            ctx.engine.set_task_phase(&id, task, phase).await?;
            let task = ctx.engine.get_task(&id, task).await?;
            ctx.emit(&task, || println!("{} is now {}", task.id, task.phase))
        }

        TaskCommands::Reopen { id: task, reason } => {
            let task = parse_task_id(&task)?;
            ctx.engine.reopen_task(&id, task, &reason).await?;
            let task = ctx.engine.get_task(&id, task).await?;
            ctx.emit(&task, || {
                println!("Reopened {} (reopen #{})", task.id, task.reopen_count)
            })
        }

        TaskCommands::Depend { id: task, on } => {
            let task = parse_task_id(&task)?;
            let on = parse_task_id(&on)?;
            ctx.engine.add_dependency(&id, task, on).await?;
            ctx.emit(
                &serde_json::json!({ "task_id": task.to_string(), "depends_on": on.to_string() }),
                || println!("{} now depends on {}", task, on),
            )
        }

        TaskCommands::Graph => {
            let nodes = ctx.engine.graph(&id).await?;
            ctx.emit(&nodes, || {
                if nodes.is_empty() {
                    println!("No tasks");
                }
                for node in &nodes {
                    let state = if node.ready {
                        "ready".to_string()
                    } else if node.waiting_on.is_empty() {
                        node.task.phase.to_string()
                    } else {
                        format!(
                            "waiting on {}",
                            node.waiting_on
                                .iter()
                                .map(|t| t.to_string())
                                .collect::<Vec<_>>()
                                .join(", ")
                        )
                    };
                    println!("{:<8} {:<24} {}", node.task.id.to_string(), node.task.name, state);
                }
            })
        }
    }
}

async fn cmd_qa(ctx: &App, action: QaCommands) -> Result<()> {
    let id = ctx.session_id().await?;
    match action {
        QaCommands::Spawn {
            name,
            override_not_required,
        } => {
            let qa = ctx
                .engine
                .spawn_qa(&id, &name, override_not_required)
                .await?;
            ctx.emit(&serde_json::json!({ "qa_id": qa.to_string() }), || {
                println!("Spawned {}", qa)
            })
        }

        QaCommands::Report {
            id: qa,
            score,
            verdict,
            notes,
        } => {
            let qa: QaId = qa.parse()?;
            let passed = matches!(verdict, Verdict::Pass);
            let outcome = ctx.engine.report_qa(&id, qa, score, passed, &notes).await?;
            ctx.emit(&serde_json::json!({ "outcome": outcome }), || {
                println!(
                    "{} {} with score {}",
                    qa,
                    if passed { "passed" } else { "failed" },
                    score
                )
            })
        }

        QaCommands::List => {
            let reviews = ctx.engine.qa_reviews(&id).await?;
            ctx.emit(&reviews, || {
                for r in &reviews {
                    let verdict = r
                        .result
                        .as_ref()
                        .map(|v| {
                            format!("{} ({})", if v.passed { "pass" } else { "fail" }, v.score)
                        })
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<6} {:<20} {:<10} {}",
                        r.id.to_string(),
                        r.name,
                        r.state.to_string(),
                        verdict
                    );
                }
            })
        }
    }
}

async fn cmd_event(ctx: &App, action: EventCommands) -> Result<()> {
    let id = ctx.session_id().await?;
    match action {
        EventCommands::Log { message, level } => {
            let level: EventLevel = level.parse()?;
            let seq = ctx.engine.log_event(&id, &message, level).await?;
            ctx.emit(&serde_json::json!({ "seq": seq }), || {
                println!("Logged event #{}", seq)
            })
        }

        EventCommands::List { count, min_level } => {
            let min_level = min_level
                .map(|l| l.parse::<EventLevel>())
                .transpose()?;
            let count = count.unwrap_or(ctx.config.events.default_count);
            let events = ctx.engine.get_events(&id, count, min_level).await?;
            ctx.emit(&events, || {
                for e in &events {
                    println!(
                        "#{:<4} {} {:<7} [{}] {}{}",
                        e.seq,
                        e.timestamp.format("%H:%M:%S"),
                        e.level.to_string(),
                        e.source,
                        e.message,
                        e.marker.map(|m| format!(" ({})", m)).unwrap_or_default()
                    );
                }
            })
        }
    }
}
