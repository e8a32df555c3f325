//! # ShiftClaw: group attendance and timed-break tracker
//!
//! Usage:
//!   shiftclaw serve                                   # Run the scheduler until Ctrl+C
//!   shiftclaw checkin -g -100 -m 42 --name Dara       # Record a check-in
//!   shiftclaw break -g -100 -m 42 smoke start         # Start a smoke break
//!   shiftclaw report -g -100 daily                    # Print today's digest as JSON
//!   shiftclaw settings -g -100 timezone Asia/Phnom_Penh

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use shiftclaw_attendance::{Actor, Attendance, JobRunner};
use shiftclaw_core::{BreakKind, GroupId, HourMinute, MemberId, ShiftClawConfig, WorkSchedule};
use shiftclaw_scheduler::{SchedulerEngine, TracingSink, spawn_scheduler};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "shiftclaw",
    version,
    about = "⏱️ ShiftClaw: group attendance and timed-break tracker"
)]
struct Cli {
    /// Config file (default: ~/.shiftclaw/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file
    Init,
    /// Restore timers and run the scheduler until Ctrl+C
    Serve,
    /// Record a check-in
    Checkin {
        #[arg(short, long, allow_hyphen_values = true)]
        group: i64,
        #[arg(short, long)]
        member: i64,
        #[arg(long)]
        name: String,
    },
    /// Start or stop a work shift
    Work {
        #[arg(short, long, allow_hyphen_values = true)]
        group: i64,
        #[arg(short, long)]
        member: i64,
        action: Toggle,
    },
    /// Start or stop a break
    Break {
        #[arg(short, long, allow_hyphen_values = true)]
        group: i64,
        #[arg(short, long)]
        member: i64,
        /// smoke | toilet | takeout
        kind: String,
        action: Toggle,
    },
    /// Print a digest report as JSON
    Report {
        #[arg(short, long, allow_hyphen_values = true)]
        group: i64,
        period: Period,
    },
    /// Check-in leaderboard
    Leaderboard {
        #[arg(short, long, allow_hyphen_values = true)]
        group: i64,
        /// Only count the last N days
        #[arg(long)]
        days: Option<i64>,
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Check-in stats of one member
    Stats {
        #[arg(short, long, allow_hyphen_values = true)]
        group: i64,
        #[arg(short, long)]
        member: i64,
    },
    /// Show or change group settings (the local operator acts as an elevated member)
    Settings {
        #[arg(short, long, allow_hyphen_values = true)]
        group: i64,
        #[command(subcommand)]
        change: Option<SettingsChange>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    Start,
    Stop,
}

#[derive(Clone, Copy, ValueEnum)]
enum Period {
    Daily,
    Weekly,
    Compact,
}

#[derive(Subcommand)]
enum SettingsChange {
    /// IANA zone, e.g. Asia/Phnom_Penh
    Timezone { name: String },
    /// zh | en | vi
    Language { language: String },
    /// HH:MM, or "off"
    ReportTime { at: String },
    /// HH:MM, or "off"
    GreetingTime { at: String },
    /// HH:MM-HH:MM on every weekday, or "off"
    WorkHours { range: String },
}

const OPERATOR: Actor = Actor {
    member: MemberId(0),
    elevated: true,
};

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn parse_optional_time(raw: &str) -> Result<Option<HourMinute>> {
    if raw.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    Ok(Some(raw.parse()?))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&str>) -> Result<ShiftClawConfig> {
    let config = match path {
        Some(p) => ShiftClawConfig::load_from(&expand_path(p))
            .with_context(|| format!("loading config from {p}"))?,
        None => ShiftClawConfig::load().context("loading default config")?,
    };
    Ok(config)
}

fn open_service(config: ShiftClawConfig, db_override: Option<&str>) -> Result<Attendance> {
    let db_path = expand_path(db_override.unwrap_or(&config.database_path));
    if let Some(parent) = Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let attendance = Attendance::open_sqlite(config, &db_path, SchedulerEngine::shared())?;
    Ok(attendance)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "shiftclaw=debug,shiftclaw_attendance=debug,shiftclaw_scheduler=debug"
    } else {
        "shiftclaw=info,shiftclaw_attendance=info,shiftclaw_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if let Command::Init = cli.command {
        let path = cli
            .config
            .as_deref()
            .map(expand_path)
            .unwrap_or_else(ShiftClawConfig::default_path);
        if path.exists() {
            println!("⚠️  Config already exists at {}", path.display());
        } else {
            ShiftClawConfig::default().save_to(&path)?;
            println!("✅ Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let attendance = open_service(config, cli.db.as_deref())?;
    let now = Utc::now();

    match cli.command {
        Command::Init => {}
        Command::Serve => serve(Arc::new(attendance)).await?,
        Command::Checkin { group, member, name } => {
            let reply = attendance
                .check_in(GroupId(group), MemberId(member), &name, now)
                .await?;
            print_json(&reply)?;
        }
        Command::Work { group, member, action } => {
            let (group, member) = (GroupId(group), MemberId(member));
            match action {
                Toggle::Start => print_json(&attendance.start_work(group, member, now).await?)?,
                Toggle::Stop => print_json(&attendance.stop_work(group, member, now).await?)?,
            }
        }
        Command::Break { group, member, kind, action } => {
            let kind: BreakKind = kind.parse()?;
            let (group, member) = (GroupId(group), MemberId(member));
            match action {
                Toggle::Start => {
                    print_json(&attendance.start_break(group, member, kind, now).await?)?
                }
                Toggle::Stop => print_json(&attendance.stop_break(group, member, kind, now).await?)?,
            }
        }
        Command::Report { group, period } => {
            let group = GroupId(group);
            match period {
                Period::Daily => print_json(&attendance.daily_report_payload(group, now, now)?)?,
                Period::Weekly => print_json(&attendance.weekly_report_payload(group, now, now)?)?,
                Period::Compact => print_json(&attendance.compact_digest(group, now, now)?)?,
            }
        }
        Command::Leaderboard { group, days, limit } => {
            let since = days.map(|d| now - Duration::days(d));
            print_json(&attendance.leaderboard(GroupId(group), since, limit)?)?;
        }
        Command::Stats { group, member } => {
            print_json(&attendance.member_stats(GroupId(group), MemberId(member))?)?;
        }
        Command::Settings { group, change } => {
            let group = GroupId(group);
            let outcome = match change {
                None => return print_json(&attendance.settings_for(group)?),
                Some(SettingsChange::Timezone { name }) => {
                    attendance.set_timezone(group, OPERATOR, &name, now).await?
                }
                Some(SettingsChange::Language { language }) => {
                    attendance.set_language(group, OPERATOR, &language, now).await?
                }
                Some(SettingsChange::ReportTime { at }) => {
                    attendance
                        .set_report_time(group, OPERATOR, parse_optional_time(&at)?, now)
                        .await?
                }
                Some(SettingsChange::GreetingTime { at }) => {
                    attendance
                        .set_greeting_time(group, OPERATOR, parse_optional_time(&at)?, now)
                        .await?
                }
                Some(SettingsChange::WorkHours { range }) => {
                    let schedule = if range.eq_ignore_ascii_case("off") {
                        None
                    } else {
                        Some(WorkSchedule::parse_range(&range)?)
                    };
                    attendance.set_work_schedule(group, OPERATOR, schedule, now).await?
                }
            };
            print_json(&outcome)?;
        }
    }

    Ok(())
}

/// Re-derive every registration, then tick until Ctrl+C.
async fn serve(attendance: Arc<Attendance>) -> Result<()> {
    println!("⏱️ ShiftClaw v{}", env!("CARGO_PKG_VERSION"));

    let restored = attendance.restore_timers(Utc::now()).await?;
    println!(
        "   Restored {} group(s), {} job(s), {} break timer(s)",
        restored.groups, restored.jobs, restored.break_timers
    );

    let runner = Arc::new(JobRunner::new(attendance.clone(), Arc::new(TracingSink)));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = tokio::spawn(spawn_scheduler(
        attendance.scheduler().clone(),
        runner,
        attendance.config().scheduler.check_interval_secs,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutting down");
    shutdown_tx.send(true).ok();
    scheduler.await?;
    Ok(())
}
