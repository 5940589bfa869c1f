use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tempo_core::time::{local_date, local_to_utc, parse_date, parse_hhmm};
use tempo_core::{
    AllocationSummary, AtRiskTask, CommitRequest, DeferRequest, DeferTarget, FocusBlock, PriorityLevel,
    RescheduleRequest, ScheduledTask, SchedulerKernel, Task, Warning,
};

mod calendar;
mod config;
mod state;

use config::Config;
use state::{JsonFileStore, JsonlAuditSink};

/// Single-owner CLI; every task lives in this scope.
const OWNER: &str = "default";

type Kernel = SchedulerKernel<JsonFileStore, JsonlAuditSink>;

#[derive(Parser, Debug)]
#[command(name = "tempo", version, about = "Auto-schedule tasks into focus blocks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default ~/.tempo/config.toml and an empty store
    Init,

    /// Manage the task backlog
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Place the backlog into free time across the horizon
    Allocate {
        /// First day of the horizon (default: today in the configured timezone)
        #[arg(long, value_parser = date_arg)]
        date: Option<NaiveDate>,

        /// Print the plan without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Commit one task to a specific day
    Commit {
        task_id: String,

        #[arg(long, value_parser = date_arg)]
        date: NaiveDate,

        /// Local start time HH:MM (default: earliest free slot that day)
        #[arg(long, value_parser = time_arg)]
        time: Option<NaiveTime>,
    },

    /// Move a task to another day, optionally at a fixed time
    Reschedule {
        task_id: String,

        #[arg(long, value_parser = date_arg)]
        date: NaiveDate,

        #[arg(long, value_parser = time_arg)]
        time: Option<NaiveTime>,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Push a task out: tomorrow, next_week, someday or YYYY-MM-DD
    Defer {
        task_id: String,

        #[arg(long = "to", value_parser = defer_arg, default_value = "tomorrow")]
        to: DeferTarget,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Mark a task done
    Done { task_id: String },

    /// List focus blocks
    Blocks {
        #[arg(long, value_parser = date_arg)]
        from: Option<NaiveDate>,

        #[arg(long, default_value_t = 7)]
        days: u32,
    },

    /// Export focus blocks as an ICS calendar
    ExportIcs {
        #[arg(long, value_parser = date_arg)]
        from: Option<NaiveDate>,

        #[arg(long, default_value_t = 7)]
        days: u32,

        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    /// Add a task to the backlog
    Add {
        title: String,

        #[arg(long, value_parser = priority_arg, default_value = "P3")]
        priority: PriorityLevel,

        /// Minutes
        #[arg(long, default_value_t = 30)]
        duration: u32,

        #[arg(long, value_parser = date_arg)]
        due: Option<NaiveDate>,

        /// Earliest day to work on it
        #[arg(long = "do", value_parser = date_arg)]
        do_date: Option<NaiveDate>,

        #[arg(long, default_value = "")]
        context: String,

        /// Exclude from automatic allocation
        #[arg(long)]
        manual: bool,
    },

    /// List tasks
    List {
        /// Include done tasks
        #[arg(long)]
        all: bool,
    },

    /// Show one task and its commitment state
    Show { task_id: String },
}

fn date_arg(s: &str) -> std::result::Result<NaiveDate, String> {
    parse_date(s).ok_or_else(|| format!("expected YYYY-MM-DD, got '{s}'"))
}

fn time_arg(s: &str) -> std::result::Result<NaiveTime, String> {
    parse_hhmm(s).ok_or_else(|| format!("expected HH:MM, got '{s}'"))
}

fn priority_arg(s: &str) -> std::result::Result<PriorityLevel, String> {
    PriorityLevel::parse(s).ok_or_else(|| format!("expected P1..P4, got '{s}'"))
}

fn defer_arg(s: &str) -> std::result::Result<DeferTarget, String> {
    s.parse::<DeferTarget>().map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tempo=info,tempo_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Command::Init = cli.command {
        config::init_config()?;
        let store = JsonFileStore::open(state::store_path()?)?;
        if !store.path().exists() {
            store.save()?;
            println!("Wrote {}", store.path().display());
        }
        return Ok(());
    }

    let cfg = config::load_config()?;
    let mut kernel = open_kernel(&cfg)?;
    let now = Utc::now();
    let tz = kernel.preferences().tz()?;
    let today = local_date(now, tz);

    match cli.command {
        Command::Init => {}

        Command::Task { command } => match command {
            TaskCommand::Add {
                title,
                priority,
                duration,
                due,
                do_date,
                context,
                manual,
            } => {
                let store = kernel.store_mut();
                let mut task = Task::new(store.next_task_id(), title)
                    .with_owner(OWNER)
                    .with_priority(priority)
                    .with_duration(duration)
                    .with_context(context);
                task.due_date = due;
                task.do_date = do_date;
                if manual {
                    task = task.manual();
                }
                let task = store.add_task(task)?;
                println!("Added {} \"{}\"", task.id, task.title);
            }
            TaskCommand::List { all } => {
                let tasks = kernel.store().tasks();
                if tasks.is_empty() {
                    println!("(no tasks; add one with `tempo task add <title>`)");
                }
                for t in tasks.iter().filter(|t| all || !t.is_done()) {
                    println!("{}", task_line(t));
                }
            }
            TaskCommand::Show { task_id } => {
                let (task, state) = kernel.commitment_state(OWNER, &task_id)?;
                println!("{}", serde_json::to_string_pretty(&task).context("serialize task")?);
                println!("state: {}", serde_json::to_value(state)?.as_str().unwrap_or("unknown"));
                if let Some(reason) = &task.scheduling_metadata.at_risk_reason {
                    println!("at risk: {reason}");
                }
            }
        },

        Command::Allocate { date, dry_run, json } => {
            if dry_run {
                let plan = kernel.plan(OWNER, date, now)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    println!("# Plan (dry run, nothing saved)\n");
                    print_allocation(&plan.scheduled_tasks, &plan.at_risk_tasks, &plan.unscheduled_tasks, &plan.summary, tz);
                }
            } else {
                let resp = kernel.allocate(OWNER, date, now)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&resp)?);
                } else {
                    print_allocation(&resp.scheduled_tasks, &resp.at_risk_tasks, &resp.unscheduled_tasks, &resp.summary, tz);
                    print_warnings(&resp.warnings);
                    for f in &resp.failures {
                        println!("! failed to save {}: {}", f.task_id, f.error);
                    }
                }
            }
        }

        Command::Commit { task_id, date, time } => {
            let resp = kernel.commit(OWNER, CommitRequest { task_id, date, time }, now)?;
            match &resp.block {
                Some(b) => println!("Committed \"{}\" {}", resp.task.title, block_span(b, tz)),
                None => println!("\"{}\" was not moved", resp.task.title),
            }
            print_warnings(&resp.warnings);
        }

        Command::Reschedule {
            task_id,
            date,
            time,
            reason,
        } => {
            let req = RescheduleRequest {
                task_id,
                new_date: date,
                new_time: time,
                reason,
            };
            let resp = kernel.reschedule(OWNER, req, now)?;
            println!("{}", resp.message);
            print_warnings(&resp.warnings);
        }

        Command::Defer { task_id, to, reason } => {
            let resp = kernel.defer(OWNER, DeferRequest { task_id, defer_to: to, reason }, now)?;
            println!("{}", resp.message);
            if resp.defer_count >= 3 {
                println!("(deferred {} times; consider breaking it up or dropping it)", resp.defer_count);
            }
            print_warnings(&resp.warnings);
        }

        Command::Done { task_id } => {
            let task = kernel.complete(OWNER, &task_id, now)?;
            println!("Done: \"{}\"", task.title);
        }

        Command::Blocks { from, days } => {
            let blocks = blocks_between(&kernel, from.unwrap_or(today), days)?;
            if blocks.is_empty() {
                println!("(no blocks)");
            }
            for b in &blocks {
                let mark = if b.completed { "x" } else { " " };
                println!("[{mark}] {}  {}  ({})", block_span(b, tz), b.title, b.id);
            }
        }

        Command::ExportIcs { from, days, out } => {
            let blocks = blocks_between(&kernel, from.unwrap_or(today), days)?;
            let ics = calendar::blocks_to_ics(&blocks, &cfg.calendar.title_prefix);
            match out {
                Some(p) => {
                    std::fs::write(&p, ics).with_context(|| format!("write {}", p.display()))?;
                    println!("Wrote {} events to {}", blocks.len(), p.display());
                }
                None => print!("{ics}"),
            }
        }
    }

    Ok(())
}

fn open_kernel(cfg: &Config) -> Result<Kernel> {
    let prefs = cfg.preferences()?;
    let store = JsonFileStore::open(state::store_path()?)?;
    let audit = JsonlAuditSink::new(state::events_path()?);
    tracing::debug!(
        store = %store.path().display(),
        tasks = store.tasks().len(),
        timezone = %prefs.timezone,
        "opened store"
    );
    Ok(SchedulerKernel::new(store, audit, prefs))
}

/// Blocks overlapping local days `[from, from + days)`.
fn blocks_between(kernel: &Kernel, from: NaiveDate, days: u32) -> Result<Vec<FocusBlock>> {
    if days == 0 {
        bail!("--days must be at least 1");
    }
    let tz = kernel.preferences().tz()?;
    let start = local_to_utc(from, NaiveTime::MIN, tz)?;
    let end = local_to_utc(from + Duration::days(days.into()), NaiveTime::MIN, tz)?;
    Ok(tempo_core::Store::read_blocks_in_range(kernel.store(), start, end)?)
}

fn task_line(t: &Task) -> String {
    let mut line = format!("{:<5} {} {:>4}m  {}", t.id, t.priority_level, t.duration_minutes, t.title);
    if let Some(due) = t.due_date {
        line.push_str(&format!("  due {due}"));
    }
    if t.is_done() {
        line.push_str("  [done]");
    } else if let Some(day) = t.committed_date.filter(|_| t.is_placed()) {
        line.push_str(&format!("  [scheduled {day}]"));
    } else if t.is_at_risk() {
        line.push_str("  [at risk]");
    }
    line
}

fn block_span(b: &FocusBlock, tz: chrono_tz::Tz) -> String {
    let start = b.start_time.with_timezone(&tz);
    let end = b.end_time.with_timezone(&tz);
    format!("{} {}-{}", start.format("%a %Y-%m-%d"), start.format("%H:%M"), end.format("%H:%M"))
}

fn print_allocation(
    scheduled: &[ScheduledTask],
    at_risk: &[AtRiskTask],
    unscheduled: &[Task],
    summary: &AllocationSummary,
    tz: chrono_tz::Tz,
) {
    println!("## Scheduled ({})\n", summary.total_scheduled);
    for s in scheduled {
        println!("- {}  {} ({})", block_span(&s.block, tz), s.task.title, s.task.id);
    }
    if !at_risk.is_empty() {
        println!("\n## At risk ({})\n", summary.total_at_risk);
        for r in at_risk {
            println!("- {} ({}): {}. Try: {}", r.task.title, r.task.id, r.reason, r.suggested_action);
        }
    }
    if !unscheduled.is_empty() {
        println!("\n## Not placed this pass\n");
        for t in unscheduled {
            println!("- {} ({})", t.title, t.id);
        }
    }
    println!(
        "\n{} scheduled, {} unscheduled, {} at risk, {} minutes placed",
        summary.total_scheduled, summary.total_unscheduled, summary.total_at_risk, summary.total_minutes_scheduled
    );
}

fn print_warnings(warnings: &[Warning]) {
    for w in warnings {
        println!("warning [{}]: {}", w.task_id, w.message);
    }
}
