use std::io::Read;
use std::sync::Arc;

use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use scriptler_core::{config::ScriptlerConfig, ExecutionMode, Language};
use scriptler_executor::prompt::{FixedAnswer, Prompt, TracingNotifier};
use scriptler_scheduler::{planner, Occurrence, SchedulerEngine};
use tracing::{error, info, warn};

mod app;
mod console;
mod when;

use app::App;
use when::{to_spec, UnitArg, When};

#[derive(Parser)]
#[command(name = "scriptler", version, about = "Store, run and schedule small scripts")]
struct Cli {
    /// Config file (default: $SCRIPTLER_CONFIG or ~/.scriptler/scriptler.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored scripts
    List,

    /// Create an empty script
    New {
        name: String,
        #[arg(long, default_value = "python")]
        lang: Language,
    },

    /// Replace a script's source with a file (or stdin)
    Save {
        name: String,
        #[arg(long)]
        from: Option<String>,
    },

    /// Rename a script
    Rename { name: String, new_name: String },

    /// Delete a script and its log, canceling its schedule
    Delete { name: String },

    /// Run a script now, interactively
    Run {
        name: String,
        /// Answer yes to every confirmation
        #[arg(long)]
        yes: bool,
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Schedule a script (replaces any existing schedule)
    Schedule {
        name: String,
        #[command(flatten)]
        when: When,
        /// Unit for --every
        #[arg(long, value_enum, default_value = "minutes")]
        unit: UnitArg,
        /// Time of day for --every-days
        #[arg(long, value_name = "HH:MM")]
        time: Option<String>,
    },

    /// Stop future runs of a script (or of every script with --all)
    Pause {
        #[arg(required_unless_present = "all")]
        name: Option<String>,
        #[arg(long)]
        all: bool,
    },

    /// Show a script's schedule
    Status {
        name: String,
        #[arg(long)]
        json: bool,
    },

    /// Print a script's execution log
    Logs { name: String },

    /// Run the scheduler and execute due scripts until Ctrl-C
    Daemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "scriptler=info,scriptler_executor=info,scriptler_scheduler=info".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // explicit flag > SCRIPTLER_CONFIG env > ~/.scriptler/scriptler.toml
    let config_path = cli.config.or_else(|| std::env::var("SCRIPTLER_CONFIG").ok());
    let config = ScriptlerConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ScriptlerConfig::default()
    });
    let app = App::new(config);

    match cli.cmd {
        Command::List => {
            for script in app.store.list().await? {
                println!("{:<24} {}", script.name, script.language);
            }
        }
        Command::New { name, lang } => {
            let entry = app.store.create(&name, lang).await?;
            println!("{}", entry.identity);
        }
        Command::Save { name, from } => {
            let entry = app.store.find(&name).await?;
            let source = match from {
                Some(path) => tokio::fs::read_to_string(&path).await?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            app.store.write(&entry.identity, &source).await?;
            println!("Saved {} ({} bytes)", entry.name, source.len());
        }
        Command::Rename { name, new_name } => {
            let old = app.store.find(&name).await?;
            let scheduler = app.scheduler()?;
            let was_scheduled = planner::status(&scheduler, &old.identity)?.is_scheduled();
            // The identity is the path, so the old schedule cannot follow the rename.
            planner::pause(&scheduler, &old.identity)?;
            let renamed = app.store.rename(&name, &new_name).await?;
            println!("{}", renamed.identity);
            if was_scheduled {
                println!("Schedule of '{name}' was canceled; schedule '{new_name}' again.");
            }
        }
        Command::Delete { name } => {
            let entry = app.store.find(&name).await?;
            planner::pause(&app.scheduler()?, &entry.identity)?;
            app.store.delete(&name).await?;
            println!("Deleted {name}");
        }
        Command::Run { name, yes, args } => {
            let entry = app.store.find(&name).await?;
            let prompt: Arc<dyn Prompt> = if yes {
                Arc::new(FixedAnswer(true))
            } else {
                Arc::new(console::StdinPrompt)
            };
            let bridge = app.bridge(prompt, Arc::new(console::ConsoleNotifier));
            // Run on a worker task, away from the task reading the terminal.
            let identity = entry.identity.clone();
            let result = tokio::spawn(async move {
                bridge
                    .run_occurrence(&identity, ExecutionMode::Interactive, &args)
                    .await
            })
            .await?;
            if let Some(record) = &result.record {
                println!("{record}");
            }
            if !result.success {
                std::process::exit(1);
            }
        }
        Command::Schedule {
            name,
            when,
            unit,
            time,
        } => {
            let entry = app.store.find(&name).await?;
            let spec = to_spec(&when, unit, time.as_deref())?;
            let scheduler = app.scheduler()?;
            let trigger = planner::schedule(&scheduler, &entry.identity, &spec, &Local::now())?;
            let next = planner::status(&scheduler, &entry.identity)?.next_run;
            match (trigger.repeat_period, next) {
                (Some(period), Some(next)) => println!(
                    "Scheduled {name}: next run {}, then every {}",
                    next.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    human_period(period.as_secs())
                ),
                (None, Some(next)) => println!(
                    "Scheduled {name}: runs once at {}",
                    next.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                ),
                _ => println!("Scheduled {name}"),
            }
        }
        Command::Pause { name, all } => {
            let scheduler = app.scheduler()?;
            if all {
                let n = scheduler.cancel_all()?;
                println!("Canceled {n} schedule(s)");
            } else if let Some(name) = name {
                let entry = app.store.find(&name).await?;
                planner::pause(&scheduler, &entry.identity)?;
                println!("Paused {name}");
            }
        }
        Command::Status { name, json } => {
            let entry = app.store.find(&name).await?;
            let status = planner::status(&app.scheduler()?, &entry.identity)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                let state = status
                    .state
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "not scheduled".to_string());
                println!("{name}: {state}");
                if let Some(next) = status.next_run {
                    println!(
                        "  next run: {}",
                        next.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                    );
                }
                if let Some(period) = status.period_secs {
                    println!("  repeats:  every {}", human_period(period));
                }
                println!("  runs:     {}", status.run_count);
            }
        }
        Command::Logs { name } => {
            let entry = app.store.find(&name).await?;
            print!("{}", app.store.read_log(&entry.identity).await?);
        }
        Command::Daemon => daemon(app).await?,
    }

    Ok(())
}

/// Scheduler engine + unattended job bridge until Ctrl-C.
async fn daemon(app: App) -> anyhow::Result<()> {
    let handle = app.scheduler()?;
    let bridge = Arc::new(app.bridge(Arc::new(FixedAnswer(false)), Arc::new(TracingNotifier)));

    // Fired-occurrence channel: SchedulerEngine → bridge tasks
    let (fired_tx, mut fired_rx) = tokio::sync::mpsc::channel::<Occurrence>(256);
    let engine = SchedulerEngine::new(handle.clone(), fired_tx, app.tick());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    info!(scripts_dir = %app.store.root().display(), "scriptler daemon running");

    // Occurrences in flight; drained before exit so every one reports back.
    let mut running = tokio::task::JoinSet::new();
    loop {
        tokio::select! {
            fired = fired_rx.recv() => {
                let Some(occurrence) = fired else { break };
                let bridge = Arc::clone(&bridge);
                let handle = handle.clone();
                running.spawn(async move {
                    let result = bridge
                        .run_occurrence(&occurrence.identity, ExecutionMode::Unattended, &[])
                        .await;
                    if let Err(e) = handle.complete(&occurrence.entry_id, result.success, Utc::now()) {
                        error!(entry_id = %occurrence.entry_id, "failed to report completion: {e}");
                    }
                });
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    error!("occurrence task failed: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    engine_task.await?;

    if !running.is_empty() {
        info!(count = running.len(), "waiting for running scripts to finish");
    }
    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            error!("occurrence task failed: {e}");
        }
    }
    Ok(())
}

fn human_period(secs: u64) -> String {
    match secs {
        s if s % 86_400 == 0 => plural(s / 86_400, "day"),
        s if s % 3_600 == 0 => plural(s / 3_600, "hour"),
        s => plural(s / 60, "minute"),
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}
