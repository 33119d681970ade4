//! CLI entry point for `mailbot`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;

use mailbot::bot::{Mailbot, PassReport};
use mailbot::callback::MatchContext;
use mailbot::config::{self, Config};
use mailbot::dispatch::TriggerResult;
use mailbot::model::message::Message;
use mailbot::parser::fields::{self, Field};
use mailbot::rules::RuleCheck;
use mailbot::store::maildir::MaildirStore;

/// Poll a mailbox and run rule-matched callbacks exactly once per message.
#[derive(Parser)]
#[command(name = "mailbot", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $MAILBOT_CONFIG, then the platform config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Process new messages in the mailbox
    Run {
        /// Maildir to poll (overrides the config file)
        #[arg(long, value_name = "DIR")]
        maildir: Option<PathBuf>,
        /// Release claims older than this many seconds (overrides the config file)
        #[arg(long, value_name = "SECS", allow_negative_numbers = true)]
        timeout: Option<i64>,
        /// Keep polling instead of running a single pass
        #[arg(long)]
        watch: bool,
        /// Seconds between passes with --watch
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Show which callbacks would trigger for a message file, without running them
    Check {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
        Commands::Run {
            maildir,
            timeout,
            watch,
            interval,
            json,
        } => {
            let config = load(&cli.config, cli.verbose)?;
            cmd_run(&config, maildir, timeout, watch, interval, json)
        }
        Commands::Check { file, json } => {
            let config = load(&cli.config, cli.verbose)?;
            cmd_check(&config, &file, json)
        }
    }
}

/// Load configuration and start logging.
fn load(path: &Option<PathBuf>, verbose: u8) -> anyhow::Result<Config> {
    let config = config::load_config(path.as_deref())?;

    // Configure logging: stderr + optional log file
    let log_level = match verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);
    tracing::debug!(callbacks = config.callbacks.len(), "Loaded config");
    Ok(config)
}

fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::log_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailbot.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailbot", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Run one pass, or keep polling with `watch`.
fn cmd_run(
    config: &Config,
    maildir: Option<PathBuf>,
    timeout: Option<i64>,
    watch: bool,
    interval: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let maildir = maildir
        .or_else(|| config.mailbox.maildir.clone())
        .context("no mailbox configured: pass --maildir or set [mailbox] maildir")?;
    let timeout = config::claim_timeout(timeout.or(config.mailbox.timeout_secs))?;
    let interval = std::time::Duration::from_secs(
        interval.unwrap_or(config.mailbox.poll_interval_secs),
    );

    let registry = config::build_registry(config)?;
    if registry.is_empty() {
        tracing::warn!("No callbacks configured; messages will be marked processed untouched");
    }

    let store = MaildirStore::open(&maildir)?;
    let mut bot = Mailbot::new(store)
        .with_registry(registry)
        .with_timeout(timeout);

    loop {
        let start = Instant::now();
        let report = bot.process_messages()?;
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report, start.elapsed());
        }

        if !watch {
            return Ok(());
        }
        std::thread::sleep(interval);
    }
}

fn print_report(report: &PassReport, elapsed: std::time::Duration) {
    if !report.recovered.is_empty() {
        println!("Released {} timed-out claim(s)", report.recovered.len());
    }
    for msg in &report.processed {
        println!(
            "#{} {}",
            msg.id,
            msg.subject.as_deref().unwrap_or("(no subject)")
        );
        for outcome in &msg.dispatch.outcomes {
            match &outcome.trigger {
                Some(TriggerResult::Ok(_)) => println!("  + {}", outcome.callback),
                Some(TriggerResult::Failed(e)) => println!("  ! {}: {e}", outcome.callback),
                None => {}
            }
        }
    }
    println!(
        "Processed {} message(s), {} trigger(s), {} failure(s) in {:.2}s",
        report.processed.len(),
        report.trigger_count(),
        report.failure_count(),
        elapsed.as_secs_f64()
    );
}

#[derive(Serialize)]
struct CheckOutput {
    callback: String,
    matched: bool,
    check: Option<RuleCheck>,
}

/// Evaluate every configured callback's rules against a message file.
fn cmd_check(config: &Config, file: &Path, json: bool) -> anyhow::Result<()> {
    let raw = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let message = Message::parse(raw);
    let registry = config::build_registry(config)?;

    let results: Vec<CheckOutput> = registry
        .iter()
        .map(|reg| {
            let mut ctx = MatchContext::new(&message, &reg.rules);
            let mut callback = reg.factory.create(&ctx);
            let matched = callback.check_rules(&mut ctx);
            CheckOutput {
                callback: reg.factory.name().to_string(),
                matched,
                check: ctx.last_check().cloned(),
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if !message.is_structured() {
        println!("(message could not be parsed; every field is absent)");
    }
    for field in Field::ALL {
        if let Some(value) = fields::extract(&message, field) {
            let first_line = value.lines().next().unwrap_or("");
            println!("{:>8}: {first_line}", field.as_str());
        }
    }
    println!();
    for result in &results {
        let mark = if result.matched { "match" } else { "skip " };
        println!("[{mark}] {}", result.callback);
        if let Some(check) = &result.check {
            for (field, m) in &check.fields {
                let texts: Vec<&str> = m.captures.iter().flat_map(|c| c.texts()).collect();
                println!(
                    "        {:<8} {} {:?}",
                    field.as_str(),
                    if m.matched { "yes" } else { "no " },
                    texts
                );
            }
        }
    }
    Ok(())
}
