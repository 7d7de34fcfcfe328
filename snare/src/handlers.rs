use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use snare_core::data::Database;
use snare_core::report::{ReportFormat, gather_report_data, render, save_report};
use snare_scanner::{Control, CrawlConfig, CrawlSummary, Crawler, FileControl, HttpSession, RunState};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};
use url::Url;

// Helper functions for crawl handler

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(url: Option<&Url>, hosts_file: Option<&PathBuf>) -> Result<Vec<String>> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if let Some(url) = url {
        Ok(vec![url.as_str().to_string()])
    } else {
        bail!("Either --url or --hosts-file must be provided")
    }
}

/// Load and parse URLs from a file
pub fn load_urls_from_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read hosts file {}", path.display()))?;

    let urls: Vec<String> = content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .filter_map(|line| parse_url_line(line.trim()))
        .collect();

    if urls.is_empty() {
        bail!("No valid URLs found in {}", path.display());
    }

    Ok(urls)
}

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line)
        && url.has_host()
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if Url::parse(&with_scheme).is_ok() {
        return Some(with_scheme);
    }

    eprintln!("{} Skipping invalid URL '{}'", "⚠".yellow(), line);
    None
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Crawl settings for one target, from the `crawl` arguments.
pub fn build_config(args: &ArgMatches, url: &str) -> Result<CrawlConfig> {
    let mut config = CrawlConfig::new(url);
    config.debug = args.get_flag("debug");
    config.crawler_only = args.get_flag("crawler");
    if let Some(&early) = args.get_one::<u32>("early-gets") {
        config.max_early_gets = early;
    }
    if let Some(&seed) = args.get_one::<u64>("seed") {
        config.seed = seed;
    }
    if let Some(exclude) = args.get_many::<String>("exclude") {
        config.exclude = exclude.cloned().collect();
    }
    let output = args
        .get_one::<String>("output")
        .context("--output has a default")?;
    config.output_dir = Some(expand_path(output));
    config.session_key().context("Invalid target URL")?;
    Ok(config)
}

/// Routes all tracing output of this process to `logs/crawl-<timestamp>.log`
/// under `dir`.
pub fn init_logging(dir: &Path, debug: bool) -> Result<PathBuf> {
    let log_dir = dir.join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let log_path = log_dir.join(format!(
        "crawl-{}.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));
    let file = fs::File::create(&log_path)
        .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))?;
    Ok(log_path)
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  SNARE INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let config_dir = expand_path(args.get_one::<String>("PATH").context("PATH has a default")?);
    let force = args.get_flag("force");
    let db_path = config_dir.join("snare.db");

    println!(
        "{} Target: {}",
        "→".blue(),
        config_dir.display().to_string().bright_white()
    );
    println!();

    if Database::exists(&db_path) {
        let overwrite = if force {
            true
        } else {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("Database already exists at:");
            println!(
                "  {} {}",
                "•".yellow(),
                db_path.display().to_string().bright_white()
            );
            println!();
            let response = print_prompt("Would you like to overwrite it? [y/N]:")?;
            println!();
            response == "y" || response == "yes"
        };

        if !overwrite {
            println!("{} Keeping existing database", "→".blue());
            return Ok(());
        }
        Database::drop(&db_path)
            .with_context(|| format!("Failed to remove {}", db_path.display()))?;
        println!("{} Existing database removed", "✓".green().bold());
    }

    fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    Database::new(&db_path).context("Failed to create database")?;

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Database::new(path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn report_format(args: &ArgMatches) -> ReportFormat {
    args.get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text)
}

fn emit_report(db: &Database, session_id: &str, format: ReportFormat, output: Option<&PathBuf>) -> Result<()> {
    let data = gather_report_data(db, session_id)
        .with_context(|| format!("No report data for session {}", session_id))?;
    let report = render(&data, format)?;
    match output {
        Some(path) => {
            save_report(&report, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", report),
    }
    Ok(())
}

pub async fn handle_crawl(args: &ArgMatches) -> Result<()> {
    let urls = load_urls_from_source(
        args.get_one::<Url>("url"),
        args.get_one::<PathBuf>("hosts-file"),
    )?;
    let debug = args.get_flag("debug");
    let timeout = args.get_one::<u64>("timeout").copied().unwrap_or(10);
    let format = report_format(args);
    let report_path = args.get_one::<PathBuf>("report");

    let output = expand_path(args.get_one::<String>("output").context("--output has a default")?);
    let log_path = init_logging(&output, debug)?;
    let db = open_database(&expand_path(
        args.get_one::<String>("db").context("--db has a default")?,
    ))?;

    println!(
        "{} Crawling {} target(s), log: {}",
        "→".blue(),
        urls.len(),
        log_path.display().to_string().bright_white()
    );
    println!(
        "{} Press Enter to resume a paused or stepping crawl, Ctrl-C to stop",
        "ℹ".blue()
    );
    println!();

    let active = Arc::new(Mutex::new(Control::new()));
    spawn_operator_inputs(active.clone());

    for url in urls {
        let config = build_config(args, &url)?;
        let session_id = db.create_session(&url, Some(&config.to_json()?))?;
        info!("Session {} for {}", session_id, url);

        let control = Control::new();
        if let Ok(mut slot) = active.lock() {
            *slot = control.clone();
        }

        match crawl_target(config, control, timeout).await {
            Ok((summary, crawler)) => {
                db.save_graph(&session_id, crawler.graph())?;
                db.save_tracker(&session_id, crawler.tracker())?;
                if summary.stopped {
                    db.cancel_session(&session_id)?;
                } else {
                    db.complete_session(&session_id)?;
                }
                print_summary(&url, &session_id, &summary);
                emit_report(&db, &session_id, format, report_path)?;
                if summary.stopped {
                    println!("{} Stopped, skipping remaining targets", "→".blue());
                    break;
                }
            }
            Err(e) => {
                error!("Crawl of {} failed: {:#}", url, e);
                db.fail_session(&session_id)?;
                eprintln!("{} Crawl of {} failed: {:#}", "✗".red().bold(), url, e);
            }
        }
    }
    Ok(())
}

/// Ctrl-C stops and Enter resumes whichever crawl currently owns `active`.
fn spawn_operator_inputs(active: Arc<Mutex<Control>>) {
    {
        let active = active.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if let Ok(control) = active.lock() {
                    control.stop();
                }
            }
        });
    }
    std::thread::spawn(move || {
        let mut line = String::new();
        while io::stdin().read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
            if let Ok(control) = active.lock()
                && matches!(control.state(), RunState::Pause | RunState::Step)
            {
                control.resume();
            }
            line.clear();
        }
    });
}

async fn crawl_target(
    config: CrawlConfig,
    control: Control,
    timeout: u64,
) -> Result<(CrawlSummary, Crawler<HttpSession>)> {
    let key = config.session_key()?;
    let output = config.output_dir.clone().unwrap_or_else(|| PathBuf::from("output"));

    let mut files = FileControl::new(&output, key, control.clone());
    files.init().await?;
    let watcher = files.spawn()?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Crawling {}", config.url));

    let bar = spinner.clone();
    let progress = Arc::new(move |step: usize, edge: String| {
        bar.set_message(format!("step {}: {}", step, edge));
    });

    let session = HttpSession::with_timeout(timeout)?;
    let mut crawler = Crawler::new(session, config)?
        .with_control(control.clone())
        .with_progress_callback(progress);

    let result = crawler.run().await;
    spinner.finish_and_clear();

    control.stop();
    if let Err(e) = watcher.await {
        error!("Control file watcher panicked: {}", e);
    }

    Ok((result?, crawler))
}

fn print_summary(url: &str, session_id: &str, summary: &CrawlSummary) {
    let status = if summary.stopped {
        "stopped".yellow().bold()
    } else if summary.aborted {
        "aborted".red().bold()
    } else {
        "complete".green().bold()
    };
    print_divider();
    println!("  {} {}", url.bright_white().bold(), status);
    print_divider();
    println!("  Session:        {}", session_id.dimmed());
    println!("  Steps:          {} ({} failed)", summary.steps, summary.step_errors);
    println!("  Pages:          {}", summary.nodes);
    println!("  Edges:          {} ({} visited)", summary.edges, summary.visited_edges);
    println!("  Payloads:       {}", summary.payloads_armed);
    println!("  Trackers:       {}", summary.trackers_armed);
    println!("  Reflections:    {}", summary.reflections.to_string().bright_red().bold());
    println!("  Duration:       {:.1}s", summary.duration.as_secs_f64());
    println!();
}

pub fn handle_report(args: &ArgMatches) -> Result<()> {
    let db_path = expand_path(args.get_one::<String>("db").context("--db has a default")?);
    if !Database::exists(&db_path) {
        bail!(
            "No database at {}, run `snare init` or `snare crawl` first",
            db_path.display()
        );
    }
    let db = open_database(&db_path)?;

    let session_id = match args.get_one::<String>("session") {
        Some(id) => id.clone(),
        None => db
            .latest_session()?
            .context("No sessions recorded yet")?,
    };
    emit_report(&db, &session_id, report_format(args), args.get_one::<PathBuf>("output"))
}
