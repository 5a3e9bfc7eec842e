use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use lapse::commands::command_argument_builder;
use lapse::handlers::{self, InitOutcome, print_divider};
use lapse_core::crawl::{CrawlOptions, execute_crawl};
use lapse_core::print_banner;
use lapse_core::report::save_report;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    let chosen_command = command_argument_builder().get_matches();
    let quiet = chosen_command.get_flag("quiet");

    init_tracing(quiet);

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    let db_path = handlers::resolve_db_path(
        chosen_command
            .get_one::<String>("db")
            .map(String::as_str)
            .unwrap_or(lapse::commands::DEFAULT_DB_PATH),
    );

    let outcome = match chosen_command.subcommand() {
        // No subcommand provided, just show the banner
        None => Ok(()),
        Some(("init", primary_command)) => handle_init(primary_command, db_path),
        Some(("project", primary_command)) => match primary_command.subcommand() {
            Some(("create", secondary_command)) => {
                handle_project_create(secondary_command, db_path)
            }
            Some(("list", _)) => handle_project_list(db_path),
            _ => unreachable!("clap should ensure we don't get here"),
        },
        Some(("crawl", primary_command)) => handle_crawl(primary_command, db_path, quiet).await,
        Some(("report", primary_command)) => handle_report(primary_command, db_path),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = outcome {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(quiet: bool) {
    let default_filter = if quiet { "warn" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn handle_init(args: &ArgMatches, default_path: PathBuf) -> Result<()> {
    let path = args
        .get_one::<String>("PATH")
        .map(|p| handlers::resolve_db_path(p))
        .unwrap_or(default_path);
    let force = args.get_flag("force");

    match handlers::init_database(&path, force)? {
        InitOutcome::Created => println!("Created database at {}", path.display()),
        InitOutcome::Recreated => println!("Recreated database at {}", path.display()),
        InitOutcome::AlreadyExists => println!(
            "{} Database already exists at {} (use --force to recreate it)",
            "[!]".yellow(),
            path.display()
        ),
    }
    Ok(())
}

fn handle_project_create(args: &ArgMatches, db_path: PathBuf) -> Result<()> {
    let name = args.get_one::<String>("name").context("--name is required")?;
    let url = args.get_one::<String>("url").context("--url is required")?;

    let db = handlers::open_database(&db_path)?;
    let project_id = handlers::create_project(&db, name, url)?;

    println!("{}", project_id);
    Ok(())
}

fn handle_project_list(db_path: PathBuf) -> Result<()> {
    let db = handlers::open_database(&db_path)?;
    let projects = db.list_projects().context("Failed to list projects")?;

    print!("{}", handlers::render_project_list(&projects));
    Ok(())
}

async fn handle_crawl(args: &ArgMatches, db_path: PathBuf, quiet: bool) -> Result<()> {
    let start_url = args
        .get_one::<String>("START_URL")
        .context("a start URL is required")?;
    let project_id = args
        .get_one::<String>("PROJECT_ID")
        .context("a project id is required")?;

    // Reject bad input before anything touches the network
    let start_url = handlers::parse_start_url(start_url)?;
    let project_id = handlers::validate_project_id(project_id)?.to_string();

    let options = CrawlOptions {
        start_url,
        project_id,
        concurrency: *args.get_one::<usize>("concurrency").unwrap_or(&32),
        liveness_concurrency: *args.get_one::<usize>("liveness-workers").unwrap_or(&16),
        per_host_delay: Duration::from_millis(*args.get_one::<u64>("delay").unwrap_or(&1000)),
        probe_timeout: Duration::from_secs(*args.get_one::<u64>("probe-timeout").unwrap_or(&5)),
        obey_robots: !args.get_flag("ignore-robots"),
        show_progress: !quiet,
    };

    if !quiet {
        println!("\nCrawling {}", options.start_url.bright_white().bold());
        println!("Project:          {}", options.project_id);
        println!("Workers:          {}", options.concurrency);
        println!("Liveness workers: {}", options.liveness_concurrency);
        println!(
            "robots.txt:       {}\n",
            if options.obey_robots { "obeyed" } else { "ignored" }
        );
    }

    let db = Arc::new(Mutex::new(handlers::open_database(&db_path)?));
    let project_id = options.project_id.clone();
    let summary = execute_crawl(options, db).await?;

    if !quiet {
        println!();
        print_divider();
    }
    println!(
        "Pages crawled:    {} ({} failed)",
        summary.pages_crawled, summary.pages_failed
    );
    println!("Domains checked:  {}", summary.domains_checked);
    let expired = format!("Expired domains:  {}", summary.domains_expired);
    if summary.domains_expired > 0 {
        println!("{}", expired.red().bold());
    } else {
        println!("{}", expired);
    }
    if summary.stopped {
        println!("{}", "Crawl was interrupted; results are partial.".yellow());
    }
    if !quiet {
        print_divider();
        println!("\nRun `lapse report {}` for details.", project_id);
    }

    Ok(())
}

fn handle_report(args: &ArgMatches, db_path: PathBuf) -> Result<()> {
    let project_id = args
        .get_one::<String>("PROJECT_ID")
        .context("a project id is required")?;
    let format = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");
    let expired_only = args.get_flag("expired-only");

    let db = handlers::open_database(&db_path)?;
    let report = handlers::build_report(&db, project_id, format, expired_only)?;

    match args.get_one::<PathBuf>("output") {
        Some(path) => {
            save_report(&report, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!("Report saved to {}", path.display());
        }
        None => print!("{}", report),
    }

    Ok(())
}
