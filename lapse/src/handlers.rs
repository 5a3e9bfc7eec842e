use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use lapse_core::data::{Database, Project};
use lapse_core::report::{ReportFormat, gather_report_data, generate_report};
use lapse_scanner::engine::parse_seed_url;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Expand `~` in a user supplied database path.
pub fn resolve_db_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Open the database, creating its directory first if needed.
pub fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Database::new(path).with_context(|| format!("Failed to open database {}", path.display()))
}

/// Turn a start URL argument into a crawlable seed, adding `http://` when no
/// scheme was given.
pub fn parse_start_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    let url = Url::parse(&candidate).map_err(|e| anyhow!("Invalid start URL '{}': {}", raw, e))?;
    Ok(parse_seed_url(url.as_str())?)
}

pub fn validate_project_id(project_id: &str) -> Result<&str> {
    let project_id = project_id.trim();
    if project_id.is_empty() {
        bail!("Project id must not be empty");
    }
    if project_id.chars().any(char::is_whitespace) {
        bail!("Project id '{}' must not contain whitespace", project_id);
    }
    Ok(project_id)
}

#[derive(Debug, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    Recreated,
    AlreadyExists,
}

pub fn init_database(path: &Path, force: bool) -> Result<InitOutcome> {
    let existed = Database::exists(path);
    if existed && !force {
        return Ok(InitOutcome::AlreadyExists);
    }
    if existed {
        Database::drop(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }

    open_database(path)?;

    Ok(if existed {
        InitOutcome::Recreated
    } else {
        InitOutcome::Created
    })
}

pub fn create_project(db: &Database, name: &str, url: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Project name must not be empty");
    }
    let start_url = parse_start_url(url)?;
    db.create_project(name, &start_url)
        .context("Failed to create project")
}

pub fn render_project_list(projects: &[Project]) -> String {
    if projects.is_empty() {
        return "No projects yet. Create one with `lapse project create`.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<36}  {:<20}  {:<20}  {}\n",
        "ID", "NAME", "CREATED", "START URL"
    ));
    for project in projects {
        out.push_str(&format!(
            "{:<36}  {:<20}  {:<20}  {}\n",
            project.id,
            project.name,
            project.created_at.format("%Y-%m-%d %H:%M:%S"),
            project.start_url
        ));
    }
    out
}

pub fn build_report(
    db: &Database,
    project_id: &str,
    format: &str,
    expired_only: bool,
) -> Result<String> {
    let format = ReportFormat::from_str(format)
        .ok_or_else(|| anyhow!("Unknown report format '{}'", format))?;

    if db
        .get_project(project_id)
        .context("Failed to read project")?
        .is_none()
    {
        bail!("No project with id '{}'", project_id);
    }

    let data = gather_report_data(db, project_id, expired_only)
        .context("Failed to gather report data")?;
    generate_report(&data, format).context("Failed to render report")
}

pub fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}
