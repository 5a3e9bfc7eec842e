use crate::CLAP_STYLING;
use clap::{arg, command};

pub const DEFAULT_DB_PATH: &str = "~/.config/lapse/lapse.db";

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("lapse")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("lapse")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner, progress and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(--"db" <PATH>)
                .required(false)
                .global(true)
                .help("Location of the lapse database")
                .env("LAPSE_DB")
                .default_value(DEFAULT_DB_PATH),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the lapse database on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Where to create the database (default: the --db location)"),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Deletes and recreates any existing database at the location.")
                        .required(false),
                ),
        )
        .subcommand(
            command!("project")
                .about("Manage lapse projects")
                .subcommand_required(true)
                .subcommand(
                    command!("create")
                        .about("Creates a project and prints its id")
                        .arg(
                            arg!(-n --"name" <NAME>)
                                .required(true)
                                .help("A name for the project"),
                        )
                        .arg(
                            arg!(-u --"url" <URL>)
                                .required(true)
                                .help("The site the project audits"),
                        ),
                )
                .subcommand(command!("list").about("List all projects")),
        )
        .subcommand(
            command!("crawl")
                .about(
                    "Crawl a site from a start URL and check every external domain it links to. \
                Results are stored under the project id.",
                )
                .arg(arg!(<START_URL>).help("Where the crawl begins"))
                .arg(arg!(<PROJECT_ID>).help("Project to record results under (created if missing)"))
                .arg(
                    arg!(-c --"concurrency" <NUM_WORKERS>)
                        .required(false)
                        .help("Page fetches in flight at once")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("32"),
                )
                .arg(
                    arg!(--"liveness-workers" <NUM_WORKERS>)
                        .required(false)
                        .help("Domain liveness checks in flight at once")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("16"),
                )
                .arg(
                    arg!(--"delay" <MS>)
                        .required(false)
                        .help("Minimum delay between requests to the same host, in milliseconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("1000"),
                )
                .arg(
                    arg!(--"probe-timeout" <SECONDS>)
                        .required(false)
                        .help("Timeout for the HTTP probe of an external domain")
                        .value_parser(clap::value_parser!(u64).range(1..))
                        .default_value("5"),
                )
                .arg(
                    arg!(--"ignore-robots")
                        .required(false)
                        .help("Crawl paths that robots.txt disallows")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("report")
                .about("Report on a project's crawled pages and expired domains")
                .arg(arg!(<PROJECT_ID>).help("The project to report on"))
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"expired-only")
                        .required(false)
                        .help("Only list expired domains")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
}
