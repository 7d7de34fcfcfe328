use clap::{arg, command};
use url::Url;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub const DEFAULT_CONFIG_DIR: &str = "~/.config/snare/";
pub const DEFAULT_DB: &str = "~/.config/snare/snare.db";

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("snare")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("snare")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the snare database on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Directory to store the snare database in")
                        .default_value(DEFAULT_CONFIG_DIR),
                )
                .arg(
                    arg!(-f - -"force")
                        .help("Overwrite any existing database at the specified location.")
                        .required(false),
                ),
        )
        .subcommand(
            command!("crawl")
                .about(
                    "Crawl a web application statefully, then inject marked payloads and \
                report where they come back.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("The URL to crawl")
                        .value_parser(clap::value_parser!(Url))
                        .conflicts_with("hosts-file"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of URLs, crawled one after another")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .conflicts_with("url"),
                )
                .arg(
                    arg!(--"debug")
                        .required(false)
                        .help("Skip path-prefix seeding and the early discovery phase; log at debug level")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"crawler")
                        .required(false)
                        .help("Crawl only, do not attack")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-o --"output" <DIR>)
                        .required(false)
                        .help("Directory for control files, graph exports and logs")
                        .default_value("output"),
                )
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("SQLite database to record the session in")
                        .default_value(DEFAULT_DB),
                )
                .arg(
                    arg!(--"early-gets" <N>)
                        .required(false)
                        .help("Number of plain link follows before the main phase starts")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("100"),
                )
                .arg(
                    arg!(--"seed" <N>)
                        .required(false)
                        .help("Seed for the weighted form/link/event pick")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("6"),
                )
                .arg(
                    arg!(-e --"exclude" <PATTERN>)
                        .required(false)
                        .help("Never follow URLs containing PATTERN (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("10"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, markdown")
                        .value_parser(["text", "json", "markdown"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-r --"report" <PATH>)
                        .required(false)
                        .help("Save the report to a file (default: print it)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
        .subcommand(
            command!("report")
                .about("Render the reflection report of a recorded session")
                .arg(
                    arg!(-s --"session" <ID>)
                        .required(false)
                        .help("Session id (default: the most recent session)"),
                )
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("SQLite database the session was recorded in")
                        .default_value(DEFAULT_DB),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, markdown")
                        .value_parser(["text", "json", "markdown"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save the report to a file (default: print it)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
}
