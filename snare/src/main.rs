use colored::Colorize;
use snare::commands::command_argument_builder;
use snare::handlers::{handle_crawl, handle_init, handle_report};
use snare_core::print_banner;

#[tokio::main]
async fn main() {
    let chosen_command = command_argument_builder().get_matches();

    if !chosen_command.get_flag("quiet") {
        print_banner();
    }

    let result = match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("crawl", primary_command)) => handle_crawl(primary_command).await,
        Some(("report", primary_command)) => handle_report(primary_command),
        // No subcommand, the banner is all there is
        _ => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
