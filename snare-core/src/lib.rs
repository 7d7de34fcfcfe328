pub mod data;
pub mod error;
pub mod export;
pub mod form;
pub mod graph;
pub mod model;
pub mod path;
pub mod report;
pub mod taint;

pub use error::CoreError;
pub use form::{ElementKey, Form, FormElement, FormIdentity};
pub use graph::{Edge, EdgeId, Graph, Node, RunData};
pub use model::{Cookie, CrawlEdge, Event, Iframe, Method, MethodData, Request, UiForm, UiSource};
pub use taint::{AttackMode, Injection, InjectionVector, Parameter, TaintTracker, TrackingRecord};

use colored::Colorize;

pub fn print_banner() {
    let banner = r#"
   ___  ___  ___ _ _______
  (_-< / _ \/ _ `/ __/ -_)
 /___//_//_/\_,_/_/  \__/
"#;
    println!("{}", banner.bright_magenta().bold());
    println!(
        "  {} {}\n",
        "stateful crawl graph + reflection tracking".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
