pub mod attack;
pub mod config;
pub mod control;
pub mod crawler;
pub mod driver;
pub mod error;
pub mod http;
pub mod policy;
pub mod replay;
pub mod result;
pub mod scope;

pub use config::CrawlConfig;
pub use control::{Command, Control, FileControl, RunState};
pub use crawler::{Crawler, ProgressCallback, ROOT_URL};
pub use driver::{Driver, Extractor, Observation, PageFacts};
pub use error::ScanError;
pub use http::HttpSession;
pub use result::CrawlSummary;
pub use scope::Scope;
