//! Adapters for external systems.
//!
//! Thin wrappers that the pipeline stages call into:
//! - process: Run command-line tools (annocli, AGAT, BUSCO)
//! - http: Fetch remote or local inputs
//! - gzip: Decompress downloaded inputs
//! - busco: Locate and parse BUSCO summaries

pub mod busco;
pub mod gzip;
pub mod http;
pub mod process;

// Re-export commonly used types
pub use busco::{find_summary, parse_summary};
pub use gzip::decompress;
pub use http::Downloader;
pub use process::ToolCommand;
