//! Browser automation for JavaScript-rendered, challenge-protected sites
//!
//! A request owns exactly one [`Session`]: a Chrome process with a single
//! tab, configured from the request's `ExtractionConfig`. Site adapters only
//! see the [`Page`] trait, which keeps them testable against an in-memory
//! document.
//!
//! # Example
//!
//! ```no_run
//! use novel_parser::browser::{ChromeLauncher, Session, SessionManager};
//! use novel_parser::config::ExtractionConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExtractionConfig::default();
//! let session = SessionManager::open(&ChromeLauncher, &config, None)?;
//!
//! session.page().goto("https://example.com", None)?;
//! let html = session.page().content()?;
//! println!("Extracted {} bytes of HTML", html.len());
//!
//! SessionManager::close(session, None);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;
pub mod page;
pub mod scraper;

pub use self::config::LaunchSettings;
pub use self::manager::{
    BrowserError, ChromeLauncher, ChromeSession, Session, SessionLauncher, SessionManager,
    TeardownReport,
};
pub use self::page::{CapturedResponse, FetchRequest, FetchResponse, Page};
pub use self::scraper::ChromePage;
