use crate::browser::BrowserError;
use std::fmt;

/// Extraction step a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Book,
    Catalog,
    /// 1-based position in the retained chapter list, once known
    Chapter(Option<usize>),
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Book => "book",
            Phase::Catalog => "catalog",
            Phase::Chapter(_) => "chapter",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Chapter(Some(index)) => write!(f, "chapter-{}", index),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Errors that abort a whole extraction request
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("browser session could not start: {0}")]
    Launch(#[source] BrowserError),

    #[error("anti-bot challenge phase={phase} requested_url={requested_url} page_url={page_url} title={title}")]
    Challenge {
        phase: Phase,
        requested_url: String,
        page_url: String,
        title: String,
    },

    #[error("timeout phase={phase} url={url}")]
    NavigationTimeout { phase: Phase, url: String },

    #[error("navigation failed phase={phase} url={url}: {message}")]
    Navigation {
        phase: Phase,
        url: String,
        message: String,
    },

    #[error("catalog_url not found on book page url={url}")]
    MissingCatalog { url: String },

    #[error("unsupported site: {0}")]
    UnsupportedSite(String),

    #[error("extraction worker failed: {0}")]
    Worker(String),
}

impl ExtractError {
    /// Classify a driver failure that happened while working on `url`
    pub fn from_browser(phase: Phase, url: &str, err: BrowserError) -> Self {
        match err {
            BrowserError::Timeout(_) => ExtractError::NavigationTimeout {
                phase,
                url: url.to_string(),
            },
            other => ExtractError::Navigation {
                phase,
                url: url.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Attach the chapter position to a chapter-phase error
    pub fn in_chapter(self, index: usize) -> Self {
        let indexed = Phase::Chapter(Some(index));
        match self {
            ExtractError::Challenge {
                phase: Phase::Chapter(_),
                requested_url,
                page_url,
                title,
            } => ExtractError::Challenge {
                phase: indexed,
                requested_url,
                page_url,
                title,
            },
            ExtractError::NavigationTimeout {
                phase: Phase::Chapter(_),
                url,
            } => ExtractError::NavigationTimeout { phase: indexed, url },
            ExtractError::Navigation {
                phase: Phase::Chapter(_),
                url,
                message,
            } => ExtractError::Navigation {
                phase: indexed,
                url,
                message,
            },
            other => other,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            ExtractError::Challenge { phase, .. }
            | ExtractError::NavigationTimeout { phase, .. }
            | ExtractError::Navigation { phase, .. } => Some(*phase),
            ExtractError::MissingCatalog { .. } => Some(Phase::Book),
            _ => None,
        }
    }

    /// Stable tag a transport layer can map to its own status codes
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::Launch(_) => "launch",
            ExtractError::Challenge { .. } => "challenge",
            ExtractError::NavigationTimeout { .. } => "timeout",
            ExtractError::Navigation { .. } => "navigation",
            ExtractError::MissingCatalog { .. } => "missing_catalog",
            ExtractError::UnsupportedSite(_) => "unsupported_site",
            ExtractError::Worker(_) => "worker",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Book.to_string(), "book");
        assert_eq!(Phase::Chapter(None).to_string(), "chapter");
        assert_eq!(Phase::Chapter(Some(3)).to_string(), "chapter-3");
        assert_eq!(Phase::Chapter(Some(3)).as_str(), "chapter");
    }

    #[test]
    fn test_timeout_classification() {
        let err = ExtractError::from_browser(
            Phase::Catalog,
            "https://x/catalog",
            BrowserError::Timeout("navigation".into()),
        );
        assert_eq!(err.kind(), "timeout");
        assert_eq!(err.phase(), Some(Phase::Catalog));

        let err = ExtractError::from_browser(
            Phase::Book,
            "https://x/book",
            BrowserError::NavigationError("net::ERR_NAME_NOT_RESOLVED".into()),
        );
        assert_eq!(err.kind(), "navigation");
    }

    #[test]
    fn test_in_chapter_only_touches_chapter_phase() {
        let err = ExtractError::Challenge {
            phase: Phase::Chapter(None),
            requested_url: "u".into(),
            page_url: "p".into(),
            title: "Just a moment...".into(),
        }
        .in_chapter(3);
        assert_eq!(err.phase(), Some(Phase::Chapter(Some(3))));

        let err = ExtractError::NavigationTimeout {
            phase: Phase::Book,
            url: "u".into(),
        }
        .in_chapter(3);
        assert_eq!(err.phase(), Some(Phase::Book));
    }
}
