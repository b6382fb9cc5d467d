//! Anti-bot challenge detection
//!
//! [`classify`] is a pure decision over what was observed on the page;
//! [`ensure_clear`] gathers the observation from a live [`Page`], gives the
//! challenge one bounded chance to resolve itself, and turns a persistent
//! challenge into [`ExtractError::Challenge`].

use crate::browser::{BrowserError, Page};
use crate::error::{ExtractError, Phase};
use std::time::{Duration, Instant};

/// URL fragments of challenge-platform interstitials
const URL_MARKERS: &[&str] = &[
    "__cf_chl",
    "/cdn-cgi/challenge-platform/",
    "challenges.cloudflare.com",
];

/// Block-page titles (lowercase), English and Russian
const BLOCK_TITLES: &[&str] = &[
    "just a moment...",
    "attention required!",
    "access denied",
    "один момент…",
    "один момент",
];
const BLOCK_TITLE_PREFIXES: &[&str] = &["just a moment", "один момент"];

/// DOM probes; any hit means a challenge is on screen
const PROBE_SELECTORS: &[&str] = &["iframe[src*='turnstile']", "form#challenge-form"];
const PROBE_TEXTS: &[&str] = &["Just a moment", "Один момент"];

/// Substrings looked for in the HTML snippet when probes cannot run
const SNIPPET_MARKERS: &[&str] = &["cf-turnstile", "challenge-platform", "just a moment", "один момент"];

const SNIPPET_CHARS: usize = 2000;
const RECHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Result of running the DOM probes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Probes that matched, in probe order
    pub hits: Vec<&'static str>,
}

/// Everything the classifier looks at
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub page_url: String,
    pub title: String,
    /// `None` when the probes themselves failed to execute
    pub probes: Option<ProbeReport>,
    /// Leading part of the page HTML, captured only when probes failed
    pub html_snippet: Option<String>,
}

/// Which rule flagged the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Url,
    Title,
    DomProbe,
    Snippet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Clear,
    Challenged(Signal),
}

impl ChallengeState {
    pub fn is_challenged(&self) -> bool {
        matches!(self, ChallengeState::Challenged(_))
    }
}

/// Classify an observation. First matching rule wins: URL markers, block
/// titles, DOM probes, then the HTML snippet (only when probes failed).
pub fn classify(observation: &Observation) -> ChallengeState {
    let url = observation.page_url.to_lowercase();
    if URL_MARKERS.iter().any(|m| url.contains(m)) {
        return ChallengeState::Challenged(Signal::Url);
    }

    if title_is_block_page(&observation.title) {
        return ChallengeState::Challenged(Signal::Title);
    }

    match &observation.probes {
        Some(report) if !report.hits.is_empty() => ChallengeState::Challenged(Signal::DomProbe),
        Some(_) => ChallengeState::Clear,
        None => {
            let snippet = observation
                .html_snippet
                .as_deref()
                .unwrap_or_default()
                .to_lowercase();
            if SNIPPET_MARKERS.iter().any(|m| snippet.contains(m)) {
                ChallengeState::Challenged(Signal::Snippet)
            } else {
                ChallengeState::Clear
            }
        }
    }
}

pub fn title_is_block_page(title: &str) -> bool {
    let title = title.trim().to_lowercase();
    BLOCK_TITLES.contains(&title.as_str())
        || BLOCK_TITLE_PREFIXES.iter().any(|p| title.starts_with(p))
}

/// Run every DOM probe; an error from any of them fails the whole report
pub fn run_probes(page: &dyn Page) -> Result<ProbeReport, BrowserError> {
    let mut hits = Vec::new();
    for &needle in PROBE_TEXTS {
        if page.contains_text(needle)? {
            hits.push(needle);
        }
    }
    for &selector in PROBE_SELECTORS {
        if page.count(selector)? > 0 {
            hits.push(selector);
        }
    }
    Ok(ProbeReport { hits })
}

/// Look at the page as it is right now
pub fn observe(page: &dyn Page) -> Observation {
    let page_url = page.url().unwrap_or_default();
    let title = page.title().unwrap_or_default();

    let probes = match run_probes(page) {
        Ok(report) => Some(report),
        Err(e) => {
            log::debug!("challenge probes failed, using html snippet: {}", e);
            None
        }
    };
    let html_snippet = if probes.is_none() {
        page.content()
            .ok()
            .map(|html| html.chars().take(SNIPPET_CHARS).collect())
    } else {
        None
    };

    Observation {
        page_url,
        title,
        probes,
        html_snippet,
    }
}

/// Fail with `ExtractError::Challenge` if the page shows a challenge. With a
/// non-zero `wait` budget the page gets until the budget runs out to clear
/// itself first.
pub fn ensure_clear(
    page: &dyn Page,
    phase: Phase,
    requested_url: &str,
    wait: Duration,
) -> Result<(), ExtractError> {
    let mut observation = observe(page);
    let mut state = classify(&observation);
    if !state.is_challenged() {
        return Ok(());
    }

    if !wait.is_zero() {
        log::info!(
            "challenge detected phase={} url={} signal={:?}, waiting up to {}ms",
            phase,
            requested_url,
            state,
            wait.as_millis()
        );
        let start = Instant::now();
        while state.is_challenged() && start.elapsed() < wait {
            page.pause(RECHECK_INTERVAL.min(wait.saturating_sub(start.elapsed())));
            observation = observe(page);
            state = classify(&observation);
        }
        if !state.is_challenged() {
            log::info!("challenge cleared phase={} url={}", phase, requested_url);
            return Ok(());
        }
    }

    log::warn!(
        "blocked phase={} url={} page_url={} title={}",
        phase,
        requested_url,
        observation.page_url,
        observation.title
    );
    Err(ExtractError::Challenge {
        phase,
        requested_url: requested_url.to_string(),
        page_url: observation.page_url,
        title: observation.title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(url: &str, title: &str) -> Observation {
        Observation {
            page_url: url.to_string(),
            title: title.to_string(),
            probes: Some(ProbeReport::default()),
            html_snippet: None,
        }
    }

    #[test]
    fn test_block_titles_in_both_locales() {
        for title in ["Just a moment...", "just a moment", "Один момент…", "ОДИН МОМЕНТ", "Access denied"] {
            assert_eq!(
                classify(&obs("https://www.101kks.com/book/1.html", title)),
                ChallengeState::Challenged(Signal::Title),
                "title {:?}",
                title
            );
        }
    }

    #[test]
    fn test_url_marker_wins_first() {
        let o = obs(
            "https://www.101kks.com/book/1.html?__cf_chl_rt_tk=abc",
            "Just a moment...",
        );
        assert_eq!(classify(&o), ChallengeState::Challenged(Signal::Url));
    }

    #[test]
    fn test_probe_hit() {
        let mut o = obs("https://www.101kks.com/txt/1/2.html", "第二章");
        o.probes = Some(ProbeReport {
            hits: vec!["form#challenge-form"],
        });
        assert_eq!(classify(&o), ChallengeState::Challenged(Signal::DomProbe));
    }

    #[test]
    fn test_snippet_only_used_when_probes_failed() {
        let mut o = obs("https://www.101kks.com/", "首页");
        o.html_snippet = Some("<div class=\"cf-turnstile\"></div>".to_string());
        assert_eq!(classify(&o), ChallengeState::Clear);

        o.probes = None;
        assert_eq!(classify(&o), ChallengeState::Challenged(Signal::Snippet));
    }

    #[test]
    fn test_unrelated_page_is_clear() {
        let mut o = obs("https://www.69shuba.com/book/1.htm", "某某小说最新章节");
        o.probes = None;
        o.html_snippet = Some("<html><body><h1>书名</h1></body></html>".to_string());
        assert_eq!(classify(&o), ChallengeState::Clear);
    }
}
