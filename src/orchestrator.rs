//! One extraction request, end to end: resolve the site, open a session,
//! run book, catalog and chapter extraction in order, assemble the result.

use crate::browser::{Session, SessionLauncher, SessionManager};
use crate::config::ParseRequest;
use crate::error::ExtractError;
use crate::models::{DebugInfo, ParseResult, Site};
use crate::sources::adapter_for;
use crate::storage_state::default_storage_path;
use std::path::PathBuf;
use std::sync::Arc;

/// Tears a session down when dropped, on success, error and panic alike
pub struct SessionGuard<S: Session> {
    session: S,
    persist_to: Option<PathBuf>,
}

impl<S: Session> SessionGuard<S> {
    pub fn new(session: S, persist_to: Option<PathBuf>) -> Self {
        Self {
            session,
            persist_to,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        let report = SessionManager::teardown(&mut self.session, self.persist_to.as_deref());
        log::debug!(
            "session closed persisted={} clean={}",
            report.persisted,
            report.is_clean()
        );
    }
}

pub struct Extractor<L: SessionLauncher> {
    launcher: L,
    storage_dir: PathBuf,
}

impl<L: SessionLauncher> Extractor<L> {
    pub fn new(launcher: L, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            storage_dir: storage_dir.into(),
        }
    }

    /// Explicit override, else site detected from the URL host
    pub fn resolve_site(request: &ParseRequest) -> Site {
        request.site.unwrap_or_else(|| Site::detect(&request.url))
    }

    /// Storage-state file for a request: the configured path, or one per
    /// site under the storage directory
    pub fn storage_path(&self, site: Site, request: &ParseRequest) -> Option<PathBuf> {
        request
            .config
            .storage_state_path
            .clone()
            .or_else(|| default_storage_path(&self.storage_dir, site, &request.url))
    }

    /// Run one request to completion. Any adapter failure fails the whole
    /// request; chapters fetched before the failure are discarded.
    pub fn extract(&self, request: &ParseRequest) -> Result<ParseResult, ExtractError> {
        let site = Self::resolve_site(request);
        let adapter =
            adapter_for(site).ok_or_else(|| ExtractError::UnsupportedSite(request.url.clone()))?;

        let config = &request.config;
        let storage_path = self.storage_path(site, request);
        log::info!(
            "extract site={} url={} chapters_limit={}",
            site,
            request.url,
            request.chapters_limit
        );

        let session = SessionManager::open(&self.launcher, config, storage_path.as_deref())
            .map_err(ExtractError::Launch)?;
        let persist_to = storage_path.clone().filter(|_| config.save_storage_state);
        let guard = SessionGuard::new(session, persist_to);
        let page = guard.session().page();
        let opts = config.adapter_options();

        let mut book = adapter.fetch_book(page, &request.url, &opts)?;
        if book.catalog_url.is_empty() {
            return Err(ExtractError::MissingCatalog {
                url: request.url.clone(),
            });
        }

        let mut refs = adapter.fetch_catalog(page, &book.catalog_url, &opts)?;
        if request.chapters_limit > 0 {
            refs.truncate(request.chapters_limit);
        }

        let mut chapters = Vec::with_capacity(refs.len());
        for (i, chapter_ref) in refs.iter().enumerate() {
            let index = i + 1;
            log::info!(
                "site={} chapter={}/{} url={}",
                site,
                index,
                refs.len(),
                chapter_ref.url
            );
            let chapter = adapter
                .fetch_chapter(page, &chapter_ref.url, &opts)
                .map_err(|e| e.in_chapter(index))?;
            chapters.push(chapter);
        }
        book.chapters = refs;

        log::info!(
            "extract done site={} title={} chapters={}",
            site,
            book.title,
            chapters.len()
        );
        Ok(ParseResult {
            site,
            book,
            chapters,
            debug: DebugInfo {
                storage_state_path: storage_path,
            },
        })
    }
}

/// Run an extraction on tokio's blocking pool; the browser driver is
/// synchronous and a request can take minutes.
pub async fn spawn_extract<L>(
    extractor: Arc<Extractor<L>>,
    request: ParseRequest,
) -> Result<ParseResult, ExtractError>
where
    L: SessionLauncher + 'static,
{
    tokio::task::spawn_blocking(move || extractor.extract(&request))
        .await
        .map_err(|e| ExtractError::Worker(e.to_string()))?
}
