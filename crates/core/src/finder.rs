use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, stream, stream::FuturesUnordered};
use tokio::sync::watch;

use crate::{
    error::{FinderError, Result},
    strategy::SearchStrategy,
    types::{FinderStats, Playlist, SearchOutcome, SearchProgress, SearchStatus, StrategyReport, Video},
    youtube_api::YouTubeApi,
};

pub type ProgressFn = Arc<dyn Fn(SearchProgress) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Empty means [`SearchStrategy::DEFAULT`].
    pub strategies: Vec<SearchStrategy>,
    pub max_playlists: usize,
    pub parallel: bool,
    /// Upper bound on candidate ids a single strategy may return.
    pub candidate_limit: usize,
    /// Concurrent membership checks in parallel mode.
    pub max_workers: usize,
    pub strategy_timeout: Option<Duration>,
    pub search_timeout: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            strategies: SearchStrategy::DEFAULT.to_vec(),
            max_playlists: 100,
            parallel: true,
            candidate_limit: 50,
            max_workers: 10,
            strategy_timeout: Some(Duration::from_secs(60)),
            search_timeout: None,
        }
    }
}

/// Cooperative cancellation shared between a search and whoever may stop it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(watch::Sender::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.inner.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.borrow()
    }

    pub fn reset(&self) {
        self.inner.send_replace(false);
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// A playlist id proposed by a strategy, not yet verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub playlist_id: String,
    pub strategy: SearchStrategy,
}

/// Candidates de-duplicated by playlist id, in first-discovery order.
#[derive(Debug, Default)]
pub struct CandidateSet {
    seen: HashSet<String>,
    ordered: Vec<Candidate>,
}

impl CandidateSet {
    /// Add a strategy's ids, returning only the ones not seen before.
    pub fn extend(&mut self, strategy: SearchStrategy, ids: Vec<String>) -> Vec<Candidate> {
        let mut fresh = Vec::new();
        for playlist_id in ids {
            if self.seen.insert(playlist_id.clone()) {
                let candidate = Candidate {
                    playlist_id,
                    strategy,
                };
                self.ordered.push(candidate.clone());
                fresh.push(candidate);
            }
        }
        fresh
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn as_slice(&self) -> &[Candidate] {
        &self.ordered
    }
}

/// Everything a run has gathered so far; survives cancellation.
#[derive(Default)]
struct RunState {
    reports: Vec<StrategyReport>,
    candidates: CandidateSet,
    confirmed: Vec<Playlist>,
    checked: usize,
    quota_exceeded: bool,
}

impl RunState {
    /// Record a strategy's outcome. Only fatal errors escape.
    fn record_strategy(
        &mut self,
        strategy: SearchStrategy,
        result: Result<Vec<String>>,
    ) -> Result<Vec<String>> {
        match result {
            Ok(ids) => {
                tracing::debug!(%strategy, found = ids.len(), "strategy finished");
                self.reports.push(StrategyReport {
                    strategy,
                    candidates: ids.len(),
                    error: None,
                });
                Ok(ids)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(%strategy, "strategy failed, skipping: {}", e);
                if matches!(e, FinderError::QuotaExceeded) {
                    self.quota_exceeded = true;
                }
                self.reports.push(StrategyReport {
                    strategy,
                    candidates: 0,
                    error: Some(e.to_string()),
                });
                Ok(Vec::new())
            }
        }
    }

    /// Record a membership check; returns true when verification should stop.
    fn record_check(
        &mut self,
        candidate: &Candidate,
        result: Result<Option<Playlist>>,
        max_playlists: usize,
    ) -> Result<bool> {
        self.checked += 1;
        match result {
            Ok(Some(playlist)) => self.confirmed.push(playlist),
            Ok(None) => {}
            Err(FinderError::QuotaExceeded) => {
                tracing::warn!("quota exceeded while checking playlists, keeping partial results");
                self.quota_exceeded = true;
                return Ok(true);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(playlist_id = %candidate.playlist_id, "skipping playlist: {}", e);
            }
        }
        Ok(self.confirmed.len() >= max_playlists)
    }

    fn status(&self) -> SearchStatus {
        if self.quota_exceeded {
            return SearchStatus::QuotaExceeded;
        }
        if !self.reports.is_empty() && self.reports.iter().all(|r| !r.succeeded()) {
            let reasons = self
                .reports
                .iter()
                .filter_map(|r| r.error.as_deref())
                .collect::<Vec<_>>()
                .join("; ");
            return SearchStatus::Failed(reasons);
        }
        SearchStatus::Complete
    }
}

/// Runs search strategies against the API and verifies their candidates.
pub struct PlaylistFinder {
    api: YouTubeApi,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
    playlists_checked: AtomicUsize,
    playlists_found: AtomicUsize,
}

impl PlaylistFinder {
    pub fn new(api: YouTubeApi) -> Self {
        Self {
            api,
            cancel: CancelToken::new(),
            progress: None,
            playlists_checked: AtomicUsize::new(0),
            playlists_found: AtomicUsize::new(0),
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn api(&self) -> &YouTubeApi {
        &self.api
    }

    /// Handle that stops the running (or next) search.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> FinderStats {
        FinderStats {
            quota_used: self.api.quota_used(),
            api_calls: self.api.api_calls(),
            playlists_checked: self.playlists_checked.load(Ordering::Relaxed),
            playlists_found: self.playlists_found.load(Ordering::Relaxed),
            cache: self.api.cache().stats(),
        }
    }

    /// Find the playlists containing `video_id`.
    ///
    /// Strategy failures are absorbed into the outcome's status; only a missing
    /// video or an authentication failure is returned as an error. A cancel
    /// issued before the call starts stops it immediately; the token is
    /// cleared once the call returns.
    pub async fn find_playlists(
        &self,
        video_id: &str,
        options: &SearchOptions,
    ) -> Result<SearchOutcome> {
        let result = self.run(video_id, options).await;
        self.cancel.reset();
        result
    }

    async fn run(&self, video_id: &str, options: &SearchOptions) -> Result<SearchOutcome> {
        self.api.begin_run();

        let strategies = SearchStrategy::normalize(&options.strategies);
        tracing::debug!(
            video_id,
            ?strategies,
            max_playlists = options.max_playlists,
            parallel = options.parallel,
            "starting search"
        );

        let video = self.api.get_video(video_id).await?;
        self.report(
            format!("Searching for playlists containing: {}", video.title),
            0,
        );

        let mut state = RunState::default();
        let interrupted = {
            let work = self.execute(&video, &strategies, options, &mut state);
            // Cancellation wins over work that happens to be ready.
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Some(SearchStatus::Cancelled),
                _ = sleep_for(options.search_timeout) => Some(SearchStatus::TimedOut),
                result = work => {
                    result?;
                    None
                }
            }
        };

        state.reports.sort_by_key(|r| r.strategy);
        state.confirmed.truncate(options.max_playlists);
        let status = interrupted.unwrap_or_else(|| state.status());

        self.playlists_checked.store(state.checked, Ordering::Relaxed);
        self.playlists_found
            .store(state.confirmed.len(), Ordering::Relaxed);
        self.report(status.describe(), 100);
        tracing::debug!(found = state.confirmed.len(), ?status, "search finished");

        Ok(SearchOutcome {
            video,
            playlists: state.confirmed,
            status,
            strategies: state.reports,
            candidates_checked: state.checked,
        })
    }

    /// Search several videos one after another; one failure does not stop the batch.
    pub async fn find_batch(
        &self,
        video_ids: &[String],
        options: &SearchOptions,
    ) -> Vec<(String, Result<SearchOutcome>)> {
        let mut results = Vec::with_capacity(video_ids.len());
        for video_id in video_ids {
            let result = self.find_playlists(video_id, options).await;
            let cancelled = matches!(
                &result,
                Ok(SearchOutcome {
                    status: SearchStatus::Cancelled,
                    ..
                })
            );
            results.push((video_id.clone(), result));
            if cancelled {
                break;
            }
        }
        results
    }

    async fn execute(
        &self,
        video: &Video,
        strategies: &[SearchStrategy],
        options: &SearchOptions,
        state: &mut RunState,
    ) -> Result<()> {
        if options.max_playlists == 0 {
            return Ok(());
        }
        if options.parallel {
            self.execute_parallel(video, strategies, options, state).await
        } else {
            self.execute_sequential(video, strategies, options, state).await
        }
    }

    /// One strategy at a time, verifying its new candidates before moving on.
    async fn execute_sequential(
        &self,
        video: &Video,
        strategies: &[SearchStrategy],
        options: &SearchOptions,
        state: &mut RunState,
    ) -> Result<()> {
        for (i, &strategy) in strategies.iter().enumerate() {
            self.report(
                format!("Strategy: {}", strategy),
                percent(i, strategies.len(), 0),
            );
            let result = self.run_strategy(strategy, video, options).await;
            let ids = state.record_strategy(strategy, result)?;
            let fresh = state.candidates.extend(strategy, ids);

            for candidate in fresh {
                let result = self.verify(&candidate, &video.id).await;
                if state.record_check(&candidate, result, options.max_playlists)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// All strategies at once, merged in priority order, then bounded parallel checks.
    async fn execute_parallel(
        &self,
        video: &Video,
        strategies: &[SearchStrategy],
        options: &SearchOptions,
        state: &mut RunState,
    ) -> Result<()> {
        let mut pending: FuturesUnordered<_> = strategies
            .iter()
            .enumerate()
            .map(|(idx, &strategy)| async move {
                let result = self.run_strategy(strategy, video, options).await;
                (idx, strategy, result)
            })
            .collect();

        let mut buffered: Vec<Option<(SearchStrategy, Vec<String>)>> =
            vec![None; strategies.len()];
        let mut completed = 0;
        while let Some((idx, strategy, result)) = pending.next().await {
            completed += 1;
            self.report(
                format!("Strategy {} finished ({}/{})", strategy, completed, strategies.len()),
                percent(completed, strategies.len(), 0),
            );
            let ids = state.record_strategy(strategy, result)?;
            buffered[idx] = Some((strategy, ids));
        }
        drop(pending);

        for (strategy, ids) in buffered.into_iter().flatten() {
            state.candidates.extend(strategy, ids);
        }

        let candidates = state.candidates.as_slice().to_vec();
        let total = candidates.len();
        self.report(format!("Checking {} playlists...", total), 50);

        let video_id = video.id.as_str();
        let mut checks = stream::iter(candidates)
            .map(|candidate| async move {
                let result = self.verify(&candidate, video_id).await;
                (candidate, result)
            })
            .buffered(options.max_workers.max(1));

        while let Some((candidate, result)) = checks.next().await {
            if state.record_check(&candidate, result, options.max_playlists)? {
                break;
            }
            self.report(
                format!("Checking playlist {}/{}", state.checked, total),
                percent(state.checked, total, 50),
            );
        }
        Ok(())
    }

    async fn run_strategy(
        &self,
        strategy: SearchStrategy,
        video: &Video,
        options: &SearchOptions,
    ) -> Result<Vec<String>> {
        let search = strategy
            .source()
            .candidates(&self.api, video, options.candidate_limit);

        match options.strategy_timeout {
            Some(limit) => tokio::time::timeout(limit, search)
                .await
                .map_err(|_| FinderError::Timeout {
                    what: format!("strategy {}", strategy),
                })?,
            None => search.await,
        }
    }

    async fn verify(&self, candidate: &Candidate, video_id: &str) -> Result<Option<Playlist>> {
        if !self
            .api
            .playlist_contains_video(&candidate.playlist_id, video_id)
            .await?
        {
            return Ok(None);
        }

        let mut playlist = self.api.get_playlist(&candidate.playlist_id).await?;
        playlist.mark_confirmed(candidate.strategy);
        tracing::info!(playlist = %playlist.title, id = %playlist.id, "found in playlist");
        Ok(Some(playlist))
    }

    fn report(&self, message: String, percent: u8) {
        if let Some(progress) = &self.progress {
            progress(SearchProgress { message, percent });
        }
    }
}

/// Map `done/total` onto a 50-point band starting at `base`.
fn percent(done: usize, total: usize, base: u8) -> u8 {
    if total == 0 {
        return base;
    }
    base + ((done.min(total) * 50) / total) as u8
}

async fn sleep_for(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn merged_candidates_have_no_duplicates() {
        let mut set = CandidateSet::default();
        set.extend(SearchStrategy::ExactTitle, ids(&["PL1", "PL2", "PL1"]));
        let fresh = set.extend(SearchStrategy::ChannelPlaylists, ids(&["PL2", "PL3"]));
        set.extend(SearchStrategy::Popular, ids(&["PL3", "PL1", "PL4"]));

        assert_eq!(fresh.len(), 1);
        let merged: Vec<&str> = set.as_slice().iter().map(|c| c.playlist_id.as_str()).collect();
        assert_eq!(merged, vec!["PL1", "PL2", "PL3", "PL4"]);
        let unique: HashSet<&str> = merged.iter().copied().collect();
        assert_eq!(unique.len(), merged.len());
    }

    #[test]
    fn first_discovery_wins() {
        let mut set = CandidateSet::default();
        set.extend(SearchStrategy::ChannelPlaylists, ids(&["PL9"]));
        set.extend(SearchStrategy::ExactTitle, ids(&["PL9"]));
        assert_eq!(set.as_slice()[0].strategy, SearchStrategy::ChannelPlaylists);
    }

    #[test]
    fn status_reflects_strategy_failures() {
        let mut state = RunState::default();
        state
            .record_strategy(SearchStrategy::ExactTitle, Err(FinderError::QuotaExceeded))
            .unwrap();
        assert_eq!(state.status(), SearchStatus::QuotaExceeded);

        let mut state = RunState::default();
        state
            .record_strategy(
                SearchStrategy::ExactTitle,
                Err(FinderError::Api {
                    status: 500,
                    message: "boom".into(),
                }),
            )
            .unwrap();
        assert!(matches!(state.status(), SearchStatus::Failed(_)));

        state
            .record_strategy(SearchStrategy::Popular, Ok(ids(&["PL1"])))
            .unwrap();
        assert_eq!(state.status(), SearchStatus::Complete);
    }

    #[test]
    fn auth_failure_escapes_strategy_recording() {
        let mut state = RunState::default();
        let err = state
            .record_strategy(
                SearchStrategy::ExactTitle,
                Err(FinderError::Auth {
                    reason: "bad key".into(),
                }),
            )
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn percent_stays_in_band() {
        assert_eq!(percent(0, 4, 0), 0);
        assert_eq!(percent(4, 4, 0), 50);
        assert_eq!(percent(2, 4, 50), 75);
        assert_eq!(percent(9, 4, 50), 100);
        assert_eq!(percent(0, 0, 50), 50);
    }

    #[tokio::test]
    async fn cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        token.cancel();
        waiter.await.unwrap();
        // Already cancelled: resolves without waiting.
        token.cancelled().await;
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
    }
}
