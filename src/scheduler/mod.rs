//! Bounded-concurrency batch analysis
//!
//! Jobs run on a dedicated rayon pool whose thread count is the permit
//! limit; jobs beyond it wait in the pool's queue. Every scheduled job
//! reports exactly one finish, cancelled or failed ones included, and the
//! listener hears `on_all_finished` once the last outstanding job is done.

mod cancel;
mod listener;

pub use cancel::CancelToken;
pub use listener::{AnalysisEvent, AnalysisListener, ChannelListener, NoopListener};

use crate::analysis::{Analysis, TempoAnalyzer};
use crate::config::MAX_CONCURRENT_LIMIT;
use crate::error::SchedulerError;
use crate::model::{Song, SongId};
use crate::store::SongAnalysisStore;
use anyhow::Context;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Final state of one analysis job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum JobOutcome {
    /// Analysis ran to the end; None when too few onsets were found
    Completed(Option<f64>),
    Cancelled,
    Failed(String),
}

/// Result of asking the scheduler to analyze one song
#[derive(Debug, Clone)]
pub enum Submission {
    Scheduled(JobHandle),
    /// Song already has a stored analysis and `force` was not set
    Skipped,
    AlreadyRunning(JobHandle),
}

impl Submission {
    pub fn handle(&self) -> Option<&JobHandle> {
        match self {
            Submission::Scheduled(handle) | Submission::AlreadyRunning(handle) => Some(handle),
            Submission::Skipped => None,
        }
    }
}

/// Counts of an `analyze_all` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub scheduled: usize,
    pub skipped: usize,
}

#[derive(Debug)]
struct JobState {
    song_id: SongId,
    cancel: CancelToken,
    outcome: Mutex<Option<JobOutcome>>,
    done: Condvar,
}

/// Handle to a scheduled job, shared by the scheduler and its callers
#[derive(Debug, Clone)]
pub struct JobHandle {
    state: Arc<JobState>,
}

impl JobHandle {
    fn new(song_id: SongId) -> Self {
        Self {
            state: Arc::new(JobState {
                song_id,
                cancel: CancelToken::new(),
                outcome: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    pub fn song_id(&self) -> SongId {
        self.state.song_id
    }

    /// Request cooperative cancellation of this job
    pub fn cancel(&self) {
        self.state.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.state.outcome).is_some()
    }

    fn is_same_job(&self, other: &JobHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Block until the job and its callbacks are done
    pub fn wait(&self) -> JobOutcome {
        let mut outcome = lock(&self.state.outcome);
        loop {
            if let Some(ref result) = *outcome {
                return result.clone();
            }
            outcome = self
                .state
                .done
                .wait(outcome)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn complete(&self, result: JobOutcome) {
        *lock(&self.state.outcome) = Some(result);
        self.state.done.notify_all();
    }
}

#[derive(Default)]
struct State {
    jobs: HashMap<SongId, JobHandle>,
    /// Jobs scheduled and not yet finished
    active: usize,
    /// Jobs past their finish bookkeeping but still running callbacks
    settling: usize,
    /// A finishing job has claimed the `on_all_finished` callback
    notifying: bool,
}

impl State {
    /// Outstanding job for `song_id` that has not been cancelled
    fn live_job(&self, song_id: SongId) -> Option<&JobHandle> {
        self.jobs.get(&song_id).filter(|handle| !handle.is_cancelled())
    }

    /// Nothing outstanding and no `on_all_finished` in flight
    fn is_idle(&self) -> bool {
        self.active == 0 && !self.notifying
    }
}

struct Shared {
    analyzer: Arc<dyn TempoAnalyzer>,
    store: Arc<SongAnalysisStore>,
    listener: Arc<dyn AnalysisListener>,
    state: Mutex<State>,
    idle: Condvar,
}

/// Runs per-song analysis jobs with at most `max_concurrent` in flight
pub struct BatchScheduler {
    pool: rayon::ThreadPool,
    shared: Arc<Shared>,
    max_concurrent: usize,
}

impl BatchScheduler {
    pub fn new(
        analyzer: Arc<dyn TempoAnalyzer>,
        store: Arc<SongAnalysisStore>,
        listener: Arc<dyn AnalysisListener>,
        max_concurrent: usize,
    ) -> Result<Self, SchedulerError> {
        let max_concurrent = max_concurrent.clamp(1, MAX_CONCURRENT_LIMIT);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_concurrent)
            .thread_name(|i| format!("bpm-analysis-{}", i))
            .build()?;

        log::debug!("Batch scheduler ready with {} workers", max_concurrent);

        Ok(Self {
            pool,
            shared: Arc::new(Shared {
                analyzer,
                store,
                listener,
                state: Mutex::new(State::default()),
                idle: Condvar::new(),
            }),
            max_concurrent,
        })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Schedule one song
    ///
    /// Without `force`, a song that already has a stored analysis is skipped.
    /// A song with an outstanding job returns that job's handle, unless the
    /// job was cancelled: then a fresh job replaces it.
    pub fn analyze(&self, song: Song, force: bool) -> Result<Submission, SchedulerError> {
        let mut state = self.shared.lock_state();

        if let Some(handle) = state.live_job(song.id) {
            log::debug!("Analysis already running for {}", song.title);
            return Ok(Submission::AlreadyRunning(handle.clone()));
        }
        if !force && self.shared.store.is_analyzed(song.id)? {
            log::debug!("Skipping analyzed song {}", song.title);
            return Ok(Submission::Skipped);
        }

        Ok(Submission::Scheduled(self.submit(&mut state, song)))
    }

    /// Schedule every song that is neither analyzed nor already running
    ///
    /// With nothing left to schedule and nothing outstanding, the listener
    /// hears `on_all_finished` right away.
    pub fn analyze_all<I>(&self, songs: I) -> Result<BatchReport, SchedulerError>
    where
        I: IntoIterator<Item = Song>,
    {
        let mut report = BatchReport::default();
        let mut state = self.shared.lock_state();

        // The state lock is held for the whole submission, so no job can
        // see the batch as finished halfway through it
        for song in songs {
            if state.live_job(song.id).is_some() || self.shared.store.is_analyzed(song.id)? {
                report.skipped += 1;
                continue;
            }
            self.submit(&mut state, song);
            report.scheduled += 1;
        }

        let idle = state.is_idle();
        drop(state);

        log::info!(
            "Batch analysis: {} scheduled, {} skipped",
            report.scheduled,
            report.skipped
        );

        if idle {
            self.shared.listener.on_all_finished();
        }
        Ok(report)
    }

    /// Cancel the outstanding job for `song_id`, if any
    pub fn cancel(&self, song_id: SongId) -> bool {
        match self.shared.lock_state().jobs.get(&song_id) {
            Some(handle) => {
                log::debug!("Cancelling analysis of {}", song_id);
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every outstanding job
    ///
    /// Queued jobs finish as cancelled without running.
    pub fn cancel_all(&self) {
        let state = self.shared.lock_state();
        log::info!("Cancelling {} outstanding analyses", state.jobs.len());
        for handle in state.jobs.values() {
            handle.cancel();
        }
        let idle = state.is_idle();
        drop(state);

        if idle {
            self.shared.listener.on_all_finished();
        }
    }

    /// Whether `song_id` (or with None, any song) has an outstanding job
    pub fn is_running(&self, song_id: Option<SongId>) -> bool {
        let state = self.shared.lock_state();
        match song_id {
            Some(id) => state.jobs.contains_key(&id),
            None => state.active > 0,
        }
    }

    /// Block until no job is outstanding and all callbacks have returned
    pub fn wait_idle(&self) {
        let mut state = self.shared.lock_state();
        while !state.is_idle() || state.settling > 0 {
            state = self
                .shared
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn submit(&self, state: &mut State, song: Song) -> JobHandle {
        let handle = JobHandle::new(song.id);
        state.jobs.insert(song.id, handle.clone());
        state.active += 1;

        let shared = Arc::clone(&self.shared);
        let job = handle.clone();
        self.pool.spawn(move || shared.run(song, job));

        handle
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn run(&self, song: Song, handle: JobHandle) {
        let cancel = &handle.state.cancel;

        let outcome = if cancel.is_cancelled() {
            log::debug!("Dropping cancelled job for {}", song.title);
            JobOutcome::Cancelled
        } else {
            self.listener.on_start(song.id);
            match self.analyze(&song, cancel) {
                Ok(outcome) => outcome,
                Err(_) if cancel.is_cancelled() => JobOutcome::Cancelled,
                Err(e) => {
                    log::warn!("Analysis failed for {}: {:#}", song.title, e);
                    JobOutcome::Failed(format!("{:#}", e))
                }
            }
        };

        {
            // A re-request may already have replaced this job
            let mut state = self.lock_state();
            if state
                .jobs
                .get(&song.id)
                .is_some_and(|current| current.is_same_job(&handle))
            {
                state.jobs.remove(&song.id);
            }
        }

        self.listener.on_finish(song.id, &outcome);

        let all_finished = {
            let mut state = self.lock_state();
            state.active -= 1;
            state.settling += 1;
            let last = state.active == 0 && !state.notifying;
            if last {
                state.notifying = true;
            }
            last
        };

        if all_finished {
            log::debug!("All analyses finished");
            self.listener.on_all_finished();
            self.lock_state().notifying = false;
        }

        handle.complete(outcome);

        let mut state = self.lock_state();
        state.settling -= 1;
        self.idle.notify_all();
    }

    fn analyze(&self, song: &Song, cancel: &CancelToken) -> anyhow::Result<JobOutcome> {
        let manual_bpm = self
            .store
            .manual_bpm(song.id)
            .context("Failed to read manual BPM")?;

        match self.analyzer.analyze(song, manual_bpm, cancel)? {
            Analysis::Estimated(_) if cancel.is_cancelled() => Ok(JobOutcome::Cancelled),
            Analysis::Estimated(estimate) => {
                self.store
                    .record_bpm(song.id, estimate.bpm)
                    .context("Failed to store BPM")?;
                Ok(JobOutcome::Completed(estimate.bpm))
            }
            Analysis::Cancelled => Ok(JobOutcome::Cancelled),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
