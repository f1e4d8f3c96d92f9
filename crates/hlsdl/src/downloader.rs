// HLS Segment Downloader: a fixed pool of workers pulling segments from a
// shared queue, writing each one to its own transient file. The first fatal
// result seen by the collector cancels the job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use url::Url;

use crate::DownloadError;
use crate::fetcher::ResourceFetcher;
use crate::progress::ProgressObserver;
use crate::retry::{RetryAction, RetryPolicy, retry_with_policy};
use crate::segment::{DownloadResult, Segment, SegmentSet};

/// Transient storage file name for a segment.
pub fn segment_file_name(sequence: u64) -> String {
    format!("seg{sequence}.ts")
}

#[derive(Debug)]
struct SegmentJob {
    sequence: u64,
    url: Url,
    path: PathBuf,
}

/// State shared by every worker of one download job.
struct JobContext {
    token: CancellationToken,
    fetcher: Arc<dyn ResourceFetcher>,
    retry: RetryPolicy,
    queue: Mutex<mpsc::Receiver<SegmentJob>>,
    /// Written by the collector only.
    completed: AtomicUsize,
    fetch_attempts: AtomicUsize,
}

pub struct Downloader {
    fetcher: Arc<dyn ResourceFetcher>,
    storage_dir: PathBuf,
    workers: usize,
    retry: RetryPolicy,
    progress: Option<Arc<dyn ProgressObserver>>,
}

impl Downloader {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        storage_dir: impl Into<PathBuf>,
        workers: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            storage_dir: storage_dir.into(),
            workers,
            retry,
            progress: None,
        }
    }

    pub fn with_progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Download every segment of `segments` into transient storage.
    ///
    /// On success each segment has its storage path attached. On failure the
    /// first fatal error observed is returned; files already written are left
    /// in place.
    pub async fn download(
        &self,
        segments: &mut SegmentSet,
        parent: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let total = segments.len();
        if total == 0 {
            return Ok(());
        }
        let workers = self.workers.clamp(1, total);
        let token = parent.child_token();

        let jobs: Vec<SegmentJob> = segments
            .iter()
            .map(|segment| SegmentJob {
                sequence: segment.sequence(),
                url: segment.uri().clone(),
                path: self.storage_dir.join(segment_file_name(segment.sequence())),
            })
            .collect();

        let (job_tx, job_rx) = mpsc::channel(workers);
        let (result_tx, mut result_rx) = mpsc::channel(workers);
        let ctx = Arc::new(JobContext {
            token: token.clone(),
            fetcher: Arc::clone(&self.fetcher),
            retry: self.retry.clone(),
            queue: Mutex::new(job_rx),
            completed: AtomicUsize::new(0),
            fetch_attempts: AtomicUsize::new(0),
        });

        info!(segments = total, workers, "Starting segment download");

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            tasks.spawn(run_worker(worker_id, Arc::clone(&ctx), result_tx.clone()));
        }
        drop(result_tx);
        tasks.spawn(feed_jobs(jobs, job_tx, token.clone()));

        if let Some(progress) = &self.progress {
            progress.on_start(total as u64);
        }

        let mut by_sequence: HashMap<u64, &mut Segment> = segments
            .iter_mut()
            .map(|segment| (segment.sequence(), segment))
            .collect();

        // Single collector: the only place where the job is declared failed.
        let mut failure: Option<DownloadError> = None;
        while let Some(result) = result_rx.recv().await {
            let sequence = result.sequence;
            match result.outcome {
                Ok(path) => {
                    if let Some(segment) = by_sequence.get_mut(&sequence) {
                        segment.attach_storage(path);
                    }
                    let done = ctx.completed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(progress) = &self.progress {
                        progress.on_segment_complete(sequence);
                    }
                    trace!(sequence, done, total, "Segment downloaded");
                }
                Err(DownloadError::Cancelled) => {
                    trace!(sequence, "Segment abandoned after cancellation");
                }
                Err(err) => {
                    if failure.is_none() {
                        error!(sequence, error = %err, "Segment download failed, aborting job");
                        token.cancel();
                        failure = Some(err);
                    } else {
                        debug!(sequence, error = %err, "Discarding error reported after job failure");
                    }
                }
            }
        }

        // Every worker is gone; release the feeder if it is still blocked.
        token.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined
                && failure.is_none()
            {
                failure = Some(DownloadError::internal(format!(
                    "download task failed: {e}"
                )));
            }
        }

        if let Some(progress) = &self.progress {
            progress.on_finish();
        }

        let completed = ctx.completed.load(Ordering::Relaxed);
        let attempts = ctx.fetch_attempts.load(Ordering::Relaxed);
        if let Some(err) = failure {
            return Err(err);
        }
        if completed < total {
            if parent.is_cancelled() {
                info!(completed, total, "Segment download cancelled");
                return Err(DownloadError::Cancelled);
            }
            return Err(DownloadError::internal(format!(
                "only {completed} of {total} segments completed"
            )));
        }

        info!(segments = total, fetch_attempts = attempts, "All segments downloaded");
        Ok(())
    }
}

async fn feed_jobs(
    jobs: Vec<SegmentJob>,
    queue: mpsc::Sender<SegmentJob>,
    token: CancellationToken,
) {
    for job in jobs {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            sent = queue.send(job) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    ctx: Arc<JobContext>,
    results: mpsc::Sender<DownloadResult>,
) {
    loop {
        let next = ctx.queue.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };

        // Cancellation is only observed between segments.
        if ctx.token.is_cancelled() {
            let _ = results
                .send(DownloadResult::failure(job.sequence, DownloadError::Cancelled))
                .await;
            break;
        }

        let result = match download_segment(&ctx, &job).await {
            Ok(()) => DownloadResult::success(job.sequence, job.path),
            Err(err) => DownloadResult::failure(job.sequence, err),
        };
        let stop = result.outcome.is_err();
        if results.send(result).await.is_err() || stop {
            break;
        }
    }
    trace!(worker_id, "Download worker exiting");
}

async fn download_segment(ctx: &JobContext, job: &SegmentJob) -> Result<(), DownloadError> {
    let bytes = retry_with_policy(&ctx.retry, &ctx.token, move |attempt| {
        ctx.fetch_attempts.fetch_add(1, Ordering::Relaxed);
        if attempt > 1 {
            debug!(sequence = job.sequence, attempt, "Retrying segment download");
        }
        async move { RetryAction::from(ctx.fetcher.fetch(&job.url, "segment").await) }
    })
    .await?;

    tokio::fs::write(&job.path, &bytes)
        .await
        .map_err(|e| DownloadError::storage(&job.path, e))?;
    trace!(sequence = job.sequence, size = bytes.len(), path = %job.path.display(), "Segment stored");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use std::collections::{HashSet, VecDeque};
    use std::time::Duration;

    /// In-memory fetcher with scripted failures.
    #[derive(Default)]
    struct ScriptedFetcher {
        transient: parking_lot::Mutex<HashMap<String, VecDeque<DownloadError>>>,
        not_found: HashSet<String>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn fail_transiently(&self, url: &str, times: usize) {
            let errors = (0..times)
                .map(|_| DownloadError::network(url, "connection reset by peer", true))
                .collect();
            self.transient.lock().insert(url.to_string(), errors);
        }

        fn calls_for(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn payload_for(url: &Url) -> Bytes {
        Bytes::from(format!("payload:{}", url.path()))
    }

    #[async_trait]
    impl ResourceFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &Url, operation: &'static str) -> Result<Bytes, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if self.not_found.contains(url.as_str()) {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(DownloadError::http_status(
                    StatusCode::NOT_FOUND,
                    url.as_str(),
                    operation,
                ));
            }
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(err) = self
                .transient
                .lock()
                .get_mut(url.as_str())
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
            Ok(payload_for(url))
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        started: AtomicUsize,
        completed: AtomicUsize,
    }

    impl ProgressObserver for CountingObserver {
        fn on_start(&self, total: u64) {
            self.started.store(total as usize, Ordering::SeqCst);
        }

        fn on_segment_complete(&self, _sequence: u64) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn url(sequence: u64) -> String {
        format!("https://cdn.example.com/v/seg{sequence}.ts")
    }

    fn segment_set(sequences: &[u64]) -> SegmentSet {
        SegmentSet::new(
            sequences
                .iter()
                .map(|&s| Segment::new(s, Url::parse(&url(s)).unwrap(), None))
                .collect(),
        )
        .unwrap()
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(5))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn downloads_every_segment_for_any_worker_count() {
        for workers in 1..=6 {
            let dir = tempfile::tempdir().unwrap();
            let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(2)));
            let downloader =
                Downloader::new(fetcher.clone(), dir.path(), workers, quick_retry());
            let mut set = segment_set(&[7, 3, 9, 1, 5]);

            downloader
                .download(&mut set, &CancellationToken::new())
                .await
                .unwrap();

            for segment in set.iter() {
                let path = segment.storage().expect("storage attached");
                assert_eq!(path, dir.path().join(segment_file_name(segment.sequence())));
                let written = std::fs::read(path).unwrap();
                assert_eq!(written, payload_for(segment.uri()).to_vec());
            }
            assert_eq!(fetcher.calls_for(), 5);
            assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= workers.min(5));
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.fail_transiently(&url(2), 2);
        let downloader = Downloader::new(fetcher.clone(), dir.path(), 2, quick_retry());
        let mut set = segment_set(&[1, 2, 3]);

        downloader
            .download(&mut set, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fetcher.calls_for(), 5);
        let seg2 = set.iter().find(|s| s.sequence() == 2).unwrap();
        assert_eq!(
            std::fs::read(seg2.storage().unwrap()).unwrap(),
            payload_for(seg2.uri()).to_vec()
        );
    }

    #[tokio::test]
    async fn exhausted_retry_budget_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.fail_transiently(&url(2), 3);
        let downloader = Downloader::new(fetcher.clone(), dir.path(), 1, quick_retry());
        let mut set = segment_set(&[1, 2, 3]);

        let err = downloader
            .download(&mut set, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Network { .. }));
        // seg1 once, seg2 three times, seg3 never.
        assert_eq!(fetcher.calls_for(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fatal_status_aborts_without_starting_new_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let workers = 3;
        let mut fetcher = ScriptedFetcher::with_delay(Duration::from_millis(30));
        fetcher.not_found.insert(url(0));
        let fetcher = Arc::new(fetcher);
        let observer = Arc::new(CountingObserver::default());
        let downloader = Downloader::new(fetcher.clone(), dir.path(), workers, quick_retry())
            .with_progress(observer.clone());
        let sequences: Vec<u64> = (0..20).collect();
        let mut set = segment_set(&sequences);

        let err = downloader
            .download(&mut set, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DownloadError::HttpStatus {
                status: StatusCode::NOT_FOUND,
                ..
            }
        ));
        // Only the fetches already in flight when the failure was reported.
        assert!(fetcher.calls_for() <= workers);
        let attached = set.iter().filter(|s| s.storage().is_some()).count();
        assert_eq!(observer.completed.load(Ordering::SeqCst), attached);
        assert!(attached < 20);
    }

    #[tokio::test]
    async fn progress_reports_each_completed_segment_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.fail_transiently(&url(4), 1);
        let observer = Arc::new(CountingObserver::default());
        let downloader = Downloader::new(fetcher, dir.path(), 3, quick_retry())
            .with_progress(observer.clone());
        let mut set = segment_set(&[0, 1, 2, 3, 4, 5]);

        downloader
            .download(&mut set, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(observer.started.load(Ordering::SeqCst), 6);
        assert_eq!(observer.completed.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn external_cancellation_stops_before_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let downloader = Downloader::new(fetcher.clone(), dir.path(), 2, quick_retry());
        let mut set = segment_set(&[0, 1, 2]);
        let token = CancellationToken::new();
        token.cancel();

        let err = downloader.download(&mut set, &token).await.unwrap_err();

        assert!(matches!(err, DownloadError::Cancelled));
        assert_eq!(fetcher.calls_for(), 0);
    }

    #[tokio::test]
    async fn storage_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let fetcher = Arc::new(ScriptedFetcher::default());
        let downloader = Downloader::new(fetcher, &missing, 1, quick_retry());
        let mut set = segment_set(&[0, 1]);

        let err = downloader
            .download(&mut set, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Storage { .. }));
    }

    #[tokio::test]
    async fn empty_set_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let downloader = Downloader::new(fetcher.clone(), dir.path(), 4, quick_retry());
        let mut set = SegmentSet::default();

        downloader
            .download(&mut set, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fetcher.calls_for(), 0);
    }
}
