// lodge-net/src/fetch.rs
use std::fs;
use std::io;
use std::path::Path;

use lodge_common::error::Result;
use lodge_common::events::{InstallEvent, ProgressSink, Reporter};
use lodge_common::model::{FetchRequest, FetchResult, FetchStrategy, InstallPhase, SourceDescriptor};
use tracing::{debug, info, warn};

use crate::validation;

/// One attempt of one strategy: get the artifact bytes into `destination`.
///
/// Implementations only move bytes; deciding whether those bytes are usable
/// is the fetcher's job.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn attempt(
        &self,
        strategy: FetchStrategy,
        source: &SourceDescriptor,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64>;

    fn describe(&self, strategy: FetchStrategy, source: &SourceDescriptor) -> String {
        format!("{} ({})", source.id, strategy)
    }
}

/// Forwards progress to a reporter of any size.
struct ReporterSink<'a, R: ?Sized>(&'a R);

impl<R: Reporter + ?Sized> ProgressSink for ReporterSink<'_, R> {
    fn progress(&self, received: u64, total: Option<u64>) {
        self.0.progress(received, total);
    }
}

/// Runs the configured strategies in order, each with its own attempt budget,
/// until one produces a validated archive.
#[derive(Debug, Clone)]
pub struct Fetcher<T> {
    transport: T,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn fetch<R: Reporter + ?Sized>(
        &self,
        request: &FetchRequest,
        reporter: &R,
    ) -> FetchResult {
        let destination = request.destination();
        let sink = ReporterSink(reporter);
        let mut attempts: u32 = 0;
        let mut failures: Vec<String> = Vec::new();

        for &strategy in request.strategies() {
            let budget = request.attempts_for(strategy);
            let mut last_reason = String::from("not attempted");

            for attempt in 1..=budget {
                attempts += 1;
                let target = self.transport.describe(strategy, request.source());
                info!(
                    "Fetching via {} (attempt {}/{}): {}",
                    strategy, attempt, budget, target
                );
                reporter.report(InstallEvent::DownloadStarted {
                    strategy,
                    attempt,
                    url: target,
                });

                let outcome = self
                    .transport
                    .attempt(strategy, request.source(), destination, &sink)
                    .await;

                let give_up_on_strategy = match outcome {
                    Ok(bytes) => {
                        reporter.report(InstallEvent::Phase {
                            phase: InstallPhase::Validating,
                        });
                        let verdict = validation::validate(destination);
                        if verdict.is_valid() {
                            info!("Downloaded valid archive ({} bytes) via {}", bytes, strategy);
                            reporter.report(InstallEvent::DownloadFinished {
                                path: destination.to_path_buf(),
                                size_bytes: bytes,
                            });
                            return FetchResult::Success {
                                path: destination.to_path_buf(),
                                bytes,
                                attempts,
                            };
                        }
                        last_reason = verdict.to_string();
                        false
                    }
                    Err(e) => {
                        last_reason = e.to_string();
                        !e.is_retryable()
                    }
                };

                warn!(
                    "Attempt {}/{} via {} failed: {}",
                    attempt, budget, strategy, last_reason
                );
                reporter.report(InstallEvent::AttemptFailed {
                    strategy,
                    attempt,
                    reason: last_reason.clone(),
                });

                if give_up_on_strategy {
                    debug!("Failure via {} cannot improve on retry", strategy);
                    break;
                }
                if attempt < budget && !request.backoff().is_zero() {
                    tokio::time::sleep(request.backoff()).await;
                }
            }

            discard(destination);
            failures.push(format!("{strategy}: {last_reason}"));
        }

        FetchResult::Failure {
            reason: format!("All fetch strategies failed. {}", failures.join("; ")),
            attempts,
        }
    }
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Discarded {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to discard {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use lodge_common::error::LodgeError;
    use lodge_common::ChannelReporter;

    use super::*;

    enum Step {
        Write(Vec<u8>),
        Fail(LodgeError),
    }

    /// Plays back a fixed script of outcomes and records which strategy each
    /// attempt used.
    #[derive(Default)]
    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<FetchStrategy>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<FetchStrategy> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        async fn attempt(
            &self,
            strategy: FetchStrategy,
            _source: &SourceDescriptor,
            destination: &Path,
            sink: &dyn ProgressSink,
        ) -> Result<u64> {
            self.calls.lock().unwrap().push(strategy);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Write(bytes)) => {
                    fs::write(destination, &bytes)?;
                    sink.progress(bytes.len() as u64, Some(bytes.len() as u64));
                    Ok(bytes.len() as u64)
                }
                Some(Step::Fail(e)) => Err(e),
                None => Err(LodgeError::Network("script".into(), "exhausted".into())),
            }
        }
    }

    fn html() -> Step {
        Step::Write(b"<!DOCTYPE html><html>Quota exceeded</html>".to_vec())
    }

    fn zip() -> Step {
        Step::Write(b"PK\x03\x04rest-of-archive".to_vec())
    }

    fn network() -> Step {
        Step::Fail(LodgeError::Network("u".into(), "connection reset".into()))
    }

    fn request(dir: &tempfile::TempDir, strategies: Vec<FetchStrategy>, retries: u32) -> FetchRequest {
        FetchRequest::new(
            SourceDescriptor::new("FILE1"),
            strategies,
            retries,
            Duration::ZERO,
            dir.path().join("archive.zip"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn valid_archive_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(ScriptedTransport::new(vec![zip()]));
        let request = request(&dir, FetchStrategy::ALL.to_vec(), 3);

        let result = fetcher.fetch(&request, &lodge_common::NullReporter).await;
        assert_eq!(
            result,
            FetchResult::Success {
                path: dir.path().join("archive.zip"),
                bytes: 19,
                attempts: 1
            }
        );
        assert_eq!(fetcher.transport().calls(), vec![FetchStrategy::Direct]);
    }

    #[tokio::test]
    async fn retries_same_strategy_before_advancing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(ScriptedTransport::new(vec![
            html(),
            network(),
            html(),
            network(),
            zip(),
        ]));
        let request = request(
            &dir,
            vec![FetchStrategy::Direct, FetchStrategy::TokenConfirmed],
            3,
        );

        let result = fetcher.fetch(&request, &lodge_common::NullReporter).await;
        assert!(result.is_success());
        assert_eq!(result.attempts(), 5);
        assert_eq!(
            fetcher.transport().calls(),
            vec![
                FetchStrategy::Direct,
                FetchStrategy::Direct,
                FetchStrategy::Direct,
                FetchStrategy::TokenConfirmed,
                FetchStrategy::TokenConfirmed,
            ]
        );
    }

    #[tokio::test]
    async fn exhausted_strategies_report_last_verdict_of_each() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(ScriptedTransport::new(vec![
            network(),
            html(),
            Step::Write(Vec::new()),
        ]));
        let request = request(
            &dir,
            vec![FetchStrategy::Direct, FetchStrategy::AlternateHost],
            2,
        )
        .with_attempts_for(FetchStrategy::AlternateHost, 1);

        match fetcher.fetch(&request, &lodge_common::NullReporter).await {
            FetchResult::Failure { reason, attempts } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("direct: unexpected content (<!DOCTYPE html>"));
                assert!(reason.contains("alternate-host: empty payload"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!dir.path().join("archive.zip").exists());
    }

    #[tokio::test]
    async fn non_retryable_error_abandons_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(ScriptedTransport::new(vec![
            Step::Fail(LodgeError::ValidationError("bad scheme".into())),
            zip(),
        ]));
        let request = request(
            &dir,
            vec![FetchStrategy::Direct, FetchStrategy::AlternateHost],
            3,
        );

        let result = fetcher.fetch(&request, &lodge_common::NullReporter).await;
        assert_eq!(result.attempts(), 2);
        assert_eq!(
            fetcher.transport().calls(),
            vec![FetchStrategy::Direct, FetchStrategy::AlternateHost]
        );
    }

    #[tokio::test]
    async fn advancing_to_next_strategy_does_not_wait() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(ScriptedTransport::new(vec![html(), zip()]));
        let request = FetchRequest::new(
            SourceDescriptor::new("FILE1"),
            vec![FetchStrategy::Direct, FetchStrategy::AlternateHost],
            3,
            Duration::from_millis(300),
            dir.path().join("archive.zip"),
        )
        .unwrap()
        .with_attempts_for(FetchStrategy::Direct, 1);

        let started = std::time::Instant::now();
        let result = fetcher.fetch(&request, &lodge_common::NullReporter).await;
        assert!(result.is_success());
        assert_eq!(result.attempts(), 2);
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn retrying_same_strategy_waits_for_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(ScriptedTransport::new(vec![network(), zip()]));
        let request = FetchRequest::new(
            SourceDescriptor::new("FILE1"),
            vec![FetchStrategy::Direct],
            2,
            Duration::from_millis(50),
            dir.path().join("archive.zip"),
        )
        .unwrap();

        let started = std::time::Instant::now();
        assert!(fetcher.fetch(&request, &lodge_common::NullReporter).await.is_success());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn reporter_sees_attempts_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (reporter, mut rx) = ChannelReporter::new(64);
        let fetcher = Fetcher::new(ScriptedTransport::new(vec![network(), zip()]));
        let request = request(&dir, vec![FetchStrategy::Direct], 2);

        assert!(fetcher.fetch(&request, &reporter).await.is_success());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.iter().any(|e| matches!(
            e,
            InstallEvent::AttemptFailed { attempt: 1, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            InstallEvent::DownloadProgress { received: 19, total: Some(19) }
        )));
        assert!(matches!(
            events.last(),
            Some(InstallEvent::DownloadFinished { size_bytes: 19, .. })
        ));
    }
}
