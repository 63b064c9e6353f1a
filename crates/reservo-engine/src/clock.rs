//! # Clock Sync Service
//!
//! Keeps an estimate of `network_time - local_time` so that time-critical
//! actions in every session fire at the same wall-clock instant.
//!
//! ## Polling Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ClockSyncService                                 │
//! │                                                                         │
//! │   interval tick ──► TimeSource::now() ──► offset = network - local      │
//! │        │              (bounded by request_timeout)                      │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   ┌──────────────────────┐     send_replace      ┌──────────────────┐  │
//! │   │ TimeSyncStatus       │ ────────────────────► │ watch::Receiver  │  │
//! │   │ {offset, lastSynced, │                       │ (sessions)       │  │
//! │   │  synced, error}      │ ──► subscribers       └──────────────────┘  │
//! │   └──────────────────────┘ ──► EventBus "time_sync"                     │
//! │                                                                         │
//! │   Poll failure: offset and lastSynced are kept, `error` is set.         │
//! │   current_status() re-evaluates `synced` at read time, so a stopped     │
//! │   service goes stale on its own.                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reservo_core::{SyncThresholds, TimeSyncStatus};

use crate::config::ClockSettings;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus, Subscription};

// =============================================================================
// Time Source
// =============================================================================

/// A trusted clock.
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Current network time.
    async fn now(&self) -> EngineResult<DateTime<Utc>>;
}

/// Number of `Date` samples taken per poll by default.
pub const DEFAULT_DATE_SAMPLES: u32 = 3;

/// Offset resolution (ms) reachable with `samples` `Date` header samples.
///
/// The header has one-second resolution. Each extra sample is aimed at the
/// estimated second boundary and halves the window of possible offsets.
pub fn date_resolution_ms(samples: u32) -> u64 {
    1_000 >> samples.clamp(1, 10).saturating_sub(1)
}

/// Range `[lo, hi)` of offsets (ms) consistent with the `Date` samples
/// seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetWindow {
    pub lo_ms: i64,
    pub hi_ms: i64,
}

impl OffsetWindow {
    /// A header reading `date` at local instant `local` means the server
    /// clock was somewhere in `[date, date + 1s)`.
    pub fn from_sample(date: DateTime<Utc>, local: DateTime<Utc>) -> Self {
        let lo_ms = (date - local).num_milliseconds();
        OffsetWindow {
            lo_ms,
            hi_ms: lo_ms + 1_000,
        }
    }

    /// Intersects with another sample. A sample disjoint from the window
    /// (network jitter) replaces it.
    pub fn narrow(self, sample: OffsetWindow) -> OffsetWindow {
        let lo_ms = self.lo_ms.max(sample.lo_ms);
        let hi_ms = self.hi_ms.min(sample.hi_ms);
        if lo_ms < hi_ms {
            OffsetWindow { lo_ms, hi_ms }
        } else {
            sample
        }
    }

    pub fn estimate_ms(&self) -> i64 {
        self.lo_ms + (self.hi_ms - self.lo_ms) / 2
    }

    pub fn width_ms(&self) -> i64 {
        self.hi_ms - self.lo_ms
    }

    /// Local instant at which the estimated server clock next crosses a
    /// whole second. A sample taken there splits the window in half.
    pub fn next_boundary(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let server = after + chrono::Duration::milliseconds(self.estimate_ms());
        let into_second = i64::from(server.timestamp_subsec_millis());
        after + chrono::Duration::milliseconds(1_000 - into_second)
    }
}

/// Reads network time from the `Date` header of HEAD requests.
///
/// ```text
///  sample 1          sample 2 (aimed at the          sample 3
///  window 1000ms     estimated second boundary)      window 250ms
///  [--------)   ──►  [----)                    ──►   [--)
/// ```
///
/// Each sample is timestamped at the local midpoint of its round trip.
/// With the default three samples the offset is known to within 250ms.
pub struct HttpTimeSource {
    client: reqwest::Client,
    url: String,
    samples: u32,
}

impl HttpTimeSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let url = url.into();
        url::Url::parse(&url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpTimeSource {
            client,
            url,
            samples: DEFAULT_DATE_SAMPLES,
        })
    }

    /// Sets the number of samples per poll (at least one).
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    async fn sample(&self) -> EngineResult<(OffsetWindow, Duration)> {
        let sent_local = Utc::now();
        let sent = std::time::Instant::now();
        let response = self.client.head(&self.url).send().await?;
        let round_trip = sent.elapsed();

        let header = response
            .headers()
            .get(reqwest::header::DATE)
            .ok_or_else(|| {
                EngineError::ClockSyncUnavailable(format!("{} returned no Date header", self.url))
            })?;
        let value = header
            .to_str()
            .map_err(|e| EngineError::ClockSyncUnavailable(e.to_string()))?;

        let date = parse_http_date(value)?;
        let half_rtt = chrono::Duration::from_std(round_trip / 2).unwrap_or_else(|_| chrono::Duration::zero());
        Ok((OffsetWindow::from_sample(date, sent_local + half_rtt), round_trip))
    }
}

#[async_trait]
impl TimeSource for HttpTimeSource {
    async fn now(&self) -> EngineResult<DateTime<Utc>> {
        let (mut window, mut round_trip) = self.sample().await?;

        for _ in 1..self.samples {
            // Aim the midpoint of the next round trip at the boundary.
            let target = window.next_boundary(Utc::now());
            let lead = chrono::Duration::from_std(round_trip / 2).unwrap_or_else(|_| chrono::Duration::zero());
            if let Ok(wait) = (target - lead - Utc::now()).to_std() {
                tokio::time::sleep(wait).await;
            }

            let (sample, rtt) = self.sample().await?;
            window = window.narrow(sample);
            round_trip = rtt;
        }

        debug!(
            url = %self.url,
            offset_ms = window.estimate_ms(),
            window_ms = window.width_ms(),
            "Date header sampled"
        );
        Ok(Utc::now() + chrono::Duration::milliseconds(window.estimate_ms()))
    }
}

/// Parses an HTTP `Date` header (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(value: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| EngineError::ClockSyncUnavailable(format!("invalid Date header '{}': {}", value, e)))
}

// =============================================================================
// Configuration
// =============================================================================

/// Runtime polling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockConfig {
    pub interval: Duration,
    pub thresholds: SyncThresholds,
    /// Upper bound on a single poll. Shorter than `interval`.
    pub request_timeout: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockSettings::default().clock_config()
    }
}

/// Outcome of [`ClockSyncService::wait_until_synced`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncWait {
    Synced,
    TimedOut,
    Cancelled,
}

// =============================================================================
// Clock Sync Service
// =============================================================================

/// Shared, cloneable handle to the clock sync service.
#[derive(Clone)]
pub struct ClockSyncService {
    inner: Arc<ClockInner>,
}

struct ClockInner {
    source: Arc<dyn TimeSource>,
    config: RwLock<ClockConfig>,
    status_tx: watch::Sender<TimeSyncStatus>,
    notify_tx: broadcast::Sender<TimeSyncStatus>,
    events: EventBus,
    poller: Mutex<Option<CancellationToken>>,
}

impl ClockSyncService {
    /// Creates a stopped service.
    pub fn new(source: Arc<dyn TimeSource>, config: ClockConfig, events: EventBus) -> Self {
        let (status_tx, _) = watch::channel(TimeSyncStatus::default());
        let (notify_tx, _) = broadcast::channel(64);
        ClockSyncService {
            inner: Arc::new(ClockInner {
                source,
                config: RwLock::new(config),
                status_tx,
                notify_tx,
                events,
                poller: Mutex::new(None),
            }),
        }
    }

    /// Creates a service backed by [`HttpTimeSource`].
    pub fn from_settings(settings: &ClockSettings, events: EventBus) -> EngineResult<Self> {
        let config = settings.clock_config();
        let source =
            HttpTimeSource::new(settings.source_url.clone(), config.request_timeout)?.with_samples(settings.samples);
        Ok(Self::new(Arc::new(source), config, events))
    }

    /// Current polling parameters.
    pub fn config(&self) -> ClockConfig {
        match self.inner.config.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn thresholds(&self) -> SyncThresholds {
        self.config().thresholds
    }

    /// Starts periodic polling.
    ///
    /// Idempotent: when already running only the thresholds and request
    /// timeout are updated. Returns true if polling was started.
    pub fn start(&self, config: ClockConfig) -> bool {
        let mut poller = match self.inner.poller.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        {
            let mut current = match self.inner.config.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if poller.is_some() {
                current.thresholds = config.thresholds;
                current.request_timeout = config.request_timeout;
            } else {
                *current = config;
            }
        }

        if poller.is_some() {
            debug!(
                threshold_ms = config.thresholds.threshold_ms,
                max_age_ms = config.thresholds.max_age_ms,
                "Clock sync already running, thresholds updated"
            );
            return false;
        }

        let token = CancellationToken::new();
        *poller = Some(token.clone());

        let service = self.clone();
        tokio::spawn(async move { service.run(token).await });

        info!(
            interval_ms = config.interval.as_millis() as u64,
            threshold_ms = config.thresholds.threshold_ms,
            max_age_ms = config.thresholds.max_age_ms,
            "Clock sync started"
        );
        true
    }

    /// Halts polling. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let token = match self.inner.poller.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match token {
            Some(token) => {
                token.cancel();
                info!("Clock sync stopped");
                true
            }
            None => false,
        }
    }

    /// Returns true while the polling task is active.
    pub fn is_running(&self) -> bool {
        match self.inner.poller.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config().interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        result = self.poll_once() => {
                            if let Err(e) = result {
                                warn!(error = %e, "Clock poll failed");
                            }
                        }
                    }
                }
            }
        }

        debug!("Clock sync poller exited");
    }

    /// Performs one poll and publishes the result.
    ///
    /// A failed poll keeps the previous offset and records the error.
    pub async fn poll_once(&self) -> EngineResult<TimeSyncStatus> {
        let config = self.config();
        let sample = tokio::time::timeout(config.request_timeout, self.inner.source.now()).await;
        let local = Utc::now();

        let network = match sample {
            Ok(Ok(network)) => Ok(network),
            Ok(Err(EngineError::ClockSyncUnavailable(message))) => Err(message),
            Ok(Err(other)) => Err(other.to_string()),
            Err(_) => Err(format!(
                "time source timed out after {}ms",
                config.request_timeout.as_millis()
            )),
        };

        match network {
            Ok(network) => {
                let offset_ms = (network - local).num_milliseconds();
                let status = TimeSyncStatus::sampled(offset_ms, local, config.thresholds);
                if status.synced {
                    debug!(offset_ms, "Clock sample");
                } else {
                    warn!(
                        offset_ms,
                        threshold_ms = config.thresholds.threshold_ms,
                        "Clock drift exceeds threshold"
                    );
                }
                self.publish(status.clone());
                Ok(status)
            }
            Err(message) => {
                let mut status = self.inner.status_tx.borrow().clone();
                status.error = Some(message.clone());
                status.synced = status.evaluate(local, config.thresholds);
                self.publish(status);
                Err(EngineError::ClockSyncUnavailable(message))
            }
        }
    }

    fn publish(&self, status: TimeSyncStatus) {
        self.inner.status_tx.send_replace(status.clone());
        let _ = self.inner.notify_tx.send(status.clone());
        self.inner.events.emit(EngineEvent::TimeSync(status));
    }

    /// Latest snapshot with `synced` re-evaluated now.
    pub fn current_status(&self) -> TimeSyncStatus {
        let thresholds = self.thresholds();
        self.inner.status_tx.borrow().reevaluated(Utc::now(), thresholds)
    }

    /// Receiver that observes every published snapshot.
    pub fn updates(&self) -> watch::Receiver<TimeSyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Calls `listener` on every poll, success or failure, until the
    /// returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, mut listener: F) -> Subscription
    where
        F: FnMut(TimeSyncStatus) + Send + 'static,
    {
        let mut rx = self.inner.notify_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(status) => listener(status),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Clock listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription::from_task(task)
    }

    /// Local time corrected by the last known offset.
    pub fn network_now(&self) -> DateTime<Utc> {
        let status = self.inner.status_tx.borrow().clone();
        if status.last_synced.is_some() {
            status.to_network_time(Utc::now())
        } else {
            Utc::now()
        }
    }

    /// Waits for a snapshot with `synced=true`, at most `deadline`.
    pub async fn wait_until_synced(&self, deadline: Duration, cancel: &CancellationToken) -> SyncWait {
        let mut rx = self.updates();
        let sleep = tokio::time::sleep(deadline);
        tokio::pin!(sleep);

        loop {
            if self.current_status().synced {
                return SyncWait::Synced;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return SyncWait::Cancelled,
                _ = &mut sleep => return SyncWait::TimedOut,
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Sender gone; nothing more will arrive.
                        tokio::select! {
                            _ = cancel.cancelled() => return SyncWait::Cancelled,
                            _ = &mut sleep => return SyncWait::TimedOut,
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a list of offsets (ms) or errors.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<i64, String>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<i64, String>>) -> Arc<Self> {
            Arc::new(ScriptedSource {
                script: Mutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl TimeSource for ScriptedSource {
        async fn now(&self) -> EngineResult<DateTime<Utc>> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(offset)) => Ok(Utc::now() + chrono::Duration::milliseconds(offset)),
                Some(Err(message)) => Err(EngineError::ClockSyncUnavailable(message)),
                None => Err(EngineError::ClockSyncUnavailable("script exhausted".into())),
            }
        }
    }

    struct Hanging;

    #[async_trait]
    impl TimeSource for Hanging {
        async fn now(&self) -> EngineResult<DateTime<Utc>> {
            std::future::pending::<()>().await;
            Ok(Utc::now())
        }
    }

    fn config(threshold_ms: u64, max_age_ms: u64) -> ClockConfig {
        ClockConfig {
            interval: Duration::from_secs(60),
            thresholds: SyncThresholds {
                threshold_ms,
                max_age_ms,
            },
            request_timeout: Duration::from_secs(1),
        }
    }

    fn service(script: Vec<Result<i64, String>>, config: ClockConfig) -> ClockSyncService {
        ClockSyncService::new(ScriptedSource::new(script), config, EventBus::default())
    }

    fn assert_near(actual: i64, expected: i64) {
        assert!((actual - expected).abs() <= 20, "offset {actual} not near {expected}");
    }

    #[tokio::test]
    async fn test_small_offsets_stay_synced() {
        let clock = service(vec![Ok(50), Ok(60), Ok(55)], config(100, 10_000));
        for expected in [50, 60, 55] {
            let status = clock.poll_once().await.unwrap();
            assert!(status.synced);
            assert_near(status.offset_ms, expected);
            assert!(clock.current_status().synced);
        }
    }

    #[tokio::test]
    async fn test_large_offset_not_synced() {
        let clock = service(vec![Ok(2_000)], config(100, 10_000));
        let status = clock.poll_once().await.unwrap();
        assert!(!status.synced);
        assert!(clock.network_now() > Utc::now() + chrono::Duration::milliseconds(1_500));
    }

    #[tokio::test]
    async fn test_failure_keeps_offset() {
        let clock = service(vec![Ok(40), Err("dns failure".into())], config(100, 10_000));
        clock.poll_once().await.unwrap();

        let err = clock.poll_once().await.unwrap_err();
        assert!(matches!(err, EngineError::ClockSyncUnavailable(_)));

        let status = clock.current_status();
        assert_near(status.offset_ms, 40);
        assert!(status.last_synced.is_some());
        assert_eq!(status.error.as_deref(), Some("dns failure"));
        assert!(status.synced);
    }

    #[tokio::test]
    async fn test_staleness_from_elapsed_time() {
        let clock = service(vec![Ok(10)], config(100, 50));
        assert!(clock.poll_once().await.unwrap().synced);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!clock.current_status().synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_bounded_by_request_timeout() {
        let mut cfg = config(100, 10_000);
        cfg.request_timeout = Duration::from_millis(200);
        let clock = ClockSyncService::new(Arc::new(Hanging), cfg, EventBus::default());
        let err = clock.poll_once().await.unwrap_err();
        assert!(err.to_string().contains("timed out after 200ms"));
        assert!(!clock.current_status().synced);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let clock = service(vec![Ok(10), Ok(10)], config(100, 120_000));
        let mut updates = clock.updates();

        assert!(clock.start(config(100, 120_000)));
        assert!(!clock.start(config(250, 120_000)));
        assert_eq!(clock.config().thresholds.threshold_ms, 250);
        assert!(clock.is_running());

        updates.changed().await.unwrap();
        assert!(updates.borrow().synced);

        assert!(clock.stop());
        assert!(!clock.stop());
        assert!(!clock.is_running());
    }

    #[tokio::test]
    async fn test_subscribers_see_success_and_failure() {
        let clock = service(vec![Ok(10), Err("refused".into())], config(100, 10_000));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = clock.subscribe(move |status| sink.lock().unwrap().push(status.error.clone()));

        let mut events = clock.inner.events.subscribe();
        clock.poll_once().await.unwrap();
        let _ = clock.poll_once().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[None, Some("refused".to_string())]
        );
        assert_eq!(events.recv().await.unwrap().name(), "time_sync");
        drop(subscription);
    }

    #[tokio::test]
    async fn test_wait_until_synced() {
        let clock = service(vec![Ok(10)], config(100, 10_000));
        let cancel = CancellationToken::new();

        let poller = clock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = poller.poll_once().await;
        });
        assert_eq!(
            clock.wait_until_synced(Duration::from_secs(5), &cancel).await,
            SyncWait::Synced
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_synced_deadline_and_cancel() {
        let clock = service(Vec::new(), config(100, 10_000));
        let cancel = CancellationToken::new();
        assert_eq!(
            clock.wait_until_synced(Duration::from_millis(500), &cancel).await,
            SyncWait::TimedOut
        );

        cancel.cancel();
        assert_eq!(
            clock.wait_until_synced(Duration::from_secs(60), &cancel).await,
            SyncWait::Cancelled
        );
    }

    #[test]
    fn test_parse_http_date() {
        let date = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(date.to_rfc3339(), "1994-11-06T08:49:37+00:00");
        assert!(parse_http_date("yesterday").is_err());
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_offset_window_narrowing() {
        // Server said 10s while the local clock read 10.8s.
        let window = OffsetWindow::from_sample(at(10_000), at(10_800));
        assert_eq!(window, OffsetWindow { lo_ms: -800, hi_ms: 200 });
        assert_eq!(window.estimate_ms(), -300);

        let narrowed = window.narrow(OffsetWindow { lo_ms: -400, hi_ms: 600 });
        assert_eq!(narrowed, OffsetWindow { lo_ms: -400, hi_ms: 200 });
        assert_eq!(narrowed.width_ms(), 600);

        let disjoint = OffsetWindow { lo_ms: 500, hi_ms: 1_500 };
        assert_eq!(narrowed.narrow(disjoint), disjoint);
    }

    #[test]
    fn test_next_boundary_targets_estimated_second() {
        let window = OffsetWindow { lo_ms: -800, hi_ms: 200 };
        // Estimated server time at local 10.8s is 10.5s; its next second
        // arrives 500ms later.
        assert_eq!(window.next_boundary(at(10_800)), at(11_300));
    }

    #[test]
    fn test_date_resolution() {
        assert_eq!(date_resolution_ms(1), 1_000);
        assert_eq!(date_resolution_ms(3), 250);
        assert_eq!(date_resolution_ms(0), 1_000);
    }

    /// Serves `Date` headers from the local clock.
    async fn spawn_date_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT");
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nDate: {date}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_http_source_resolves_sub_second_offset() {
        let url = spawn_date_server().await;
        let source = HttpTimeSource::new(url, Duration::from_secs(2)).unwrap();
        let clock = ClockSyncService::new(Arc::new(source), ClockConfig::default(), EventBus::default());

        for _ in 0..2 {
            let status = clock.poll_once().await.unwrap();
            assert!(
                status.offset_ms.abs() < 250,
                "same clock measured {}ms off",
                status.offset_ms
            );
            assert!(status.synced);
        }
    }
}
