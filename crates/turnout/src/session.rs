//! Live recognition session.
//!
//! [`RecognitionLoop`] is Idle until [`start`](RecognitionLoop::start) opens
//! the camera and loads the user directory. While Running, every tick pulls
//! the newest frame, hands it to the presenter, and at most once per
//! recognition interval dispatches a pass to the engine thread. Finished
//! passes are applied on a later tick: matched identities go through the
//! dedup gate into the attendance store, unmatched faces raise an alert.
//! Directory reloads run in the background the same way; the previous
//! snapshot stays in use until the new one lands.

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle, PendingPass, Recognition};
use crate::presenter::{Overlay, Presenter};
use crate::store::{Storage, StoreError};
use chrono::NaiveDateTime;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use turnout_core::{AttendanceEvent, DedupGate, FaceMatcher, KnownFace};
use turnout_hw::{CameraError, CameraOpener, FrameSource};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(#[source] CameraError),
    #[error("camera lost during session: {0}")]
    DeviceLost(#[source] CameraError),
    #[error("a recognition session is already running")]
    AlreadyRunning,
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Wall-clock source for attendance timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local time of the host.
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Timing and display parameters for a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub tick: Duration,
    pub recognition_interval: Duration,
    pub frame_width: u32,
    pub frame_height: u32,
    pub mirror: bool,
    pub matcher: FaceMatcher,
    pub directory_refresh: Option<Duration>,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick: config.tick(),
            recognition_interval: config.recognition_interval(),
            frame_width: config.frame_width,
            frame_height: config.frame_height,
            mirror: config.mirror,
            matcher: config.matcher(),
            directory_refresh: config.directory_refresh(),
        }
    }
}

/// Counters for one Running period.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SessionSummary {
    pub frames: u64,
    pub passes: u64,
    pub recorded: u64,
    pub unrecognized: u64,
    pub frame_errors: u64,
    pub known_faces: usize,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

mod duration_secs {
    pub fn serialize<S: serde::Serializer>(d: &std::time::Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

type DirectoryResult = Result<Arc<[KnownFace]>, SessionError>;

/// State that exists only while Running.
struct ActiveSession {
    feed: Option<Box<dyn FrameSource>>,
    directory: Arc<[KnownFace]>,
    directory_stale: bool,
    directory_loaded_at: Instant,
    reload: Option<oneshot::Receiver<DirectoryResult>>,
    dedup: DedupGate,
    pending: Option<PendingPass>,
    last_dispatch: Option<Instant>,
    overlays: Vec<Overlay>,
    started_at: Instant,
    summary: SessionSummary,
}

pub struct RecognitionLoop {
    settings: SessionSettings,
    opener: Arc<dyn CameraOpener>,
    engine: EngineHandle,
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    presenter: Box<dyn Presenter>,
    active: Option<ActiveSession>,
}

impl RecognitionLoop {
    pub fn new(
        settings: SessionSettings,
        opener: Arc<dyn CameraOpener>,
        engine: EngineHandle,
        store: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        presenter: Box<dyn Presenter>,
    ) -> Self {
        Self {
            settings,
            opener,
            engine,
            store,
            clock,
            presenter,
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Whether a recognition pass has been dispatched and not yet applied.
    pub fn pass_in_flight(&self) -> bool {
        self.active.as_ref().is_some_and(|s| s.pending.is_some())
    }

    /// Whether a directory reload has been dispatched and not yet applied.
    pub fn reload_in_flight(&self) -> bool {
        self.active.as_ref().is_some_and(|s| s.reload.is_some())
    }

    /// Open the camera and load the directory. Idle → Running.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyRunning);
        }

        let opener = Arc::clone(&self.opener);
        let feed = tokio::task::spawn_blocking(move || opener.open())
            .await
            .unwrap_or_else(|e| {
                Err(CameraError::CaptureFailed(format!("camera open task failed: {e}")))
            })
            .map_err(|e| {
                tracing::warn!(error = %e, "camera unavailable, session not started");
                SessionError::DeviceUnavailable(e)
            })?;

        // The feed is dropped, releasing the camera, if this fails
        let directory = load_directory(self.store.as_ref(), &self.engine).await?;
        let now = Instant::now();
        tracing::info!(known_faces = directory.len(), "recognition session started");

        self.active = Some(ActiveSession {
            feed: Some(feed),
            summary: SessionSummary {
                known_faces: directory.len(),
                ..SessionSummary::default()
            },
            directory,
            directory_stale: false,
            directory_loaded_at: now,
            reload: None,
            dedup: DedupGate::new(),
            pending: None,
            last_dispatch: None,
            overlays: Vec::new(),
            started_at: now,
        });
        Ok(())
    }

    /// Reload the directory from storage, starting on the next tick.
    pub fn invalidate_directory(&mut self) {
        if let Some(session) = self.active.as_mut() {
            session.directory_stale = true;
        }
    }

    /// One display tick. A no-op while Idle.
    ///
    /// Fails only when the camera is gone for good; the session is then
    /// already stopped.
    pub async fn tick(&mut self, now: Instant) -> Result<(), SessionError> {
        let Some(mut session) = self.active.take() else {
            return Ok(());
        };

        if let Some(result) = session.pending.as_mut().and_then(PendingPass::try_take) {
            session.pending = None;
            self.apply_pass(&mut session, result).await;
        }

        if let Some(result) = session.reload.as_mut().and_then(poll_reload) {
            session.reload = None;
            self.apply_directory(&mut session, result);
        }

        let refresh_due = self
            .settings
            .directory_refresh
            .is_some_and(|every| now.saturating_duration_since(session.directory_loaded_at) >= every);
        if session.reload.is_none() && (session.directory_stale || refresh_due) {
            self.dispatch_reload(&mut session, now);
        }

        let frame = match session.feed.as_mut().map(|feed| feed.latest_frame()) {
            Some(Ok(frame)) => frame,
            Some(Err(CameraError::Disconnected(reason))) => {
                tracing::error!(reason = %reason, "camera disconnected, ending session");
                self.presenter.failure(&format!("camera disconnected: {reason}"));
                self.finish(session).await;
                return Err(SessionError::DeviceLost(CameraError::Disconnected(reason)));
            }
            Some(Err(e)) => {
                session.summary.frame_errors += 1;
                tracing::debug!(error = %e, "frame read failed, skipping tick");
                None
            }
            None => None,
        };

        if let Some(mut frame) = frame {
            session.summary.frames += 1;
            if self.settings.mirror {
                frame.mirror();
            }
            frame.resize(self.settings.frame_width, self.settings.frame_height);
            self.presenter.render(&frame.image, &session.overlays);

            let interval_elapsed = session
                .last_dispatch
                .map_or(true, |last| now.saturating_duration_since(last) >= self.settings.recognition_interval);
            if session.pending.is_none() && interval_elapsed {
                match self.engine.submit(
                    frame.image,
                    Arc::clone(&session.directory),
                    self.settings.matcher,
                ) {
                    Ok(pending) => {
                        session.pending = Some(pending);
                        session.last_dispatch = Some(now);
                        session.summary.passes += 1;
                    }
                    Err(EngineError::Busy) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "cannot dispatch recognition pass");
                        self.presenter.failure(&e.to_string());
                    }
                }
            }
        }

        self.active = Some(session);
        Ok(())
    }

    /// Release the camera, apply any in-flight pass and go Idle.
    ///
    /// Returns `None` when already Idle.
    pub async fn stop(&mut self) -> Option<SessionSummary> {
        let session = self.active.take()?;
        Some(self.finish(session).await)
    }

    /// Run a full session until `shutdown` resolves or the camera is lost.
    ///
    /// Every message on `refresh` reloads the directory.
    pub async fn run<F>(
        &mut self,
        shutdown: F,
        mut refresh: mpsc::Receiver<()>,
    ) -> Result<SessionSummary, SessionError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;

        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                Some(()) = refresh.recv() => {
                    tracing::info!("directory refresh requested");
                    self.invalidate_directory();
                }
                instant = ticker.tick() => {
                    self.tick(instant.into_std()).await?;
                }
            }
        }

        Ok(self.stop().await.unwrap_or_default())
    }

    async fn finish(&mut self, mut session: ActiveSession) -> SessionSummary {
        // Camera goes first so the device is free while the last pass drains
        if let Some(feed) = session.feed.take() {
            // Joining the capture thread can wait on a device read
            if let Err(e) = tokio::task::spawn_blocking(move || drop(feed)).await {
                tracing::warn!(error = %e, "camera release task failed");
            }
        }
        session.reload = None;

        if let Some(pending) = session.pending.take() {
            let result = pending.wait().await;
            self.apply_pass(&mut session, result).await;
        }

        session.dedup.clear();
        session.summary.duration = session.started_at.elapsed();
        tracing::info!(
            frames = session.summary.frames,
            passes = session.summary.passes,
            recorded = session.summary.recorded,
            unrecognized = session.summary.unrecognized,
            "recognition session stopped"
        );
        session.summary
    }

    fn dispatch_reload(&self, session: &mut ActiveSession, now: Instant) {
        session.directory_stale = false;
        session.directory_loaded_at = now;

        let store = Arc::clone(&self.store);
        let engine = self.engine.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = reply_tx.send(load_directory(store.as_ref(), &engine).await);
        });
        session.reload = Some(reply_rx);
        tracing::debug!("directory reload dispatched");
    }

    fn apply_directory(&mut self, session: &mut ActiveSession, result: DirectoryResult) {
        match result {
            Ok(directory) => {
                tracing::info!(known_faces = directory.len(), "directory reloaded");
                session.summary.known_faces = directory.len();
                session.directory = directory;
            }
            Err(e) => {
                tracing::error!(error = %e, "directory reload failed, keeping previous");
                self.presenter.failure(&e.to_string());
            }
        }
    }

    async fn apply_pass(
        &mut self,
        session: &mut ActiveSession,
        result: Result<Vec<Recognition>, EngineError>,
    ) {
        let recognitions = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "recognition pass failed");
                self.presenter.failure(&e.to_string());
                return;
            }
        };

        session.overlays = recognitions.iter().map(Overlay::from).collect();

        for recognition in &recognitions {
            let Some(identity) = recognition.identity.as_deref() else {
                session.summary.unrecognized += 1;
                self.presenter.unrecognized_face();
                continue;
            };

            let now = self.clock.now();
            if !session.dedup.should_record(identity, now) {
                tracing::trace!(identity, distance = ?recognition.distance, "seen recently, not recorded");
                continue;
            }

            let date = now.format(DATE_FORMAT).to_string();
            let time = now.format(TIME_FORMAT).to_string();
            match self.store.append_attendance(identity, &date, &time).await {
                Ok(id) => {
                    session.summary.recorded += 1;
                    tracing::info!(id, identity, date = %date, time = %time, "attendance recorded");
                    self.presenter.attendance_recorded(&AttendanceEvent {
                        id,
                        identity: identity.to_string(),
                        date,
                        time,
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, identity, "failed to record attendance");
                    self.presenter.failure(&format!("could not record {identity}: {e}"));
                }
            }
        }
    }
}

async fn load_directory(store: &dyn Storage, engine: &EngineHandle) -> DirectoryResult {
    let users = store.list_users().await?;
    let faces = engine.load_directory(users).await?;
    Ok(faces.into())
}

fn poll_reload(reply: &mut oneshot::Receiver<DirectoryResult>) -> Option<DirectoryResult> {
    match reply.try_recv() {
        Ok(result) => Some(result),
        Err(oneshot::error::TryRecvError::Empty) => None,
        Err(oneshot::error::TryRecvError::Closed) => {
            Some(Err(SessionError::Engine(EngineError::ChannelClosed)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::store::SqliteStore;
    use chrono::{NaiveDate, TimeDelta};
    use image::{Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread::ThreadId;
    use turnout_core::{BoundingBox, EmbedError, Embedding, FaceEmbedder, MatchPolicy};
    use turnout_hw::Frame;

    const SIZE: u32 = 8;

    /// Red of pixel (0, 0) is the face count; green of pixel (i, 0) is face i's embedding.
    ///
    /// Every detection first sleeps for `stall`.
    struct PixelEmbedder {
        detections: Arc<AtomicUsize>,
        stall: Arc<Mutex<Duration>>,
    }

    impl FaceEmbedder for PixelEmbedder {
        fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedError> {
            self.detections.fetch_add(1, Ordering::SeqCst);
            let stall = *self.stall.lock().unwrap();
            if !stall.is_zero() {
                std::thread::sleep(stall);
            }
            let count = image.get_pixel(0, 0)[0] as usize;
            Ok((0..count)
                .map(|i| BoundingBox {
                    x: i as f32,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                    confidence: 0.9,
                    landmarks: None,
                })
                .collect())
        }

        fn embed(&mut self, image: &RgbImage, boxes: &[BoundingBox]) -> Result<Vec<Embedding>, EmbedError> {
            Ok(boxes
                .iter()
                .map(|b| Embedding::new(vec![image.get_pixel(b.x as u32, 0)[1] as f32]))
                .collect())
        }
    }

    fn faces_image(faces: &[u8]) -> RgbImage {
        let mut img = RgbImage::new(SIZE, SIZE);
        img.put_pixel(0, 0, Rgb([faces.len() as u8, 0, 0]));
        for (i, &value) in faces.iter().enumerate() {
            let red = img.get_pixel(i as u32, 0)[0];
            img.put_pixel(i as u32, 0, Rgb([red, value, 0]));
        }
        img
    }

    fn photo(value: u8) -> Vec<u8> {
        let mut png = Vec::new();
        faces_image(&[value])
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        png
    }

    const ALICE: u8 = 10;
    const BOB: u8 = 100;
    const STRANGER: u8 = 200;

    type Script = Arc<Mutex<VecDeque<Result<Option<Frame>, CameraError>>>>;

    struct ScriptedFeed {
        script: Script,
        released: Arc<AtomicBool>,
        dropped_on: Arc<Mutex<Option<ThreadId>>>,
    }

    impl FrameSource for ScriptedFeed {
        fn latest_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }
    }

    impl Drop for ScriptedFeed {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
            *self.dropped_on.lock().unwrap() = Some(std::thread::current().id());
        }
    }

    #[derive(Default)]
    struct ScriptedOpener {
        script: Script,
        released: Arc<AtomicBool>,
        dropped_on: Arc<Mutex<Option<ThreadId>>>,
        fail: bool,
    }

    impl ScriptedOpener {
        fn push_frame(&self, faces: &[u8]) {
            self.script
                .lock()
                .unwrap()
                .push_back(Ok(Some(Frame::new(faces_image(faces), 0))));
        }
    }

    impl CameraOpener for ScriptedOpener {
        fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
            if self.fail {
                return Err(CameraError::DeviceNotFound("/dev/video0".into()));
            }
            self.released.store(false, Ordering::SeqCst);
            Ok(Box::new(ScriptedFeed {
                script: Arc::clone(&self.script),
                released: Arc::clone(&self.released),
                dropped_on: Arc::clone(&self.dropped_on),
            }))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Shown {
        Frame(usize),
        Unrecognized,
        Recorded(String, String),
        Failure(String),
    }

    #[derive(Clone, Default)]
    struct RecordingPresenter {
        shown: Arc<Mutex<Vec<Shown>>>,
    }

    impl RecordingPresenter {
        fn events(&self) -> Vec<Shown> {
            self.shown
                .lock()
                .unwrap()
                .iter()
                .filter(|s| !matches!(s, Shown::Frame(_)))
                .cloned()
                .collect()
        }

        fn frames(&self) -> usize {
            self.shown
                .lock()
                .unwrap()
                .iter()
                .filter(|s| matches!(s, Shown::Frame(_)))
                .count()
        }
    }

    impl Presenter for RecordingPresenter {
        fn render(&mut self, _frame: &RgbImage, overlays: &[Overlay]) {
            self.shown.lock().unwrap().push(Shown::Frame(overlays.len()));
        }
        fn unrecognized_face(&mut self) {
            self.shown.lock().unwrap().push(Shown::Unrecognized);
        }
        fn attendance_recorded(&mut self, event: &AttendanceEvent) {
            self.shown
                .lock()
                .unwrap()
                .push(Shown::Recorded(event.identity.clone(), event.time.clone()));
        }
        fn failure(&mut self, message: &str) {
            self.shown.lock().unwrap().push(Shown::Failure(message.to_string()));
        }
    }

    struct ManualClock(Mutex<NaiveDateTime>);

    impl ManualClock {
        fn at(h: u32, m: u32, s: u32) -> Arc<Self> {
            let t = NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(h, m, s)
                .unwrap();
            Arc::new(Self(Mutex::new(t)))
        }

        fn advance(&self, secs: i64) {
            *self.0.lock().unwrap() += TimeDelta::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> NaiveDateTime {
            *self.0.lock().unwrap()
        }
    }

    struct Harness {
        session: RecognitionLoop,
        store: Arc<SqliteStore>,
        opener: Arc<ScriptedOpener>,
        presenter: RecordingPresenter,
        clock: Arc<ManualClock>,
        detections: Arc<AtomicUsize>,
        stall: Arc<Mutex<Duration>>,
        t0: Instant,
    }

    impl Harness {
        async fn new(users: &[(&str, u8)], fail_camera: bool) -> Self {
            let store = Arc::new(SqliteStore::open(Path::new(":memory:")).await.unwrap());
            for (name, value) in users {
                store.add_user(name, &photo(*value)).await.unwrap();
            }
            let opener = Arc::new(ScriptedOpener {
                fail: fail_camera,
                ..ScriptedOpener::default()
            });
            let detections = Arc::new(AtomicUsize::new(0));
            let stall = Arc::new(Mutex::new(Duration::ZERO));
            let engine = spawn_engine(Box::new(PixelEmbedder {
                detections: Arc::clone(&detections),
                stall: Arc::clone(&stall),
            }))
            .unwrap();
            let presenter = RecordingPresenter::default();
            let clock = ManualClock::at(9, 0, 0);
            let settings = SessionSettings {
                tick: Duration::from_millis(16),
                recognition_interval: Duration::from_millis(100),
                frame_width: SIZE,
                frame_height: SIZE,
                mirror: false,
                matcher: FaceMatcher::new(0.6, MatchPolicy::Nearest),
                directory_refresh: None,
            };
            let session = RecognitionLoop::new(
                settings,
                opener.clone(),
                engine,
                store.clone(),
                clock.clone(),
                Box::new(presenter.clone()),
            );
            Self {
                session,
                store,
                opener,
                presenter,
                clock,
                detections,
                stall,
                t0: Instant::now(),
            }
        }

        fn push_frame(&self, faces: &[u8]) {
            self.opener.push_frame(faces);
        }

        fn push_error(&self, error: CameraError) {
            self.opener.script.lock().unwrap().push_back(Err(error));
        }

        /// Tick at `t0 + ms` and keep ticking at that instant until the pass
        /// and any directory reload have landed.
        async fn tick_at(&mut self, ms: u64) -> Result<(), SessionError> {
            let now = self.t0 + Duration::from_millis(ms);
            self.session.tick(now).await?;
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.session.pass_in_flight() || self.session.reload_in_flight() {
                assert!(Instant::now() < deadline, "background work never landed");
                tokio::time::sleep(Duration::from_millis(1)).await;
                self.session.tick(now).await?;
            }
            Ok(())
        }

        async fn attendance(&self) -> Vec<(String, String)> {
            self.store
                .list_attendance()
                .await
                .unwrap()
                .into_iter()
                .map(|e| (e.identity, e.time))
                .collect()
        }
    }

    fn recorded(name: &str, time: &str) -> Shown {
        Shown::Recorded(name.to_string(), time.to_string())
    }

    #[tokio::test]
    async fn test_recognized_user_recorded_then_suppressed() {
        let mut h = Harness::new(&[("Alice", ALICE), ("Bob", BOB)], false).await;
        h.session.start().await.unwrap();

        h.push_frame(&[ALICE]);
        h.tick_at(0).await.unwrap();
        assert_eq!(h.attendance().await, vec![("Alice".into(), "09:00:00".into())]);

        // Ten seconds later: still inside the cool-down
        h.clock.advance(10);
        h.push_frame(&[ALICE]);
        h.tick_at(200).await.unwrap();
        assert_eq!(h.attendance().await.len(), 1);

        // Exactly one minute after the first record
        h.clock.advance(50);
        h.push_frame(&[ALICE]);
        h.tick_at(400).await.unwrap();

        assert_eq!(
            h.presenter.events(),
            vec![recorded("Alice", "09:00:00"), recorded("Alice", "09:01:00")]
        );
        assert_eq!(h.attendance().await.len(), 2);
    }

    #[tokio::test]
    async fn test_two_users_in_one_frame() {
        let mut h = Harness::new(&[("Alice", ALICE), ("Bob", BOB)], false).await;
        h.session.start().await.unwrap();

        h.push_frame(&[BOB, ALICE]);
        h.tick_at(0).await.unwrap();

        assert_eq!(
            h.presenter.events(),
            vec![recorded("Bob", "09:00:00"), recorded("Alice", "09:00:00")]
        );
    }

    #[tokio::test]
    async fn test_unrecognized_alerts_without_write() {
        let mut h = Harness::new(&[("Alice", ALICE)], false).await;
        h.session.start().await.unwrap();

        h.push_frame(&[STRANGER]);
        h.tick_at(0).await.unwrap();
        assert_eq!(h.presenter.events(), vec![Shown::Unrecognized]);

        h.push_frame(&[STRANGER, ALICE, STRANGER]);
        h.tick_at(150).await.unwrap();
        assert_eq!(
            h.presenter.events(),
            vec![
                Shown::Unrecognized,
                Shown::Unrecognized,
                recorded("Alice", "09:00:00"),
                Shown::Unrecognized,
            ]
        );
        assert_eq!(h.attendance().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_without_camera_stays_idle() {
        let mut h = Harness::new(&[("Alice", ALICE)], true).await;

        let err = h.session.start().await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
        assert!(!h.session.is_running());

        // Ticking an idle loop does nothing
        h.session.tick(h.t0).await.unwrap();
        assert_eq!(h.presenter.frames(), 0);
        assert_eq!(h.detections.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut h = Harness::new(&[], false).await;
        h.session.start().await.unwrap();
        assert!(matches!(
            h.session.start().await,
            Err(SessionError::AlreadyRunning)
        ));
        assert!(h.session.is_running());
    }

    #[tokio::test]
    async fn test_stop_idle_is_noop() {
        let mut h = Harness::new(&[], false).await;
        assert!(h.session.stop().await.is_none());
        assert!(!h.session.is_running());
    }

    #[tokio::test]
    async fn test_stop_releases_camera_and_drains_pass() {
        let mut h = Harness::new(&[("Alice", ALICE)], false).await;
        h.session.start().await.unwrap();
        assert!(!h.opener.released.load(Ordering::SeqCst));

        h.push_frame(&[ALICE]);
        h.session.tick(h.t0).await.unwrap();
        assert!(h.session.pass_in_flight());

        let summary = h.session.stop().await.unwrap();
        assert!(h.opener.released.load(Ordering::SeqCst));
        assert!(!h.session.is_running());
        assert_eq!(summary.passes, 1);
        assert_eq!(summary.recorded, 1);
        assert_eq!(h.attendance().await.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_forgets_last_seen() {
        let mut h = Harness::new(&[("Alice", ALICE)], false).await;
        h.session.start().await.unwrap();
        h.push_frame(&[ALICE]);
        h.tick_at(0).await.unwrap();
        h.session.stop().await.unwrap();

        h.clock.advance(5);
        h.session.start().await.unwrap();
        h.push_frame(&[ALICE]);
        h.tick_at(0).await.unwrap();

        assert_eq!(h.attendance().await.len(), 2);
    }

    #[tokio::test]
    async fn test_frame_error_does_not_end_session() {
        let mut h = Harness::new(&[("Alice", ALICE)], false).await;
        h.session.start().await.unwrap();

        h.push_error(CameraError::CaptureFailed("glitch".into()));
        h.tick_at(0).await.unwrap();
        assert!(h.session.is_running());

        h.push_frame(&[ALICE]);
        h.tick_at(20).await.unwrap();
        assert_eq!(h.attendance().await.len(), 1);

        let summary = h.session.stop().await.unwrap();
        assert_eq!(summary.frame_errors, 1);
        assert_eq!(summary.frames, 1);
    }

    #[tokio::test]
    async fn test_disconnect_ends_session() {
        let mut h = Harness::new(&[("Alice", ALICE)], false).await;
        h.session.start().await.unwrap();

        h.push_error(CameraError::Disconnected("unplugged".into()));
        let err = h.session.tick(h.t0).await.unwrap_err();

        assert!(matches!(err, SessionError::DeviceLost(_)));
        assert!(!h.session.is_running());
        assert!(h.opener.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_recognition_interval_limits_passes() {
        let mut h = Harness::new(&[("Alice", ALICE)], false).await;
        h.session.start().await.unwrap();
        // Directory loading runs detection on the stored photo too
        let base = h.detections.load(Ordering::SeqCst);

        h.push_frame(&[STRANGER]);
        h.tick_at(0).await.unwrap();
        h.push_frame(&[STRANGER]);
        h.tick_at(50).await.unwrap();
        assert_eq!(h.detections.load(Ordering::SeqCst) - base, 1);

        h.push_frame(&[STRANGER]);
        h.tick_at(100).await.unwrap();
        assert_eq!(h.detections.load(Ordering::SeqCst) - base, 2);
        // Every frame is still rendered
        assert_eq!(h.presenter.frames(), 3);
    }

    #[tokio::test]
    async fn test_invalidate_directory_picks_up_new_user() {
        let mut h = Harness::new(&[], false).await;
        h.session.start().await.unwrap();

        h.push_frame(&[ALICE]);
        h.tick_at(0).await.unwrap();
        assert_eq!(h.presenter.events(), vec![Shown::Unrecognized]);

        h.store.add_user("Alice", &photo(ALICE)).await.unwrap();
        h.session.invalidate_directory();
        h.tick_at(50).await.unwrap();
        h.push_frame(&[ALICE]);
        h.tick_at(100).await.unwrap();

        assert_eq!(h.attendance().await, vec![("Alice".into(), "09:00:00".into())]);
    }

    #[tokio::test]
    async fn test_directory_reload_does_not_stall_tick() {
        let mut h = Harness::new(&[("Alice", ALICE)], false).await;
        h.session.start().await.unwrap();
        h.store.add_user("Bob", &photo(BOB)).await.unwrap();

        *h.stall.lock().unwrap() = Duration::from_millis(400);
        h.session.invalidate_directory();
        h.push_frame(&[]);
        let began = Instant::now();
        h.session.tick(h.t0).await.unwrap();

        assert!(began.elapsed() < Duration::from_millis(200));
        assert_eq!(h.presenter.frames(), 1);
        assert!(h.session.reload_in_flight());

        *h.stall.lock().unwrap() = Duration::ZERO;
        h.tick_at(20).await.unwrap();
        h.push_frame(&[BOB]);
        h.tick_at(200).await.unwrap();
        assert_eq!(h.attendance().await, vec![("Bob".into(), "09:00:00".into())]);
    }

    #[tokio::test]
    async fn test_stop_releases_camera_off_the_runtime_thread() {
        let mut h = Harness::new(&[], false).await;
        h.session.start().await.unwrap();
        h.session.stop().await.unwrap();

        let dropped_on = h.opener.dropped_on.lock().unwrap().unwrap();
        assert_ne!(dropped_on, std::thread::current().id());
    }

    #[tokio::test]
    async fn test_refresh_request_reloads_running_session() {
        let mut h = Harness::new(&[], false).await;
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let store = Arc::clone(&h.store);
        let opener = Arc::clone(&h.opener);
        let presenter = h.presenter.clone();

        let driver = async move {
            let deadline = Instant::now() + Duration::from_secs(5);
            while presenter.frames() == 0 {
                assert!(Instant::now() < deadline, "session never rendered");
                opener.push_frame(&[]);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }

            // Registered by another process while the session runs
            store.add_user("Alice", &photo(ALICE)).await.unwrap();
            refresh_tx.send(()).await.unwrap();
            while store.list_attendance().await.unwrap().is_empty() {
                assert!(Instant::now() < deadline, "new user never recorded");
                opener.push_frame(&[ALICE]);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let _ = stop_tx.send(());
        };
        let shutdown = async move {
            let _ = stop_rx.await;
        };

        let (summary, ()) = tokio::join!(h.session.run(shutdown, refresh_rx), driver);
        assert_eq!(summary.unwrap().recorded, 1);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let mut h = Harness::new(&[], false).await;
        let (_refresh_tx, refresh_rx) = mpsc::channel(1);
        let summary = h.session.run(async {}, refresh_rx).await.unwrap();
        assert_eq!(summary.recorded, 0);
        assert!(!h.session.is_running());
        assert!(h.opener.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_without_camera_fails() {
        let mut h = Harness::new(&[], true).await;
        let (_refresh_tx, refresh_rx) = mpsc::channel(1);
        let err = h
            .session
            .run(std::future::pending(), refresh_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
    }
}
