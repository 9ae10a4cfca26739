use std::time::Duration;

use live_overlay_common::frame::Frame;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::detector::Detector;
use crate::error::FrameLoopError;
use crate::readiness::ModelReadiness;
use crate::reconciler::{OverlayPlan, OverlayReconciler};
use crate::source::FrameSource;
use crate::stop::StopToken;
use crate::surface::{Commit, DisplaySurface, ElementHandle};

const SUMMARY_EVERY: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Detector not loaded yet.
    Idle,
    /// Detector loaded, waiting for the first camera frame.
    Armed,
    /// Cycling once per display refresh.
    Running,
    /// Stop was requested and the overlay has been torn down.
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Cycles whose detection result was committed to the surface.
    pub committed: u64,
    /// Cycles whose detection call failed.
    pub failures: u64,
    /// Detection results dropped because stop arrived first.
    pub discarded: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Start was requested before the detector finished loading. Nothing
    /// happened; call `run` again once the model is ready.
    ModelNotReady,
    Stopped(LoopSummary),
}

enum CycleOutcome {
    Committed { accepted: usize },
    Failed,
    NoFrame,
    Discarded,
}

/// Drives detect, reconcile and commit once per display refresh.
///
/// Owns the set of elements currently attached to the surface. Each cycle
/// removes all of them before attaching the new frame's annotations, so
/// the surface never mixes two frames.
pub struct FrameLoopController<S, D, V> {
    source: S,
    model: ModelReadiness<D>,
    surface: V,
    reconciler: OverlayReconciler,
    refresh_interval: Duration,
    state: LoopState,
    overlay: Vec<ElementHandle>,
    cycle: u64,
    summary: LoopSummary,
}

impl<S, D, V> FrameLoopController<S, D, V>
where
    S: FrameSource,
    D: Detector,
    V: DisplaySurface,
{
    pub fn new(
        source: S,
        model: ModelReadiness<D>,
        surface: V,
        reconciler: OverlayReconciler,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            source,
            model,
            surface,
            reconciler,
            refresh_interval,
            state: LoopState::Idle,
            overlay: Vec::new(),
            cycle: 0,
            summary: LoopSummary::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Handles of the elements attached by the last committed cycle.
    pub fn overlay(&self) -> &[ElementHandle] {
        &self.overlay
    }

    pub fn surface(&self) -> &V {
        &self.surface
    }

    pub fn summary(&self) -> LoopSummary {
        self.summary
    }

    /// Run the loop until `stop` fires.
    ///
    /// Returns [`RunOutcome::ModelNotReady`] without touching the surface
    /// when the detector has not finished loading.
    pub async fn run(&mut self, stop: &mut StopToken) -> Result<RunOutcome, FrameLoopError> {
        if self.state == LoopState::Stopped {
            return Ok(RunOutcome::Stopped(self.summary));
        }
        let Some(detector) = self.model.try_get() else {
            debug!("start requested before detector is ready, ignoring");
            return Ok(RunOutcome::ModelNotReady);
        };

        self.state = LoopState::Armed;
        info!(detector = detector.name(), "detector ready, waiting for first frame");

        tokio::select! {
            biased;
            _ = stop.stopped() => {
                self.teardown();
                return Ok(RunOutcome::Stopped(self.summary));
            }
            ready = self.source.ready() => ready?,
        }

        self.state = LoopState::Running;
        info!(
            refresh_ms = self.refresh_interval.as_millis() as u64,
            "frame loop running"
        );

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.refresh_interval, self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            match self.run_cycle(detector.as_ref(), stop).await {
                CycleOutcome::Committed { accepted } => {
                    debug!(cycle = self.cycle, accepted, "cycle committed");
                }
                CycleOutcome::Failed | CycleOutcome::NoFrame => {}
                CycleOutcome::Discarded => break,
            }

            if self.cycle % SUMMARY_EVERY == 0 {
                info!(
                    cycle = self.cycle,
                    committed = self.summary.committed,
                    failures = self.summary.failures,
                    elements = self.overlay.len(),
                    "frame loop stats"
                );
            }

            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = ticker.tick() => {}
            }
        }

        self.teardown();
        info!(
            committed = self.summary.committed,
            failures = self.summary.failures,
            discarded = self.summary.discarded,
            "frame loop stopped"
        );
        Ok(RunOutcome::Stopped(self.summary))
    }

    async fn run_cycle(&mut self, detector: &D, stop: &mut StopToken) -> CycleOutcome {
        self.cycle += 1;

        let Some(frame) = self.source.current_frame() else {
            warn!(cycle = self.cycle, "no frame available, skipping cycle");
            return CycleOutcome::NoFrame;
        };

        let result = tokio::select! {
            biased;
            _ = stop.stopped() => None,
            result = detector.detect(&frame) => Some(result),
        };

        if stop.is_stopped() {
            if result.is_some() {
                self.summary.discarded += 1;
            }
            debug!(cycle = self.cycle, "stop requested, discarding detection result");
            return CycleOutcome::Discarded;
        }
        let Some(result) = result else {
            return CycleOutcome::Discarded;
        };

        match result {
            Ok(detections) => {
                let plan = self
                    .reconciler
                    .plan(std::mem::take(&mut self.overlay), &detections);
                let accepted = plan.attach.len() / 2;
                self.apply(plan, Some(&frame));
                self.summary.committed += 1;
                CycleOutcome::Committed { accepted }
            }
            Err(e) => {
                warn!(error = %e, cycle = self.cycle, "detection failed, clearing overlay");
                self.summary.failures += 1;
                let plan = OverlayPlan {
                    detach: std::mem::take(&mut self.overlay),
                    attach: Vec::new(),
                };
                self.apply(plan, Some(&frame));
                CycleOutcome::Failed
            }
        }
    }

    fn apply(&mut self, plan: OverlayPlan, frame: Option<&Frame>) {
        for handle in plan.detach {
            self.surface.detach(handle);
        }
        self.overlay = plan
            .attach
            .iter()
            .map(|descriptor| self.surface.attach(descriptor))
            .collect();
        self.surface.present(&Commit {
            cycle: self.cycle,
            frame_seq: frame.map(|f| f.seq),
            captured_at_ms: frame.map(|f| f.captured_at_ms),
        });
    }

    fn teardown(&mut self) {
        let plan = OverlayPlan {
            detach: std::mem::take(&mut self.overlay),
            attach: Vec::new(),
        };
        self.apply(plan, None);
        self.state = LoopState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectionError;
    use crate::readiness::model_readiness;
    use crate::stop::{stop_channel, StopHandle};
    use crate::surface::PublishedSurface;
    use live_overlay_capture::CameraFeed;
    use live_overlay_common::annotation::AnnotationDescriptor;
    use live_overlay_common::detection::{BoundingBox, Detection};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const TICK: Duration = Duration::from_millis(1);

    /// Returns scripted results in order; once the script runs out it
    /// requests stop and answers with one more detection.
    struct ScriptedDetector {
        script: Mutex<VecDeque<Result<Vec<Detection>, DetectionError>>>,
        stop: StopHandle,
    }

    impl ScriptedDetector {
        fn new(
            script: Vec<Result<Vec<Detection>, DetectionError>>,
            stop: StopHandle,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                stop,
            }
        }
    }

    impl Detector for ScriptedDetector {
        async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => {
                    self.stop.stop();
                    Ok(vec![cat(0.99)])
                }
            }
        }
    }

    /// Never answers.
    struct HangingDetector;

    impl Detector for HangingDetector {
        async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
            std::future::pending().await
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Attach(u64),
        Detach(u64),
        Present(usize),
    }

    /// Records every call and checks that each attach batch starts from an
    /// empty surface.
    #[derive(Default)]
    struct RecordingSurface {
        events: Vec<Event>,
        live: Vec<u64>,
        next_id: u64,
        batch_open: bool,
        live_before_batch: Vec<usize>,
    }

    impl DisplaySurface for RecordingSurface {
        fn attach(&mut self, _descriptor: &AnnotationDescriptor) -> ElementHandle {
            if !self.batch_open {
                self.batch_open = true;
                self.live_before_batch.push(self.live.len());
            }
            let id = self.next_id;
            self.next_id += 1;
            self.live.push(id);
            self.events.push(Event::Attach(id));
            ElementHandle::new(id)
        }

        fn detach(&mut self, handle: ElementHandle) {
            self.live.retain(|id| *id != handle.id());
            self.events.push(Event::Detach(handle.id()));
        }

        fn present(&mut self, _commit: &Commit) {
            self.batch_open = false;
            self.events.push(Event::Present(self.live.len()));
        }
    }

    impl RecordingSurface {
        fn attaches(&self) -> usize {
            self.events
                .iter()
                .filter(|e| matches!(e, Event::Attach(_)))
                .count()
        }

        fn detaches(&self) -> usize {
            self.events
                .iter()
                .filter(|e| matches!(e, Event::Detach(_)))
                .count()
        }

        fn presents(&self) -> Vec<usize> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Present(n) => Some(*n),
                    _ => None,
                })
                .collect()
        }
    }

    /// Ready at once, but has no frame for the first `empty_polls` cycles.
    struct LateFrameSource {
        polls: AtomicUsize,
        empty_polls: usize,
    }

    impl FrameSource for LateFrameSource {
        async fn ready(&mut self) -> Result<(), FrameLoopError> {
            Ok(())
        }

        fn current_frame(&self) -> Option<Frame> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst);
            (poll >= self.empty_polls).then(|| Frame::new(vec![0xFFu8, 0xD8], 1000, 1))
        }
    }

    fn cat(confidence: f64) -> Detection {
        Detection::new("cat", confidence, BoundingBox::new(10.0, 20.0, 100.0, 50.0))
    }

    fn feed_with_frame() -> (tokio::sync::watch::Sender<Option<Frame>>, CameraFeed) {
        let (tx, feed) = CameraFeed::channel();
        tx.send_replace(Some(Frame::new(vec![0xFFu8, 0xD8], 1000, 1)));
        (tx, feed)
    }

    fn controller<D: Detector>(
        feed: CameraFeed,
        detector: D,
    ) -> FrameLoopController<CameraFeed, D, RecordingSurface> {
        let (signal, readiness) = model_readiness();
        signal.ready(detector);
        FrameLoopController::new(
            feed,
            readiness,
            RecordingSurface::default(),
            OverlayReconciler::default(),
            TICK,
        )
    }

    #[tokio::test]
    async fn start_before_model_ready_is_noop() {
        let (_tx, feed) = feed_with_frame();
        let (_signal, readiness) = model_readiness::<ScriptedDetector>();
        let mut ctl = FrameLoopController::new(
            feed,
            readiness,
            RecordingSurface::default(),
            OverlayReconciler::default(),
            TICK,
        );
        let (_handle, mut stop) = stop_channel();

        let outcome = ctl.run(&mut stop).await.unwrap();
        assert_eq!(outcome, RunOutcome::ModelNotReady);
        assert_eq!(ctl.state(), LoopState::Idle);
        assert!(ctl.surface().events.is_empty());
    }

    #[tokio::test]
    async fn retry_after_model_becomes_ready() {
        let (_tx, feed) = feed_with_frame();
        let (handle, mut stop) = stop_channel();
        let (signal, readiness) = model_readiness();
        let mut ctl = FrameLoopController::new(
            feed,
            readiness,
            RecordingSurface::default(),
            OverlayReconciler::default(),
            TICK,
        );

        assert_eq!(ctl.run(&mut stop).await.unwrap(), RunOutcome::ModelNotReady);
        signal.ready(ScriptedDetector::new(vec![Ok(vec![cat(0.9)])], handle));
        assert!(matches!(
            ctl.run(&mut stop).await.unwrap(),
            RunOutcome::Stopped(_)
        ));
        assert_eq!(ctl.summary().committed, 1);
    }

    #[tokio::test]
    async fn every_cycle_clears_before_attaching() {
        let (_tx, feed) = feed_with_frame();
        let (handle, mut stop) = stop_channel();
        let script = (0..5).map(|_| Ok(vec![cat(0.9), cat(0.8)])).collect();
        let mut ctl = controller(feed, ScriptedDetector::new(script, handle));

        let outcome = ctl.run(&mut stop).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Stopped(LoopSummary {
                committed: 5,
                failures: 0,
                discarded: 1,
            })
        );

        let surface = ctl.surface();
        assert_eq!(surface.live_before_batch, vec![0; 5]);
        assert_eq!(surface.attaches(), 20);
        assert_eq!(surface.detaches(), 20);
        // four elements after each commit, none after teardown
        assert_eq!(surface.presents(), vec![4, 4, 4, 4, 4, 0]);
        assert_eq!(ctl.state(), LoopState::Stopped);
        assert!(ctl.overlay().is_empty());
    }

    #[tokio::test]
    async fn detach_count_matches_previous_attach_count() {
        let (_tx, feed) = feed_with_frame();
        let (handle, mut stop) = stop_channel();
        let script = vec![
            Ok(vec![cat(0.9)]),
            Ok(vec![cat(0.9), cat(0.95), cat(0.7)]),
            Ok(vec![]),
            Ok(vec![cat(0.67)]),
        ];
        let mut ctl = controller(feed, ScriptedDetector::new(script, handle));
        ctl.run(&mut stop).await.unwrap();

        // split the event log into cycles at each present
        let mut cycles: Vec<(usize, usize)> = Vec::new();
        let (mut attached, mut detached) = (0, 0);
        for event in &ctl.surface().events {
            match event {
                Event::Attach(_) => attached += 1,
                Event::Detach(_) => {
                    assert_eq!(attached, 0, "detach after attach within one cycle");
                    detached += 1;
                }
                Event::Present(_) => {
                    cycles.push((detached, attached));
                    attached = 0;
                    detached = 0;
                }
            }
        }
        assert_eq!(cycles, vec![(0, 2), (2, 6), (6, 0), (0, 2), (2, 0)]);
    }

    #[tokio::test]
    async fn identical_input_yields_identical_overlay() {
        let (_tx, feed) = feed_with_frame();
        let (handle, mut stop) = stop_channel();
        let (signal, readiness) = model_readiness();
        signal.ready(ScriptedDetector::new(
            vec![Ok(vec![cat(0.9)]), Ok(vec![cat(0.9)])],
            handle,
        ));
        let surface = PublishedSurface::new();
        let mut snapshots = surface.subscribe();
        let latest = surface.subscribe();
        let mut ctl = FrameLoopController::new(
            feed,
            readiness,
            surface,
            OverlayReconciler::default(),
            TICK,
        );

        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while snapshots.changed().await.is_ok() {
                seen.push(snapshots.borrow_and_update().annotations.clone());
            }
            seen
        });

        ctl.run(&mut stop).await.unwrap();
        assert!(latest.borrow().annotations.is_empty(), "teardown leaves nothing");
        drop(ctl);

        let seen = observer.await.unwrap();
        let committed: Vec<_> = seen.iter().filter(|a| !a.is_empty()).collect();
        assert!(!committed.is_empty());
        for annotations in &committed {
            assert_eq!(*annotations, committed[0]);
            assert_eq!(annotations.len(), 2);
        }
    }

    #[tokio::test]
    async fn failed_detection_clears_and_keeps_cycling() {
        let (_tx, feed) = feed_with_frame();
        let (handle, mut stop) = stop_channel();
        let script = vec![
            Ok(vec![cat(0.9)]),
            Err(DetectionError::Other("inference crashed".into())),
            Ok(vec![cat(0.9)]),
        ];
        let mut ctl = controller(feed, ScriptedDetector::new(script, handle));

        let outcome = ctl.run(&mut stop).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Stopped(LoopSummary {
                committed: 2,
                failures: 1,
                discarded: 1,
            })
        );
        assert_eq!(ctl.surface().presents(), vec![2, 0, 2, 0]);
    }

    #[tokio::test]
    async fn result_after_stop_is_not_committed() {
        let (_tx, feed) = feed_with_frame();
        let (handle, mut stop) = stop_channel();
        let mut ctl = controller(feed, ScriptedDetector::new(Vec::new(), handle));

        let outcome = ctl.run(&mut stop).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Stopped(LoopSummary {
                committed: 0,
                failures: 0,
                discarded: 1,
            })
        );
        assert_eq!(ctl.surface().attaches(), 0);
    }

    #[tokio::test]
    async fn stop_interrupts_in_flight_detection() {
        let (_tx, feed) = feed_with_frame();
        let (handle, mut stop) = stop_channel();
        let mut ctl = controller(feed, HangingDetector);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.stop();
        });

        let outcome = ctl.run(&mut stop).await.unwrap();
        assert_eq!(outcome, RunOutcome::Stopped(LoopSummary::default()));
        assert_eq!(ctl.surface().attaches(), 0);
        assert_eq!(ctl.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn stop_while_waiting_for_first_frame() {
        let (tx, feed) = CameraFeed::channel();
        let (handle, mut stop) = stop_channel();
        let mut ctl = controller(feed, HangingDetector);

        handle.stop();
        let outcome = ctl.run(&mut stop).await.unwrap();
        assert_eq!(outcome, RunOutcome::Stopped(LoopSummary::default()));
        assert_eq!(ctl.surface().attaches(), 0);
        drop(tx);
    }

    #[tokio::test]
    async fn closed_source_ends_loop_with_error() {
        let (tx, feed) = CameraFeed::channel();
        drop(tx);
        let (_handle, mut stop) = stop_channel();
        let mut ctl = controller(feed, HangingDetector);

        assert!(matches!(
            ctl.run(&mut stop).await,
            Err(FrameLoopError::SourceClosed)
        ));
        assert_eq!(ctl.state(), LoopState::Armed);
    }

    #[tokio::test]
    async fn missing_frame_skips_cycle_without_touching_overlay() {
        let source = LateFrameSource {
            polls: AtomicUsize::new(0),
            empty_polls: 1,
        };
        let (handle, mut stop) = stop_channel();
        let (signal, readiness) = model_readiness();
        signal.ready(ScriptedDetector::new(vec![Ok(vec![cat(0.9)])], handle));
        let mut ctl = FrameLoopController::new(
            source,
            readiness,
            RecordingSurface::default(),
            OverlayReconciler::default(),
            TICK,
        );

        let outcome = ctl.run(&mut stop).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Stopped(LoopSummary {
                committed: 1,
                failures: 0,
                discarded: 1,
            })
        );
        // The frameless cycle left no trace: the first event is the
        // committed cycle's attach.
        assert_eq!(ctl.surface().events[0], Event::Attach(0));
        assert_eq!(ctl.surface().presents(), vec![2, 0]);
        assert_eq!(ctl.surface().detaches(), 2);
    }
}
