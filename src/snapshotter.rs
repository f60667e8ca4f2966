use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result, TransportError};
use crate::intervaltimer::IntervalTimer;
use crate::ledstate::{LedState, Snapshot};
use crate::scheduler::Event;
use crate::signal::StopSignal;
use crate::transport::Transport;

/// What happens to a new frame while the transport is still busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Keep at most one frame waiting, a newer frame replaces it.
    #[default]
    Latest,
    /// Throw the new frame away.
    Skip,
}

#[derive(Debug, Clone)]
pub struct SnapshotterOptions {
    pub interval: Duration,
    pub overrun: OverrunPolicy,
    pub failure_threshold: Option<u32>,
    pub measure_fps: bool,
}

impl Default for SnapshotterOptions {
    fn default() -> Self {
        SnapshotterOptions {
            interval: Duration::from_secs_f64(1.0 / 120.0),
            overrun: OverrunPolicy::default(),
            failure_threshold: None,
            measure_fps: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct SnapshotterStats {
    ticks: AtomicU64,
    missed_ticks: AtomicU64,
    frames_written: AtomicU64,
    write_failures: AtomicU64,
    frames_dropped: AtomicU64,
}

impl SnapshotterStats {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn missed_ticks(&self) -> u64 {
        self.missed_ticks.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Offer {
    Queued,
    Replaced,
    Dropped,
}

#[derive(Default)]
struct SlotState {
    pending: Option<Snapshot>,
    in_flight: bool,
    closed: bool,
}

/// Single frame mailbox between the ticker and the transport writer. Never
/// holds more than one waiting frame.
#[derive(Default)]
struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn offer(&self, snapshot: Snapshot, policy: OverrunPolicy) -> Offer {
        let mut slot = self.lock();
        if slot.closed {
            return Offer::Dropped;
        }

        let offer = match (policy, slot.pending.is_some(), slot.in_flight) {
            (OverrunPolicy::Skip, true, _) | (OverrunPolicy::Skip, _, true) => {
                return Offer::Dropped;
            }
            (OverrunPolicy::Latest, true, _) => Offer::Replaced,
            _ => Offer::Queued,
        };

        slot.pending = Some(snapshot);
        self.ready.notify_one();
        offer
    }

    /// Waits for the next frame. `None` once the slot is closed and drained.
    fn take(&self) -> Option<Snapshot> {
        let mut slot = self.lock();
        loop {
            if let Some(snapshot) = slot.pending.take() {
                slot.in_flight = true;
                return Some(snapshot);
            }
            if slot.closed {
                return None;
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish(&self) {
        self.lock().in_flight = false;
    }

    fn close(&self, final_frame: Option<Snapshot>) {
        let mut slot = self.lock();
        if let Some(frame) = final_frame {
            slot.pending = Some(frame);
        }
        slot.closed = true;
        self.ready.notify_all();
    }

    /// Closes the slot and throws away whatever is still waiting. A write in
    /// progress finishes, then the writer ends.
    fn abandon(&self) {
        let mut slot = self.lock();
        slot.pending = None;
        slot.closed = true;
        self.ready.notify_all();
    }
}

/// Samples the LED state at a fixed rate and hands the copies to a writer
/// thread that owns the transport, so slow hardware never blocks the effects
/// or the sampling schedule.
pub struct Snapshotter {
    stop: StopSignal,
    slot: Arc<FrameSlot>,
    stats: Arc<SnapshotterStats>,
    ticker: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    writer_done: mpsc::Receiver<()>,
}

impl Snapshotter {
    pub fn start(
        state: Arc<LedState>,
        transport: Box<dyn Transport>,
        options: SnapshotterOptions,
        events: Sender<Event>,
    ) -> Result<Snapshotter> {
        let stop = StopSignal::new();
        let slot = Arc::new(FrameSlot::default());
        let stats = Arc::new(SnapshotterStats::default());
        let (done_tx, writer_done) = mpsc::channel();

        let writer = {
            let slot = Arc::clone(&slot);
            let stats = Arc::clone(&stats);
            let threshold = options.failure_threshold;
            thread::Builder::new()
                .name("Transport".to_string())
                .spawn(move || {
                    write_frames(transport, &slot, &stats, threshold, &events);
                    let _ = done_tx.send(());
                })?
        };

        let ticker = {
            let stop = stop.clone();
            let slot = Arc::clone(&slot);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("Snapshotter".to_string())
                .spawn(move || sample(&state, &slot, &stats, &options, &stop))
        };

        let ticker = match ticker {
            Ok(ticker) => ticker,
            Err(err) => {
                slot.close(None);
                let _ = writer.join();
                return Err(err.into());
            }
        };

        log::info!("Snapshotter started");
        Ok(Snapshotter {
            stop,
            slot,
            stats,
            ticker: Some(ticker),
            writer: Some(writer),
            writer_done,
        })
    }

    pub fn stats(&self) -> Arc<SnapshotterStats> {
        Arc::clone(&self.stats)
    }

    /// Stops ticking, lets the writer finish the frame in flight plus
    /// `final_frame` and waits up to `grace` for it.
    pub fn stop(mut self, final_frame: Option<Snapshot>, grace: Duration) -> Result<()> {
        self.stop.trigger();
        if let Some(ticker) = self.ticker.take() {
            if ticker.join().is_err() {
                log::error!("Snapshotter thread panicked");
            }
        }

        self.slot.close(final_frame);

        let writer = self.writer.take();
        match self.writer_done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(writer) = writer {
                    if writer.join().is_err() {
                        log::error!("Transport thread panicked");
                    }
                }
                log::info!(
                    "Snapshotter stopped after {} ticks, {} frames written",
                    self.stats.ticks(),
                    self.stats.frames_written()
                );
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                self.slot.abandon();
                log::warn!("Transport still busy after {:?}, leaving it behind", grace);
                Err(Error::ShutdownTimeout(grace))
            }
        }
    }
}

impl Drop for Snapshotter {
    fn drop(&mut self) {
        if self.ticker.is_some() {
            self.stop.trigger();
            self.slot.abandon();
        }
    }
}

fn sample(
    state: &LedState,
    slot: &FrameSlot,
    stats: &SnapshotterStats,
    options: &SnapshotterOptions,
    stop: &StopSignal,
) {
    let mut timer = IntervalTimer::with_interval(options.interval, options.measure_fps);

    while timer.sleep_until_next_tick(stop).is_some() {
        stats.ticks.fetch_add(1, Ordering::Relaxed);
        stats
            .missed_ticks
            .store(timer.missed_ticks(), Ordering::Relaxed);

        let snapshot = state.get_all();
        if slot.offer(snapshot, options.overrun) != Offer::Queued {
            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn write_frames(
    mut transport: Box<dyn Transport>,
    slot: &FrameSlot,
    stats: &SnapshotterStats,
    failure_threshold: Option<u32>,
    events: &Sender<Event>,
) {
    let mut consecutive_failures = 0u32;

    while let Some(snapshot) = slot.take() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| transport.write(&snapshot)))
            .unwrap_or_else(|_| Err(TransportError::Unavailable("transport panicked".to_string())));
        slot.finish();

        match result {
            Ok(()) => {
                stats.frames_written.fetch_add(1, Ordering::Relaxed);
                if consecutive_failures > 0 {
                    log::info!(
                        "Transport recovered after {} failed writes",
                        consecutive_failures
                    );
                }
                consecutive_failures = 0;
            }
            Err(err) => {
                stats.write_failures.fetch_add(1, Ordering::Relaxed);
                consecutive_failures = consecutive_failures.saturating_add(1);

                if consecutive_failures == 1 || consecutive_failures % 100 == 0 {
                    log::warn!(
                        "Frame not rendered: {} ({} failures in a row)",
                        err,
                        consecutive_failures
                    );
                }

                if failure_threshold == Some(consecutive_failures) {
                    let _ = events.send(Event::TransportFailing {
                        consecutive: consecutive_failures,
                        error: err,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use super::*;
    use crate::color::LedColor;

    /// Records every frame it receives, optionally failing or stalling.
    /// `started` counts writes as they begin, `frames` once they are done.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingTransport {
        pub frames: Arc<Mutex<Vec<Vec<LedColor>>>>,
        pub started: Arc<AtomicUsize>,
        pub fail: bool,
        pub delay: Duration,
    }

    impl Transport for RecordingTransport {
        fn write(&mut self, leds: &[LedColor]) -> Result<(), TransportError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            if self.fail {
                return Err(TransportError::Unavailable("unplugged".to_string()));
            }
            self.frames.lock().unwrap().push(leds.to_vec());
            Ok(())
        }
    }

    fn options(hz: f64) -> SnapshotterOptions {
        SnapshotterOptions {
            interval: Duration::from_secs_f64(1.0 / hz),
            ..SnapshotterOptions::default()
        }
    }

    #[test]
    fn latest_policy_keeps_only_newest_frame() {
        let slot = FrameSlot::default();
        let first = Snapshot::blank(1);
        let second = LedState::new(1).unwrap();
        second.set(0, LedColor::rgb(1, 1, 1)).unwrap();

        assert_eq!(slot.offer(first, OverrunPolicy::Latest), Offer::Queued);
        assert_eq!(slot.offer(second.get_all(), OverrunPolicy::Latest), Offer::Replaced);

        let taken = slot.take().unwrap();
        assert_eq!(taken[0], LedColor::rgb(1, 1, 1));

        // Writer busy, nothing pending: queued behind it.
        assert_eq!(slot.offer(Snapshot::blank(1), OverrunPolicy::Latest), Offer::Queued);
    }

    #[test]
    fn skip_policy_drops_while_busy() {
        let slot = FrameSlot::default();
        assert_eq!(slot.offer(Snapshot::blank(1), OverrunPolicy::Skip), Offer::Queued);
        assert_eq!(slot.offer(Snapshot::blank(1), OverrunPolicy::Skip), Offer::Dropped);

        slot.take().unwrap();
        assert_eq!(slot.offer(Snapshot::blank(1), OverrunPolicy::Skip), Offer::Dropped);

        slot.finish();
        assert_eq!(slot.offer(Snapshot::blank(1), OverrunPolicy::Skip), Offer::Queued);
    }

    #[test]
    fn closed_slot_drains_then_ends() {
        let slot = FrameSlot::default();
        slot.offer(Snapshot::blank(2), OverrunPolicy::Latest);
        slot.close(Some(Snapshot::blank(3)));

        assert_eq!(slot.take().unwrap().len(), 3);
        assert!(slot.take().is_none());
        assert_eq!(slot.offer(Snapshot::blank(2), OverrunPolicy::Latest), Offer::Dropped);
    }

    #[test]
    fn samples_state_at_fixed_rate() {
        let state = Arc::new(LedState::new(4).unwrap());
        state.set(1, LedColor::rgb(0, 0, 255)).unwrap();
        let transport = RecordingTransport::default();
        let frames = Arc::clone(&transport.frames);
        let (events, _rx) = mpsc::channel();

        let snapshotter =
            Snapshotter::start(Arc::clone(&state), Box::new(transport), options(200.0), events).unwrap();
        let stats = snapshotter.stats();
        thread::sleep(Duration::from_millis(500));
        snapshotter.stop(None, Duration::from_secs(1)).unwrap();

        // 100 ticks expected, allow for a slow CI machine.
        let ticks = stats.ticks();
        assert!((60..=102).contains(&ticks), "{ticks} ticks");

        let frames = frames.lock().unwrap();
        assert!(!frames.is_empty());
        assert!(frames.iter().all(|f| f.len() == 4));
        assert_eq!(frames[0][1], LedColor::rgb(0, 0, 255));
    }

    #[test]
    fn failing_transport_does_not_stop_ticking() {
        let state = Arc::new(LedState::new(2).unwrap());
        let transport = RecordingTransport {
            fail: true,
            ..RecordingTransport::default()
        };
        let (events, rx) = mpsc::channel();
        let mut options = options(200.0);
        options.failure_threshold = Some(5);

        let snapshotter = Snapshotter::start(state, Box::new(transport), options, events).unwrap();
        let stats = snapshotter.stats();
        thread::sleep(Duration::from_millis(400));

        let ticks_before = stats.ticks();
        thread::sleep(Duration::from_millis(200));
        assert!(stats.ticks() > ticks_before + 10);
        assert!(stats.write_failures() > 10);
        assert_eq!(stats.frames_written(), 0);

        snapshotter.stop(None, Duration::from_secs(1)).unwrap();

        // Exactly one escalation for one run of failures.
        let escalations: Vec<_> = rx.try_iter().collect();
        assert_eq!(escalations.len(), 1);
        assert!(matches!(
            escalations[0],
            Event::TransportFailing { consecutive: 5, .. }
        ));
    }

    #[test]
    fn slow_transport_does_not_slow_sampling() {
        let state = Arc::new(LedState::new(2).unwrap());
        let transport = RecordingTransport {
            delay: Duration::from_millis(50),
            ..RecordingTransport::default()
        };
        let (events, _rx) = mpsc::channel();

        let snapshotter =
            Snapshotter::start(state, Box::new(transport), options(200.0), events).unwrap();
        let stats = snapshotter.stats();
        thread::sleep(Duration::from_millis(500));
        snapshotter.stop(None, Duration::from_secs(1)).unwrap();

        assert!(stats.ticks() >= 60, "{} ticks", stats.ticks());
        assert!(stats.frames_written() <= 12);
        assert!(stats.frames_dropped() > 0);
    }

    #[test]
    fn stop_writes_final_frame_and_nothing_after() {
        let state = Arc::new(LedState::new(3).unwrap());
        state.fill(LedColor::rgb(255, 255, 255));
        let transport = RecordingTransport::default();
        let frames = Arc::clone(&transport.frames);
        let (events, _rx) = mpsc::channel();

        let snapshotter =
            Snapshotter::start(Arc::clone(&state), Box::new(transport), options(100.0), events).unwrap();
        thread::sleep(Duration::from_millis(100));
        snapshotter
            .stop(Some(Snapshot::blank(3)), Duration::from_secs(1))
            .unwrap();

        let written = frames.lock().unwrap().len();
        assert_eq!(frames.lock().unwrap().last().unwrap(), &vec![LedColor::OFF; 3]);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(frames.lock().unwrap().len(), written);
    }

    #[test]
    fn stop_gives_up_on_a_stuck_transport() {
        let state = Arc::new(LedState::new(1).unwrap());
        let transport = RecordingTransport {
            delay: Duration::from_secs(2),
            ..RecordingTransport::default()
        };
        let (events, _rx) = mpsc::channel();

        let snapshotter = Snapshotter::start(state, Box::new(transport), options(100.0), events).unwrap();
        thread::sleep(Duration::from_millis(50));

        let begin = Instant::now();
        let result = snapshotter.stop(None, Duration::from_millis(100));
        assert!(matches!(result, Err(Error::ShutdownTimeout(_))));
        assert!(begin.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn abandoned_writer_starts_no_further_writes() {
        let state = Arc::new(LedState::new(2).unwrap());
        let transport = RecordingTransport {
            delay: Duration::from_millis(300),
            ..RecordingTransport::default()
        };
        let started = Arc::clone(&transport.started);
        let (events, _rx) = mpsc::channel();

        let snapshotter = Snapshotter::start(state, Box::new(transport), options(200.0), events).unwrap();
        thread::sleep(Duration::from_millis(30));

        let result = snapshotter.stop(Some(Snapshot::blank(2)), Duration::from_millis(50));
        assert!(matches!(result, Err(Error::ShutdownTimeout(_))));

        let at_return = started.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(800));
        assert_eq!(started.load(Ordering::SeqCst), at_return);
    }
}
