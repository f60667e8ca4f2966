use std::thread;
use std::time::{Duration, Instant};

use crate::signal::StopSignal;

/// Fixed rate ticker. Tick `n` is due at `start + n * interval`, no matter
/// how long the work between two ticks took. Slots that have already passed
/// are skipped instead of being replayed.
pub struct IntervalTimer {
    interval: Duration,
    start: Instant,
    next_tick: u64,
    missed: u64,
    thread_name: String,
    measure_fps: bool,
    last_fps_print: Instant,
    frames: u32,
}

impl IntervalTimer {
    pub fn with_interval(interval: Duration, measure_fps: bool) -> IntervalTimer {
        IntervalTimer::starting_at(Instant::now(), interval, measure_fps)
    }

    pub fn starting_at(start: Instant, interval: Duration, measure_fps: bool) -> IntervalTimer {
        let cur_thread = thread::current();
        let thread_name = cur_thread.name().unwrap_or("unnamed");

        IntervalTimer {
            interval: interval.max(Duration::from_micros(1)),
            start,
            next_tick: 0,
            missed: 0,
            thread_name: thread_name.to_string(),
            measure_fps,
            last_fps_print: Instant::now(),
            frames: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn missed_ticks(&self) -> u64 {
        self.missed
    }

    pub fn tick_time(&self, tick: u64) -> Instant {
        let nanos = self.interval.as_nanos().saturating_mul(tick as u128);
        self.start + Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// Which tick is due next when asked at `now`, and its target time. A
    /// target in the past means the tick is late and should fire right away.
    pub fn schedule(&self, now: Instant) -> (u64, Instant) {
        let target = self.tick_time(self.next_tick);
        if now <= target {
            return (self.next_tick, target);
        }

        let elapsed_slots = now.duration_since(self.start).as_nanos() / self.interval.as_nanos();
        let tick = (elapsed_slots as u64).max(self.next_tick);
        (tick, self.tick_time(tick))
    }

    /// Blocks until the next tick is due. Returns its index, or `None` if
    /// `stop` fired while waiting.
    pub fn sleep_until_next_tick(&mut self, stop: &StopSignal) -> Option<u64> {
        if self.measure_fps {
            self.update_fps();
        }

        let (tick, target) = self.advance(Instant::now());
        if stop.wait_until(target) {
            return None;
        }

        Some(tick)
    }

    fn advance(&mut self, now: Instant) -> (u64, Instant) {
        let (tick, target) = self.schedule(now);
        if tick > self.next_tick {
            let skipped = tick - self.next_tick;
            self.missed += skipped;
            log::trace!("{} skipped {} tick(s)", self.thread_name, skipped);
        }

        self.next_tick = tick + 1;
        (tick, target)
    }

    fn update_fps(&mut self) {
        self.frames += 1;

        if Instant::now() - self.last_fps_print > Duration::from_secs(1) {
            log::debug!(
                "{} FPS: {} (missed ticks so far: {})",
                self.thread_name,
                self.frames,
                self.missed
            );
            self.frames = 0;
            self.last_fps_print = Instant::now();
        }
    }
}
