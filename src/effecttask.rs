use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::effects::LightingEffect;
use crate::error::{Error, Result};
use crate::intervaltimer::IntervalTimer;
use crate::ledstate::LedState;
use crate::scheduler::Event;
use crate::signal::StopSignal;

pub type TaskId = u64;

/// One effect running on its own thread and at its own pace.
pub struct EffectTask {
    id: TaskId,
    name: String,
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl EffectTask {
    /// Starts `effect` after `start_delay`. A failing or panicking step ends
    /// the task and is reported as `Event::TaskFailed`.
    pub fn spawn(
        id: TaskId,
        name: &str,
        mut effect: Box<dyn LightingEffect>,
        leds: Arc<LedState>,
        events: Sender<Event>,
        start_delay: Duration,
    ) -> Result<EffectTask> {
        let stop = StopSignal::new();

        let handle = {
            let stop = stop.clone();
            let name = name.to_string();
            thread::Builder::new()
                .name(format!("effect-{id}"))
                .spawn(move || {
                    let error = match run(effect.as_mut(), &leds, &stop, start_delay) {
                        Ok(()) => return,
                        Err(err @ Error::EffectTaskFailure { .. }) => err,
                        Err(err) => Error::EffectTaskFailure {
                            name,
                            reason: err.to_string(),
                        },
                    };
                    let _ = events.send(Event::TaskFailed { id, error });
                })?
        };

        Ok(EffectTask {
            id,
            name: name.to_string(),
            stop,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop(&self) {
        self.stop.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Effect task {} '{}' panicked", self.id, self.name);
            }
        }
    }
}

fn run(
    effect: &mut dyn LightingEffect,
    leds: &LedState,
    stop: &StopSignal,
    start_delay: Duration,
) -> Result<()> {
    if stop.wait_timeout(start_delay) {
        return Ok(());
    }

    let started = Instant::now();
    let mut timer = IntervalTimer::with_interval(effect.interval(), false);
    log::debug!(
        "Effect '{}' stepping every {:?}",
        effect.name(),
        timer.interval()
    );
    while timer.sleep_until_next_tick(stop).is_some() {
        let elapsed = started.elapsed();
        match panic::catch_unwind(AssertUnwindSafe(|| effect.step(leds, elapsed))) {
            Ok(result) => result?,
            Err(panic) => {
                return Err(Error::EffectTaskFailure {
                    name: effect.name().to_string(),
                    reason: panic_message(panic.as_ref()),
                })
            }
        }
    }

    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return format!("panicked: {message}");
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return format!("panicked: {message}");
    }
    "panicked".to_string()
}
