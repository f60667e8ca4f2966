use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::color::LedColor;
use crate::config::{Config, EffectConfig, RestartKind, SupervisionConfig};
use crate::effects::LightingEffect;
use crate::effecttask::{EffectTask, TaskId};
use crate::error::{Error, Result, TransportError};
use crate::ledstate::LedState;
use crate::signal::StopSignal;
use crate::snapshotter::{Snapshotter, SnapshotterOptions, SnapshotterStats};
use crate::transport::Transport;

/// Everything the supervisor thread reacts to.
#[derive(Debug)]
pub enum Event {
    TaskFailed { id: TaskId, error: Error },
    TransportFailing { consecutive: u32, error: TransportError },
    Shutdown,
}

/// What the supervisor does with an effect task that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
    Restart {
        max_restarts: u32,
        backoff: Duration,
        max_backoff: Duration,
    },
}

impl RestartPolicy {
    pub fn from_config(config: &SupervisionConfig) -> RestartPolicy {
        match config.policy {
            RestartKind::Never => RestartPolicy::Never,
            RestartKind::Restart => RestartPolicy::Restart {
                max_restarts: config.max_restarts,
                backoff: Duration::from_millis(config.backoff_ms),
                max_backoff: Duration::from_millis(config.max_backoff_ms),
            },
        }
    }

    /// Delay before restart number `attempt` (counting from 0), `None` once the
    /// task should be given up.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        match *self {
            RestartPolicy::Never => None,
            RestartPolicy::Restart {
                max_restarts,
                backoff,
                max_backoff,
            } => {
                if attempt >= max_restarts {
                    return None;
                }
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                Some(backoff.saturating_mul(factor).min(max_backoff))
            }
        }
    }

    /// How long a restarted task has to run before its failures stop
    /// counting against `max_restarts`.
    fn healthy_after(&self) -> Option<Duration> {
        match *self {
            RestartPolicy::Never => None,
            RestartPolicy::Restart { max_backoff, .. } => Some(max_backoff),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub snapshotter: SnapshotterOptions,
    pub restart: RestartPolicy,
    pub shutdown_grace: Duration,
    pub blackout_on_shutdown: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        SchedulerOptions {
            snapshotter: SnapshotterOptions::default(),
            restart: RestartPolicy::Never,
            shutdown_grace: Duration::from_millis(500),
            blackout_on_shutdown: true,
        }
    }
}

impl SchedulerOptions {
    pub fn from_config(config: &Config) -> SchedulerOptions {
        SchedulerOptions {
            snapshotter: SnapshotterOptions {
                interval: config.frame_interval(),
                overrun: config.sampler.overrun,
                failure_threshold: config.sampler.failure_threshold,
                measure_fps: true,
            },
            restart: RestartPolicy::from_config(&config.supervision),
            shutdown_grace: Duration::from_millis(config.shutdown.grace_ms),
            blackout_on_shutdown: config.shutdown.blackout,
        }
    }
}

type EffectFactory = Arc<dyn Fn() -> Result<Box<dyn LightingEffect>> + Send + Sync>;

struct TaskEntry {
    factory: EffectFactory,
    task: EffectTask,
    restarts: u32,
    running_since: Instant,
}

#[derive(Default)]
struct Registry {
    shutting_down: bool,
    next_id: TaskId,
    tasks: BTreeMap<TaskId, TaskEntry>,
}

struct Shared {
    leds: Arc<LedState>,
    registry: Mutex<Registry>,
    restart: RestartPolicy,
    halt: StopSignal,
    fatal: Mutex<Option<Error>>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the strip, the effect tasks and the snapshotter.
///
/// Effects are registered while running. Each one gets its own thread, and a
/// supervisor thread restarts or drops tasks that fail. `stop` tears
/// everything down in order: tasks first, then the supervisor, then the
/// snapshotter, so the last frame on the strip is the last state written.
pub struct Scheduler {
    shared: Arc<Shared>,
    events: Sender<Event>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    snapshotter: Mutex<Option<Snapshotter>>,
    // Held for the whole teardown, so a second `stop` returns only once the
    // first one is done.
    stopping: Mutex<()>,
    stats: Arc<SnapshotterStats>,
    shutdown_grace: Duration,
    blackout_on_shutdown: bool,
}

impl Scheduler {
    pub fn start(
        strip_len: usize,
        transport: Box<dyn Transport>,
        options: SchedulerOptions,
    ) -> Result<Scheduler> {
        let leds = Arc::new(LedState::new(strip_len)?);
        let (events, rx) = mpsc::channel();

        let shared = Arc::new(Shared {
            leds: Arc::clone(&leds),
            registry: Mutex::new(Registry::default()),
            restart: options.restart,
            halt: StopSignal::new(),
            fatal: Mutex::new(None),
        });

        let supervisor = {
            let shared = Arc::clone(&shared);
            let events = events.clone();
            thread::Builder::new()
                .name("Supervisor".to_string())
                .spawn(move || supervise(&shared, &rx, &events))?
        };

        let snapshotter =
            match Snapshotter::start(leds, transport, options.snapshotter, events.clone()) {
                Ok(snapshotter) => snapshotter,
                Err(err) => {
                    let _ = events.send(Event::Shutdown);
                    let _ = supervisor.join();
                    return Err(err);
                }
            };

        log::info!("Scheduler started for {} LEDs", strip_len);
        Ok(Scheduler {
            shared,
            events,
            supervisor: Mutex::new(Some(supervisor)),
            stats: snapshotter.stats(),
            snapshotter: Mutex::new(Some(snapshotter)),
            stopping: Mutex::new(()),
            shutdown_grace: options.shutdown_grace,
            blackout_on_shutdown: options.blackout_on_shutdown,
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> Arc<LedState> {
        Arc::clone(&self.shared.leds)
    }

    pub fn stats(&self) -> Arc<SnapshotterStats> {
        Arc::clone(&self.stats)
    }

    /// Spawns a task for the effect `factory` builds. The factory is kept so
    /// the supervisor can build a fresh effect when the task has to restart.
    pub fn register<F>(&self, name: &str, factory: F) -> Result<TaskId>
    where
        F: Fn() -> Result<Box<dyn LightingEffect>> + Send + Sync + 'static,
    {
        let mut registry = self.shared.registry();
        if registry.shutting_down {
            return Err(Error::ShuttingDown);
        }

        let effect = factory()?;
        let id = registry.next_id;
        let task = EffectTask::spawn(
            id,
            name,
            effect,
            Arc::clone(&self.shared.leds),
            self.events.clone(),
            Duration::ZERO,
        )?;

        registry.next_id += 1;
        registry.tasks.insert(
            id,
            TaskEntry {
                factory: Arc::new(factory),
                task,
                restarts: 0,
                running_since: Instant::now(),
            },
        );

        log::info!("Registered effect '{}' as task {}", name, id);
        Ok(id)
    }

    pub fn register_effect(&self, config: &EffectConfig) -> Result<TaskId> {
        config.validate()?;

        let name = config.name();
        let strip_len = self.shared.leds.len();
        let config = config.clone();
        self.register(&name, move || config.build(strip_len))
    }

    /// Stops a single task. Returns `false` if no such task is running.
    pub fn stop_task(&self, id: TaskId) -> bool {
        let entry = self.shared.registry().tasks.remove(&id);
        match entry {
            Some(mut entry) => {
                entry.task.stop();
                entry.task.join();
                log::info!("Stopped effect '{}' (task {})", entry.task.name(), entry.task.id());
                true
            }
            None => false,
        }
    }

    /// Tasks that are stepping or waiting to start. A task that just failed
    /// and has not been restarted yet is not listed.
    pub fn running_tasks(&self) -> Vec<(TaskId, String)> {
        self.shared
            .registry()
            .tasks
            .values()
            .filter(|entry| !entry.task.is_finished())
            .map(|entry| (entry.task.id(), entry.task.name().to_string()))
            .collect()
    }

    /// Triggering this signal makes `wait` return.
    pub fn halt_signal(&self) -> StopSignal {
        self.shared.halt.clone()
    }

    /// Blocks until the scheduler is halted. Returns the fatal error that
    /// caused the halt, if any.
    pub fn wait(&self) -> Result<()> {
        self.shared.halt.wait();

        let fatal = self
            .shared
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn stop(&self) -> Result<()> {
        let _stopping = self.stopping.lock().unwrap_or_else(PoisonError::into_inner);

        let ids: Vec<TaskId> = {
            let mut registry = self.shared.registry();
            if registry.shutting_down {
                return Ok(());
            }
            registry.shutting_down = true;

            // Signal everyone first so the tasks wind down in parallel.
            for entry in registry.tasks.values() {
                entry.task.stop();
            }
            registry.tasks.keys().copied().collect()
        };

        log::info!("Stopping {} effect tasks", ids.len());
        for id in ids {
            self.stop_task(id);
        }

        let _ = self.events.send(Event::Shutdown);
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(supervisor) = supervisor {
            if supervisor.join().is_err() {
                log::error!("Supervisor thread panicked");
            }
        }

        let final_frame = if self.blackout_on_shutdown {
            self.shared.leds.fill(LedColor::OFF);
            Some(self.shared.leds.get_all())
        } else {
            None
        };

        let snapshotter = self
            .snapshotter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let result = match snapshotter {
            Some(snapshotter) => snapshotter.stop(final_frame, self.shutdown_grace),
            None => Ok(()),
        };

        self.shared.halt.trigger();
        log::info!("Scheduler stopped");
        result
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("Unclean scheduler shutdown: {}", err);
        }
    }
}

fn supervise(shared: &Shared, rx: &Receiver<Event>, events: &Sender<Event>) {
    for event in rx {
        match event {
            Event::TaskFailed { id, error } => task_failed(shared, events, id, error),
            Event::TransportFailing { consecutive, error } => {
                log::error!(
                    "Transport failed {} times in a row, giving up: {}",
                    consecutive,
                    error
                );
                *shared.fatal.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Error::TransportFailure(error));
                shared.halt.trigger();
            }
            Event::Shutdown => break,
        }
    }
}

// Runs with the registry locked, so a restart can never race `stop`.
fn task_failed(shared: &Shared, events: &Sender<Event>, id: TaskId, error: Error) {
    let mut registry = shared.registry();
    if registry.shutting_down {
        return;
    }

    let Some(mut entry) = registry.tasks.remove(&id) else {
        return;
    };
    entry.task.join();

    if let Some(healthy_after) = shared.restart.healthy_after() {
        if entry.running_since.elapsed() >= healthy_after {
            entry.restarts = 0;
        }
    }

    let Some(delay) = shared.restart.backoff(entry.restarts) else {
        log::error!("{}; task {} removed", error, entry.task.id());
        return;
    };

    log::warn!(
        "{}; restarting in {:?} (attempt {})",
        error,
        delay,
        entry.restarts + 1
    );

    let task = (entry.factory)().and_then(|effect| {
        EffectTask::spawn(
            id,
            entry.task.name(),
            effect,
            Arc::clone(&shared.leds),
            events.clone(),
            delay,
        )
    });

    match task {
        Ok(task) => {
            entry.task = task;
            entry.restarts += 1;
            entry.running_since = Instant::now() + delay;
            registry.tasks.insert(id, entry);
        }
        Err(err) => log::error!("Cannot restart effect '{}': {}", entry.task.name(), err),
    }
}
