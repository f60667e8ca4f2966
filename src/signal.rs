use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// One-shot flag that threads can sleep on. Every wait returns as soon as the
/// signal is triggered, which keeps shutdown prompt.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> StopSignal {
        StopSignal::default()
    }

    pub fn trigger(&self) {
        let (flag, condvar) = &*self.inner;
        *lock(flag) = true;
        condvar.notify_all();
    }

    /// Sleeps until `deadline`. Returns `true` if the signal fired first.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let (flag, condvar) = &*self.inner;
        let mut triggered = lock(flag);

        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            triggered = condvar
                .wait_timeout(triggered, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        true
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }

    pub fn wait(&self) {
        let (flag, condvar) = &*self.inner;
        let mut triggered = lock(flag);
        while !*triggered {
            triggered = condvar
                .wait(triggered)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

fn lock(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(PoisonError::into_inner)
}
