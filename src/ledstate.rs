use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::color::LedColor;
use crate::error::{Error, Result};

/// The virtual strip: one colour per LED, written by effects and sampled by
/// the snapshotter.
///
/// Every access holds the lock only for a single cell or a single copy of the
/// whole array, so a reader never sees half of a `set`. Nothing in here
/// performs I/O.
pub struct LedState {
    leds: Mutex<Vec<LedColor>>,
    len: usize,
}

impl LedState {
    pub fn new(len: usize) -> Result<LedState> {
        if len == 0 {
            return Err(Error::Config("strip length must be at least 1".to_string()));
        }

        Ok(LedState {
            leds: Mutex::new(vec![LedColor::OFF; len]),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn set(&self, index: usize, color: LedColor) -> Result<()> {
        self.update(index, |_| color)
    }

    /// Read-modify-write of a single LED under the lock. Lets one effect drive
    /// the brightness of an LED while another one drives its colour.
    pub fn update<F>(&self, index: usize, f: F) -> Result<()>
    where
        F: FnOnce(LedColor) -> LedColor,
    {
        self.check_index(index)?;

        let mut leds = self.lock();
        leds[index] = f(leds[index]);
        Ok(())
    }

    #[cfg(test)]
    pub fn get(&self, index: usize) -> Result<LedColor> {
        self.check_index(index)?;
        Ok(self.lock()[index])
    }

    pub fn fill(&self, color: LedColor) {
        self.lock().fill(color);
    }

    pub fn get_all(&self) -> Snapshot {
        let leds = self.lock();
        Snapshot {
            leds: leds.as_slice().into(),
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(())
    }

    // A task that panicked while holding the lock cannot have left a cell
    // half written, since cells are replaced whole.
    fn lock(&self) -> MutexGuard<'_, Vec<LedColor>> {
        self.leds.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time copy of the whole strip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    leds: Box<[LedColor]>,
}

impl Snapshot {
    #[cfg(test)]
    pub fn blank(len: usize) -> Snapshot {
        Snapshot {
            leds: vec![LedColor::OFF; len].into_boxed_slice(),
        }
    }
}

impl Deref for Snapshot {
    type Target = [LedColor];

    fn deref(&self) -> &Self::Target {
        &self.leds
    }
}
