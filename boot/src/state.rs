//! Update state
//!
//! A three word record in a sector reserved for the bootloader remembers
//! whether the running firmware asked for an update, and how many more resets
//! that request forces update mode for.  The record is rewritten whole every
//! time it changes: the sector is erased and the record programmed at its
//! start.
//!
//! A sector that doesn't hold the marker, including one that has never been
//! written, is treated as holding no request and is initialized.

use core::cell::RefCell;

use asraw::{AsMutRaw, AsRaw};
use storage::Flash;

use crate::{flash::FlashStore, layout::FlashRegion, log, Result};

/// Marks an initialized state record.
pub const STATE_MARKER: u32 = 0x0ffe_b6a7;

/// The record as stored.  The field order is fixed by firmware already in
/// the field.
#[derive(Debug, Default)]
#[repr(C)]
struct StateRecord {
    update_flag: u32,
    marker: u32,
    retry_count: u32,
}

impl AsRaw for StateRecord {}
unsafe impl AsMutRaw for StateRecord {}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct UpdateState {
    pub update_flag: bool,
    /// Resets left before the update request is abandoned.
    pub retry_count: u32,
}

impl UpdateState {
    /// Use up one reset of a pending request, dropping the request once none
    /// are left.  Returns true if the state changed and needs to be saved.
    pub fn count_down(&mut self) -> bool {
        if !self.update_flag {
            return false;
        }
        self.retry_count = self.retry_count.saturating_sub(1);
        if self.retry_count == 0 {
            self.update_flag = false;
        }
        true
    }
}

impl From<&StateRecord> for UpdateState {
    fn from(record: &StateRecord) -> Self {
        UpdateState {
            update_flag: record.update_flag != 0,
            retry_count: record.retry_count,
        }
    }
}

impl From<&UpdateState> for StateRecord {
    fn from(state: &UpdateState) -> Self {
        StateRecord {
            update_flag: state.update_flag as u32,
            marker: STATE_MARKER,
            retry_count: state.retry_count,
        }
    }
}

pub struct UpdateStateStore<'f, F> {
    flash: &'f RefCell<FlashStore<F>>,
    region: FlashRegion,
    max_retry: u32,
}

impl<'f, F: Flash> UpdateStateStore<'f, F> {
    /// Keep the state in `region`, which must be whole sectors.
    pub fn new(flash: &'f RefCell<FlashStore<F>>, region: FlashRegion, max_retry: u32) -> Self {
        UpdateStateStore {
            flash,
            region,
            max_retry,
        }
    }

    /// Read the saved state.  A missing or unreadable record is replaced with
    /// one holding no request.
    pub fn load(&self) -> Result<UpdateState> {
        let mut record = StateRecord::default();
        let read = self
            .flash
            .borrow_mut()
            .read(self.region.start, record.as_mut_raw());
        match read {
            Ok(()) if record.marker == STATE_MARKER => Ok(UpdateState::from(&record)),
            Ok(()) => {
                log::info!("state: bad marker {:#010x}, initializing", record.marker);
                self.reinit()
            }
            Err(e) => {
                log::info!("state: unreadable ({:?}), initializing", e);
                self.reinit()
            }
        }
    }

    fn reinit(&self) -> Result<UpdateState> {
        let state = UpdateState::default();
        self.save(&state)?;
        Ok(state)
    }

    pub fn save(&self, state: &UpdateState) -> Result<()> {
        let record = StateRecord::from(state);
        let mut flash = self.flash.borrow_mut();
        flash.erase(self.region.start, self.region.length)?;
        flash.write(self.region.start, record.as_raw())?;
        Ok(())
    }

    /// Force update mode for the next `max_retry - 1` resets.  Each boot
    /// spends a retry before looking at the flag, and the last one clears it.
    pub fn request_update(&self) -> Result<()> {
        self.save(&UpdateState {
            update_flag: true,
            retry_count: self.max_retry,
        })
    }

    /// Drop any request, once an update is done or given up on.
    pub fn clear(&self) -> Result<()> {
        self.save(&UpdateState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LPC55S36, MAX_RETRY};
    use simflash::{styles, SimFlash};

    fn lpc_flash() -> RefCell<FlashStore<SimFlash>> {
        let sim = styles::LPC55S36.build().unwrap();
        RefCell::new(FlashStore::new(sim, LPC55S36.write_ceiling).unwrap())
    }

    #[test]
    fn blank_sector_is_initialized() {
        let flash = lpc_flash();
        let store = UpdateStateStore::new(&flash, LPC55S36.state, MAX_RETRY);
        assert_eq!(store.load(), Ok(UpdateState::default()));

        // The record is now in flash.
        let start = LPC55S36.state.start;
        let sim = flash.borrow();
        let contents = sim.inner().contents();
        assert_eq!(&contents[start..start + 12], StateRecord::from(&UpdateState::default()).as_raw());
        assert_eq!(&contents[start + 4..start + 8], &STATE_MARKER.to_ne_bytes());
        // And the rest of the page is left erased.
        assert!(contents[start + 12..start + 512].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn counting_down() {
        let mut state = UpdateState { update_flag: true, retry_count: 2 };
        assert!(state.count_down());
        assert_eq!(state, UpdateState { update_flag: true, retry_count: 1 });
        assert!(state.count_down());
        assert_eq!(state, UpdateState { update_flag: false, retry_count: 0 });
        assert!(!state.count_down());

        // A flag with no retries left goes away without wrapping.
        let mut state = UpdateState { update_flag: true, retry_count: 0 };
        assert!(state.count_down());
        assert_eq!(state, UpdateState::default());
    }

    #[test]
    fn foreign_flag_values() {
        let flash = lpc_flash();
        let record = StateRecord { update_flag: 7, marker: STATE_MARKER, retry_count: 2 };
        flash
            .borrow_mut()
            .inner_mut()
            .install(record.as_raw(), LPC55S36.state.start)
            .unwrap();
        let store = UpdateStateStore::new(&flash, LPC55S36.state, MAX_RETRY);
        assert_eq!(store.load(), Ok(UpdateState { update_flag: true, retry_count: 2 }));
    }
}
