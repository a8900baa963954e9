//! Bootloader services for the running firmware
//!
//! The bootloader leaves a table of entry points at a fixed flash address.
//! Firmware calls through it to ask for an update, or to hand control back
//! to the bootloader without a reset.  The table layout and the calling
//! convention are shared with images built separately from the bootloader,
//! so neither can change.

/// Flash address of the service table.
pub const SBL_API_ADDRESS: usize = 0x400;

/// Value left in the re-invoke flag when firmware calls `reinvoke`.  The flag
/// lives in RAM the startup code doesn't clear, so anything else found there
/// after a reset is left over garbage.
pub const REINVOKE_MAGIC: u32 = 0x5265_496e;

#[repr(C)]
pub struct SblApi {
    /// Re-enter the bootloader in update mode.  Does not return.
    pub reinvoke: extern "C" fn(),
    /// Force update mode for the next few resets.
    pub set_update_flag: extern "C" fn(),
    /// Does nothing.  Lets firmware check the table is there.
    pub test: extern "C" fn(),
}

impl SblApi {
    /// The table of the bootloader installed at `address`.
    ///
    /// # Safety
    ///
    /// There has to be a bootloader at `address` that exports a table.
    pub unsafe fn from_address(address: usize) -> &'static SblApi {
        &*(address as *const SblApi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn table_layout() {
        let word = size_of::<usize>();
        assert_eq!(size_of::<SblApi>(), 3 * word);
        assert_eq!(offset_of!(SblApi, reinvoke), 0);
        assert_eq!(offset_of!(SblApi, set_update_flag), word);
        assert_eq!(offset_of!(SblApi, test), 2 * word);
    }

    static CALLS: AtomicU32 = AtomicU32::new(0);

    extern "C" fn count() {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    static TABLE: SblApi = SblApi {
        reinvoke: count,
        set_update_flag: count,
        test: count,
    };

    #[test]
    fn call_through_address() {
        let api = unsafe { SblApi::from_address(&TABLE as *const SblApi as usize) };
        (api.test)();
        (api.set_update_flag)();
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
    }
}
