//! LPC55S6x flash driver.
//!
//! Replacement flash driver from the one in the hal.  This attempts to do a few
//! basic things:
//!
//! - Implement the `storage` flash traits directly, in whole 512 byte pages.
//! - Implement a robust read that will return an error instead of busfaulting
//!   on unprogrammed data.
//!
//! To use this driver, you should release the FLASH PAC from the hal's driver.
//!
//!     let flash = hal.flash.release();
//!     let fl = flash::LpcFlash::new(flash);

use lpc55_hal as hal;
use hal::raw::FLASH;
use storage::{Error, Flash, MappedFlash, ReadFlash, Result};

const LPC_FLASH_BASE: usize = 0;
const LPC_FLASH_SIZE: usize = 630 * 1024;
const PAGE_SIZE: usize = 512;

// Controller commands.
const CMD_ERASE_RANGE: u32 = 4;
const CMD_MARGIN_CHECK: u32 = 6;
const CMD_WRITE: u32 = 8;
const CMD_PROGRAM: u32 = 10;

/// The whole internal flash.
pub struct LpcFlash {
    raw: FLASH,
}

impl LpcFlash {
    pub fn new(raw: FLASH) -> LpcFlash {
        LpcFlash { raw }
    }

    /// Run a command over the words `[start, stop]`, waiting for it to finish.
    fn command(&mut self, cmd: u32, start: usize, stop: usize) -> bool {
        let flash = &self.raw;
        flash.int_clr_status.write(|w| {
            w.done().set_bit().err().set_bit().fail().set_bit().ecc_err().set_bit()
        });

        flash.starta.write(|w| unsafe { w.bits((start >> 4) as u32) });
        flash.stopa.write(|w| unsafe { w.bits((stop >> 4) as u32) });
        flash.cmd.write(|w| unsafe { w.bits(cmd) });
        while flash.int_status.read().done().bit_is_clear() {}

        let status = flash.int_status.read();
        let good = status.fail().bit_is_clear() && status.err().bit_is_clear();

        flash.int_clr_status.write(|w| {
            w.done().set_bit().err().set_bit().fail().set_bit().ecc_err().set_bit()
        });
        good
    }

    /// The margin check fails on a page that hasn't been programmed since
    /// its last erase.  Reading such a page would take an ECC fault.
    fn is_programmed(&mut self, page: usize) -> bool {
        self.command(CMD_MARGIN_CHECK, page, page)
    }
}

impl ReadFlash for LpcFlash {
    // We allow arbitrary alignment of reads.
    fn read_size(&self) -> usize {
        1
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
        storage::check_read(self, offset, bytes.len())?;

        // Validate that the entire range has been written.
        let end = offset + bytes.len();
        let mut page = offset & !(PAGE_SIZE - 1);
        while page < end {
            if !self.is_programmed(page) {
                return Err(Error::NotWritten);
            }
            page += PAGE_SIZE;
        }

        let memory = unsafe {
            core::slice::from_raw_parts((LPC_FLASH_BASE + offset) as *const u8, bytes.len())
        };
        bytes.copy_from_slice(memory);
        Ok(())
    }

    fn capacity(&self) -> usize {
        LPC_FLASH_SIZE
    }
}

impl Flash for LpcFlash {
    fn write_size(&self) -> usize {
        PAGE_SIZE
    }

    fn erase_size(&self) -> usize {
        PAGE_SIZE
    }

    fn erase(&mut self, from: usize, to: usize) -> Result<()> {
        storage::check_erase(self, from, to)?;
        if from == to {
            return Ok(());
        }
        if self.command(CMD_ERASE_RANGE, from, to - 1) {
            Ok(())
        } else {
            Err(Error::Failed)
        }
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        storage::check_write(self, offset, bytes.len())?;
        for (i, page) in bytes.chunks(PAGE_SIZE).enumerate() {
            let page_addr = offset + i * PAGE_SIZE;
            // Fill the page register a flash word at a time, then program it.
            for (j, word) in page.chunks(16).enumerate() {
                let addr = page_addr + j * 16;
                for (k, data) in word.chunks(4).enumerate() {
                    let mut raw = [0u8; 4];
                    raw.copy_from_slice(data);
                    let value = u32::from_le_bytes(raw);
                    self.raw.dataw[k].write(|w| unsafe { w.bits(value) });
                }
                if !self.command(CMD_WRITE, addr, addr) {
                    return Err(Error::Failed);
                }
            }
            if !self.command(CMD_PROGRAM, page_addr, page_addr) {
                return Err(Error::Failed);
            }
        }
        Ok(())
    }
}

impl MappedFlash for LpcFlash {
    fn get_base(&self) -> usize {
        LPC_FLASH_BASE
    }
}
