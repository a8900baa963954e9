//! Simulated flash
//!
//! The NOR-type flashes used in microcontrollers differ quite a bit in terms
//! of capabilities provided.  This simulator attempts to capture the parts of
//! that diversity the bootloader cares about:
//!
//! - Erase size and write size.  The erase size must be a multiple of the
//!   write size (they can be the same).  Programming a write unit that has not
//!   been erased is an error, just as it is on the real parts.
//! - Read behavior of erased flash.  Most devices return 0xff.  The LPC55
//!   family instead raises an ECC fault when reading a page that has not been
//!   programmed since it was erased.  A simulated device configured with
//!   `strict_reads` reports these reads as `NotWritten`.
//! - Failure.  A budget of successful erase/write operations can be set, after
//!   which every erase or write fails, which is how tests model a power loss
//!   or a worn out part in the middle of an update.
//!
//! Every erase and write is logged so that tests can make assertions about
//! which parts of the device were touched.
//!
//! The device is usable through the `storage` traits directly, and through the
//! embedded-storage NOR traits via [`NorSim`], whose sizes are const generics
//! like the HAL drivers that implement those traits.

pub mod gen;
pub mod styles;

use std::ops::Range;

use embedded_storage::nor_flash::{
    self, ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use storage::{Flash, MappedFlash, ReadFlash};

/// The richer error type used in the simulator.
#[derive(Debug, Clone, Copy)]
pub enum SimError {
    Inner(NorFlashErrorKind),
    Storage(storage::Error),
    /// The requested geometry isn't one a device could have.
    Geometry,
}

impl From<NorFlashErrorKind> for SimError {
    fn from(inner: NorFlashErrorKind) -> Self {
        SimError::Inner(inner)
    }
}

impl From<storage::Error> for SimError {
    fn from(inner: storage::Error) -> Self {
        SimError::Storage(inner)
    }
}

impl NorFlashError for SimError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            SimError::Inner(inner) => *inner,
            SimError::Storage(storage::Error::NotAligned) => NorFlashErrorKind::NotAligned,
            SimError::Storage(storage::Error::OutOfBounds) => NorFlashErrorKind::OutOfBounds,
            SimError::Storage(_) | SimError::Geometry => NorFlashErrorKind::Other,
        }
    }
}

pub type Result<T> = core::result::Result<T, SimError>;

/// A modifying operation performed on the device.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashOp {
    Erase { from: usize, to: usize },
    Write { offset: usize, len: usize },
}

pub struct SimFlash {
    data: Vec<u8>,
    /// One entry per write unit, set once that unit has been programmed.
    written: Vec<bool>,
    read_size: usize,
    write_size: usize,
    erase_size: usize,
    strict_reads: bool,
    base: usize,
    ops: Vec<FlashOp>,
    reads: usize,
    /// Remaining erase/write operations before the device starts failing.
    budget: Option<usize>,
}

impl SimFlash {
    pub fn new(
        read_size: usize,
        write_size: usize,
        erase_size: usize,
        sectors: usize,
    ) -> Result<SimFlash> {
        let sizes = [read_size, write_size, erase_size];
        if sectors == 0 || sizes.iter().any(|s| !s.is_power_of_two()) {
            return Err(SimError::Geometry);
        }
        if write_size % read_size != 0 || erase_size % write_size != 0 {
            return Err(SimError::Geometry);
        }

        let capacity = erase_size * sectors;
        Ok(SimFlash {
            data: vec![0xff; capacity],
            written: vec![false; capacity / write_size],
            read_size,
            write_size,
            erase_size,
            strict_reads: false,
            base: 0,
            ops: Vec::new(),
            reads: 0,
            budget: None,
        })
    }

    /// Fault on reads of erased write units, like the LPC55 does.
    pub fn with_strict_reads(mut self, strict: bool) -> Self {
        self.strict_reads = strict;
        self
    }

    /// Set the address at which the device appears in the memory map.
    pub fn with_base(mut self, base: usize) -> Self {
        self.base = base;
        self
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// Place data into the flash, as a programmer would, without the
    /// erase/write discipline and without being logged.  Every write unit
    /// touched counts as programmed afterwards.
    pub fn install(&mut self, bytes: &[u8], offset: usize) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(SimError::Storage(storage::Error::OutOfBounds))?;
        self.data[offset..end].copy_from_slice(bytes);
        for unit in self.units(offset, bytes.len()) {
            self.written[unit] = true;
        }
        Ok(())
    }

    /// The raw contents of the device.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn ops(&self) -> &[FlashOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Number of read calls made against the device.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Count the logged writes starting within `range`.
    pub fn writes_within(&self, range: Range<usize>) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, FlashOp::Write { offset, .. } if range.contains(offset)))
            .count()
    }

    /// Count the logged erases starting within `range`.
    pub fn erases_within(&self, range: Range<usize>) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, FlashOp::Erase { from, .. } if range.contains(from)))
            .count()
    }

    /// Allow `ops` more erases or writes to succeed, after which all of them
    /// fail.
    pub fn fail_after(&mut self, ops: usize) {
        self.budget = Some(ops);
    }

    /// Stop injecting failures.
    pub fn heal(&mut self) {
        self.budget = None;
    }

    /// Is every write unit covering this range programmed?
    pub fn is_programmed(&self, offset: usize, len: usize) -> bool {
        self.units(offset, len).all(|unit| self.written[unit])
    }

    fn spend(&mut self) -> storage::Result<()> {
        match self.budget {
            Some(0) => Err(storage::Error::Failed),
            Some(ref mut n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Indices of the write units touched by a range.
    fn units(&self, offset: usize, len: usize) -> Range<usize> {
        if len == 0 {
            return 0..0;
        }
        offset / self.write_size..(offset + len).div_ceil(self.write_size)
    }
}

impl ReadFlash for SimFlash {
    fn read_size(&self) -> usize {
        self.read_size
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        storage::check_read(&*self, offset, bytes.len())?;
        self.reads += 1;
        if self.strict_reads && !self.is_programmed(offset, bytes.len()) {
            return Err(storage::Error::NotWritten);
        }
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Flash for SimFlash {
    fn write_size(&self) -> usize {
        self.write_size
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn erase(&mut self, from: usize, to: usize) -> storage::Result<()> {
        storage::check_erase(&*self, from, to)?;
        self.spend()?;
        self.data[from..to].fill(0xff);
        for unit in self.units(from, to - from) {
            self.written[unit] = false;
        }
        self.ops.push(FlashOp::Erase { from, to });
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        storage::check_write(&*self, offset, bytes.len())?;
        if self.units(offset, bytes.len()).any(|unit| self.written[unit]) {
            return Err(storage::Error::NotErased);
        }
        self.spend()?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        for unit in self.units(offset, bytes.len()) {
            self.written[unit] = true;
        }
        self.ops.push(FlashOp::Write { offset, len: bytes.len() });
        Ok(())
    }
}

impl MappedFlash for SimFlash {
    fn get_base(&self) -> usize {
        self.base
    }
}

/// A simulated device seen through the embedded-storage NOR traits.
pub struct NorSim<const WRITE_SIZE: usize, const ERASE_SIZE: usize> {
    sim: SimFlash,
}

impl<const WRITE_SIZE: usize, const ERASE_SIZE: usize> NorSim<WRITE_SIZE, ERASE_SIZE> {
    /// Wrap a device whose geometry matches the const parameters.
    pub fn new(sim: SimFlash) -> Result<Self> {
        if sim.read_size != 1 || sim.write_size != WRITE_SIZE || sim.erase_size != ERASE_SIZE {
            return Err(SimError::Geometry);
        }
        Ok(NorSim { sim })
    }

    pub fn sim(&self) -> &SimFlash {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut SimFlash {
        &mut self.sim
    }
}

impl<const WRITE_SIZE: usize, const ERASE_SIZE: usize> ErrorType for NorSim<WRITE_SIZE, ERASE_SIZE> {
    type Error = SimError;
}

impl<const WRITE_SIZE: usize, const ERASE_SIZE: usize> ReadNorFlash for NorSim<WRITE_SIZE, ERASE_SIZE> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<()> {
        nor_flash::check_read(self, offset, bytes.len())?;
        ReadFlash::read(&mut self.sim, offset as usize, bytes)?;
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.sim.data.len()
    }
}

impl<const WRITE_SIZE: usize, const ERASE_SIZE: usize> NorFlash for NorSim<WRITE_SIZE, ERASE_SIZE> {
    const WRITE_SIZE: usize = WRITE_SIZE;
    const ERASE_SIZE: usize = ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<()> {
        nor_flash::check_erase(self, from, to)?;
        Flash::erase(&mut self.sim, from as usize, to as usize)?;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        nor_flash::check_write(self, offset, bytes.len())?;
        Flash::write(&mut self.sim, offset as usize, bytes)?;
        Ok(())
    }
}
