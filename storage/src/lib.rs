//! Storage types.
//!
//! These are the primitives a platform flash driver provides to the
//! bootloader.  They mirror the NOR flash traits from embedded-storage, but
//! use `usize` offsets and a single error type so that the bootloader does
//! not need to be generic over the driver's error.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[cfg(feature = "nor-flash")]
pub mod nor;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    NotAligned,
    OutOfBounds,
    /// Read of a location that has not been programmed since its last erase.
    /// Some devices (the LPC55 family) fault on these reads instead of
    /// returning the erased value.
    NotWritten,
    /// Program of a location that has not been erased.
    NotErased,
    /// The device reported a failure of the operation.
    Failed,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Read only interface into flash.
pub trait ReadFlash {
    /// What is the read size (alignment and size multiple).
    fn read_size(&self) -> usize;
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()>;
    fn capacity(&self) -> usize;
}

/// Flash that can be written to.
pub trait Flash: ReadFlash {
    /// Write size (alignment and size multiple).
    fn write_size(&self) -> usize;
    /// Erase size (alignment and size multiple).
    fn erase_size(&self) -> usize;

    fn erase(&mut self, from: usize, to: usize) -> Result<()>;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;
}

/// Some kinds of flash can be mapped into memory.  This is needed for XIP
/// devices, where an image runs from the address its flash appears at.  A
/// device that is not load/store addressable cannot implement this, and so
/// cannot be booted from.
pub trait MappedFlash {
    /// Return the address at which offset zero of this flash is mapped.
    fn get_base(&self) -> usize;
}

// Utilities taken from embedded-storage for validating arguments.
pub fn check_read<T: ReadFlash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash, flash.read_size(), offset, length)
}

pub fn check_erase<T: Flash>(
    flash: &T,
    from: usize,
    to: usize,
) -> Result<()> {
    if from > to || to > flash.capacity() {
        return Err(Error::OutOfBounds);
    }
    if from % flash.erase_size() != 0 || to % flash.erase_size() != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

pub fn check_write<T: Flash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash, flash.write_size(), offset, length)
}

pub fn check_slice<T: ReadFlash>(
    flash: &T,
    align: usize,
    offset: usize,
    length: usize,
) -> Result<()> {
    if length > flash.capacity() || offset > flash.capacity() - length {
        return Err(Error::OutOfBounds);
    }
    if offset % align != 0 || length % align != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Just enough of a device to drive the argument checks.
    struct Geometry;

    impl ReadFlash for Geometry {
        fn read_size(&self) -> usize {
            1
        }
        fn read(&mut self, _offset: usize, _bytes: &mut [u8]) -> Result<()> {
            Ok(())
        }
        fn capacity(&self) -> usize {
            4096
        }
    }

    impl Flash for Geometry {
        fn write_size(&self) -> usize {
            512
        }
        fn erase_size(&self) -> usize {
            1024
        }
        fn erase(&mut self, _from: usize, _to: usize) -> Result<()> {
            Ok(())
        }
        fn write(&mut self, _offset: usize, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn erase_checks() {
        assert_eq!(check_erase(&Geometry, 0, 4096), Ok(()));
        assert_eq!(check_erase(&Geometry, 1024, 1024), Ok(()));
        assert_eq!(check_erase(&Geometry, 512, 1024), Err(Error::NotAligned));
        assert_eq!(check_erase(&Geometry, 2048, 1024), Err(Error::OutOfBounds));
        assert_eq!(check_erase(&Geometry, 0, 5120), Err(Error::OutOfBounds));
    }

    #[test]
    fn write_checks() {
        assert_eq!(check_write(&Geometry, 512, 512), Ok(()));
        assert_eq!(check_write(&Geometry, 256, 512), Err(Error::NotAligned));
        assert_eq!(check_write(&Geometry, 0, 100), Err(Error::NotAligned));
        assert_eq!(check_write(&Geometry, 3584, 1024), Err(Error::OutOfBounds));
    }

    #[test]
    fn read_any_alignment() {
        assert_eq!(check_read(&Geometry, 3, 7), Ok(()));
        assert_eq!(check_read(&Geometry, 4095, 1), Ok(()));
        assert_eq!(check_read(&Geometry, 4095, 2), Err(Error::OutOfBounds));
        assert_eq!(check_read(&Geometry, usize::MAX, 2), Err(Error::OutOfBounds));
    }
}
