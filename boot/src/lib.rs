//! This is a dual image bootloader built for embedded rust.
//!
//! The device flash holds two image regions.  The golden region holds the
//! image that is run, and the backup region holds a candidate replacement.
//! On every reset the bootloader locates and validates the image in each
//! region, promotes the backup into golden when golden is missing, broken or
//! older, and starts golden.  When there is nothing to start, or the running
//! firmware asked for it, control goes to an update protocol instead, which
//! receives a new image into the backup region.
//!
//! A small update state record, in a sector of its own, bounds how many resets
//! in a row an update request forces update mode.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod api;
mod checksum;
mod engine;
mod flash;
mod image;
pub mod layout;
mod state;
mod update;

pub use checksum::{Crc32Engine, Crc32State, IMAGE_CRC};
pub use engine::{BootDecisionEngine, Decision, Platform, UpdateReason};
pub use flash::{FlashStore, ERASED, MAX_PAGE_SIZE};
pub use image::{
    FoundImage, ImageCatalog, ImageHeader, ImageType, DUAL_IMAGE_MARKER,
    DUAL_IMAGE_MARKER_OFFSET, HEADER_MARKER, HEADER_POINTER_OFFSET,
};
pub use storage::MappedFlash;
pub use layout::{BootConfig, FlashLayout, FlashRegion};
pub use state::{UpdateState, UpdateStateStore, STATE_MARKER};
pub use update::{
    RxConsumer, RxProducer, RxQueue, UpdateConfig, UpdateContext, UpdateProtocol,
    UpdateServices, RX_QUEUE_LEN,
};

#[cfg(feature = "log")]
pub(crate) use log_facade as log;

#[cfg(not(feature = "log"))]
pub(crate) mod log {
    // Evaluate the arguments by reference so that values only used for
    // logging don't become unused.
    macro_rules! info {
        ($fmt:expr $(, $x:expr )* $(,)?) => { { $( let _ = &$x; )* } };
    }
    pub(crate) use info;
    macro_rules! debug {
        ($fmt:expr $(, $x:expr )* $(,)?) => { { $( let _ = &$x; )* } };
    }
    pub(crate) use debug;
    macro_rules! warner {
        ($fmt:expr $(, $x:expr )* $(,)?) => { { $( let _ = &$x; )* } };
    }
    pub(crate) use warner as warn;
    macro_rules! error {
        ($fmt:expr $(, $x:expr )* $(,)?) => { { $( let _ = &$x; )* } };
    }
    pub(crate) use error;
}

pub type Result<T> = core::result::Result<T, Error>;

// Use the error kind to avoid this depending on the particular flash.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// An erase, write or copy was not aligned to the flash geometry.
    Alignment,
    /// The operation would reach past the write ceiling, the device, or the
    /// region it is restricted to.
    Bounds,
    /// The flash device failed the operation.
    Io(storage::Error),
    /// An image header describes something that cannot be installed.
    InvalidImage,
}

/// Convert the flash error into our error type.  Argument errors coming back
/// from the device mean our own checks let something through, and are kept
/// as the same kind of error.
impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        match e {
            storage::Error::NotAligned => Error::Alignment,
            storage::Error::OutOfBounds => Error::Bounds,
            e => Error::Io(e),
        }
    }
}
