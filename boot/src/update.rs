//! Update mode
//!
//! When there is no image to start, or one was asked for, the bootloader
//! hands the device to an update protocol.  The protocol is polled forever.
//! Everything it may do is reached through [`UpdateServices`]: sending bytes
//! back to the host, taking bytes the receive interrupt has queued, access to
//! the backup region, and leaving update mode by reset or by a jump.
//!
//! The receive interrupt and the poll loop share nothing but a
//! single-producer single-consumer queue of bytes.  The interrupt handler owns
//! the producer end, the protocol drains the consumer end.

use core::cell::RefCell;

use heapless::spsc::{Consumer, Producer, Queue};
use storage::Flash;

use crate::{
    engine::Platform, flash::FlashStore, layout::FlashRegion, log, state::UpdateStateStore,
    Error, Result,
};

/// Size of the receive queue.  It holds one byte less than this.
pub const RX_QUEUE_LEN: usize = 256;

pub type RxQueue = Queue<u8, RX_QUEUE_LEN>;
pub type RxProducer<'q> = Producer<'q, u8, RX_QUEUE_LEN>;
pub type RxConsumer<'q> = Consumer<'q, u8, RX_QUEUE_LEN>;

/// What the update protocol reports to the host about the device.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct UpdateConfig {
    pub ram_start: usize,
    pub ram_size: usize,
    pub device_id: u32,
    pub uuid: u32,
}

impl UpdateConfig {
    pub const LPC55S36: UpdateConfig = UpdateConfig {
        ram_start: 0x2000_0000,
        ram_size: 128 * 1024,
        device_id: 0x1234_5678,
        uuid: 0x8765_4321,
    };
}

/// The operations an update protocol is given.  Flash addresses are offsets
/// into the device, and must fall within `region()`.
pub trait UpdateServices {
    fn send(&mut self, bytes: &[u8]);

    /// Reset the device.  Used once an image has been received.
    fn reset(&mut self) -> !;

    /// Start the image at `address`, without a reset.
    fn jump(&mut self, address: usize) -> !;

    /// The update finished, so a pending update request is dropped.
    fn complete(&mut self) -> Result<()>;

    /// Next received byte, if there is one.
    fn recv(&mut self) -> Option<u8>;

    fn erase(&mut self, addr: usize, len: usize) -> Result<()>;
    fn write(&mut self, addr: usize, bytes: &[u8]) -> Result<()>;
    fn read(&mut self, addr: usize, buf: &mut [u8]) -> Result<()>;

    /// The flash the protocol may touch.
    fn region(&self) -> FlashRegion;
    fn config(&self) -> &UpdateConfig;
}

/// An update protocol, such as a serial flashing protocol.
pub trait UpdateProtocol {
    /// Do whatever work there is, without blocking.  Called in a loop.
    fn poll<S: UpdateServices>(&mut self, services: &mut S);
}

/// The services, as provided by the bootloader.
pub struct UpdateContext<'a, 'f, 'q, P, F> {
    platform: &'a mut P,
    flash: &'f RefCell<FlashStore<F>>,
    state: &'a UpdateStateStore<'f, F>,
    rx: RxConsumer<'q>,
    region: FlashRegion,
    config: UpdateConfig,
}

impl<'a, 'f, 'q, P: Platform, F: Flash> UpdateContext<'a, 'f, 'q, P, F> {
    pub fn new(
        platform: &'a mut P,
        flash: &'f RefCell<FlashStore<F>>,
        state: &'a UpdateStateStore<'f, F>,
        rx: RxConsumer<'q>,
        region: FlashRegion,
        config: UpdateConfig,
    ) -> Self {
        UpdateContext {
            platform,
            flash,
            state,
            rx,
            region,
            config,
        }
    }

    fn check_region(&self, addr: usize, len: usize) -> Result<()> {
        if self.region.contains_range(addr, len) {
            Ok(())
        } else {
            log::warn!("update: {:#x}+{:#x} outside of the backup region", addr, len);
            Err(Error::Bounds)
        }
    }
}

impl<'a, 'f, 'q, P: Platform, F: Flash> UpdateServices for UpdateContext<'a, 'f, 'q, P, F> {
    fn send(&mut self, bytes: &[u8]) {
        self.platform.send(bytes);
    }

    fn reset(&mut self) -> ! {
        self.platform.reset()
    }

    fn jump(&mut self, address: usize) -> ! {
        log::info!("update: boot @ {:#010x}", address);
        self.platform.transfer_control(address)
    }

    fn complete(&mut self) -> Result<()> {
        self.state.clear()
    }

    fn recv(&mut self) -> Option<u8> {
        self.rx.dequeue()
    }

    fn erase(&mut self, addr: usize, len: usize) -> Result<()> {
        self.check_region(addr, len)?;
        self.flash.borrow_mut().erase(addr, len)
    }

    fn write(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        // The padded page counts.
        let page_size = self.flash.borrow().page_size();
        let span = bytes.len().div_ceil(page_size) * page_size;
        self.check_region(addr, span)?;
        self.flash.borrow_mut().write(addr, bytes)
    }

    fn read(&mut self, addr: usize, buf: &mut [u8]) -> Result<()> {
        self.check_region(addr, buf.len())?;
        self.flash.borrow_mut().read(addr, buf)
    }

    fn region(&self) -> FlashRegion {
        self.region
    }

    fn config(&self) -> &UpdateConfig {
        &self.config
    }
}
