// Shared test support: simulated devices and a platform that records what
// the engine asked of it.

#![allow(dead_code)]

use std::cell::RefCell;
use std::ops::Range;

use dualboot::{layout::FlashLayout, FlashStore, Platform};
use simflash::{gen::GeneratedImage, styles::AreaLayout, SimFlash};
use storage::Flash;

pub type Device = RefCell<FlashStore<SimFlash>>;

/// A fresh device of the given style, where nothing has been programmed.
pub fn device(style: &AreaLayout, layout: &FlashLayout) -> Device {
    let sim = style.build().unwrap();
    layout.check(sim.erase_size()).unwrap();
    RefCell::new(FlashStore::new(sim, layout.write_ceiling).unwrap())
}

/// Place an image in flash, as a programmer would.
pub fn install(flash: &Device, image: &GeneratedImage, offset: usize) {
    flash
        .borrow_mut()
        .inner_mut()
        .install(&image.data, offset)
        .unwrap();
}

pub fn contents(flash: &Device, range: Range<usize>) -> Vec<u8> {
    flash.borrow().inner().contents()[range].to_vec()
}

pub fn writes_within(flash: &Device, range: Range<usize>) -> usize {
    flash.borrow().inner().writes_within(range)
}

pub fn erases_within(flash: &Device, range: Range<usize>) -> usize {
    flash.borrow().inner().erases_within(range)
}

/// A platform whose inputs are fixed.  Leaving the bootloader panics with a
/// message naming where control went, so tests can catch it.
#[derive(Default)]
pub struct MockPlatform {
    pub strap: bool,
    pub reinvoke: bool,
    pub sent: Vec<u8>,
}

impl MockPlatform {
    pub fn strapped() -> Self {
        MockPlatform {
            strap: true,
            ..MockPlatform::default()
        }
    }

    pub fn reinvoked() -> Self {
        MockPlatform {
            reinvoke: true,
            ..MockPlatform::default()
        }
    }
}

impl Platform for MockPlatform {
    fn read_strap_pin(&mut self) -> bool {
        self.strap
    }

    // Like the board flag, reading clears it.
    fn re_invoke_requested(&mut self) -> bool {
        core::mem::take(&mut self.reinvoke)
    }

    fn send(&mut self, bytes: &[u8]) {
        self.sent.extend_from_slice(bytes);
    }

    fn reset(&mut self) -> ! {
        panic!("reset");
    }

    fn transfer_control(&mut self, address: usize) -> ! {
        panic!("transfer control to {:#x}", address);
    }
}
