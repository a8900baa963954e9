//! Boot decisions
//!
//! On every reset the engine picks one of two ways out of the bootloader:
//! start the image in the golden region, or enter update mode.  Update mode
//! is forced by the strap pin, by the running firmware handing control back,
//! or by a pending update request.  Otherwise the first valid image in each
//! region is looked for, and the backup image is promoted into golden when
//! golden has no valid image or an older one.  Golden wins ties.

use core::cell::RefCell;

use storage::{Flash, MappedFlash};

use crate::{
    checksum::Crc32Engine,
    flash::FlashStore,
    image::{FoundImage, ImageCatalog},
    layout::{BootConfig, FlashRegion},
    log,
    state::{UpdateState, UpdateStateStore},
    update::{RxConsumer, UpdateConfig, UpdateContext, UpdateProtocol},
    Error, Result,
};

/// What the bootloader needs from the board.
pub trait Platform {
    /// True when the strap asks for update mode.  Boards with an active low
    /// pin invert it here.
    fn read_strap_pin(&mut self) -> bool;

    /// True when the running firmware re-entered the bootloader.
    fn re_invoke_requested(&mut self) -> bool;

    /// Send bytes to the update host.
    fn send(&mut self, bytes: &[u8]);

    fn reset(&mut self) -> !;

    /// Start the image whose vector table is at `address`.
    fn transfer_control(&mut self, address: usize) -> !;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Decision {
    /// Start the golden image, at its execution address.  `promoted` is set
    /// when the backup image was copied there first.
    BootApp { address: usize, promoted: bool },
    EnterUpdateMode(UpdateReason),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum UpdateReason {
    StrapPin,
    ReInvoke,
    UpdatePending,
    NoValidImage,
    /// Copying the backup into golden failed part way, or the copy did not
    /// check.  Golden can't be trusted.
    PromotionFailed,
}

pub struct BootDecisionEngine<'f, F> {
    flash: &'f RefCell<FlashStore<F>>,
    config: BootConfig,
    catalog: ImageCatalog<'f, F>,
    state: UpdateStateStore<'f, F>,
    update: UpdateConfig,
}

impl<'f, F: Flash + MappedFlash> BootDecisionEngine<'f, F> {
    pub fn new(flash: &'f RefCell<FlashStore<F>>, config: BootConfig) -> Self {
        BootDecisionEngine {
            flash,
            config,
            catalog: ImageCatalog::new(flash).with_scan_len(config.scan_len),
            state: UpdateStateStore::new(flash, config.layout.state, config.max_retry),
            update: UpdateConfig::LPC55S36,
        }
    }

    pub fn with_crc(mut self, crc: Crc32Engine) -> Self {
        self.catalog = self.catalog.with_crc(crc);
        self
    }

    pub fn with_update_config(mut self, update: UpdateConfig) -> Self {
        self.update = update;
        self
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ImageCatalog<'f, F> {
        &self.catalog
    }

    pub fn state(&self) -> &UpdateStateStore<'f, F> {
        &self.state
    }

    /// Load the update state, spending one retry of a pending request.
    pub fn prepare(&self) -> UpdateState {
        let mut state = match self.state.load() {
            Ok(state) => state,
            Err(e) => {
                log::error!("state: unable to initialize: {:?}", e);
                UpdateState::default()
            }
        };
        if state.count_down() {
            log::info!("update pending, {} retries left", state.retry_count);
            if let Err(e) = self.state.save(&state) {
                log::error!("state: unable to save: {:?}", e);
            }
        }
        state
    }

    /// Decide how to leave the bootloader.  This updates the saved state and
    /// may promote the backup image, but does not transfer control.
    pub fn decide<P: Platform>(&self, platform: &mut P) -> Decision {
        let state = self.prepare();

        // Both are read every time, so a re-invoke flag is used up even
        // when the strap wins.
        let strap = platform.read_strap_pin();
        let re_invoke = platform.re_invoke_requested();
        let reason = if strap {
            Some(UpdateReason::StrapPin)
        } else if re_invoke {
            Some(UpdateReason::ReInvoke)
        } else if state.update_flag {
            Some(UpdateReason::UpdatePending)
        } else {
            None
        };
        match reason {
            Some(reason) => Decision::EnterUpdateMode(reason),
            None => self.select_image(),
        }
    }

    fn select_image(&self) -> Decision {
        let layout = &self.config.layout;
        // Backup images are linked to run from golden.
        let load = layout.golden.start;

        log::info!("scan golden region...");
        let golden = self.first_image(layout.golden, load);
        log::info!("scan backup region...");
        let backup = self.first_image(layout.backup, load);

        let promote = match (&golden, &backup) {
            (None, None) => {
                log::warn!("no valid image");
                return Decision::EnterUpdateMode(UpdateReason::NoValidImage);
            }
            (None, Some(backup)) => {
                log::info!("golden image bad, backup ok");
                Some(backup)
            }
            (Some(_), None) => {
                log::info!("golden image ok, no backup image");
                None
            }
            (Some(golden), Some(backup)) if golden.header.version < backup.header.version => {
                log::info!("backup version {} newer than golden {}",
                           backup.header.version, golden.header.version);
                Some(backup)
            }
            (Some(golden), Some(_)) => {
                log::info!("golden version {} is current", golden.header.version);
                None
            }
        };

        if let Some(backup) = promote {
            if let Err(e) = self.promote(backup) {
                log::error!("promotion failed: {:?}", e);
                return Decision::EnterUpdateMode(UpdateReason::PromotionFailed);
            }
        }
        let address = self.flash.borrow().mapped_address(layout.golden.start);
        Decision::BootApp {
            address,
            promoted: promote.is_some(),
        }
    }

    fn first_image(&self, region: FlashRegion, load: usize) -> Option<FoundImage> {
        match self.catalog.scan::<1>(region, load, 1) {
            Ok(found) => {
                let image = found.first().copied()?;
                log::info!("image found: {:#010x}", image.base);
                image.header.dump();
                Some(image)
            }
            Err(e) => {
                log::warn!("scan of {:#x} failed: {:?}", region.start, e);
                None
            }
        }
    }

    /// Copy the backup image over golden, then check the copy.
    fn promote(&self, backup: &FoundImage) -> Result<()> {
        let layout = &self.config.layout;
        let len = backup.header.copy_len(layout.backup.end() - backup.base);
        if len > layout.golden.length || !layout.backup.contains_range(backup.base, len) {
            return Err(Error::InvalidImage);
        }

        log::info!("copy {:#x} bytes from {:#x} to {:#x}", len, backup.base, layout.golden.start);
        self.flash.borrow_mut().copy(layout.golden.start, backup.base, len)?;

        if !self.catalog.validate(layout.golden.start, layout.golden.start) {
            return Err(Error::InvalidImage);
        }
        Ok(())
    }

    /// Boot, or serve updates forever.  `rx` is the consumer end of the queue
    /// the receive interrupt fills.
    pub fn run<P: Platform, U: UpdateProtocol>(
        &self,
        platform: &mut P,
        protocol: &mut U,
        rx: RxConsumer<'_>,
    ) -> ! {
        match self.decide(platform) {
            Decision::BootApp { address, .. } => {
                log::info!("boot @ {:#010x}", address);
                platform.transfer_control(address)
            }
            Decision::EnterUpdateMode(reason) => {
                log::info!("enter update mode: {:?}", reason);
                let mut services = UpdateContext::new(
                    platform,
                    self.flash,
                    &self.state,
                    rx,
                    self.config.layout.backup,
                    self.update,
                );
                loop {
                    protocol.poll(&mut services);
                }
            }
        }
    }
}
