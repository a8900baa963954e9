// Boot decision testing.

mod common;

use common::{contents, device, erases_within, install, writes_within, MockPlatform};
use dualboot::{
    layout::{BootConfig, FlashLayout, FlashRegion, LPC55S36},
    BootDecisionEngine, Decision, UpdateReason, UpdateState,
};
use simflash::{
    gen::{GenBuilder, GeneratedImage},
    styles,
};

const GOLDEN: usize = 0x10000;
const BACKUP: usize = 0x20000;

fn image(seed: u64, version: u32) -> GeneratedImage {
    GenBuilder::default().seed(seed).version(version).build().unwrap()
}

fn booted(promoted: bool) -> Decision {
    Decision::BootApp {
        address: GOLDEN,
        promoted,
    }
}

fn golden_range() -> std::ops::Range<usize> {
    GOLDEN..GOLDEN + LPC55S36.golden.length
}

#[test]
fn golden_only_boots_golden() {
    let flash = device(&styles::LPC55S36, &LPC55S36);
    let golden = GenBuilder::default().img_type(1).build().unwrap();
    install(&flash, &golden, GOLDEN);

    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
    assert_eq!(engine.decide(&mut MockPlatform::default()), booted(false));
    assert_eq!(writes_within(&flash, golden_range()), 0);
    assert_eq!(erases_within(&flash, golden_range()), 0);
}

#[test]
fn bad_golden_is_replaced() {
    let flash = device(&styles::LPC55S36, &LPC55S36);
    let mut golden = image(1, 1);
    golden.corrupt(0x1000);
    let backup = image(2, 2);
    install(&flash, &golden, GOLDEN);
    install(&flash, &backup, BACKUP);

    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
    assert_eq!(engine.decide(&mut MockPlatform::default()), booted(true));

    // The image and its trailing checksum, in whole pages.
    let len = backup.img_len() + 4;
    assert_eq!(contents(&flash, GOLDEN..GOLDEN + len), backup.data);
    let pages = len.div_ceil(512);
    assert_eq!(writes_within(&flash, golden_range()), pages);
    assert_eq!(erases_within(&flash, golden_range()), pages);
    let tail = contents(&flash, GOLDEN + len..GOLDEN + pages * 512);
    assert!(tail.iter().all(|&b| b == 0xff));

    // The next boot finds golden current.
    assert_eq!(engine.decide(&mut MockPlatform::default()), booted(false));
}

#[test]
fn newer_backup_is_promoted() {
    let flash = device(&styles::LPC55S36, &LPC55S36);
    let golden = image(1, 1);
    let backup = image(2, 3);
    install(&flash, &golden, GOLDEN);
    install(&flash, &backup, BACKUP);

    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
    assert_eq!(engine.decide(&mut MockPlatform::default()), booted(true));
    assert_eq!(contents(&flash, GOLDEN..GOLDEN + backup.data.len()), backup.data);
}

#[test]
fn current_golden_is_kept() {
    for version in [3, 5] {
        let flash = device(&styles::LPC55S36, &LPC55S36);
        let golden = image(1, version);
        let backup = image(2, 3);
        install(&flash, &golden, GOLDEN);
        install(&flash, &backup, BACKUP);

        let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
        assert_eq!(engine.decide(&mut MockPlatform::default()), booted(false));
        assert_eq!(writes_within(&flash, golden_range()), 0);
        assert_eq!(contents(&flash, GOLDEN..GOLDEN + golden.data.len()), golden.data);
    }
}

#[test]
fn nothing_to_boot() {
    let flash = device(&styles::LPC55S36, &LPC55S36);
    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
    assert_eq!(
        engine.decide(&mut MockPlatform::default()),
        Decision::EnterUpdateMode(UpdateReason::NoValidImage)
    );
}

#[test]
fn backup_without_trailer_room_keeps_golden() {
    let flash = device(&styles::LPC55S36, &LPC55S36);
    install(&flash, &image(1, 1), GOLDEN);
    // Checksummed over the whole backup region, so its trailing checksum
    // word lands past the end.
    let backup = GenBuilder::default()
        .size(LPC55S36.backup.length)
        .seed(2)
        .version(2)
        .build()
        .unwrap();
    install(&flash, &backup, BACKUP);

    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
    assert_eq!(engine.decide(&mut MockPlatform::default()), booted(false));
    assert_eq!(writes_within(&flash, golden_range()), 0);
    assert_eq!(erases_within(&flash, golden_range()), 0);
}

#[test]
fn marker_past_scan_window() {
    // The marker has to be within the first scan_len bytes of the region.
    let flash = device(&styles::LPC55S36, &LPC55S36);
    install(&flash, &image(1, 1), GOLDEN);
    let config = BootConfig::new(LPC55S36).with_scan_len(0x20);
    let engine = BootDecisionEngine::new(&flash, config);
    assert_eq!(
        engine.decide(&mut MockPlatform::default()),
        Decision::EnterUpdateMode(UpdateReason::NoValidImage)
    );
}

#[test]
fn unchecked_backup_copies_region() {
    let flash = device(&styles::LPC55S36, &LPC55S36);
    let backup = GenBuilder::default().img_type(1).seed(9).build().unwrap();
    install(&flash, &backup, BACKUP);

    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
    assert_eq!(engine.decide(&mut MockPlatform::default()), booted(true));

    // Pages of the region that were never programmed stay erased.
    let programmed = backup.data.len().div_ceil(512);
    assert_eq!(writes_within(&flash, golden_range()), programmed);
    assert_eq!(erases_within(&flash, golden_range()), LPC55S36.golden.length / 512);
    assert_eq!(contents(&flash, GOLDEN..GOLDEN + backup.data.len()), backup.data);
}

#[test]
fn forced_update_mode() {
    let flash = device(&styles::LPC55S36, &LPC55S36);
    install(&flash, &image(1, 1), GOLDEN);
    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));

    assert_eq!(
        engine.decide(&mut MockPlatform::strapped()),
        Decision::EnterUpdateMode(UpdateReason::StrapPin)
    );
    assert_eq!(
        engine.decide(&mut MockPlatform::reinvoked()),
        Decision::EnterUpdateMode(UpdateReason::ReInvoke)
    );

    engine.state().request_update().unwrap();
    assert_eq!(
        engine.decide(&mut MockPlatform::default()),
        Decision::EnterUpdateMode(UpdateReason::UpdatePending)
    );
}

#[test]
fn strap_uses_up_reinvoke() {
    let flash = device(&styles::LPC55S36, &LPC55S36);
    install(&flash, &image(1, 1), GOLDEN);
    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));

    let mut platform = MockPlatform {
        strap: true,
        reinvoke: true,
        ..MockPlatform::default()
    };
    assert_eq!(
        engine.decide(&mut platform),
        Decision::EnterUpdateMode(UpdateReason::StrapPin)
    );
    assert!(!platform.reinvoke);

    // Strap released, and the flag is gone.
    platform.strap = false;
    assert_eq!(engine.decide(&mut platform), booted(false));
}

#[test]
fn retries_run_out() {
    let flash = device(&styles::LPC55S36, &LPC55S36);
    install(&flash, &image(1, 1), GOLDEN);
    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));

    engine
        .state()
        .save(&UpdateState { update_flag: true, retry_count: 1 })
        .unwrap();
    assert_eq!(engine.decide(&mut MockPlatform::default()), booted(false));
    assert_eq!(engine.state().load(), Ok(UpdateState::default()));
}

#[test]
fn request_forces_update_until_spent() {
    let flash = device(&styles::LPC55S36, &LPC55S36);
    install(&flash, &image(1, 1), GOLDEN);
    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
    engine.state().request_update().unwrap();

    let pending = Decision::EnterUpdateMode(UpdateReason::UpdatePending);
    assert_eq!(engine.decide(&mut MockPlatform::default()), pending);
    assert_eq!(
        engine.state().load(),
        Ok(UpdateState { update_flag: true, retry_count: 2 })
    );
    assert_eq!(engine.decide(&mut MockPlatform::default()), pending);
    assert_eq!(engine.decide(&mut MockPlatform::default()), booted(false));
    assert_eq!(engine.decide(&mut MockPlatform::default()), booted(false));
}

#[test]
fn failed_promotion() {
    let flash = device(&styles::LPC55S36, &LPC55S36);
    let backup = image(2, 2);
    install(&flash, &backup, BACKUP);
    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
    engine.state().clear().unwrap();

    // Power goes away a few pages into the copy.
    flash.borrow_mut().inner_mut().fail_after(3);
    assert_eq!(
        engine.decide(&mut MockPlatform::default()),
        Decision::EnterUpdateMode(UpdateReason::PromotionFailed)
    );

    // With power back, the next boot finishes the job.
    flash.borrow_mut().inner_mut().heal();
    assert_eq!(engine.decide(&mut MockPlatform::default()), booted(true));
    assert_eq!(contents(&flash, GOLDEN..GOLDEN + backup.data.len()), backup.data);
}

#[test]
fn large_sectors() {
    let layout = FlashLayout {
        bootloader: FlashRegion::new(0, 32 * 1024),
        state: FlashRegion::new(32 * 1024, 32 * 1024),
        golden: FlashRegion::new(64 * 1024, 64 * 1024),
        backup: FlashRegion::new(128 * 1024, 64 * 1024),
        write_ceiling: 224 * 1024,
    };
    let flash = device(&styles::LARGE_SECTOR, &layout);
    install(&flash, &image(1, 1), GOLDEN);
    let backup = image(2, 3);
    install(&flash, &backup, BACKUP);

    let engine = BootDecisionEngine::new(&flash, BootConfig::new(layout));
    assert_eq!(engine.decide(&mut MockPlatform::default()), booted(true));

    // One erase covers the whole image, which is programmed a page at a time.
    let golden = GOLDEN..GOLDEN + layout.golden.length;
    assert_eq!(erases_within(&flash, golden.clone()), 1);
    assert_eq!(writes_within(&flash, golden), backup.data.len().div_ceil(256));
    assert_eq!(contents(&flash, GOLDEN..GOLDEN + backup.data.len()), backup.data);
}

#[test]
fn small_sector_styles_boot() {
    // The LPC55S36 layout needs sectors of 4KiB or less.
    for style in [&styles::LPC55S36, &styles::K64] {
        let flash = device(style, &LPC55S36);
        let mut golden = image(1, 4);
        golden.corrupt(0x200);
        install(&flash, &golden, GOLDEN);
        install(&flash, &image(2, 1), BACKUP);

        let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
        assert_eq!(engine.decide(&mut MockPlatform::default()), booted(true));
        assert_eq!(engine.decide(&mut MockPlatform::default()), booted(false));
    }
}

#[test]
fn mapped_boot_address() {
    let sim = styles::K64.build().unwrap().with_base(0x1000_0000);
    let flash = std::cell::RefCell::new(
        dualboot::FlashStore::new(sim, LPC55S36.write_ceiling).unwrap(),
    );
    install(&flash, &image(1, 1), GOLDEN);
    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
    assert_eq!(
        engine.decide(&mut MockPlatform::default()),
        Decision::BootApp {
            address: 0x1000_0000 + GOLDEN,
            promoted: false,
        }
    );
}
