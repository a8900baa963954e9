#![no_main]
#![no_std]

#[cfg(feature = "quiet")]
extern crate panic_halt;
#[cfg(feature = "semihosting")]
extern crate panic_semihosting;

mod flash;

use core::cell::RefCell;
use core::mem::MaybeUninit;

use cortex_m::interrupt::Mutex;
use cortex_m::peripheral::{NVIC, SCB};
use cortex_m_rt::entry;
use dualboot::{
    api::{SblApi, REINVOKE_MAGIC},
    layout::LPC55S36,
    BootConfig, BootDecisionEngine, FlashStore, Platform, RxProducer, RxQueue,
    UpdateProtocol, UpdateServices, UpdateStateStore,
};
use embedded_hal::digital::v2::InputPin;
use lpc55_hal as hal;
use hal::raw::{interrupt, Interrupt, USART0};

use flash::LpcFlash;

/// Set by `reinvoke`, read and cleared once on the next pass through the
/// bootloader.  The startup code doesn't touch `.uninit`.
#[link_section = ".uninit.REINVOKE"]
static mut REINVOKE: MaybeUninit<u32> = MaybeUninit::uninit();

/// Receive queue, split once in `main`.
static mut RX: RxQueue = RxQueue::new();
static RX_PRODUCER: Mutex<RefCell<Option<RxProducer<'static>>>> = Mutex::new(RefCell::new(None));

#[link_section = ".sbl_api"]
#[used]
static SBL_API: SblApi = SblApi {
    reinvoke,
    set_update_flag,
    test,
};

#[entry]
fn main() -> ! {
    logger::init();
    log::info!("dualboot: start");

    let hal = hal::new();
    let pins = match hal::Pins::take() {
        Some(pins) => pins,
        None => panic!("pins already taken"),
    };
    let mut syscon = hal.syscon;
    let mut gpio = hal.gpio.enabled(&mut syscon);
    let mut iocon = hal.iocon.enabled(&mut syscon);

    // Pulled up, low asks for update mode.
    let strap = pins
        .pio0_17
        .into_gpio_pin(&mut iocon, &mut gpio)
        .into_input();

    let usart = console::init();

    let flash = match FlashStore::new(LpcFlash::new(hal.flash.release()), LPC55S36.write_ceiling) {
        Ok(flash) => RefCell::new(flash),
        Err(e) => panic!("flash: {:?}", e),
    };

    let (producer, consumer) = unsafe { (*core::ptr::addr_of_mut!(RX)).split() };
    cortex_m::interrupt::free(|cs| RX_PRODUCER.borrow(cs).replace(Some(producer)));

    let mut board = Board { strap, usart };
    let engine = BootDecisionEngine::new(&flash, BootConfig::new(LPC55S36));
    engine.run(&mut board, &mut Console::default(), consumer)
}

struct Board<S> {
    strap: S,
    usart: USART0,
}

impl<S: InputPin> Platform for Board<S> {
    fn read_strap_pin(&mut self) -> bool {
        self.strap.is_low().unwrap_or(false)
    }

    fn re_invoke_requested(&mut self) -> bool {
        unsafe {
            let flag = core::ptr::addr_of_mut!(REINVOKE) as *mut u32;
            let requested = core::ptr::read_volatile(flag) == REINVOKE_MAGIC;
            core::ptr::write_volatile(flag, 0);
            requested
        }
    }

    fn send(&mut self, bytes: &[u8]) {
        console::send(&self.usart, bytes);
    }

    fn reset(&mut self) -> ! {
        SCB::sys_reset()
    }

    fn transfer_control(&mut self, address: usize) -> ! {
        // The receive interrupt belongs to us, not the image.
        NVIC::mask(Interrupt::FLEXCOMM0);
        unsafe {
            let p = cortex_m::Peripherals::steal();
            p.SCB.vtor.write(address as u32);
            cortex_m::asm::bootload(address as *const u32)
        }
    }
}

/// Update mode without a flashing protocol: announce update mode, echo what
/// arrives, and restart on `R`.
#[derive(Default)]
struct Console {
    greeted: bool,
}

impl UpdateProtocol for Console {
    fn poll<S: UpdateServices>(&mut self, services: &mut S) {
        if !self.greeted {
            services.send(b"dualboot: update mode\r\n");
            self.greeted = true;
        }
        while let Some(byte) = services.recv() {
            if byte == b'R' {
                services.reset();
            }
            services.send(&[byte]);
        }
    }
}

#[interrupt]
fn FLEXCOMM0() {
    let usart = unsafe { &*USART0::ptr() };
    cortex_m::interrupt::free(|cs| {
        let mut producer = RX_PRODUCER.borrow(cs).borrow_mut();
        while usart.fifostat.read().rxnotempty().bit_is_set() {
            let byte = usart.fiford.read().rxdata().bits() as u8;
            if let Some(producer) = producer.as_mut() {
                // Drop bytes once the queue is full.
                let _ = producer.enqueue(byte);
            }
        }
    });
}

/// Service table entries.  These run on behalf of the application, after the
/// bootloader has handed over, so they can't rely on anything `main` built.
extern "C" fn reinvoke() {
    unsafe {
        let flag = core::ptr::addr_of_mut!(REINVOKE) as *mut u32;
        core::ptr::write_volatile(flag, REINVOKE_MAGIC);
        let p = cortex_m::Peripherals::steal();
        p.SCB.vtor.write(0);
        cortex_m::asm::bootload(0 as *const u32)
    }
}

extern "C" fn set_update_flag() {
    let raw = unsafe { hal::raw::Peripherals::steal() };
    let flash = match FlashStore::new(LpcFlash::new(raw.FLASH), LPC55S36.write_ceiling) {
        Ok(flash) => RefCell::new(flash),
        Err(_) => return,
    };
    let state = UpdateStateStore::new(&flash, LPC55S36.state, BootConfig::new(LPC55S36).max_retry);
    if let Err(e) = state.request_update() {
        log::error!("set_update_flag: {:?}", e);
    }
}

extern "C" fn test() {
    log::info!("sbl api: test");
}

mod console {
    //! USART0 on Flexcomm 0, 115200 8N1 from the 12MHz FRO.  Polled for
    //! transmit, interrupt driven for receive.

    use cortex_m::peripheral::NVIC;
    use lpc55_hal::raw::{Interrupt, FLEXCOMM0, USART0};

    const AHBCLKCTRL1_FC0: u32 = 1 << 11;
    const FCCLKSEL_FRO_12M: u32 = 2;
    const PSELID_USART: u32 = 1;
    const CFG_ENABLE_8BIT: u32 = (1 << 0) | (1 << 2);
    const OSR_13: u32 = 12;
    const BRG_115200: u32 = 7;
    const FIFOCFG_ENABLE: u32 = (1 << 0) | (1 << 1) | (1 << 16) | (1 << 17);
    const FIFOTRIG_RXLVL: u32 = 1 << 1;
    const FIFOINT_RXLVL: u32 = 1 << 3;

    /// The hal keeps the clock registers to itself, so they are stolen here.
    pub fn init() -> USART0 {
        let (syscon, flexcomm, usart) = unsafe {
            let p = lpc55_hal::raw::Peripherals::steal();
            (p.SYSCON, p.FLEXCOMM0, p.USART0)
        };
        syscon
            .ahbclkctrl1
            .modify(|r, w| unsafe { w.bits(r.bits() | AHBCLKCTRL1_FC0) });
        syscon.fcclksel0.write(|w| unsafe { w.bits(FCCLKSEL_FRO_12M) });
        configure(&flexcomm, &usart);
        unsafe { NVIC::unmask(Interrupt::FLEXCOMM0) };
        usart
    }

    fn configure(flexcomm: &FLEXCOMM0, usart: &USART0) {
        flexcomm.pselid.write(|w| unsafe { w.bits(PSELID_USART) });
        usart.osr.write(|w| unsafe { w.bits(OSR_13) });
        usart.brg.write(|w| unsafe { w.bits(BRG_115200) });
        usart.fifocfg.write(|w| unsafe { w.bits(FIFOCFG_ENABLE) });
        usart.fifotrig.write(|w| unsafe { w.bits(FIFOTRIG_RXLVL) });
        usart.fifointenset.write(|w| unsafe { w.bits(FIFOINT_RXLVL) });
        usart.cfg.write(|w| unsafe { w.bits(CFG_ENABLE_8BIT) });
    }

    pub fn send(usart: &USART0, bytes: &[u8]) {
        for &byte in bytes {
            while usart.fifostat.read().txnotfull().bit_is_clear() {}
            usart.fifowr.write(|w| unsafe { w.txdata().bits(byte as u16) });
        }
    }
}

#[cfg(feature = "semihosting")]
mod logger {
    use cortex_m_semihosting::hprintln;
    use log::{LevelFilter, Log, Metadata, Record};

    struct Semihosting;

    static LOGGER: Semihosting = Semihosting;

    impl Log for Semihosting {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            hprintln!("{:<5} {}", record.level(), record.args());
        }

        fn flush(&self) {}
    }

    pub fn init() {
        // Only fails if a logger is already installed.
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Info);
        }
    }
}

#[cfg(not(feature = "semihosting"))]
mod logger {
    pub fn init() {}
}
