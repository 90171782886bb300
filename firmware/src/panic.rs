use core::panic::PanicInfo;

use defmt::error;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    error!("PANIC: {}", defmt::Display2Format(info));

    #[cfg(feature = "halt-on-panic")]
    {
        // Both indicator LEDs (PA0, PA3) on, then wait for a debugger.
        embassy_stm32::pac::GPIOA.bsrr().write(|w| {
            w.set_bs(0, true);
            w.set_bs(3, true);
        });
        loop {
            cortex_m::asm::nop();
        }
    }

    #[cfg(not(feature = "halt-on-panic"))]
    cortex_m::peripheral::SCB::sys_reset();
}
