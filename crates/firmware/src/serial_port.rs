//! Binds the serial MIDI port to USART6: framing, the polled receive register, and the transmit-complete
//! interrupt which drains the port's transmit ring.

use defmt::*;
use embassy_stm32::{
    interrupt,
    interrupt::{Interrupt, InterruptExt},
    pac, usart,
};
use serial_usb_midi_lib::{
    configuration::{DataBits, Parity, StopBits, UartConfig},
    interrupt::{InterruptLine, InterruptRegistry},
    transmit::{TransmitInterrupt, TxEvent},
};

/// The UART's interrupt vector.
pub const MIDI_UART_INTERRUPT: Interrupt = Interrupt::USART6;

/// Interrupt handlers for the serial ports, looked up by vector from the ISR trampolines.
pub static TX_PORTS: InterruptRegistry<Interrupt, TransmitInterrupt<'static>, 1> = InterruptRegistry::new();

/// An NVIC interrupt line.
#[derive(Clone, Copy)]
pub struct UartLine(pub Interrupt);

impl InterruptLine for UartLine {
    fn disable(&self) -> bool {
        let enabled = self.0.is_enabled();
        self.0.disable();
        enabled
    }

    fn enable(&self) {
        // SAFETY: the handler for this line is only reachable once its state is registered
        unsafe { self.0.enable() }
    }

    fn pend(&self) {
        self.0.pend();
    }
}

/// Translates the device's framing settings into the HAL's.
pub fn uart_config(config: &UartConfig) -> usart::Config {
    let mut uart = usart::Config::default();
    uart.baudrate = config.baud_rate;
    uart.data_bits = match config.data_bits {
        DataBits::Seven => usart::DataBits::DataBits7,
        DataBits::Eight => usart::DataBits::DataBits8,
        DataBits::Nine => usart::DataBits::DataBits9,
    };
    uart.stop_bits = match config.stop_bits {
        StopBits::One => usart::StopBits::STOP1,
        StopBits::Two => usart::StopBits::STOP2,
    };
    uart.parity = match config.parity {
        Parity::None => usart::Parity::ParityNone,
        Parity::Even => usart::Parity::ParityEven,
        Parity::Odd => usart::Parity::ParityOdd,
    };
    uart
}

/// Turns on the transmit-complete interrupt. Must be called after the port's handler is registered.
pub fn enable_transmit_interrupt() {
    pac::USART6.cr1().modify(|w| w.set_tcie(true));
    UartLine(MIDI_UART_INTERRUPT).enable();
}

/// The UART's receive register, read without blocking. Overruns are cleared and otherwise ignored; the receive
/// state machine resynchronizes on the next status byte.
pub struct UartReceiver;

impl Iterator for UartReceiver {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        let regs = pac::USART6;
        let isr = regs.isr().read();
        if isr.ore() {
            warn!("MIDI UART overrun");
            regs.icr().write(|w| w.set_ore(true));
        }
        isr.rxne().then(|| regs.rdr().read().dr() as u8)
    }
}

#[interrupt]
fn USART6() {
    let regs = pac::USART6;
    regs.icr().write(|w| w.set_tc(true));

    let line = UartLine(MIDI_UART_INTERRUPT);
    let event = TX_PORTS.dispatch(MIDI_UART_INTERRUPT, |port| {
        port.service(&line, |byte| regs.tdr().write(|w| w.set_dr(byte.into())))
    });
    if let Some(TxEvent::Idle) = event {
        trace!("MIDI UART idle");
    }
}
