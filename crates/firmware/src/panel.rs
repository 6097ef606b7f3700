//! The front panel: two note buttons and two indicator LEDs.

use defmt::*;
use embassy_stm32::{
    exti::ExtiInput,
    gpio::{Level, Output},
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::Timer;
use serial_usb_midi_lib::routing::{Edge, Led, PanelButton};

/// How long a button must settle after an edge before its level is trusted.
const DEBOUNCE_MS: u64 = 20;

/// Button edges waiting to be turned into MIDI by the bridge task.
pub static BUTTON_EVENTS: Channel<CriticalSectionRawMutex, (PanelButton, Edge), 8> = Channel::new();

/// The indicator LEDs driven by Control Change messages from the host.
pub struct Indicators {
    led0: Output<'static>,
    led1: Output<'static>,
}

impl Indicators {
    pub fn new(led0: Output<'static>, led1: Output<'static>) -> Self {
        Self { led0, led1 }
    }

    pub fn set(&mut self, led: Led, lit: bool) {
        let level = if lit { Level::High } else { Level::Low };
        match led {
            Led::Led0 => self.led0.set_level(level),
            Led::Led1 => self.led1.set_level(level),
        }
    }
}

/// Watches one button, reporting each debounced press and release.
///
/// `active_low` is set for buttons which pull their pin to ground when pressed.
#[embassy_executor::task(pool_size = 2)]
pub async fn button_task(mut input: ExtiInput<'static>, button: PanelButton, active_low: bool) -> ! {
    let mut pressed = input.is_high() != active_low;
    loop {
        input.wait_for_any_edge().await;
        Timer::after_millis(DEBOUNCE_MS).await;

        let now_pressed = input.is_high() != active_low;
        if now_pressed == pressed {
            continue;
        }
        pressed = now_pressed;

        let edge = if pressed { Edge::Pressed } else { Edge::Released };
        debug!("Button {} {}", button.note().to_str(), edge);
        BUTTON_EVENTS.send((button, edge)).await;
    }
}
