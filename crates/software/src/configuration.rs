//! This module contains the device's fixed settings: how the serial port is framed, how deep each queue is, which
//! USB cable each function lives on, and how the device identifies itself to the host.

mod uart;
pub use uart::*;

mod usb_identity;
pub use usb_identity::*;

use crate::packet::CableNumber;

/// Number of slots in each serial port's transmit ring.
pub const MIDI_TX_FIFO_SIZE: usize = 64;

/// Number of slots in the ring of packets received from the USB host.
pub const USB_RX_FIFO_SIZE: usize = 64;

/// Number of slots in the ring of packets waiting to go to the USB host.
pub const USB_TX_FIFO_SIZE: usize = 64;

/// Assigns the device's functions to USB-MIDI cables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Routing {
    /// Cable bridged to the serial MIDI port.
    pub serial_cable: CableNumber,
    /// Cable carrying control messages for the device itself (indicator LEDs).
    pub control_cable: CableNumber,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            serial_cable: CableNumber::CABLE_1,
            control_cable: CableNumber::CABLE_0,
        }
    }
}
