//! This crate contains architecture-agnostic logic for a serial MIDI to USB-MIDI interface: a device with a
//! 5-pin DIN [MIDI](https://midi.org/midi-1-0) port on one side and a USB-MIDI class-compliant device on the
//! other, forwarding traffic in both directions.
//!
//! Bytes arriving on the serial port are reassembled into USB-MIDI Event Packets by [`receive::Receiver`];
//! packets from the host are serialized back to bytes and drained to the UART one byte per interrupt by
//! [`transmit::TransmitInterrupt`]. [`usb::UsbMidiBridge`] shuttles packets between the USB bulk endpoints and
//! the application through a pair of [`ring::PacketRing`]s.

#![deny(missing_docs)]
#![no_std]

pub mod configuration;
pub mod interrupt;
pub mod packet;
pub mod receive;
pub mod ring;
pub mod routing;
pub mod serial;
pub mod transmit;
pub mod usb;
