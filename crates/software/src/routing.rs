//! Decides what the device does with each packet from the USB host, and what it sends when a panel button is
//! pressed or released.
//!
//! The host sees two cables. Packets on the serial cable are forwarded, byte for byte, out the serial MIDI port.
//! Packets on the control cable drive the front panel: Control Change 80 (General Purpose 5) sets the first
//! indicator LED and Control Change 81 (General Purpose 6) sets the second, lit for values above 63.

use crate::{
    configuration::Routing,
    packet::{CableNumber, MidiPacket, PacketError},
};
use wmidi::{Channel, MidiMessage, Note, U7};

/// Controller number which drives [`Led::Led0`].
pub const LED0_CONTROL: u8 = 80;
/// Controller number which drives [`Led::Led1`].
pub const LED1_CONTROL: u8 = 81;

/// One of the front panel's indicator LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Led {
    /// The first LED.
    Led0,
    /// The second LED.
    Led1,
}

/// Where a packet from the host should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Destination<'p> {
    /// Out the serial MIDI port, as these raw bytes.
    SerialOut(&'p [u8]),
    /// To an indicator LED.
    Indicator {
        /// Which LED.
        led: Led,
        /// Whether it should be lit.
        lit: bool,
    },
    /// Nowhere.
    Discard,
}

impl Routing {
    /// Routes a packet received from the host.
    pub fn route<'p>(&self, packet: &'p MidiPacket) -> Destination<'p> {
        let cable = packet.cable();
        if cable == self.serial_cable {
            return Destination::SerialOut(packet.payload());
        }
        if cable != self.control_cable {
            return Destination::Discard;
        }

        match packet.message() {
            Ok(MidiMessage::ControlChange(Channel::Ch1, function, value)) => {
                let led = match u8::from(function.0) {
                    LED0_CONTROL => Led::Led0,
                    LED1_CONTROL => Led::Led1,
                    _ => return Destination::Discard,
                };
                Destination::Indicator {
                    led,
                    lit: u8::from(value) > 63,
                }
            }
            _ => Destination::Discard,
        }
    }

    /// Readdresses a packet parsed from the serial port to the cable the host expects it on.
    pub fn to_host(&self, packet: MidiPacket) -> MidiPacket {
        packet.with_cable(self.serial_cable)
    }
}

/// A change in a panel button's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    /// The button went down.
    Pressed,
    /// The button came back up.
    Released,
}

/// A front panel button which plays a single note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelButton {
    note: u8,
}

impl PanelButton {
    /// Velocity of the note-on sent when the button is pressed.
    pub const VELOCITY: u8 = 0x40;

    /// The first button, which plays MIDI note 0x60.
    pub const BUTTON_0: Self = Self::new(0x60);
    /// The second button, which plays MIDI note 0x44.
    pub const BUTTON_1: Self = Self::new(0x44);

    /// Constructs a button playing the MIDI note numbered `note` (masked to seven bits).
    pub const fn new(note: u8) -> Self {
        Self { note: note & 0x7F }
    }

    /// Getter.
    pub fn note(&self) -> Note {
        Note::from(U7::from_u8_lossy(self.note))
    }

    /// The message sent for `edge`: a note-on on press, and a note-on with zero velocity on release.
    pub fn message(&self, edge: Edge) -> MidiMessage<'static> {
        let velocity = match edge {
            Edge::Pressed => Self::VELOCITY,
            Edge::Released => 0,
        };
        MidiMessage::NoteOn(Channel::Ch1, self.note(), U7::from_u8_lossy(velocity))
    }

    /// The message for `edge`, packaged for `cable`.
    pub fn packet(&self, edge: Edge, cable: CableNumber) -> Result<MidiPacket, PacketError> {
        MidiPacket::from_message(cable, &self.message(edge))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::CodeIndexNumber;

    fn control_change(cable: CableNumber, bytes: [u8; 3]) -> MidiPacket {
        MidiPacket::new(cable, CodeIndexNumber::ControlChange, bytes)
    }

    #[test]
    fn serial_cable_goes_out_the_port() {
        let routing = Routing::default();
        let packet = MidiPacket::new(CableNumber::CABLE_1, CodeIndexNumber::ProgramChange, [0xC0, 0x05, 0x00]);
        assert_eq!(
            Destination::SerialOut(&[0xC0, 0x05]),
            routing.route(&packet),
            "Expected left but got right"
        );
    }

    #[test]
    fn control_changes_drive_leds() {
        let routing = Routing::default();

        assert_eq!(
            Destination::Indicator {
                led: Led::Led0,
                lit: true
            },
            routing.route(&control_change(CableNumber::CABLE_0, [0xB0, 80, 64])),
            "Expected left but got right"
        );
        assert_eq!(
            Destination::Indicator {
                led: Led::Led1,
                lit: false
            },
            routing.route(&control_change(CableNumber::CABLE_0, [0xB0, 81, 63])),
            "Expected left but got right"
        );
    }

    #[test]
    fn other_control_traffic_is_discarded() {
        let routing = Routing::default();
        assert_eq!(
            Destination::Discard,
            routing.route(&control_change(CableNumber::CABLE_0, [0xB0, 7, 100])),
            "Unmapped controllers should be ignored"
        );
        assert_eq!(
            Destination::Discard,
            routing.route(&control_change(CableNumber::CABLE_0, [0xB3, 80, 100])),
            "Only the first channel drives the LEDs"
        );
        assert_eq!(
            Destination::Discard,
            routing.route(&MidiPacket::new(CableNumber::CABLE_0, CodeIndexNumber::NoteOn, [0x90, 80, 100])),
        );
        assert_eq!(
            Destination::Discard,
            routing.route(&control_change(CableNumber::new(5).unwrap(), [0xB0, 80, 100])),
            "Unassigned cables should be ignored"
        );
    }

    #[test]
    fn buttons_play_notes() {
        let pressed = PanelButton::BUTTON_0.packet(Edge::Pressed, CableNumber::CABLE_1).unwrap();
        assert_eq!([0x19, 0x90, 0x60, 0x40], pressed.to_bytes(), "Expected left but got right");

        let released = PanelButton::BUTTON_1.packet(Edge::Released, CableNumber::CABLE_1).unwrap();
        assert_eq!([0x19, 0x90, 0x44, 0x00], released.to_bytes(), "Expected left but got right");
    }

    #[test]
    fn serial_packets_are_readdressed() {
        let routing = Routing::default();
        let packet = MidiPacket::new(CableNumber::CABLE_0, CodeIndexNumber::SingleByte, [0xFA, 0, 0]);
        assert_eq!(CableNumber::CABLE_1, routing.to_host(packet).cable());
    }
}
