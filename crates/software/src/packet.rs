//! Provides [`MidiPacket`], the 32-bit USB-MIDI Event Packet which carries a single MIDI event between the
//! serial port and the USB host, along with the [`CableNumber`] and [`CodeIndexNumber`] found in its header.

use core::fmt;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use wmidi::{FromBytesError, MidiMessage};

/// Status byte which opens a System Exclusive message.
pub const SOX: u8 = 0xF0;
/// Status byte which closes a System Exclusive message.
pub const EOX: u8 = 0xF7;

/// Reports whether `byte` is a status byte for a System Real-Time message.
pub(crate) const fn is_real_time(byte: u8) -> bool {
    byte >= 0xF8
}

/// Reports whether `byte` is a status (as opposed to data) byte.
pub(crate) const fn is_status(byte: u8) -> bool {
    byte & 0x80 != 0
}

/// Problems encountered while building a [`MidiPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketError {
    /// Cable numbers occupy four bits of the header; the value was out of range.
    InvalidCable(u8),
    /// Code Index Numbers 0x0 and 0x1 are reserved by the USB-MIDI specification.
    ReservedCodeIndex(u8),
    /// The message does not fit in a single packet (e.g., a complete SysEx dump).
    UnsupportedMessage,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCable(cable) => write!(f, "Cable number {} is out of range", cable),
            Self::ReservedCodeIndex(cin) => write!(f, "Code Index Number {:#x} is reserved", cin),
            Self::UnsupportedMessage => write!(f, "Message does not fit in a single packet"),
        }
    }
}

/// Identifies one of the virtual MIDI jacks multiplexed over the USB-MIDI interface.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CableNumber(u8);

impl CableNumber {
    /// The first cable; the device's control surface lives here.
    pub const CABLE_0: Self = Self(0);
    /// The second cable; traffic to and from the serial MIDI port lives here.
    pub const CABLE_1: Self = Self(1);

    /// Constructs a [`CableNumber`], returning `None` for values which don't fit in four bits.
    pub const fn new(cable: u8) -> Option<Self> {
        if cable < 16 { Some(Self(cable)) } else { None }
    }

    /// Getter.
    pub const fn number(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for CableNumber {
    type Error = PacketError;

    fn try_from(cable: u8) -> Result<Self, Self::Error> {
        Self::new(cable).ok_or(PacketError::InvalidCable(cable))
    }
}

/// The low nibble of the packet header, which tells the receiver how to interpret the three bytes that follow
/// and how many of them are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodeIndexNumber {
    /// Two-byte System Common message (MTC Quarter Frame, Song Select).
    SystemCommon2 = 0x2,
    /// Three-byte System Common message (Song Position Pointer).
    SystemCommon3 = 0x3,
    /// SysEx starts or continues; all three bytes are part of the SysEx stream.
    SysExStart = 0x4,
    /// Single-byte System Common message, or SysEx ending with the following single byte.
    SysExEnd1 = 0x5,
    /// SysEx ends with the following two bytes.
    SysExEnd2 = 0x6,
    /// SysEx ends with the following three bytes.
    SysExEnd3 = 0x7,
    /// Note-off.
    NoteOff = 0x8,
    /// Note-on.
    NoteOn = 0x9,
    /// Poly-KeyPress.
    PolyKeyPress = 0xA,
    /// Control Change.
    ControlChange = 0xB,
    /// Program Change.
    ProgramChange = 0xC,
    /// Channel Pressure.
    ChannelPressure = 0xD,
    /// Pitch Bend Change.
    PitchBend = 0xE,
    /// Single byte, used for Real-Time messages.
    SingleByte = 0xF,
}

impl CodeIndexNumber {
    /// Number of meaningful MIDI bytes carried by a packet with this Code Index Number.
    pub const fn payload_len(&self) -> usize {
        match self {
            Self::SysExEnd1 | Self::SingleByte => 1,
            Self::SystemCommon2 | Self::SysExEnd2 | Self::ProgramChange | Self::ChannelPressure => 2,
            Self::SystemCommon3
            | Self::SysExStart
            | Self::SysExEnd3
            | Self::NoteOff
            | Self::NoteOn
            | Self::PolyKeyPress
            | Self::ControlChange
            | Self::PitchBend => 3,
        }
    }
}

/// The result of inspecting a status byte: which [`CodeIndexNumber`] its packet carries and how many data
/// bytes follow it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Classification {
    /// Code Index Number for the packet this status opens.
    pub cin: CodeIndexNumber,
    /// Number of data bytes (0, 1, or 2) which follow the status byte.
    pub data_bytes: u8,
}

impl Classification {
    const fn new(cin: CodeIndexNumber, data_bytes: u8) -> Self {
        Self { cin, data_bytes }
    }

    /// Classifies a status byte per the MIDI 1.0 status table.
    ///
    /// Returns `None` for data bytes (below 0x80). [`SOX`] is classified as a SysEx start even though its
    /// length is open-ended. Anything in the 0xF0 bucket that isn't a known System Common message falls
    /// through to a single-byte message.
    pub const fn of(status: u8) -> Option<Self> {
        use CodeIndexNumber::*;

        let classification = match status & 0xF0 {
            0x00..=0x70 => return None,
            0x80 => Self::new(NoteOff, 2),
            0x90 => Self::new(NoteOn, 2),
            0xA0 => Self::new(PolyKeyPress, 2),
            0xB0 => Self::new(ControlChange, 2),
            0xC0 => Self::new(ProgramChange, 1),
            0xD0 => Self::new(ChannelPressure, 1),
            0xE0 => Self::new(PitchBend, 2),
            _ => match status {
                SOX => Self::new(SysExStart, 0),
                // MTC Quarter Frame and Song Select
                0xF1 | 0xF3 => Self::new(SystemCommon2, 1),
                // Song Position Pointer
                0xF2 => Self::new(SystemCommon3, 2),
                // undefined F4/F5 and Tune Request
                0xF4 | 0xF5 | 0xF6 => Self::new(SysExEnd1, 0),
                _ => Self::new(SingleByte, 0),
            },
        };
        Some(classification)
    }
}

/// A USB-MIDI Event Packet.
///
/// On the wire the packet is four bytes: the header (`cable << 4 | cin`) followed by three MIDI bytes, zero
/// padded when the event is shorter than three bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MidiPacket {
    cable: CableNumber,
    cin: CodeIndexNumber,
    bytes: [u8; 3],
}

impl MidiPacket {
    /// Size of a packet on the wire, in bytes.
    pub const SIZE: usize = 4;

    /// Constructs a [`MidiPacket`]. Bytes beyond the [`CodeIndexNumber::payload_len`] are zeroed.
    pub fn new(cable: CableNumber, cin: CodeIndexNumber, bytes: [u8; 3]) -> Self {
        let mut packet = Self { cable, cin, bytes };
        packet.bytes[cin.payload_len()..].fill(0);
        packet
    }

    /// Constructs a packet from a MIDI message, deriving the [`CodeIndexNumber`] from the status byte.
    pub fn from_message(cable: CableNumber, message: &MidiMessage) -> Result<Self, PacketError> {
        let mut bytes = [0_u8; 3];
        message
            .copy_to_slice(&mut bytes)
            .map_err(|_| PacketError::UnsupportedMessage)?;
        let classification = Classification::of(bytes[0]).ok_or(PacketError::UnsupportedMessage)?;
        if classification.cin == CodeIndexNumber::SysExStart {
            return Err(PacketError::UnsupportedMessage);
        }
        Ok(Self::new(cable, classification.cin, bytes))
    }

    /// Getter.
    pub fn cable(&self) -> CableNumber {
        self.cable
    }

    /// Getter.
    pub fn code_index_number(&self) -> CodeIndexNumber {
        self.cin
    }

    /// Returns the packet header: cable number in the high nibble, Code Index Number in the low nibble.
    pub fn header(&self) -> u8 {
        (self.cable.number() << 4) | self.cin as u8
    }

    /// Returns the three MIDI bytes, including any zero padding.
    pub fn bytes(&self) -> [u8; 3] {
        self.bytes
    }

    /// Returns only the meaningful MIDI bytes, i.e., what would be sent down a serial MIDI cable.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.cin.payload_len()]
    }

    /// Interprets the payload as a [`MidiMessage`]. Fragments of SysEx messages cannot be interpreted.
    pub fn message(&self) -> Result<MidiMessage<'_>, FromBytesError> {
        MidiMessage::from_bytes(self.payload())
    }

    /// Returns a copy of this packet addressed to another cable.
    pub fn with_cable(self, cable: CableNumber) -> Self {
        Self { cable, ..self }
    }

    /// Serializes the packet into its bit-exact wire format.
    pub fn to_bytes(&self) -> [u8; 4] {
        [self.header(), self.bytes[0], self.bytes[1], self.bytes[2]]
    }
}

impl TryFrom<[u8; 4]> for MidiPacket {
    type Error = PacketError;

    fn try_from(raw: [u8; 4]) -> Result<Self, Self::Error> {
        let cin = raw[0] & 0x0F;
        let cin = CodeIndexNumber::from_u8(cin).ok_or(PacketError::ReservedCodeIndex(cin))?;
        // the high nibble can't exceed 15, so the cable number is always valid
        let cable = CableNumber(raw[0] >> 4);
        Ok(Self {
            cable,
            cin,
            bytes: [raw[1], raw[2], raw[3]],
        })
    }
}

impl fmt::Debug for MidiPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MidiPacket {{ {:02x} : {:02x} : {:02x} : {:02x} }}",
            self.header(),
            self.bytes[0],
            self.bytes[1],
            self.bytes[2]
        )
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MidiPacket {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "MidiPacket {{ {=u8:02x} : {=u8:02x} : {=u8:02x} : {=u8:02x} }}",
            self.header(),
            self.bytes[0],
            self.bytes[1],
            self.bytes[2]
        );
    }
}

impl From<MidiPacket> for [u8; 4] {
    fn from(packet: MidiPacket) -> Self {
        packet.to_bytes()
    }
}
