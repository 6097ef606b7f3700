//! Reassembles the raw byte stream arriving on a serial MIDI port into [`MidiPacket`]s.
//!
//! Serial MIDI is a byte stream with implicit framing: a status byte says how many data bytes follow, running
//! status lets a sender omit repeated status bytes, real-time bytes may appear between any two bytes, and
//! System Exclusive messages are open-ended. USB-MIDI instead carries fixed four-byte packets, so the
//! [`Receiver`] keeps just enough state to know where each packet begins and ends. SysEx is cut into groups of
//! three bytes, each sent as its own packet.

use crate::packet::{CableNumber, Classification, CodeIndexNumber, EOX, MidiPacket, SOX, is_real_time, is_status};

/// Anything bytes can be pulled out of without blocking, e.g., a UART receive register.
pub trait ByteSource {
    /// Returns the next available byte, or `None` if there is nothing to read right now.
    fn read_byte(&mut self) -> Option<u8>;
}

impl<I: Iterator<Item = u8>> ByteSource for I {
    fn read_byte(&mut self) -> Option<u8> {
        self.next()
    }
}

/// Where the [`Receiver`] is within the packet it is assembling.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceiverState {
    /// Between packets.
    #[default]
    Idle,
    /// Status (or running status) is known; waiting for the first data byte.
    AwaitingByte2,
    /// Waiting for the second data byte.
    AwaitingByte3,
    /// A SysEx group has its first byte; waiting for the second.
    SysExByte1,
    /// A SysEx group has two bytes; waiting for the third.
    SysExByte2,
}

/// The byte-level receive state machine for one serial MIDI port.
#[derive(Debug, Clone)]
pub struct Receiver {
    cable: CableNumber,
    state: ReceiverState,
    cin: CodeIndexNumber,
    running_status: Option<(u8, Classification)>,
    bytes_in_packet: usize,
    bytes_remaining: u8,
    sysex_pending: bool,
    scratch: [u8; 3],
}

impl Receiver {
    /// Constructs a [`Receiver`] which stamps every packet it produces with `cable`.
    pub const fn new(cable: CableNumber) -> Self {
        Self {
            cable,
            state: ReceiverState::Idle,
            cin: CodeIndexNumber::SingleByte,
            running_status: None,
            bytes_in_packet: 0,
            bytes_remaining: 0,
            sysex_pending: false,
            scratch: [0; 3],
        }
    }

    /// Getter.
    pub fn cable(&self) -> CableNumber {
        self.cable
    }

    /// Getter.
    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Advances the state machine by one byte, returning a packet if `byte` completed one.
    pub fn feed(&mut self, byte: u8) -> Option<MidiPacket> {
        // real-time messages may interleave with anything and leave the partial packet untouched
        if is_real_time(byte) {
            return Some(MidiPacket::new(self.cable, CodeIndexNumber::SingleByte, [byte, 0, 0]));
        }

        match self.state {
            ReceiverState::Idle => self.start(byte),
            ReceiverState::AwaitingByte2 | ReceiverState::AwaitingByte3 => {
                if is_status(byte) {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("Abandoning partial {} packet for status {=u8:#x}", self.cin, byte);
                    return self.start(byte);
                }
                self.data(byte)
            }
            ReceiverState::SysExByte1 | ReceiverState::SysExByte2 => self.sysex(byte),
        }
    }

    /// Drains `source`, yielding packets as they complete. Bytes left over after the last complete packet are
    /// held by the receiver until the next call.
    pub fn poll<'r, 's, S: ByteSource + ?Sized>(&'r mut self, source: &'s mut S) -> Packets<'r, 's, S> {
        Packets {
            receiver: self,
            source,
        }
    }

    /// Reads from `source` only until the next packet completes. Returns `None` once the source runs dry.
    pub fn poll_receive<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> Option<MidiPacket> {
        self.poll(source).next()
    }

    /// Handles a byte which arrived between packets.
    fn start(&mut self, byte: u8) -> Option<MidiPacket> {
        self.state = ReceiverState::Idle;
        self.bytes_in_packet = 0;
        self.bytes_remaining = 0;
        self.scratch = [0; 3];

        if byte == SOX {
            self.sysex_pending = true;
            self.begin_sysex_group(byte);
            return None;
        }

        if byte == EOX && self.sysex_pending {
            // the previous group ended exactly before EOX
            self.sysex_pending = false;
            return Some(MidiPacket::new(self.cable, CodeIndexNumber::SysExEnd1, [EOX, 0, 0]));
        }

        if !is_status(byte) {
            if self.sysex_pending {
                self.begin_sysex_group(byte);
                return None;
            }
            let Some((status, classification)) = self.running_status else {
                #[cfg(feature = "defmt")]
                defmt::trace!("Discarding data byte {=u8:#x} with no running status", byte);
                return None;
            };
            self.begin_message(status, classification);
            return self.data(byte);
        }

        if self.sysex_pending {
            #[cfg(feature = "defmt")]
            defmt::debug!("SysEx interrupted by status {=u8:#x}", byte);
            self.sysex_pending = false;
        }

        let classification = Classification::of(byte)?;
        self.running_status = (classification.data_bytes > 0).then_some((byte, classification));
        self.begin_message(byte, classification);
        if classification.data_bytes == 0 {
            return Some(self.emit());
        }
        None
    }

    /// Places a status byte in the scratch buffer and waits for its data bytes.
    fn begin_message(&mut self, status: u8, classification: Classification) {
        self.cin = classification.cin;
        self.scratch[0] = status;
        self.bytes_in_packet = 1;
        self.bytes_remaining = classification.data_bytes;
        self.state = ReceiverState::AwaitingByte2;
    }

    /// Places the first byte of a SysEx group in the scratch buffer.
    fn begin_sysex_group(&mut self, byte: u8) {
        self.cin = CodeIndexNumber::SysExStart;
        self.scratch[0] = byte;
        self.bytes_in_packet = 1;
        self.state = ReceiverState::SysExByte1;
    }

    /// Stores a data byte belonging to a channel or System Common message.
    fn data(&mut self, byte: u8) -> Option<MidiPacket> {
        self.scratch[self.bytes_in_packet] = byte;
        self.bytes_in_packet += 1;
        self.bytes_remaining = self.bytes_remaining.saturating_sub(1);
        if self.bytes_remaining == 0 {
            return Some(self.emit());
        }
        self.state = ReceiverState::AwaitingByte3;
        None
    }

    /// Stores the second or third byte of a SysEx group.
    fn sysex(&mut self, byte: u8) -> Option<MidiPacket> {
        if byte != EOX && is_status(byte) {
            #[cfg(feature = "defmt")]
            defmt::debug!("SysEx interrupted by status {=u8:#x}", byte);
            self.sysex_pending = false;
            return self.start(byte);
        }

        self.scratch[self.bytes_in_packet] = byte;
        self.bytes_in_packet += 1;

        match (self.state, byte) {
            (ReceiverState::SysExByte1, EOX) => {
                self.sysex_pending = false;
                self.cin = CodeIndexNumber::SysExEnd2;
                Some(self.emit())
            }
            (ReceiverState::SysExByte1, _) => {
                self.state = ReceiverState::SysExByte2;
                None
            }
            (_, EOX) => {
                self.sysex_pending = false;
                self.cin = CodeIndexNumber::SysExEnd3;
                Some(self.emit())
            }
            // a full group; the SysEx stays open and the next data byte starts another group
            _ => Some(self.emit()),
        }
    }

    /// Packages the scratch buffer and returns to [`ReceiverState::Idle`].
    fn emit(&mut self) -> MidiPacket {
        let packet = MidiPacket::new(self.cable, self.cin, self.scratch);
        self.state = ReceiverState::Idle;
        self.bytes_in_packet = 0;
        self.bytes_remaining = 0;
        self.scratch = [0; 3];
        packet
    }
}

/// Iterator returned by [`Receiver::poll`].
pub struct Packets<'r, 's, S: ?Sized> {
    receiver: &'r mut Receiver,
    source: &'s mut S,
}

impl<S: ByteSource + ?Sized> Iterator for Packets<'_, '_, S> {
    type Item = MidiPacket;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(byte) = self.source.read_byte() {
            if let Some(packet) = self.receiver.feed(byte) {
                return Some(packet);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::vec::Vec;

    fn receive(bytes: &[u8]) -> Vec<[u8; 4]> {
        let mut receiver = Receiver::new(CableNumber::CABLE_1);
        let mut source = bytes.iter().copied();
        receiver.poll(&mut source).map(|packet| packet.to_bytes()).collect()
    }

    #[test]
    fn note_on() {
        assert_eq!(
            std::vec![[0x19, 0x90, 0x40, 0x7F]],
            receive(&[0x90, 0x40, 0x7F]),
            "Expected left but got right"
        );
    }

    #[test]
    fn running_status_reuses_status_byte() {
        assert_eq!(
            std::vec![[0x19, 0x90, 0x40, 0x7F], [0x19, 0x90, 0x40, 0x00]],
            receive(&[0x90, 0x40, 0x7F, 0x40, 0x00]),
            "Expected left but got right"
        );
    }

    #[test]
    fn program_change_has_one_data_byte() {
        assert_eq!(
            std::vec![[0x1C, 0xC2, 0x05, 0x00], [0x1C, 0xC2, 0x06, 0x00]],
            receive(&[0xC2, 0x05, 0x06]),
            "Expected left but got right"
        );
    }

    #[test]
    fn system_common_messages() {
        assert_eq!(
            std::vec![
                [0x12, 0xF1, 0x23, 0x00],
                [0x13, 0xF2, 0x10, 0x20],
                [0x12, 0xF3, 0x04, 0x00],
                [0x15, 0xF6, 0x00, 0x00],
            ],
            receive(&[0xF1, 0x23, 0xF2, 0x10, 0x20, 0xF3, 0x04, 0xF6]),
            "Expected left but got right"
        );
    }

    #[test]
    fn tune_request_clears_running_status() {
        assert_eq!(
            std::vec![[0x19, 0x90, 0x40, 0x7F], [0x15, 0xF6, 0x00, 0x00]],
            receive(&[0x90, 0x40, 0x7F, 0xF6, 0x40, 0x00]),
            "Data bytes without a running status should be discarded"
        );
    }

    #[test]
    fn sysex_with_trailing_eox_group() {
        assert_eq!(
            std::vec![
                [0x14, 0xF0, 0x01, 0x02],
                [0x14, 0x03, 0x04, 0x05],
                [0x15, 0xF7, 0x00, 0x00],
            ],
            receive(&[0xF0, 0x01, 0x02, 0x03, 0x04, 0x05, 0xF7]),
            "Expected left but got right"
        );
    }

    #[test]
    fn sysex_ending_in_third_slot() {
        assert_eq!(
            std::vec![[0x14, 0xF0, 0x01, 0x02], [0x17, 0x03, 0x04, 0xF7]],
            receive(&[0xF0, 0x01, 0x02, 0x03, 0x04, 0xF7]),
            "Expected left but got right"
        );
    }

    #[test]
    fn sysex_ending_in_second_slot() {
        assert_eq!(
            std::vec![[0x14, 0xF0, 0x01, 0x02], [0x16, 0x03, 0xF7, 0x00]],
            receive(&[0xF0, 0x01, 0x02, 0x03, 0xF7]),
            "Expected left but got right"
        );
    }

    #[test]
    fn shortest_sysex() {
        assert_eq!(
            std::vec![[0x16, 0xF0, 0xF7, 0x00]],
            receive(&[0xF0, 0xF7]),
            "Expected left but got right"
        );
    }

    #[test]
    fn real_time_interleaves_without_disturbing() {
        assert_eq!(
            std::vec![
                [0x1F, 0xF8, 0x00, 0x00],
                [0x19, 0x90, 0x40, 0x7F],
                [0x1F, 0xFE, 0x00, 0x00],
                [0x14, 0xF0, 0x01, 0x02],
                [0x17, 0x03, 0x04, 0xF7],
            ],
            receive(&[0x90, 0xF8, 0x40, 0x7F, 0xF0, 0x01, 0xFE, 0x02, 0x03, 0x04, 0xF7]),
            "Expected left but got right"
        );
    }

    #[test]
    fn status_abandons_partial_message() {
        assert_eq!(
            std::vec![[0x18, 0x80, 0x3C, 0x00]],
            receive(&[0x90, 0x40, 0x80, 0x3C, 0x00]),
            "Expected left but got right"
        );
    }

    #[test]
    fn status_abandons_sysex() {
        let mut receiver = Receiver::new(CableNumber::CABLE_1);
        let mut source = [0xF0, 0x01, 0x90, 0x40, 0x7F].into_iter();
        let packets: Vec<_> = receiver.poll(&mut source).collect();

        assert_eq!(1, packets.len(), "Expected left but got right");
        assert_eq!([0x19, 0x90, 0x40, 0x7F], packets[0].to_bytes());

        // the SysEx is gone, so a late EOX no longer closes it
        let mut source = [0xF7].into_iter();
        assert_eq!(
            Some([0x1F, 0xF7, 0x00, 0x00]),
            receiver.poll_receive(&mut source).map(|packet| packet.to_bytes()),
            "Expected left but got right"
        );
    }

    #[test]
    fn stray_eox_is_a_single_byte() {
        assert_eq!(
            std::vec![[0x1F, 0xF7, 0x00, 0x00], [0x19, 0x90, 0x40, 0x7F]],
            receive(&[0xF7, 0x90, 0x40, 0x7F]),
            "Expected left but got right"
        );
    }

    #[test]
    fn stray_eox_clears_running_status() {
        assert_eq!(
            std::vec![[0x19, 0x90, 0x40, 0x7F], [0x1F, 0xF7, 0x00, 0x00]],
            receive(&[0x90, 0x40, 0x7F, 0xF7, 0x41, 0x7F]),
            "Expected left but got right"
        );
    }

    #[test]
    fn undefined_system_common_is_one_byte_common() {
        assert_eq!(
            std::vec![[0x15, 0xF4, 0x00, 0x00], [0x15, 0xF5, 0x00, 0x00]],
            receive(&[0xF4, 0xF5]),
            "Expected left but got right"
        );
    }

    #[test]
    fn running_status_survives_sysex() {
        assert_eq!(
            std::vec![
                [0x1B, 0xB0, 0x07, 0x64],
                [0x16, 0xF0, 0xF7, 0x00],
                [0x1B, 0xB0, 0x07, 0x00],
            ],
            receive(&[0xB0, 0x07, 0x64, 0xF0, 0xF7, 0x07, 0x00]),
            "Expected left but got right"
        );
    }

    #[test]
    fn packet_boundaries_do_not_depend_on_chunking() {
        let stream = [
            0x90, 0x40, 0x7F, 0x41, 0x7F, 0xF8, 0xF0, 0x01, 0x02, 0x03, 0x04, 0x05, 0xF7, 0xC0, 0x01, 0xE0, 0x00,
            0x40,
        ];
        let whole = receive(&stream);

        for chunk_size in 1..stream.len() {
            let mut receiver = Receiver::new(CableNumber::CABLE_1);
            let mut chunked = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                let mut source = chunk.iter().copied();
                chunked.extend(receiver.poll(&mut source).map(|packet| packet.to_bytes()));
            }
            assert_eq!(whole, chunked, "Chunks of {} bytes changed the packets", chunk_size);
        }
    }

    #[test]
    fn poll_receive_leaves_remaining_bytes_in_source() {
        let mut receiver = Receiver::new(CableNumber::CABLE_0);
        let mut source = [0x90, 0x40, 0x7F, 0x80, 0x40].into_iter();

        let packet = receiver.poll_receive(&mut source).unwrap();
        assert_eq!([0x09, 0x90, 0x40, 0x7F], packet.to_bytes(), "Expected left but got right");
        assert_eq!(2, source.len(), "Only the first packet's bytes should be consumed");

        assert_eq!(None, receiver.poll_receive(&mut source), "The note-off is still incomplete");
        assert_eq!(ReceiverState::AwaitingByte3, receiver.state());

        // running status carries the note-off into the next call
        let mut source = [0x00, 0x41, 0x00].into_iter();
        let packets: Vec<_> = receiver.poll(&mut source).map(|packet| packet.to_bytes()).collect();
        assert_eq!(
            std::vec![[0x08, 0x80, 0x40, 0x00], [0x08, 0x80, 0x41, 0x00]],
            packets,
            "Expected left but got right"
        );
    }

    #[test]
    fn empty_source_yields_nothing() {
        let mut receiver = Receiver::new(CableNumber::CABLE_1);
        let mut source = core::iter::empty::<u8>();
        assert_eq!(None, receiver.poll_receive(&mut source));
        assert_eq!(ReceiverState::Idle, receiver.state());
    }
}
