//! Provides [`SerialPort`], everything the device keeps for one serial MIDI port: the receive state machine,
//! the transmit ring, and the transmitter's idle flag.
//!
//! A port is created once, in static storage, and then [split](SerialPort::split) into the [`SerialMidi`]
//! handle used by mainline code and the [`TransmitInterrupt`] handed to the UART's interrupt handler.

use crate::{
    configuration::MIDI_TX_FIFO_SIZE,
    interrupt::InterruptLine,
    packet::{CableNumber, MidiPacket},
    receive::{ByteSource, Packets, Receiver},
    ring::ByteRing,
    transmit::{TransmitError, TransmitInterrupt, TransmitQueue},
};
use core::sync::atomic::{AtomicBool, Ordering};
use heapless::spsc::Queue;

/// State for one serial MIDI port.
pub struct SerialPort<const N: usize = MIDI_TX_FIFO_SIZE> {
    cable: CableNumber,
    receiver: Receiver,
    ring: ByteRing<N>,
    idle: AtomicBool,
}

impl<const N: usize> SerialPort<N> {
    /// Constructs a port whose received packets are addressed to `cable`. The transmitter starts out idle.
    pub const fn new(cable: CableNumber) -> Self {
        Self {
            cable,
            receiver: Receiver::new(cable),
            ring: Queue::new(),
            idle: AtomicBool::new(true),
        }
    }

    /// Getter.
    pub fn cable(&self) -> CableNumber {
        self.cable
    }

    /// Reports whether the transmitter has nothing left to send.
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    /// Splits the port into its mainline and interrupt halves. `line` is the UART's interrupt line.
    pub fn split<L: InterruptLine>(&mut self, line: L) -> (SerialMidi<'_, L, N>, TransmitInterrupt<'_, N>) {
        let Self {
            cable,
            receiver,
            ring,
            idle,
        } = self;
        let idle: &AtomicBool = idle;
        let (producer, consumer) = ring.split();

        (
            SerialMidi {
                cable: *cable,
                receiver,
                queue: TransmitQueue::new(producer, idle, line),
            },
            TransmitInterrupt::new(consumer, idle),
        )
    }
}

/// The mainline handle to a serial MIDI port.
pub struct SerialMidi<'a, L, const N: usize = MIDI_TX_FIFO_SIZE> {
    cable: CableNumber,
    receiver: &'a mut Receiver,
    queue: TransmitQueue<'a, L, N>,
}

impl<L: InterruptLine, const N: usize> SerialMidi<'_, L, N> {
    /// Getter.
    pub fn cable(&self) -> CableNumber {
        self.cable
    }

    /// Queues raw MIDI bytes for transmission, blocking while the transmit ring is full.
    pub fn transmit(&mut self, bytes: &[u8]) {
        self.queue.transmit(bytes);
    }

    /// Queues a packet's meaningful bytes for transmission, blocking while the transmit ring is full.
    pub fn transmit_packet(&mut self, packet: &MidiPacket) {
        self.queue.transmit(packet.payload());
    }

    /// Queues a single byte without blocking.
    pub fn try_transmit(&mut self, byte: u8) -> Result<(), TransmitError> {
        self.queue.try_transmit(byte)
    }

    /// Reads from `source` until the next packet completes or the source runs dry.
    pub fn poll_receive<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> Option<MidiPacket> {
        self.receiver.poll_receive(source)
    }

    /// Drains `source`, yielding every packet it completes.
    pub fn packets<'s, S: ByteSource + ?Sized>(&mut self, source: &'s mut S) -> Packets<'_, 's, S> {
        self.receiver.poll(source)
    }

    /// Reports whether the transmitter has nothing left to send.
    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
    }

    /// Number of bytes waiting to go out.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::{interrupt::mock::MockLine, transmit::TxEvent};
    use std::vec::Vec;

    /// Stands in for the NVIC and the UART: runs the handler whenever its line is pending, and models the
    /// transmit-complete interrupt by pending the line again after every byte sent.
    fn run_interrupts(line: &MockLine, isr: &mut TransmitInterrupt<'_>, wire: &mut Vec<u8>) {
        while line.take_pending() {
            if let TxEvent::Sent(_) = isr.service(line, |byte| wire.push(byte)) {
                line.pend();
            }
        }
    }

    #[test]
    fn note_on_goes_out_the_wire() {
        let line = MockLine::new();
        let mut port: SerialPort = SerialPort::new(CableNumber::CABLE_1);
        let (mut midi, mut isr) = port.split(&line);
        let mut wire = Vec::new();

        assert!(midi.is_idle(), "A new port should be idle");
        midi.transmit(&[0x90, 0x3C, 0x64]);
        run_interrupts(&line, &mut isr, &mut wire);

        assert_eq!(std::vec![0x90, 0x3C, 0x64], wire, "Expected left but got right");
        assert!(midi.is_idle(), "Port should return to idle once drained");
        assert_eq!(0, midi.pending());
        assert!(line.is_enabled(), "Line must be unmasked after the handler");
    }

    #[test]
    fn only_the_first_byte_after_idle_pends_the_line() {
        let line = MockLine::new();
        let mut port: SerialPort = SerialPort::new(CableNumber::CABLE_1);
        let (mut midi, mut isr) = port.split(&line);

        midi.try_transmit(0xF8).unwrap();
        assert!(line.take_pending(), "Queueing onto an idle port should pend the interrupt");

        assert_eq!(TxEvent::Sent(0xF8), isr.service(&line, |_| ()));
        assert!(!midi.is_idle());

        midi.try_transmit(0xFA).unwrap();
        assert!(!line.take_pending(), "A busy transmitter will interrupt on its own");

        assert_eq!(TxEvent::Sent(0xFA), isr.service(&line, |_| ()));
        assert_eq!(TxEvent::Idle, isr.service(&line, |_| ()));
        assert!(midi.is_idle());
    }

    #[test]
    fn full_ring_refuses_until_the_handler_drains() {
        let line = MockLine::new();
        let mut port: SerialPort<8> = SerialPort::new(CableNumber::CABLE_1);
        let (mut midi, mut isr) = port.split(&line);

        for byte in 0..7 {
            assert_eq!(Ok(()), midi.try_transmit(byte), "Expected left but got right");
        }
        assert_eq!(Err(TransmitError::Full), midi.try_transmit(7));

        assert_eq!(TxEvent::Sent(0), isr.service(&line, |_| ()));
        assert_eq!(Ok(()), midi.try_transmit(7));
    }

    #[test]
    fn transmit_blocks_until_room_and_keeps_order() {
        let line = MockLine::new();
        let mut port: SerialPort = SerialPort::new(CableNumber::CABLE_1);
        let (mut midi, mut isr) = port.split(&line);
        let bytes: Vec<u8> = (0..200_u32).map(|n| (n % 0x80) as u8).collect();

        let wire = std::thread::scope(|scope| {
            scope.spawn(|| midi.transmit(&bytes));

            // the handler thread behaves as if the transmit-complete interrupt always fires
            let mut wire = Vec::new();
            while wire.len() < bytes.len() {
                if isr.service(&line, |byte| wire.push(byte)) == TxEvent::Idle {
                    std::thread::yield_now();
                }
            }
            wire
        });

        assert_eq!(bytes, wire, "Every byte should arrive, in order");
    }

    #[test]
    fn receives_with_the_port_cable() {
        let line = MockLine::new();
        let mut port: SerialPort = SerialPort::new(CableNumber::CABLE_1);
        let (mut midi, _isr) = port.split(&line);
        let mut source = [0xB0, 0x07, 0x64, 0x08, 0x40].into_iter();

        let packets: Vec<_> = midi.packets(&mut source).map(|packet| packet.to_bytes()).collect();
        assert_eq!(
            std::vec![[0x1B, 0xB0, 0x07, 0x64], [0x1B, 0xB0, 0x08, 0x40]],
            packets,
            "Expected left but got right"
        );
    }

    #[test]
    fn transmit_packet_sends_only_the_payload() {
        let line = MockLine::new();
        let mut port: SerialPort = SerialPort::new(CableNumber::CABLE_1);
        let (mut midi, mut isr) = port.split(&line);
        let mut wire = Vec::new();

        let packet = MidiPacket::try_from([0x1C, 0xC0, 0x05, 0x00]).unwrap();
        midi.transmit_packet(&packet);
        run_interrupts(&line, &mut isr, &mut wire);

        assert_eq!(std::vec![0xC0, 0x05], wire, "Expected left but got right");
    }
}
