//! Moves [`MidiPacket`]s between the USB bulk endpoints and the application.
//!
//! Each direction has its own [`PacketRing`](crate::ring::PacketRing). In the OUT direction (host to device)
//! [`UsbMidiDevice::out_complete`] unpacks a finished transfer onto the receive ring and the application pops
//! packets with [`UsbMidiBridge::poll`]. In the IN direction (device to host) the application pushes packets with
//! [`UsbMidiBridge::write`], and whenever the IN endpoint is idle everything queued so far (up to one endpoint's
//! worth) is copied into a single transfer. Packets written while a transfer is in flight are picked up by
//! [`UsbMidiDevice::in_complete`] when it lands.
//!
//! The USB stack itself is reached through the [`Endpoints`] trait.

use crate::{
    configuration::{USB_RX_FIFO_SIZE, USB_TX_FIFO_SIZE},
    packet::MidiPacket,
    ring::{Consumer, Producer, room},
};
use core::{
    cell::RefCell,
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use tinyvec::{ArrayVec, array_vec};

/// Maximum packet size of the bulk endpoints, in bytes.
pub const MAX_PACKET_SIZE: usize = 64;

/// Number of [`MidiPacket`]s which fit in one bulk transfer.
pub const PACKETS_PER_TRANSFER: usize = MAX_PACKET_SIZE / MidiPacket::SIZE;

/// Ways a bulk transfer can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    /// The endpoint is disabled, e.g., because the host deconfigured the device or the cable was pulled.
    Disabled,
    /// The host sent more data than the buffer could hold.
    BufferOverflow,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "Endpoint is disabled"),
            Self::BufferOverflow => write!(f, "Transfer overflowed its buffer"),
        }
    }
}

/// Outcome of a bulk transfer, as reported to the completion callbacks.
pub type TransferStatus = Result<(), TransferError>;

/// Problems writing a packet to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbWriteError {
    /// The transmit ring is full, most likely because no host is reading; the packet is handed back.
    Full(MidiPacket),
}

impl fmt::Display for UsbWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(packet) => write!(f, "USB transmit queue is full; dropping {:?}", packet),
        }
    }
}

/// The pair of bulk endpoints used by the USB-MIDI interface.
pub trait Endpoints {
    /// Reports whether an IN transfer is in flight.
    fn is_in_busy(&self) -> bool;

    /// Reports whether an OUT transfer is armed.
    fn is_out_busy(&self) -> bool;

    /// Starts sending `transfer` to the host. The endpoint reports busy until the transfer completes.
    fn start_in(&mut self, transfer: &InTransfer);

    /// Arms the OUT endpoint to receive up to [`MAX_PACKET_SIZE`] bytes from the host.
    fn start_out(&mut self);
}

/// The contents of a single IN transfer: whole packets, back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InTransfer {
    data: ArrayVec<[u8; MAX_PACKET_SIZE]>,
}

impl InTransfer {
    fn new() -> Self {
        Self { data: array_vec!() }
    }

    /// Appends a packet, returning `false` if the transfer is already full.
    fn push(&mut self, packet: MidiPacket) -> bool {
        if self.data.len() + MidiPacket::SIZE > self.data.capacity() {
            return false;
        }
        self.data.extend_from_slice(&packet.to_bytes());
        true
    }

    fn is_full(&self) -> bool {
        self.data.len() + MidiPacket::SIZE > self.data.capacity()
    }

    /// The raw bytes to hand to the endpoint.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of packets in the transfer.
    pub fn len(&self) -> usize {
        self.data.len() / MidiPacket::SIZE
    }

    /// Returns `true` if the transfer holds no packets.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

struct Device<'a, E, const RX: usize, const TX: usize> {
    endpoints: E,
    rx: Producer<'a, MidiPacket, RX>,
    tx: Consumer<'a, MidiPacket, TX>,
    dropped: u32,
}

impl<E: Endpoints, const RX: usize, const TX: usize> Device<'_, E, RX, TX> {
    /// Copies as many queued packets as fit into one transfer and starts it. Returns `false` if the endpoint was
    /// busy or there was nothing to send.
    fn drain(&mut self) -> bool {
        if self.endpoints.is_in_busy() {
            return false;
        }

        let mut transfer = InTransfer::new();
        while !transfer.is_full() {
            let Some(packet) = self.tx.dequeue() else {
                break;
            };
            transfer.push(packet);
        }

        if transfer.is_empty() {
            return false;
        }
        self.endpoints.start_in(&transfer);
        true
    }

    /// Arms the OUT endpoint if it isn't already and the receive ring could absorb a full transfer.
    fn arm(&mut self) -> bool {
        if self.endpoints.is_out_busy() || room(&self.rx) < PACKETS_PER_TRANSFER {
            return false;
        }
        self.endpoints.start_out();
        true
    }

    fn receive(&mut self, data: &[u8]) {
        let chunks = data.chunks_exact(MidiPacket::SIZE);
        if !chunks.remainder().is_empty() {
            #[cfg(feature = "defmt")]
            defmt::warn!("Discarding {} trailing bytes of a USB transfer", chunks.remainder().len());
        }

        for chunk in chunks {
            let Ok(raw) = <[u8; 4]>::try_from(chunk) else {
                continue;
            };
            let packet = match MidiPacket::try_from(raw) {
                Ok(packet) => packet,
                Err(_error) => {
                    // hosts commonly pad transfers with zeroed packets
                    #[cfg(feature = "defmt")]
                    defmt::trace!("Discarding USB packet: {}", _error);
                    continue;
                }
            };
            if self.rx.enqueue(packet).is_err() {
                self.dropped = self.dropped.wrapping_add(1);
                #[cfg(feature = "defmt")]
                defmt::warn!("USB receive queue full; dropped {}", packet);
            }
        }
    }
}

/// The device side of the USB-MIDI interface, shared between the application and the USB completion handlers.
///
/// Owns the endpoints, the producer half of the receive ring, and the consumer half of the transmit ring.
pub struct UsbMidiDevice<'a, E, const RX: usize = USB_RX_FIFO_SIZE, const TX: usize = USB_TX_FIFO_SIZE> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Device<'a, E, RX, TX>>>,
    connected: AtomicBool,
}

impl<'a, E: Endpoints, const RX: usize, const TX: usize> UsbMidiDevice<'a, E, RX, TX> {
    /// Constructs a device. `rx` is where packets from the host are queued; `tx` is where packets for the host are
    /// taken from.
    pub fn new(endpoints: E, rx: Producer<'a, MidiPacket, RX>, tx: Consumer<'a, MidiPacket, TX>) -> Self {
        const { assert!(RX > PACKETS_PER_TRANSFER, "receive ring must hold a full transfer") };
        Self {
            inner: Mutex::new(RefCell::new(Device {
                endpoints,
                rx,
                tx,
                dropped: 0,
            })),
            connected: AtomicBool::new(false),
        }
    }

    /// Completion callback for the OUT endpoint. On success, queues every packet in `data`. Invalid packets and a
    /// trailing partial packet are discarded; packets which don't fit in the receive ring are dropped and counted.
    ///
    /// The OUT endpoint is not re-armed here; see [`UsbMidiBridge::poll`].
    pub fn out_complete(&self, status: TransferStatus, data: &[u8]) {
        if let Err(_error) = status {
            #[cfg(feature = "defmt")]
            defmt::warn!("USB OUT transfer failed: {}", _error);
            return;
        }
        self.lock(|device| device.receive(data));
    }

    /// Completion callback for the IN endpoint. On success, starts the next transfer if anything is queued.
    ///
    /// A failed transfer does not start another; the next successful completion or the next
    /// [`UsbMidiBridge::write`] picks the queue back up.
    pub fn in_complete(&self, status: TransferStatus) {
        if let Err(_error) = status {
            #[cfg(feature = "defmt")]
            defmt::warn!("USB IN transfer failed: {}", _error);
            return;
        }
        self.lock(|device| device.drain());
    }

    /// Starts an IN transfer if the endpoint is idle and anything is queued. Returns `true` if one was started.
    pub fn start_in_if_idle(&self) -> bool {
        self.lock(|device| device.drain())
    }

    /// Arms the OUT endpoint if it is idle and the receive ring has room for a full transfer. Returns `true` if
    /// it was armed.
    pub fn start_out_if_idle(&self) -> bool {
        self.lock(|device| device.arm())
    }

    /// Records the host connection state, returning `true` if it changed.
    pub fn set_connected(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::AcqRel) != connected
    }

    /// Reports whether a host has configured the device.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of packets from the host dropped because the receive ring was full.
    pub fn dropped_packets(&self) -> u32 {
        self.lock(|device| device.dropped)
    }

    /// Runs `f` with exclusive access to the endpoints.
    #[cfg(test)]
    pub(crate) fn with_endpoints<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        self.lock(|device| f(&mut device.endpoints))
    }

    fn lock<R>(&self, f: impl FnOnce(&mut Device<'a, E, RX, TX>) -> R) -> R {
        self.inner.lock(|device| f(&mut device.borrow_mut()))
    }
}

/// The application's handle to the USB-MIDI interface.
pub struct UsbMidiBridge<'a, E, const RX: usize = USB_RX_FIFO_SIZE, const TX: usize = USB_TX_FIFO_SIZE> {
    rx: Consumer<'a, MidiPacket, RX>,
    tx: Producer<'a, MidiPacket, TX>,
    device: &'a UsbMidiDevice<'a, E, RX, TX>,
}

impl<'a, E: Endpoints, const RX: usize, const TX: usize> UsbMidiBridge<'a, E, RX, TX> {
    /// Constructs a bridge from the application's halves of the two rings and the device which owns the others.
    pub fn new(
        rx: Consumer<'a, MidiPacket, RX>,
        tx: Producer<'a, MidiPacket, TX>,
        device: &'a UsbMidiDevice<'a, E, RX, TX>,
    ) -> Self {
        Self { rx, tx, device }
    }

    /// Queues a packet for the host and starts a transfer if none is in flight.
    ///
    /// Never blocks: if the transmit ring is still full after trying to drain it, the packet is handed back.
    pub fn write(&mut self, packet: MidiPacket) -> Result<(), UsbWriteError> {
        if let Err(packet) = self.tx.enqueue(packet) {
            self.device.start_in_if_idle();
            self.tx.enqueue(packet).map_err(UsbWriteError::Full)?;
        }
        self.device.start_in_if_idle();
        Ok(())
    }

    /// Returns the oldest packet received from the host, if any, and re-arms the OUT endpoint when there is room
    /// for another transfer.
    pub fn poll(&mut self) -> Option<MidiPacket> {
        let packet = self.rx.dequeue();
        self.device.start_out_if_idle();
        packet
    }

    /// Reports whether a host has configured the device.
    pub fn is_connected(&self) -> bool {
        self.device.is_connected()
    }

    /// Number of packets from the host dropped because the receive ring was full.
    pub fn dropped_packets(&self) -> u32 {
        self.device.dropped_packets()
    }
}
