//! The fixed-capacity queues used for the serial transmitter ([`ByteRing`]) and each USB direction
//! ([`PacketRing`]).
//!
//! Both are [`heapless::spsc::Queue`]s. A queue is [split](heapless::spsc::Queue::split) once into a single
//! [`Producer`] and a single [`Consumer`], typically living in different contexts (thread mode and an interrupt
//! handler); the head index is only ever written through the producer and the tail index only through the
//! consumer.
//!
//! One slot is always left empty so that a full ring can be told apart from an empty one. A ring of `N` slots
//! therefore holds at most `N - 1` items.

use crate::{configuration::MIDI_TX_FIFO_SIZE, interrupt::InterruptLine, packet::MidiPacket};
use heapless::spsc::Queue;

pub use heapless::spsc::{Consumer, Producer};

/// Ring of raw MIDI bytes awaiting the serial transmitter.
pub type ByteRing<const N: usize = MIDI_TX_FIFO_SIZE> = Queue<u8, N>;

/// Ring of USB-MIDI Event Packets; one per USB direction.
pub type PacketRing<const N: usize> = Queue<MidiPacket, N>;

/// Enqueues `item` with `line` masked, running `alongside` in the same masked section and returning its result.
///
/// A full ring hands `item` back without touching the line.
pub fn enqueue_masked<T, L: InterruptLine, R, const N: usize>(
    producer: &mut Producer<'_, T, N>,
    item: T,
    line: &L,
    alongside: impl FnOnce() -> R,
) -> Result<R, T> {
    // only this producer fills the ring, so room seen here is still there once masked
    if !producer.ready() {
        return Err(item);
    }
    line.masked(|| producer.enqueue(item).map(|()| alongside()))
}

/// Dequeues the oldest item inside a global critical section, so the tail update is atomic with respect to
/// every other context.
pub fn dequeue_critical<T, const N: usize>(consumer: &mut Consumer<'_, T, N>) -> Option<T> {
    critical_section::with(|_| consumer.dequeue())
}

/// Number of items which could be enqueued right now.
pub fn room<T, const N: usize>(producer: &Producer<'_, T, N>) -> usize {
    producer.capacity() - producer.len()
}
