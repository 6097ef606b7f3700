//! The serial transmit path: mainline code queues raw MIDI bytes with [`TransmitQueue`] and the UART's
//! interrupt handler drains them one byte per interrupt with [`TransmitInterrupt`].
//!
//! The two sides coordinate through an `idle` flag. The handler raises it when it finds nothing to send, at
//! which point the UART stops interrupting. The producer samples it while publishing each byte, and if it was
//! raised, pends the UART interrupt in software so the handler starts draining again. Both the raise and the
//! sample happen with the UART's interrupt line masked, so the handler can never go idle between the producer
//! publishing a byte and checking the flag.

use crate::{
    configuration::MIDI_TX_FIFO_SIZE,
    interrupt::InterruptLine,
    ring::{Consumer, Producer, dequeue_critical, enqueue_masked},
};
use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

/// Problems queueing bytes for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitError {
    /// The transmit ring has no room for another byte.
    Full,
}

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "Serial transmit queue is full"),
        }
    }
}

/// What the interrupt handler did during one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxEvent {
    /// Nothing was queued; the port is now idle.
    Idle,
    /// The byte was handed to the transmit register.
    Sent(u8),
}

/// The producer side of a port's transmit path.
pub struct TransmitQueue<'a, L, const N: usize = MIDI_TX_FIFO_SIZE> {
    producer: Producer<'a, u8, N>,
    idle: &'a AtomicBool,
    line: L,
}

impl<'a, L: InterruptLine, const N: usize> TransmitQueue<'a, L, N> {
    pub(crate) fn new(producer: Producer<'a, u8, N>, idle: &'a AtomicBool, line: L) -> Self {
        Self { producer, idle, line }
    }

    /// Queues every byte of `bytes`, spinning whenever the ring is full until the interrupt handler makes room.
    /// Bytes are never dropped.
    pub fn transmit(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            while self.try_transmit(byte).is_err() {
                core::hint::spin_loop();
            }
        }
    }

    /// Queues a single byte without waiting.
    pub fn try_transmit(&mut self, byte: u8) -> Result<(), TransmitError> {
        let idle = self.idle;
        let was_idle = enqueue_masked(&mut self.producer, byte, &self.line, || idle.load(Ordering::Acquire))
            .map_err(|_| TransmitError::Full)?;

        if was_idle {
            self.line.pend();
        }
        Ok(())
    }

    /// Number of bytes waiting to go out.
    pub fn pending(&self) -> usize {
        self.producer.len()
    }

    /// Reports whether the interrupt handler last found nothing to send.
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }
}

/// The interrupt-side half of a port's transmit path, registered with the UART's interrupt vector.
pub struct TransmitInterrupt<'a, const N: usize = MIDI_TX_FIFO_SIZE> {
    consumer: Consumer<'a, u8, N>,
    idle: &'a AtomicBool,
}

impl<'a, const N: usize> TransmitInterrupt<'a, N> {
    pub(crate) fn new(consumer: Consumer<'a, u8, N>, idle: &'a AtomicBool) -> Self {
        Self { consumer, idle }
    }

    /// Services one transmit interrupt. The caller has already cleared the hardware flag; `write` stores a
    /// byte in the UART's transmit register.
    ///
    /// `line` is the UART's own interrupt line and stays masked for the duration.
    pub fn service<L: InterruptLine>(&mut self, line: &L, write: impl FnOnce(u8)) -> TxEvent {
        line.masked(|| match dequeue_critical(&mut self.consumer) {
            None => {
                self.idle.store(true, Ordering::Release);
                TxEvent::Idle
            }
            Some(byte) => {
                self.idle.store(false, Ordering::Release);
                write(byte);
                TxEvent::Sent(byte)
            }
        })
    }
}
