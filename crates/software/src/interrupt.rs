//! Interrupt plumbing shared by the serial transmit path and the firmware's interrupt handlers.
//!
//! A hardware vector can't carry a parameter, so each handler has to find its state somewhere global. Rather than
//! declaring one global per port, handlers are registered once at init in an [`InterruptRegistry`] keyed by vector,
//! and the ISR trampoline looks its handler up by vector identity.
//!
//! Critical sections are likewise scoped to the one interrupt line that could race with the code inside them
//! (see [`InterruptLine::masked`]) rather than disabling every interrupt on the chip.

use core::{cell::RefCell, fmt};
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};

/// A single interrupt line at the interrupt controller.
pub trait InterruptLine {
    /// Masks the line, returning `true` if it was enabled beforehand.
    fn disable(&self) -> bool;

    /// Unmasks the line.
    fn enable(&self);

    /// Marks the line pending so its handler runs as soon as the line is unmasked; used to kick-start
    /// interrupt-driven work from thread mode.
    fn pend(&self);

    /// Runs `f` with this line (and only this line) masked, restoring the previous mask state afterwards.
    fn masked<R>(&self, f: impl FnOnce() -> R) -> R
    where
        Self: Sized,
    {
        let _masked = MaskedLine::new(self);
        f()
    }
}

impl<L: InterruptLine> InterruptLine for &L {
    fn disable(&self) -> bool {
        (**self).disable()
    }

    fn enable(&self) {
        (**self).enable()
    }

    fn pend(&self) {
        (**self).pend()
    }
}

/// Guard which keeps an [`InterruptLine`] masked for as long as it lives.
///
/// The line is only re-enabled on drop if it was enabled when the guard was created, so guards nest.
pub struct MaskedLine<'a, L: InterruptLine> {
    line: &'a L,
    restore: bool,
}

impl<'a, L: InterruptLine> MaskedLine<'a, L> {
    /// Masks `line`.
    pub fn new(line: &'a L) -> Self {
        let restore = line.disable();
        Self { line, restore }
    }
}

impl<L: InterruptLine> Drop for MaskedLine<'_, L> {
    fn drop(&mut self) {
        if self.restore {
            self.line.enable();
        }
    }
}

/// Problems registering an interrupt handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// Every slot in the registry is taken.
    Full,
    /// A handler was already registered for this vector.
    AlreadyRegistered,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "Interrupt registry is full"),
            Self::AlreadyRegistered => write!(f, "Vector already has a handler"),
        }
    }
}

/// A static table mapping interrupt vectors (`K`) to the state their handlers operate on (`H`).
///
/// Designed to live in a `static`, populated during init and read from the ISR:
///
/// ```
/// # use critical_section as _;
/// use serial_usb_midi_lib::interrupt::InterruptRegistry;
///
/// static PORTS: InterruptRegistry<u16, u32, 2> = InterruptRegistry::new();
///
/// PORTS.register(82, 0).unwrap();
/// // inside the vector 82 trampoline
/// PORTS.dispatch(82, |count| *count += 1);
/// assert_eq!(Some(1), PORTS.dispatch(82, |count| *count));
/// ```
pub struct InterruptRegistry<K, H, const P: usize> {
    slots: Mutex<CriticalSectionRawMutex, RefCell<[Option<(K, H)>; P]>>,
}

impl<K: Copy + PartialEq, H, const P: usize> InterruptRegistry<K, H, P> {
    /// Constructs an empty registry.
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(RefCell::new([const { None }; P])),
        }
    }

    /// Associates `handler` with `vector`. Expected to be called once per vector during init.
    pub fn register(&self, vector: K, handler: H) -> Result<(), RegistryError> {
        self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            if slots.iter().flatten().any(|(k, _)| *k == vector) {
                return Err(RegistryError::AlreadyRegistered);
            }
            let slot = slots
                .iter_mut()
                .find(|slot| slot.is_none())
                .ok_or(RegistryError::Full)?;
            *slot = Some((vector, handler));
            Ok(())
        })
    }

    /// Runs `f` against the handler registered for `vector`. Returns `None` if nothing is registered, which
    /// happens when the interrupt fires before init has finished.
    pub fn dispatch<R>(&self, vector: K, f: impl FnOnce(&mut H) -> R) -> Option<R> {
        self.slots.lock(|slots| {
            slots
                .borrow_mut()
                .iter_mut()
                .flatten()
                .find(|(k, _)| *k == vector)
                .map(|(_, handler)| f(handler))
        })
    }
}

impl<K: Copy + PartialEq, H, const P: usize> Default for InterruptRegistry<K, H, P> {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::{mock::MockLine, *};

    #[test]
    fn masked_restores_line() {
        let line = MockLine::new();
        let seen = line.masked(|| line.is_enabled());
        assert!(!seen, "Line should be masked inside the section");
        assert!(line.is_enabled(), "Line should be unmasked after the section");
    }

    #[test]
    fn nested_masks_only_restore_once() {
        let line = MockLine::new();
        line.masked(|| {
            line.masked(|| ());
            assert!(!line.is_enabled(), "Inner section must not unmask the outer one");
        });
        assert!(line.is_enabled());
    }

    #[test]
    fn masked_leaves_disabled_line_disabled() {
        let line = MockLine::new();
        line.disable();
        line.masked(|| ());
        assert!(!line.is_enabled(), "A line disabled beforehand should stay disabled");
    }

    #[test]
    fn dispatch_finds_registered_handler() {
        let registry: InterruptRegistry<u8, u32, 2> = InterruptRegistry::new();
        registry.register(3, 10).unwrap();
        registry.register(7, 20).unwrap();

        assert_eq!(Some(20), registry.dispatch(7, |h| *h), "Expected left but got right");
        assert_eq!(Some(11), registry.dispatch(3, |h| {
            *h += 1;
            *h
        }));
        assert_eq!(None, registry.dispatch(4, |h| *h));
    }

    #[test]
    fn register_rejects_duplicates_and_overflow() {
        let registry: InterruptRegistry<u8, (), 1> = InterruptRegistry::new();
        assert_eq!(Ok(()), registry.register(1, ()));
        assert_eq!(Err(RegistryError::AlreadyRegistered), registry.register(1, ()));
        assert_eq!(Err(RegistryError::Full), registry.register(2, ()));
        assert_eq!(Some(()), registry.dispatch(1, |_| ()));
        assert_eq!(None, registry.dispatch(2, |_| ()), "A refused handler shouldn't be dispatched");
    }
}
