//! Binds the USB-MIDI bridge to embassy-usb's MIDI class.
//!
//! Transfers are requested through [`Signal`]s and carried out by one task per endpoint; each task reports back
//! through the device's completion callbacks.

use core::sync::atomic::{AtomicBool, Ordering};
use defmt::*;
use embassy_stm32::{peripherals, usb};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_usb::{
    Handler, UsbDevice,
    class::midi::{Receiver, Sender},
    driver::EndpointError,
};
use serial_usb_midi_lib::usb::{
    Endpoints, InTransfer, MAX_PACKET_SIZE, TransferError, TransferStatus, UsbMidiBridge, UsbMidiDevice,
};

pub type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;
pub type MidiDevice = UsbMidiDevice<'static, EmbassyEndpoints>;
pub type MidiBridge = UsbMidiBridge<'static, EmbassyEndpoints>;

static IN_REQUEST: Signal<CriticalSectionRawMutex, InTransfer> = Signal::new();
static OUT_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static IN_BUSY: AtomicBool = AtomicBool::new(false);
static OUT_BUSY: AtomicBool = AtomicBool::new(false);

/// [`Endpoints`] backed by the endpoint tasks below.
pub struct EmbassyEndpoints;

impl Endpoints for EmbassyEndpoints {
    fn is_in_busy(&self) -> bool {
        IN_BUSY.load(Ordering::Acquire)
    }

    fn is_out_busy(&self) -> bool {
        OUT_BUSY.load(Ordering::Acquire)
    }

    fn start_in(&mut self, transfer: &InTransfer) {
        IN_BUSY.store(true, Ordering::Release);
        IN_REQUEST.signal(*transfer);
    }

    fn start_out(&mut self) {
        OUT_BUSY.store(true, Ordering::Release);
        OUT_REQUEST.signal(());
    }
}

fn transfer_status<T>(result: Result<T, EndpointError>) -> TransferStatus {
    match result {
        Ok(_) => Ok(()),
        Err(EndpointError::BufferOverflow) => Err(TransferError::BufferOverflow),
        Err(EndpointError::Disabled) => Err(TransferError::Disabled),
    }
}

/// Tracks whether the host has configured the device.
pub struct ConnectionMonitor {
    device: &'static MidiDevice,
}

impl ConnectionMonitor {
    pub fn new(device: &'static MidiDevice) -> Self {
        Self { device }
    }
}

impl Handler for ConnectionMonitor {
    fn enabled(&mut self, enabled: bool) {
        if !enabled {
            self.device.set_connected(false);
        }
    }

    fn reset(&mut self) {
        self.device.set_connected(false);
    }

    fn configured(&mut self, configured: bool) {
        self.device.set_connected(configured);
    }
}

#[embassy_executor::task]
pub async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

/// Carries out IN transfers (device to host).
#[embassy_executor::task]
pub async fn usb_in_task(mut sender: Sender<'static, UsbDriver>, device: &'static MidiDevice) -> ! {
    loop {
        let transfer = IN_REQUEST.wait().await;
        sender.wait_connection().await;
        let status = transfer_status(sender.write_packet(transfer.as_bytes()).await);
        IN_BUSY.store(false, Ordering::Release);
        device.in_complete(status);
    }
}

/// Carries out OUT transfers (host to device).
#[embassy_executor::task]
pub async fn usb_out_task(mut receiver: Receiver<'static, UsbDriver>, device: &'static MidiDevice) -> ! {
    let mut buf = [0; MAX_PACKET_SIZE];
    loop {
        OUT_REQUEST.wait().await;
        receiver.wait_connection().await;
        let result = receiver.read_packet(&mut buf).await;
        OUT_BUSY.store(false, Ordering::Release);
        match result {
            Ok(n) => device.out_complete(Ok(()), &buf[..n]),
            Err(error) => {
                debug!("USB OUT transfer ended: {}", error);
                device.out_complete(transfer_status(Err::<usize, _>(error)), &[]);
            }
        }
    }
}
