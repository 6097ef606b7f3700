//! [Embassy](https://embassy.dev)-based firmware for a serial MIDI to USB-MIDI interface. The firmware runs on the
//! [Nucleo-F767ZI development board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html), which is powered
//! by an F7-series STM32 microcontroller.
//!
//! The board shows up on the host as a USB-MIDI device with two cables. Cable 1 is bridged to a 5-pin DIN MIDI
//! port on USART6 in both directions. Cable 0 is for the device itself: Control Change 80 and 81 light the two
//! indicator LEDs. The two panel buttons play a note each, both out the MIDI port and to the host.

#![no_std]
#![no_main]

mod panel;
mod serial_port;
mod usb;

use crate::{
    panel::{BUTTON_EVENTS, Indicators, button_task},
    serial_port::{MIDI_UART_INTERRUPT, TX_PORTS, UartLine, UartReceiver, enable_transmit_interrupt, uart_config},
    usb::{
        ConnectionMonitor, EmbassyEndpoints, MidiBridge, MidiDevice, usb_in_task, usb_out_task, usb_task,
    },
};
use defmt::*;
use embassy_executor::Spawner;
use embassy_futures::yield_now;
use embassy_stm32::{
    Config, bind_interrupts,
    exti::ExtiInput,
    gpio::{Level, Output, Pull, Speed},
    mode::Blocking,
    peripherals,
    time::Hertz,
    usart::Uart,
    usb as stm32_usb,
};
use embassy_usb::{Builder, class::midi::MidiClass};
use serial_usb_midi_lib::{
    configuration::{Routing, USB_RX_FIFO_SIZE, USB_TX_FIFO_SIZE, UartConfig, UsbIdentity},
    packet::MidiPacket,
    ring::PacketRing,
    routing::{Destination, PanelButton},
    serial::{SerialMidi, SerialPort},
    usb::{MAX_PACKET_SIZE, UsbMidiBridge, UsbMidiDevice},
};
use static_cell::StaticCell;

use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => stm32_usb::InterruptHandler<peripherals::USB_OTG_FS>;
    }
);

/// Number of virtual MIDI jacks in each direction, one per cable.
const CABLE_COUNT: u8 = 2;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing serial MIDI interface");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // USB OTG FS needs 48MHz, which comes from the main PLL's Q output
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    let p = embassy_stm32::init(config);
    let routing = Routing::default();

    // serial MIDI on USART6: RX on PG9, TX on PG14 (CN10 on the Nucleo)
    static UART: StaticCell<Uart<'static, Blocking>> = StaticCell::new();
    let uart = unwrap!(Uart::new_blocking(
        p.USART6,
        p.PG9,
        p.PG14,
        uart_config(&UartConfig::default())
    ));
    // kept alive so the peripheral stays configured; bytes move through the registers directly
    UART.init(uart);

    static SERIAL_PORT: StaticCell<SerialPort> = StaticCell::new();
    let (serial, tx_interrupt) = SERIAL_PORT
        .init(SerialPort::new(routing.serial_cable))
        .split(UartLine(MIDI_UART_INTERRUPT));
    unwrap!(TX_PORTS.register(MIDI_UART_INTERRUPT, tx_interrupt));
    enable_transmit_interrupt();

    // packet rings and the device which owns the USB halves of them
    static USB_RX: StaticCell<PacketRing<USB_RX_FIFO_SIZE>> = StaticCell::new();
    static USB_TX: StaticCell<PacketRing<USB_TX_FIFO_SIZE>> = StaticCell::new();
    let (rx_producer, rx_consumer) = USB_RX.init(PacketRing::new()).split();
    let (tx_producer, tx_consumer) = USB_TX.init(PacketRing::new()).split();

    static MIDI_DEVICE: StaticCell<MidiDevice> = StaticCell::new();
    let device: &'static MidiDevice = MIDI_DEVICE.init(UsbMidiDevice::new(EmbassyEndpoints, rx_producer, tx_consumer));
    let bridge = UsbMidiBridge::new(rx_consumer, tx_producer, device);

    // Create the driver, from the HAL.
    static ENDPOINT_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let mut usb_config = stm32_usb::Config::default();

    // USB devices which are self-powered (i.e., that can stay powered on if unplugged from the host)
    // need to enable vbus_detection to comply with the USB spec. Per section 6.10 of the Nucleo board
    // manual (UM1974), CN13 (the USB port) cannot power the board; external power is necessary.
    usb_config.vbus_detection = true;

    let driver = stm32_usb::Driver::new_fs(
        p.USB_OTG_FS,
        Irqs,
        p.PA12,
        p.PA11,
        ENDPOINT_OUT_BUFFER.init([0; 256]),
        usb_config,
    );

    let identity = UsbIdentity::default();
    let mut config = embassy_usb::Config::new(identity.vendor_id, identity.product_id);
    config.manufacturer = Some(identity.manufacturer);
    config.product = Some(identity.product);
    config.serial_number = Some(identity.serial_number);
    config.self_powered = identity.self_powered;
    config.max_power = identity.max_power_ma;

    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();
    static CONNECTION_MONITOR: StaticCell<ConnectionMonitor> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // no msos descriptors
        CONTROL_BUFFER.init([0; 64]),
    );
    builder.handler(CONNECTION_MONITOR.init(ConnectionMonitor::new(device)));

    let class = MidiClass::new(&mut builder, CABLE_COUNT, CABLE_COUNT, MAX_PACKET_SIZE as u16);
    let usb = builder.build();
    let (sender, receiver) = class.split();

    unwrap!(spawner.spawn(usb_task(usb)));
    unwrap!(spawner.spawn(usb_in_task(sender, device)));
    unwrap!(spawner.spawn(usb_out_task(receiver, device)));

    // the user button on the Nucleo is active high; the second button pulls PD1 to ground
    let button0 = ExtiInput::new(p.PC13, p.EXTI13, Pull::None);
    unwrap!(spawner.spawn(button_task(button0, PanelButton::BUTTON_0, false)));
    let button1 = ExtiInput::new(p.PD1, p.EXTI1, Pull::Up);
    unwrap!(spawner.spawn(button_task(button1, PanelButton::BUTTON_1, true)));

    let indicators = Indicators::new(
        Output::new(p.PB0, Level::Low, Speed::Low),
        Output::new(p.PB7, Level::Low, Speed::Low),
    );

    unwrap!(spawner.spawn(bridge_task(serial, bridge, indicators, routing)));
}

/// The main loop: moves packets between the serial port, the host, and the front panel.
#[embassy_executor::task]
async fn bridge_task(
    mut serial: SerialMidi<'static, UartLine>,
    mut usb: MidiBridge,
    mut indicators: Indicators,
    routing: Routing,
) -> ! {
    let mut uart = UartReceiver;
    let mut was_connected = false;
    let mut dropped = 0;

    loop {
        let connected = usb.is_connected();
        if connected != was_connected {
            if connected {
                info!("Connected to bus");
            } else {
                info!("Disconnected from bus");
            }
            was_connected = connected;
        }

        let now_dropped = usb.dropped_packets();
        if now_dropped != dropped {
            warn!("Dropped {} packets from the host", now_dropped.wrapping_sub(dropped));
            dropped = now_dropped;
        }

        while let Ok((button, edge)) = BUTTON_EVENTS.try_receive() {
            match button.packet(edge, routing.serial_cable) {
                Ok(packet) => {
                    serial.transmit_packet(&packet);
                    send_to_host(&mut usb, packet);
                }
                Err(error) => error!("Could not package button message: {}", error),
            }
        }

        while let Some(packet) = serial.poll_receive(&mut uart) {
            send_to_host(&mut usb, routing.to_host(packet));
        }

        while let Some(packet) = usb.poll() {
            match routing.route(&packet) {
                Destination::SerialOut(bytes) => serial.transmit(bytes),
                Destination::Indicator { led, lit } => indicators.set(led, lit),
                Destination::Discard => debug!("Ignoring {}", packet),
            }
        }

        yield_now().await;
    }
}

/// Writes a packet to the host if one is listening.
fn send_to_host(usb: &mut MidiBridge, packet: MidiPacket) {
    if !usb.is_connected() {
        return;
    }
    if let Err(error) = usb.write(packet) {
        warn!("{}", error);
    }
}
