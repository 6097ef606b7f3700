/// How the device presents itself to the USB host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsbIdentity {
    /// USB Vendor ID.
    pub vendor_id: u16,
    /// USB Product ID.
    pub product_id: u16,
    /// Manufacturer string descriptor.
    pub manufacturer: &'static str,
    /// Product string descriptor.
    pub product: &'static str,
    /// Serial number string descriptor.
    pub serial_number: &'static str,
    /// Whether the device has its own power supply.
    pub self_powered: bool,
    /// Current drawn from the bus, in milliamps.
    pub max_power_ma: u16,
}

impl Default for UsbIdentity {
    fn default() -> Self {
        Self {
            // pid.codes test VID/PID
            vendor_id: 0x1209,
            product_id: 0x0001,
            manufacturer: "Pawpaw Works",
            product: "Serial MIDI Interface",
            serial_number: "00000001",
            // the Nucleo board's USB port can't power it
            self_powered: true,
            max_power_ma: 0,
        }
    }
}
