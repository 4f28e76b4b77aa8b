//! USB device descriptor decoding for enumeration.

use core::fmt;

/// Size of a standard USB device descriptor.
pub const DEVICE_DESCRIPTOR_LEN: usize = 18;

/// Vendor/product pair used to recognise an attached device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    #[must_use]
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Decoded USB device descriptor (USB 2.0 §9.6.1).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb_release: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_release: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub configuration_count: u8,
}

impl DeviceDescriptor {
    /// Decodes the little-endian wire layout.
    #[must_use]
    pub const fn parse(raw: &[u8; DEVICE_DESCRIPTOR_LEN]) -> Self {
        Self {
            length: raw[0],
            descriptor_type: raw[1],
            usb_release: u16::from_le_bytes([raw[2], raw[3]]),
            device_class: raw[4],
            device_subclass: raw[5],
            device_protocol: raw[6],
            max_packet_size0: raw[7],
            vendor_id: u16::from_le_bytes([raw[8], raw[9]]),
            product_id: u16::from_le_bytes([raw[10], raw[11]]),
            device_release: u16::from_le_bytes([raw[12], raw[13]]),
            manufacturer_index: raw[14],
            product_index: raw[15],
            serial_number_index: raw[16],
            configuration_count: raw[17],
        }
    }

    /// Encodes the descriptor back into its wire layout.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; DEVICE_DESCRIPTOR_LEN] {
        let usb = self.usb_release.to_le_bytes();
        let vendor = self.vendor_id.to_le_bytes();
        let product = self.product_id.to_le_bytes();
        let device = self.device_release.to_le_bytes();
        [
            self.length,
            self.descriptor_type,
            usb[0],
            usb[1],
            self.device_class,
            self.device_subclass,
            self.device_protocol,
            self.max_packet_size0,
            vendor[0],
            vendor[1],
            product[0],
            product[1],
            device[0],
            device[1],
            self.manufacturer_index,
            self.product_index,
            self.serial_number_index,
            self.configuration_count,
        ]
    }

    /// Vendor/product pair advertised by the device.
    #[must_use]
    pub const fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.vendor_id, self.product_id)
    }
}
