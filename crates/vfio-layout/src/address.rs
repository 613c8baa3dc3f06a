//! PCI device addresses.
//!
//! Two input shapes are accepted:
//!
//! ```text
//! BB:SS.F          22:00.0        (domain assumed 0000)
//! DDDD:BB:SS.F     0000:22:00.0
//! ```
//!
//! Every field must use exactly its hex-digit width. The slot is 5 bits wide
//! (`00` to `1f`) and the function 3 bits (`0` to `7`). The canonical form is always
//! the lowercase, domain-qualified one, which is what sysfs uses as directory
//! names and what the `bind`/`unbind` control files expect.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest slot number (5 bits).
pub const MAX_SLOT: u8 = 0x1f;

/// Largest function number (3 bits).
pub const MAX_FUNCTION: u8 = 0x7;

/// A validated PCI device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress {
    domain: u16,
    bus: u8,
    slot: u8,
    function: u8,
}

/// Why an address string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Neither `BB:SS.F` nor `DDDD:BB:SS.F`.
    #[error(
        "invalid PCI device address '{0}': expected BB:SS.F (e.g. 22:00.0) \
         or DDDD:BB:SS.F (e.g. 0000:22:00.0)"
    )]
    Shape(String),

    /// A field has the wrong number of digits or a non-hex digit.
    #[error("invalid PCI address {field} '{value}'")]
    Field {
        /// Field name (`domain`, `bus`, `slot`, `function`)
        field: &'static str,
        /// Offending text
        value: String,
    },

    /// A field is well-formed hex but exceeds its bit width.
    #[error("PCI address {field} {value:#x} exceeds {max:#x}")]
    OutOfRange {
        /// Field name
        field: &'static str,
        /// Parsed value
        value: u16,
        /// Largest allowed value
        max: u16,
    },
}

impl DeviceAddress {
    /// Build an address from already-split fields.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::OutOfRange`] if `slot` or `function` exceed
    /// their bit widths.
    pub fn new(domain: u16, bus: u8, slot: u8, function: u8) -> Result<Self, AddressError> {
        if slot > MAX_SLOT {
            return Err(AddressError::OutOfRange {
                field: "slot",
                value: u16::from(slot),
                max: u16::from(MAX_SLOT),
            });
        }
        if function > MAX_FUNCTION {
            return Err(AddressError::OutOfRange {
                field: "function",
                value: u16::from(function),
                max: u16::from(MAX_FUNCTION),
            });
        }
        Ok(Self {
            domain,
            bus,
            slot,
            function,
        })
    }

    /// PCI segment (domain).
    pub const fn domain(&self) -> u16 {
        self.domain
    }

    /// Bus number.
    pub const fn bus(&self) -> u8 {
        self.bus
    }

    /// Slot (device) number.
    pub const fn slot(&self) -> u8 {
        self.slot
    }

    /// Function number.
    pub const fn function(&self) -> u8 {
        self.function
    }

    /// Canonical `DDDD:BB:SS.F` form.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// The short `BB:SS.F` form, as printed by `lspci` for domain 0.
    pub fn short(&self) -> String {
        format!("{:02x}:{:02x}.{:x}", self.bus, self.slot, self.function)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.slot, self.function
        )
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let shape = || AddressError::Shape(input.to_string());

        let (head, function) = input.rsplit_once('.').ok_or_else(shape)?;
        let parts: Vec<&str> = head.split(':').collect();
        let (domain, bus, slot) = match parts.as_slice() {
            [bus, slot] => (0, *bus, *slot),
            [domain, bus, slot] => (hex_field::<u16>("domain", domain, 4)?, *bus, *slot),
            _ => return Err(shape()),
        };

        Self::new(
            domain,
            hex_field::<u8>("bus", bus, 2)?,
            hex_field::<u8>("slot", slot, 2)?,
            hex_field::<u8>("function", function, 1)?,
        )
    }
}

/// Parse a fixed-width hex field.
fn hex_field<T: TryFrom<u32>>(field: &'static str, text: &str, width: usize) -> Result<T, AddressError> {
    let invalid = || AddressError::Field {
        field,
        value: text.to_string(),
    };

    if text.len() != width || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let value = u32::from_str_radix(text, 16).map_err(|_| invalid())?;
    T::try_from(value).map_err(|_| invalid())
}
