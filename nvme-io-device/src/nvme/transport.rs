//! NVMe transport identifier.
//!
//! Controllers are reached over PCIe only and are named by their PCI
//! address. The device layer uses the identifier to name controllers in
//! diagnostics and to let a probe policy pick which controllers to attach.

use std::fmt;

use crate::error::{Error, Result};

/// PCIe transport identifier of a controller.
///
/// # Example
///
/// ```
/// use nvme_io_device::nvme::TransportId;
///
/// let trid = TransportId::pcie("0000:00:04.0")?;
/// assert_eq!(trid.address(), "0000:00:04.0");
/// assert_eq!(trid.to_string(), "trtype:PCIe traddr:0000:00:04.0");
///
/// // Domain defaults to 0000
/// assert_eq!(TransportId::pcie("00:04.0")?, trid);
/// # Ok::<(), nvme_io_device::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportId {
    traddr: String,
}

impl TransportId {
    /// Create a PCIe transport ID from a BDF address
    /// (`[domain:]bus:device.function`, e.g. "0000:00:04.0").
    pub fn pcie(addr: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("invalid PCI address: {addr}"));

        let (head, function) = addr.rsplit_once('.').ok_or_else(invalid)?;
        let mut parts: Vec<&str> = head.split(':').collect();
        if parts.len() == 2 {
            parts.insert(0, "0000");
        }
        let [domain, bus, device] = parts[..] else {
            return Err(invalid());
        };

        let field = |s: &str, width: usize, max: u32| {
            if s.is_empty() || s.len() > width {
                return None;
            }
            u32::from_str_radix(s, 16).ok().filter(|v| *v <= max)
        };
        let domain = field(domain, 4, 0xffff).ok_or_else(invalid)?;
        let bus = field(bus, 2, 0xff).ok_or_else(invalid)?;
        let device = field(device, 2, 0x1f).ok_or_else(invalid)?;
        let function = field(function, 1, 0x7).ok_or_else(invalid)?;

        Ok(Self {
            traddr: format!("{domain:04x}:{bus:02x}:{device:02x}.{function:x}"),
        })
    }

    /// Normalized PCI address.
    pub fn address(&self) -> &str {
        &self.traddr
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trtype:PCIe traddr:{}", self.traddr)
    }
}
