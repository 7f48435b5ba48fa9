//! NVMe namespace.
//!
//! Geometry of a namespace as reported by its controller during enumeration.

/// NVMe namespace description.
///
/// Obtained from [`NvmeController::namespace()`](super::NvmeController::namespace)
/// or [`NvmeController::namespaces()`](super::NvmeController::namespaces).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvmeNamespace {
    id: u32,
    sector_size: u32,
    num_sectors: u64,
    active: bool,
}

impl NvmeNamespace {
    pub fn new(id: u32, sector_size: u32, num_sectors: u64, active: bool) -> Self {
        Self {
            id,
            sector_size,
            num_sectors,
            active,
        }
    }

    /// Get namespace ID.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Get sector size in bytes.
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Get total number of sectors.
    pub fn num_sectors(&self) -> u64 {
        self.num_sectors
    }

    /// Get total size in bytes.
    pub fn size(&self) -> u64 {
        self.num_sectors * self.sector_size as u64
    }

    /// Check if namespace is active.
    pub fn is_active(&self) -> bool {
        self.active
    }
}
