//! NVMe controller.
//!
//! Owned handle on an attached controller.

use std::fmt;

use tracing::debug;

use crate::error::Result;

use super::driver::NvmeControllerOps;
use super::namespace::NvmeNamespace;
use super::opts::NvmeQpairOpts;
use super::qpair::NvmeQpair;
use super::transport::TransportId;

/// NVMe controller handle.
///
/// Handed out by [`NvmeDriver::probe`](super::NvmeDriver::probe) for every
/// attached controller. The controller is detached when this handle is
/// dropped, so sharing it behind an `Arc` keeps it attached for as long as
/// any namespace entry or device still refers to it.
///
/// # Example
///
/// ```
/// use nvme_io_device::nvme::{MemoryController, NvmeController, TransportId};
///
/// # fn example() -> nvme_io_device::Result<()> {
/// let mem = MemoryController::builder(TransportId::pcie("0000:00:04.0")?)
///     .namespace(1, 512, 2048)
///     .build();
/// let ctrlr = NvmeController::new(mem);
///
/// if let Some(ns) = ctrlr.namespace(1) {
///     println!("NS1: {} sectors, {} bytes/sector", ns.num_sectors(), ns.sector_size());
/// }
/// let qpair = ctrlr.alloc_io_qpair(None)?;
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct NvmeController {
    ops: Box<dyn NvmeControllerOps>,
}

impl NvmeController {
    pub fn new(ops: impl NvmeControllerOps + 'static) -> Self {
        Self { ops: Box::new(ops) }
    }

    pub fn from_boxed(ops: Box<dyn NvmeControllerOps>) -> Self {
        Self { ops }
    }

    /// Transport identifier of the controller.
    pub fn trid(&self) -> &TransportId {
        self.ops.trid()
    }

    /// Get the number of namespaces.
    ///
    /// Note: Some namespace IDs may be inactive.
    pub fn num_namespaces(&self) -> u32 {
        self.ops.num_namespaces()
    }

    /// Get a namespace by ID (1-indexed).
    ///
    /// Returns `None` if the namespace ID is invalid or inactive.
    pub fn namespace(&self, ns_id: u32) -> Option<NvmeNamespace> {
        if ns_id == 0 || ns_id > self.num_namespaces() {
            return None;
        }
        self.ops.namespace(ns_id).filter(NvmeNamespace::is_active)
    }

    /// Every namespace the controller reports, including inactive ones.
    pub fn namespaces(&self) -> Vec<NvmeNamespace> {
        (1..=self.num_namespaces())
            .filter_map(|id| self.ops.namespace(id))
            .collect()
    }

    /// Allocate an I/O queue pair for submitting commands.
    ///
    /// Each device handle owns its own qpair for lock-free I/O.
    pub fn alloc_io_qpair(&self, opts: Option<&NvmeQpairOpts>) -> Result<NvmeQpair> {
        let default_opts = NvmeQpairOpts::default();
        let opts = opts.unwrap_or(&default_opts);
        self.ops.alloc_io_qpair(opts).map(NvmeQpair::from_boxed)
    }
}

impl Drop for NvmeController {
    fn drop(&mut self) {
        debug!(trid = %self.ops.trid(), "detaching controller");
        self.ops.detach();
    }
}

impl fmt::Debug for NvmeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NvmeController")
            .field("trid", self.ops.trid())
            .field("num_namespaces", &self.ops.num_namespaces())
            .finish()
    }
}
