//! Namespace registry.
//!
//! Records every active namespace found while enumerating controllers, so
//! devices can later be opened by namespace id. The registry holds at most
//! [`MAX_NAMESPACES`] entries, and namespace ids are unique within it.
//!
//! Enumeration happens once per process through [`initialize`]; the
//! resulting registry is shared read-only behind an `Arc`.
//!
//! # Example
//!
//! ```
//! use nvme_io_device::nvme::{MemoryController, MemoryDriver, TransportId};
//! use nvme_io_device::{EnvOpts, Registry};
//!
//! # fn main() -> nvme_io_device::Result<()> {
//! let ctrlr = MemoryController::builder(TransportId::pcie("0000:00:04.0")?)
//!     .namespace(1, 512, 2048)
//!     .build();
//! let driver = MemoryDriver::new().with_controller(ctrlr);
//!
//! let registry = Registry::probe(&driver, &EnvOpts::new("example"))?;
//! assert_eq!(registry.namespace_size(1), Some(512 * 2048));
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info};

use crate::config::{DeviceOpts, EnvOpts};
use crate::device::DeviceHandle;
use crate::error::{CreateError, InitError, RegistryError};
use crate::nvme::{NvmeController, NvmeDriver, NvmeNamespace};

/// Maximum number of namespaces the registry holds.
pub const MAX_NAMESPACES: usize = 8;

/// A registered namespace.
#[derive(Debug)]
pub struct NamespaceEntry {
    controller: Arc<NvmeController>,
    namespace: NvmeNamespace,
}

impl NamespaceEntry {
    pub fn nsid(&self) -> u32 {
        self.namespace.id()
    }

    pub fn sector_size(&self) -> u32 {
        self.namespace.sector_size()
    }

    pub fn num_sectors(&self) -> u64 {
        self.namespace.num_sectors()
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.namespace.size()
    }

    pub fn namespace(&self) -> &NvmeNamespace {
        &self.namespace
    }

    pub fn controller(&self) -> &Arc<NvmeController> {
        &self.controller
    }
}

/// Registered namespaces and the controllers they live on.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Arc<NamespaceEntry>>,
    controllers: Vec<Arc<NvmeController>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize the driver environment, enumerate controllers and
    /// register every active namespace.
    ///
    /// Every attached controller is detached again if this fails.
    pub fn probe(driver: &dyn NvmeDriver, opts: &EnvOpts) -> Result<Self, InitError> {
        driver.init_env(opts).map_err(|rc| {
            error!(rc, "Unable to initialize driver environment");
            InitError::EnvironmentInit(rc)
        })?;
        driver.unaffinitize_thread();

        let mut registry = Registry::new();
        let mut attached: Vec<Arc<NvmeController>> = Vec::new();
        let mut attach_error: Option<RegistryError> = None;

        let probed = driver.probe(&mut |_trid| true, &mut |ctrlr| {
            let ctrlr = Arc::new(ctrlr);
            attached.push(Arc::clone(&ctrlr));
            if attach_error.is_some() {
                return;
            }
            for ns in ctrlr.namespaces() {
                if let Err(e) = registry.register_namespace(&ctrlr, &ns) {
                    attach_error = Some(e);
                    break;
                }
            }
        });

        if let Err(rc) = probed {
            error!(rc, "controller probe failed");
            return Err(InitError::Probe(rc));
        }
        if let Some(e) = attach_error {
            error!(error = %e, "namespace registration failed");
            return Err(InitError::Attach(e));
        }
        if registry.is_empty() {
            error!("no NVMe namespace found");
            return Err(InitError::NoNamespaceFound);
        }

        info!(
            namespaces = registry.len(),
            controllers = attached.len(),
            "namespace registry ready"
        );
        registry.controllers = attached;
        Ok(registry)
    }

    /// Register `ns` of `controller`.
    ///
    /// Inactive namespaces are skipped without error. A namespace with a
    /// zero sector size is rejected.
    pub fn register_namespace(
        &mut self,
        controller: &Arc<NvmeController>,
        ns: &NvmeNamespace,
    ) -> Result<(), RegistryError> {
        if self.entries.len() >= MAX_NAMESPACES {
            error!(max = MAX_NAMESPACES, "too many namespaces");
            return Err(RegistryError::RegistryFull {
                max: MAX_NAMESPACES,
            });
        }
        if !ns.is_active() {
            debug!(nsid = ns.id(), "skipping inactive namespace");
            return Ok(());
        }
        if self.lookup(ns.id()).is_some() {
            return Err(RegistryError::DuplicateNamespace(ns.id()));
        }
        if ns.sector_size() == 0 {
            error!(nsid = ns.id(), "namespace reports a zero sector size");
            return Err(RegistryError::InvalidGeometry {
                nsid: ns.id(),
                sector_size: 0,
            });
        }

        info!(
            nsid = ns.id(),
            sector_size = ns.sector_size(),
            size = ns.size(),
            trid = %controller.trid(),
            "registered namespace"
        );
        self.entries.push(Arc::new(NamespaceEntry {
            controller: Arc::clone(controller),
            namespace: *ns,
        }));
        Ok(())
    }

    /// Find the entry for `nsid`.
    pub fn lookup(&self, nsid: u32) -> Option<&Arc<NamespaceEntry>> {
        self.entries.iter().find(|entry| entry.nsid() == nsid)
    }

    /// Size in bytes of namespace `nsid`.
    pub fn namespace_size(&self, nsid: u32) -> Option<u64> {
        self.lookup(nsid).map(|entry| entry.size())
    }

    /// Sector size of namespace `nsid`.
    pub fn namespace_sector_size(&self, nsid: u32) -> Option<u32> {
        self.lookup(nsid).map(|entry| entry.sector_size())
    }

    /// Open a device on namespace `nsid`.
    pub fn create_device(&self, nsid: u32, opts: DeviceOpts) -> Result<DeviceHandle, CreateError> {
        DeviceHandle::create(self, nsid, opts)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<NamespaceEntry>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

enum InitState {
    Uninit,
    Ready(Arc<Registry>),
    Failed,
}

static GLOBAL: Mutex<InitState> = Mutex::new(InitState::Uninit);

/// Initialize the process-wide registry.
///
/// The first call probes `driver`; later calls return the same registry
/// without touching the driver again. If the first call failed every later
/// call fails with [`InitError::PreviouslyFailed`]: the driver environment
/// cannot be set up twice in one process.
pub fn initialize(driver: &dyn NvmeDriver, opts: &EnvOpts) -> Result<Arc<Registry>, InitError> {
    let mut state = GLOBAL.lock().unwrap_or_else(PoisonError::into_inner);
    match &*state {
        InitState::Ready(registry) => return Ok(Arc::clone(registry)),
        InitState::Failed => return Err(InitError::PreviouslyFailed),
        InitState::Uninit => {}
    }

    match Registry::probe(driver, opts) {
        Ok(registry) => {
            let registry = Arc::new(registry);
            *state = InitState::Ready(Arc::clone(&registry));
            Ok(registry)
        }
        Err(e) => {
            *state = InitState::Failed;
            Err(e)
        }
    }
}

/// The process-wide registry, if [`initialize`] succeeded.
pub fn global() -> Option<Arc<Registry>> {
    match &*GLOBAL.lock().unwrap_or_else(PoisonError::into_inner) {
        InitState::Ready(registry) => Some(Arc::clone(registry)),
        _ => None,
    }
}
