//! Polled NVMe block device
//!
//! Byte-addressed, asynchronous reads and writes against NVMe namespaces,
//! driven by a user-space poll-mode driver. Completions are delivered either
//! when the caller polls the device or by a dedicated background poller
//! thread fed through a lock-free submission ring.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::mpsc;
//! use nvme_io_device::nvme::{MemoryController, MemoryDriver, TransportId};
//! use nvme_io_device::{DeviceOpts, EnvOpts, Result, registry};
//!
//! fn main() -> Result<()> {
//!     let ctrlr = MemoryController::builder(TransportId::pcie("0000:00:04.0")?)
//!         .namespace(1, 512, 2 * 1024 * 1024)
//!         .build();
//!     let driver = MemoryDriver::new().with_controller(ctrlr);
//!
//!     let registry = registry::initialize(&driver, &EnvOpts::new("hello_world"))?;
//!     let mut device = registry.create_device(1, DeviceOpts::default())?;
//!     device.begin_poll(None)?;
//!
//!     let (tx, rx) = mpsc::channel();
//!     let tx2 = tx.clone();
//!     device.submit_write(&[0x5a; 4096], 0, 4096, move |c| tx.send(c).unwrap())?;
//!     assert_eq!(rx.recv().unwrap().bytes_transferred, 4096);
//!
//!     device.submit_read(0, vec![0; 4096], 4096, move |c| tx2.send(c).unwrap())?;
//!     assert_eq!(rx.recv().unwrap().data.unwrap(), vec![0x5a; 4096]);
//!
//!     device.destroy()?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`registry`] - Process-wide namespace registry
//! - [`device`] - Device handles: submission, polling, poller control
//! - [`nvme`] - Driver interfaces and the memory-backed driver
//! - [`context`] - Per-request state and completion callbacks
//! - [`poller`] - Background poller thread
//! - [`ring`] - Submission ring between submitters and the poller
//! - [`complete`] - Callback-to-future utilities
//! - [`dma`] - DMA-capable buffer allocation
//! - [`config`] - Environment, device and poller options
//! - [`affinity`] - CPU core utilities
//! - [`error`] - Error types

pub mod affinity;
pub mod complete;
pub mod config;
pub mod context;
pub mod device;
mod dispatch;
pub mod dma;
pub mod error;
pub mod nvme;
pub mod poller;
pub mod registry;
pub mod ring;

// Re-exports
pub use complete::{CompletionReceiver, CompletionSender, block_on, completion};
pub use config::{DeviceOpts, EnvOpts, LogLevel, PollerConfig};
pub use context::{ContextPool, IoCallback, IoCompletion, IoContext, IoDirection};
pub use device::DeviceHandle;
pub use dma::DmaBuf;
pub use error::{CreateError, Error, InitError, PollError, RegistryError, Result, SubmitError};
pub use poller::PollerState;
pub use registry::{MAX_NAMESPACES, NamespaceEntry, Registry};
