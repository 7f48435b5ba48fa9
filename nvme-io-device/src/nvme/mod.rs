//! NVMe driver interfaces.
//!
//! The device layer reaches the poll-mode driver only through the traits in
//! this module. [`NvmeController`] and [`NvmeQpair`] wrap trait objects with
//! RAII: a controller is detached and a queue pair freed when dropped.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐
//! │   NvmeDriver   │  ← init_env + probe
//! └───────┬────────┘
//!         │ attach
//!         ▼
//! ┌─────────────────┐
//! │  NvmeController │  ← TransportId (PCI address)
//! └────────┬────────┘
//!          │
//!     ┌────┴────┐
//!     ▼         ▼
//! ┌───────┐ ┌───────┐
//! │  NS1  │ │  NS2  │  ← NvmeNamespace (geometry)
//! └───────┘ └───────┘
//!     │
//!     ▼
//! ┌──────────┐
//! │ NvmeQpair│  ← one per device handle
//! └──────────┘
//! ```
//!
//! [`MemoryDriver`] implements the traits in memory.

mod controller;
mod driver;
mod memory;
mod namespace;
mod opts;
mod qpair;
pub mod status;
mod transport;

pub use controller::NvmeController;
pub use driver::{NvmeControllerOps, NvmeDriver, NvmeQpairOps, Rejected};
pub use memory::{MemoryController, MemoryControllerBuilder, MemoryDriver, MemoryNamespace};
pub use namespace::NvmeNamespace;
pub use opts::NvmeQpairOpts;
pub use qpair::NvmeQpair;
pub use status::{NvmeCompletion, NvmeStatus};
pub use transport::TransportId;
