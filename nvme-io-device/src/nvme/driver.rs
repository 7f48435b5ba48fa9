//! Driver interfaces.
//!
//! These traits are the seam to the poll-mode driver library. The device
//! layer never talks to hardware directly: it initializes the environment
//! and enumerates controllers through [`NvmeDriver`], allocates queue pairs
//! through [`NvmeControllerOps`], and issues/reaps commands through
//! [`NvmeQpairOps`].
//!
//! None of the driver calls block on I/O. A queue pair is not internally
//! synchronized; the `&mut self` receivers of [`NvmeQpairOps`] make the
//! single-thread-at-a-time rule a compile-time property.

use tracing::debug;

use crate::affinity;
use crate::config::EnvOpts;
use crate::context::IoContext;
use crate::error::Result;

use super::controller::NvmeController;
use super::namespace::NvmeNamespace;
use super::opts::NvmeQpairOpts;
use super::status::NvmeCompletion;
use super::transport::TransportId;

/// Environment setup and controller enumeration.
pub trait NvmeDriver: Send + Sync {
    /// Initialize the driver environment (memory, device access).
    ///
    /// Returns the driver's return code on failure (negative errno).
    fn init_env(&self, opts: &EnvOpts) -> std::result::Result<(), i32>;

    /// Release the calling thread from any cores the driver reserved
    /// during [`init_env`](Self::init_env).
    fn unaffinitize_thread(&self) {
        if let Err(e) = affinity::unpin_current() {
            debug!(error = %e, "could not unaffinitize thread");
        }
    }

    /// Enumerate controllers.
    ///
    /// `probe_cb` decides whether a discovered controller gets attached;
    /// every attached controller is handed to `attach_cb`.
    fn probe(
        &self,
        probe_cb: &mut dyn FnMut(&TransportId) -> bool,
        attach_cb: &mut dyn FnMut(NvmeController),
    ) -> std::result::Result<(), i32>;
}

/// Operations on an attached controller.
pub trait NvmeControllerOps: Send + Sync {
    /// Transport identifier of the controller.
    fn trid(&self) -> &TransportId;

    /// Number of namespace slots (some may be inactive).
    fn num_namespaces(&self) -> u32;

    /// Namespace in slot `ns_id` (1-indexed), active or not.
    fn namespace(&self, ns_id: u32) -> Option<NvmeNamespace>;

    /// Allocate an I/O queue pair.
    fn alloc_io_qpair(&self, opts: &NvmeQpairOpts) -> Result<Box<dyn NvmeQpairOps>>;

    /// Detach the controller. Called once, when the last handle is dropped.
    fn detach(&self);
}

/// A command the queue pair refused to accept.
///
/// The context is handed back so the caller decides whether its callback
/// fires.
#[derive(Debug)]
pub struct Rejected {
    pub io: Box<IoContext>,
    /// Driver return code (negative errno)
    pub rc: i32,
}

/// Command submission and completion on one I/O queue pair.
pub trait NvmeQpairOps: Send {
    /// Queue identifier.
    fn id(&self) -> u16;

    /// Issue the read or write described by `io`.
    ///
    /// The queue pair owns the context until it reports the completion.
    fn submit(&mut self, io: Box<IoContext>) -> std::result::Result<(), Rejected>;

    /// Reap up to `max_completions` completions (0 = unlimited), handing
    /// each context back through `on_complete`.
    ///
    /// Returns the number of completions processed, or a negative errno if
    /// the queue pair failed.
    fn process_completions(
        &mut self,
        max_completions: u32,
        on_complete: &mut dyn FnMut(Box<IoContext>, NvmeCompletion),
    ) -> std::result::Result<u32, i32>;

    /// Commands submitted but not yet completed.
    fn outstanding(&self) -> usize;
}
