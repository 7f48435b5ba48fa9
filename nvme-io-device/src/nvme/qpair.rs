//! NVMe I/O queue pair.
//!
//! Queue pairs are used to submit I/O commands to namespaces.

use std::fmt;

use tracing::debug;

use crate::context::IoContext;

use super::driver::{NvmeQpairOps, Rejected};
use super::status::NvmeCompletion;

/// NVMe I/O queue pair.
///
/// Owned by exactly one device handle, and moved into the poller thread
/// while background polling is active. The queue pair is freed when dropped;
/// commands still outstanding at that point are cancelled.
pub struct NvmeQpair {
    ops: Box<dyn NvmeQpairOps>,
}

impl NvmeQpair {
    pub fn from_boxed(ops: Box<dyn NvmeQpairOps>) -> Self {
        Self { ops }
    }

    /// Queue identifier.
    pub fn id(&self) -> u16 {
        self.ops.id()
    }

    /// Issue a read or write command.
    pub fn submit(&mut self, io: Box<IoContext>) -> Result<(), Rejected> {
        self.ops.submit(io)
    }

    /// Process I/O completions.
    ///
    /// # Arguments
    ///
    /// * `max_completions` - Max completions to process (0 = unlimited)
    /// * `on_complete` - Receives each finished context with its completion
    ///
    /// # Returns
    ///
    /// Number of completions processed, or negative error code.
    pub fn process_completions<F>(&mut self, max_completions: u32, mut on_complete: F) -> Result<u32, i32>
    where
        F: FnMut(Box<IoContext>, NvmeCompletion),
    {
        self.ops.process_completions(max_completions, &mut on_complete)
    }

    /// Commands submitted but not yet completed.
    pub fn outstanding(&self) -> usize {
        self.ops.outstanding()
    }
}

impl Drop for NvmeQpair {
    fn drop(&mut self) {
        let outstanding = self.ops.outstanding();
        if outstanding > 0 {
            debug!(qpair = self.ops.id(), outstanding, "freeing qpair with commands in flight");
        }
    }
}

impl fmt::Debug for NvmeQpair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NvmeQpair")
            .field("id", &self.ops.id())
            .field("outstanding", &self.ops.outstanding())
            .finish()
    }
}
