//! Device handles.
//!
//! A [`DeviceHandle`] is one namespace opened for I/O through its own queue
//! pair. Requests are byte-addressed: `offset` is floored to a sector and
//! `length` must be a multiple of the sector size.
//!
//! A handle works in one of two modes:
//!
//! - **Caller-polled** (the default): submissions go straight to the queue
//!   pair and completions are delivered from [`DeviceHandle::poll`].
//! - **Background-polled**, after [`DeviceHandle::begin_poll`]: submissions
//!   are queued on a ring and a dedicated thread issues them and delivers
//!   completions. [`DeviceHandle::stop_poll`] returns to caller-polled mode.
//!
//! # Example
//!
//! ```
//! use std::sync::mpsc;
//! use nvme_io_device::nvme::{MemoryController, MemoryDriver, TransportId};
//! use nvme_io_device::{DeviceOpts, EnvOpts, Registry};
//!
//! # fn main() -> nvme_io_device::Result<()> {
//! let ctrlr = MemoryController::builder(TransportId::pcie("0000:00:04.0")?)
//!     .namespace(1, 512, 2048)
//!     .build();
//! let driver = MemoryDriver::new().with_controller(ctrlr);
//! let registry = Registry::probe(&driver, &EnvOpts::new("example"))?;
//!
//! let mut device = registry.create_device(1, DeviceOpts::default())?;
//! device.begin_poll(None)?;
//!
//! let (tx, rx) = mpsc::channel();
//! device.submit_write(b"hello world\n\0".repeat(40).as_slice(), 0, 512, move |c| {
//!     tx.send(c.result).unwrap();
//! })?;
//! assert_eq!(rx.recv().unwrap(), 0);
//!
//! device.destroy()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::complete::{CompletionReceiver, completion};
use crate::config::DeviceOpts;
use crate::context::{ContextPool, IoCompletion, IoDirection, IoTarget};
use crate::dispatch;
use crate::error::{CreateError, Error, PollError, SubmitError};
use crate::nvme::NvmeQpair;
use crate::poller::{Poller, PollerState};
use crate::registry::{NamespaceEntry, Registry};

/// An open namespace with its own queue pair.
pub struct DeviceHandle {
    ns: Arc<NamespaceEntry>,
    qpair: Option<NvmeQpair>,
    poller: Option<Poller>,
    pool: Arc<ContextPool>,
    opts: DeviceOpts,
}

impl DeviceHandle {
    /// Open namespace `nsid` from `registry`.
    ///
    /// Allocates a dedicated queue pair. Nothing is allocated when the
    /// namespace is unknown.
    pub fn create(registry: &Registry, nsid: u32, opts: DeviceOpts) -> Result<Self, CreateError> {
        let Some(ns) = registry.lookup(nsid) else {
            error!(nsid, "namespace not found");
            return Err(CreateError::NamespaceNotFound(nsid));
        };

        let qpair = ns
            .controller()
            .alloc_io_qpair(opts.qpair.as_ref())
            .map_err(|e| {
                error!(nsid, error = %e, "unable to allocate I/O qpair");
                let rc = match e {
                    Error::Os(errno) => -errno,
                    _ => -libc::EIO,
                };
                CreateError::QueuePairAllocationFailed(rc)
            })?;

        debug!(nsid, qpair = qpair.id(), "device created");
        Ok(Self {
            ns: Arc::clone(ns),
            qpair: Some(qpair),
            poller: None,
            pool: Arc::new(ContextPool::new(opts.max_io_contexts)),
            opts,
        })
    }

    /// Stop polling and release the queue pair.
    ///
    /// Dropping the handle does the same; this reports a poller failure.
    pub fn destroy(mut self) -> Result<(), PollError> {
        self.stop_poll()
    }

    /// Read `length` bytes at byte `offset` into `dest`.
    ///
    /// `dest` is handed back in the completion, filled on success. On an
    /// error return the request was not accepted and `callback` never fires.
    pub fn submit_read<F>(&mut self, offset: u64, dest: Vec<u8>, length: u32, callback: F) -> Result<(), SubmitError>
    where
        F: FnOnce(IoCompletion) + Send + 'static,
    {
        self.check_length(length)?;
        if dest.len() < length as usize {
            return Err(SubmitError::BufferTooSmall {
                needed: length as usize,
                actual: dest.len(),
            });
        }
        self.check_qpair()?;

        let io = self.pool.alloc(
            self.target(),
            IoDirection::Read,
            offset,
            length,
            Some(dest),
            Box::new(callback),
        )?;
        self.issue(io)
    }

    /// Write the first `length` bytes of `src` at byte `offset`.
    ///
    /// `src` is copied before this returns. On an error return the request
    /// was not accepted and `callback` never fires.
    pub fn submit_write<F>(&mut self, src: &[u8], offset: u64, length: u32, callback: F) -> Result<(), SubmitError>
    where
        F: FnOnce(IoCompletion) + Send + 'static,
    {
        self.check_length(length)?;
        if src.len() < length as usize {
            return Err(SubmitError::BufferTooSmall {
                needed: length as usize,
                actual: src.len(),
            });
        }
        self.check_qpair()?;

        let mut io = self.pool.alloc(
            self.target(),
            IoDirection::Write,
            offset,
            length,
            None,
            Box::new(callback),
        )?;
        io.buf_mut()
            .as_mut_slice()
            .copy_from_slice(&src[..length as usize]);
        self.issue(io)
    }

    /// Deliver up to `max_completions` completions (0 = all available) on
    /// the calling thread.
    ///
    /// Only valid in caller-polled mode.
    pub fn poll(&mut self, max_completions: u32) -> Result<u32, PollError> {
        if self.poller.is_some() {
            return Err(PollError::PollerActive);
        }
        let qpair = self.qpair.as_mut().ok_or(PollError::QueuePairUnavailable)?;
        qpair
            .process_completions(max_completions, dispatch::complete)
            .map_err(PollError::Qpair)
    }

    /// Hand the queue pair to a background poller thread, optionally
    /// pinned to core `affinity`.
    pub fn begin_poll(&mut self, affinity: Option<usize>) -> Result<(), PollError> {
        if self.poller.is_some() {
            return Err(PollError::AlreadyPolling);
        }
        let qpair = self.qpair.take().ok_or(PollError::QueuePairUnavailable)?;

        let ring_name = format!("io_ring{:#x}", self as *const Self as usize);
        match Poller::start(qpair, ring_name, affinity, &self.opts.poller) {
            Ok(poller) => {
                debug!(nsid = self.ns.nsid(), ring = poller.ring().name(), ?affinity, "polling started");
                self.poller = Some(poller);
                Ok(())
            }
            Err((qpair, e)) => {
                self.qpair = Some(qpair);
                Err(e)
            }
        }
    }

    /// Stop the background poller and take the queue pair back.
    ///
    /// Blocks until the poller thread exits. Requests still queued on the
    /// ring complete with `-ECANCELED`. Does nothing when not polling.
    pub fn stop_poll(&mut self) -> Result<(), PollError> {
        let Some(poller) = self.poller.take() else {
            return Ok(());
        };
        let qpair = poller.stop()?;
        debug!(nsid = self.ns.nsid(), "polling stopped");
        self.qpair = Some(qpair);
        Ok(())
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    pub fn poller_state(&self) -> PollerState {
        self.poller
            .as_ref()
            .map_or(PollerState::Stopped, Poller::state)
    }

    /// Requests accepted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.pool.live()
    }

    /// Whether in-flight requests exceed the configured throttle limit.
    pub fn throttle(&self) -> bool {
        self.in_flight() > self.opts.throttle_limit
    }

    /// I/O contexts currently allocated for this device.
    pub fn live_contexts(&self) -> usize {
        self.pool.live()
    }

    /// I/O contexts allocated over the device's lifetime.
    pub fn contexts_allocated(&self) -> u64 {
        self.pool.allocated_total()
    }

    pub fn nsid(&self) -> u32 {
        self.ns.nsid()
    }

    pub fn namespace(&self) -> &NamespaceEntry {
        &self.ns
    }

    pub fn sector_size(&self) -> u32 {
        self.ns.sector_size()
    }

    /// Namespace size in bytes.
    pub fn capacity(&self) -> u64 {
        self.ns.size()
    }

    /// Read `length` bytes at `offset`, resolving to the data.
    ///
    /// In caller-polled mode the returned future only completes once
    /// [`poll`](Self::poll) delivers the completion, e.g. through
    /// [`block_on`](crate::complete::block_on).
    pub fn read_async(&mut self, offset: u64, length: u32) -> Result<CompletionReceiver<Vec<u8>>, SubmitError> {
        let (tx, rx) = completion();
        self.submit_read(offset, vec![0; length as usize], length, move |c| {
            let status = c.status();
            tx.complete(status.map(|_| c.data.unwrap_or_default()));
        })?;
        Ok(rx)
    }

    /// Write `src` at `offset`, resolving to the bytes written.
    pub fn write_async(&mut self, src: &[u8], offset: u64) -> Result<CompletionReceiver<u32>, SubmitError> {
        let length = u32::try_from(src.len()).map_err(|_| SubmitError::InvalidLength { length: src.len() })?;
        let (tx, rx) = completion();
        self.submit_write(src, offset, length, move |c| tx.complete(c.status()))?;
        Ok(rx)
    }

    fn target(&self) -> IoTarget {
        IoTarget {
            nsid: self.ns.nsid(),
            sector_size: self.ns.sector_size(),
        }
    }

    fn check_length(&self, length: u32) -> Result<(), SubmitError> {
        if length == 0 {
            return Err(SubmitError::InvalidLength { length: 0 });
        }
        let sector_size = self.ns.sector_size();
        if length % sector_size != 0 {
            error!(length, sector_size, "I/O size is not sector aligned");
            return Err(SubmitError::UnalignedLength { length, sector_size });
        }
        Ok(())
    }

    fn check_qpair(&self) -> Result<(), SubmitError> {
        if self.poller.is_none() && self.qpair.is_none() {
            return Err(SubmitError::QueuePairUnavailable);
        }
        Ok(())
    }

    fn issue(&mut self, io: Box<crate::context::IoContext>) -> Result<(), SubmitError> {
        if let Some(poller) = &self.poller {
            return poller.ring().enqueue(io).map_err(|io| {
                warn!(ring = poller.ring().name(), "submission ring is full");
                io.discard();
                SubmitError::QueueFull
            });
        }

        let qpair = self.qpair.as_mut().ok_or(SubmitError::QueuePairUnavailable)?;
        qpair.submit(io).map_err(|rejected| {
            error!(rc = rejected.rc, "command submission failed");
            rejected.io.discard();
            SubmitError::Rejected { rc: rejected.rc }
        })
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop_poll() {
            error!(nsid = self.ns.nsid(), error = %e, "failed to stop poller");
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("nsid", &self.ns.nsid())
            .field("polling", &self.is_polling())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
