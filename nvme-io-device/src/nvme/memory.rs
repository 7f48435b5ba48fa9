//! Memory-backed driver.
//!
//! Implements the driver traits entirely in process memory, the same way a
//! malloc block device stands in for real hardware. Namespaces keep only the
//! sectors that were written, so a large namespace costs nothing until it is
//! used.
//!
//! Commands are queued at submission and executed when completions are
//! processed, in submission order. A controller can be frozen to make
//! submission block, which is how tests model a queue pair that stopped
//! making progress.
//!
//! # Example
//!
//! ```
//! use nvme_io_device::nvme::{MemoryController, MemoryDriver, TransportId};
//!
//! let ctrlr = MemoryController::builder(TransportId::pcie("0000:00:04.0")?)
//!     .namespace(1, 512, 2 * 1024 * 1024)
//!     .build();
//! let driver = MemoryDriver::new().with_controller(ctrlr);
//! # Ok::<(), nvme_io_device::Error>(())
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tracing::debug;

use crate::config::{EnvOpts, LogLevel};
use crate::context::{IoContext, IoDirection};
use crate::error::{Error, Result};

use super::controller::NvmeController;
use super::driver::{NvmeControllerOps, NvmeDriver, NvmeQpairOps, Rejected};
use super::namespace::NvmeNamespace;
use super::opts::NvmeQpairOpts;
use super::status::{NvmeCompletion, NvmeStatus, SC_INVALID_NAMESPACE_OR_FORMAT, SC_LBA_OUT_OF_RANGE};
use super::transport::TransportId;

/// Default number of I/O queue pairs a memory controller hands out.
const DEFAULT_MAX_IO_QPAIRS: u32 = 64;

/// Driver whose controllers live in memory.
#[derive(Default)]
pub struct MemoryDriver {
    controllers: Vec<Arc<MemoryController>>,
    env_init_rc: i32,
    probe_rc: i32,
    env_initialized: AtomicBool,
    log_level: Mutex<Option<LogLevel>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a controller to be discovered by [`probe`](NvmeDriver::probe).
    pub fn with_controller(mut self, ctrlr: Arc<MemoryController>) -> Self {
        self.controllers.push(ctrlr);
        self
    }

    /// Make environment initialization fail with `rc`.
    pub fn fail_env_init(mut self, rc: i32) -> Self {
        self.env_init_rc = rc;
        self
    }

    /// Make controller enumeration fail with `rc`.
    pub fn fail_probe(mut self, rc: i32) -> Self {
        self.probe_rc = rc;
        self
    }

    /// Whether [`init_env`](NvmeDriver::init_env) has succeeded.
    pub fn env_initialized(&self) -> bool {
        self.env_initialized.load(Ordering::Acquire)
    }

    /// Log level handed over at environment initialization.
    pub fn log_level(&self) -> Option<LogLevel> {
        *self.log_level.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NvmeDriver for MemoryDriver {
    fn init_env(&self, opts: &EnvOpts) -> std::result::Result<(), i32> {
        if self.env_init_rc != 0 {
            return Err(self.env_init_rc);
        }
        // The environment can be set up once per process
        if self.env_initialized.swap(true, Ordering::AcqRel) {
            return Err(-libc::EALREADY);
        }
        *self.log_level.lock().unwrap_or_else(PoisonError::into_inner) = Some(opts.log_level);
        debug!(name = %opts.name, mem_size_mb = ?opts.mem_size_mb, "memory driver environment ready");
        Ok(())
    }

    fn unaffinitize_thread(&self) {
        // No cores are reserved
    }

    fn probe(
        &self,
        probe_cb: &mut dyn FnMut(&TransportId) -> bool,
        attach_cb: &mut dyn FnMut(NvmeController),
    ) -> std::result::Result<(), i32> {
        if self.probe_rc != 0 {
            return Err(self.probe_rc);
        }
        for ctrlr in &self.controllers {
            if !probe_cb(ctrlr.trid()) {
                debug!(trid = %ctrlr.trid(), "probe declined controller");
                continue;
            }
            ctrlr.attached.store(true, Ordering::Release);
            debug!(trid = %ctrlr.trid(), "attached controller");
            attach_cb(NvmeController::new(Arc::clone(ctrlr)));
        }
        Ok(())
    }
}

/// Blocks submitters while closed.
#[derive(Default)]
struct Gate {
    frozen: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    fn set(&self, frozen: bool) {
        *self.frozen.lock().unwrap_or_else(PoisonError::into_inner) = frozen;
        self.cond.notify_all();
    }

    fn wait_open(&self) {
        let mut frozen = self.frozen.lock().unwrap_or_else(PoisonError::into_inner);
        while *frozen {
            frozen = self.cond.wait(frozen).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Controller backed by memory.
pub struct MemoryController {
    trid: TransportId,
    namespaces: BTreeMap<u32, Arc<MemoryNamespace>>,
    max_io_qpairs: u32,
    live_qpairs: AtomicU32,
    next_qpair_id: AtomicU16,
    attached: AtomicBool,
    detach_count: AtomicUsize,
    qpair_failure: AtomicI32,
    submit_failure: AtomicI32,
    gate: Gate,
}

impl MemoryController {
    pub fn builder(trid: TransportId) -> MemoryControllerBuilder {
        MemoryControllerBuilder {
            trid,
            namespaces: BTreeMap::new(),
            max_io_qpairs: DEFAULT_MAX_IO_QPAIRS,
        }
    }

    pub fn trid(&self) -> &TransportId {
        &self.trid
    }

    /// Namespace storage, active or not.
    pub fn storage(&self, ns_id: u32) -> Option<&Arc<MemoryNamespace>> {
        self.namespaces.get(&ns_id)
    }

    /// Attached by a probe and not detached since.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Number of times the controller was detached.
    pub fn detach_count(&self) -> usize {
        self.detach_count.load(Ordering::Acquire)
    }

    /// Queue pairs currently allocated.
    pub fn live_qpairs(&self) -> u32 {
        self.live_qpairs.load(Ordering::Acquire)
    }

    /// Block command submission on every queue pair until [`thaw`](Self::thaw).
    pub fn freeze(&self) {
        self.gate.set(true);
    }

    pub fn thaw(&self) {
        self.gate.set(false);
    }

    /// Make every submission fail synchronously with `rc`.
    /// `None` restores normal operation.
    pub fn fail_submissions(&self, rc: Option<i32>) {
        self.submit_failure.store(rc.unwrap_or(0), Ordering::Release);
    }

    /// Make completion processing fail with `rc` on every queue pair.
    /// `None` restores normal operation.
    pub fn fail_qpairs(&self, rc: Option<i32>) {
        self.qpair_failure.store(rc.unwrap_or(0), Ordering::Release);
    }
}

impl NvmeControllerOps for Arc<MemoryController> {
    fn trid(&self) -> &TransportId {
        &self.trid
    }

    fn num_namespaces(&self) -> u32 {
        self.namespaces.keys().next_back().copied().unwrap_or(0)
    }

    fn namespace(&self, ns_id: u32) -> Option<NvmeNamespace> {
        self.namespaces.get(&ns_id).map(|ns| ns.describe())
    }

    fn alloc_io_qpair(&self, opts: &NvmeQpairOpts) -> Result<Box<dyn NvmeQpairOps>> {
        let max = self.max_io_qpairs;
        self.live_qpairs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < max).then_some(live + 1)
            })
            .map_err(|_| Error::from_rc(-libc::ENOMEM))?;

        let id = self.next_qpair_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        debug!(trid = %self.trid, qpair = id, "allocated I/O qpair");
        Ok(Box::new(MemoryQpair {
            id,
            ctrlr: Arc::clone(self),
            max_requests: opts.effective_requests() as usize,
            pending: VecDeque::new(),
            next_cid: 0,
        }))
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::Release);
        self.detach_count.fetch_add(1, Ordering::AcqRel);
    }
}

/// Builder for [`MemoryController`].
pub struct MemoryControllerBuilder {
    trid: TransportId,
    namespaces: BTreeMap<u32, Arc<MemoryNamespace>>,
    max_io_qpairs: u32,
}

impl MemoryControllerBuilder {
    /// Add an active namespace.
    pub fn namespace(mut self, id: u32, sector_size: u32, num_sectors: u64) -> Self {
        self.namespaces.insert(
            id,
            Arc::new(MemoryNamespace::new(id, sector_size, num_sectors, true)),
        );
        self
    }

    /// Add a namespace slot that reports as inactive.
    pub fn inactive_namespace(mut self, id: u32, sector_size: u32, num_sectors: u64) -> Self {
        self.namespaces.insert(
            id,
            Arc::new(MemoryNamespace::new(id, sector_size, num_sectors, false)),
        );
        self
    }

    pub fn max_io_qpairs(mut self, max: u32) -> Self {
        self.max_io_qpairs = max;
        self
    }

    pub fn build(self) -> Arc<MemoryController> {
        Arc::new(MemoryController {
            trid: self.trid,
            namespaces: self.namespaces,
            max_io_qpairs: self.max_io_qpairs,
            live_qpairs: AtomicU32::new(0),
            next_qpair_id: AtomicU16::new(0),
            attached: AtomicBool::new(false),
            detach_count: AtomicUsize::new(0),
            qpair_failure: AtomicI32::new(0),
            submit_failure: AtomicI32::new(0),
            gate: Gate::default(),
        })
    }
}

/// Sparse sector storage for one namespace.
pub struct MemoryNamespace {
    id: u32,
    sector_size: u32,
    num_sectors: u64,
    active: bool,
    sectors: Mutex<HashMap<u64, Box<[u8]>>>,
    injected: Mutex<VecDeque<NvmeStatus>>,
}

impl MemoryNamespace {
    fn new(id: u32, sector_size: u32, num_sectors: u64, active: bool) -> Self {
        Self {
            id,
            sector_size,
            num_sectors,
            active,
            sectors: Mutex::new(HashMap::new()),
            injected: Mutex::new(VecDeque::new()),
        }
    }

    pub fn describe(&self) -> NvmeNamespace {
        NvmeNamespace::new(self.id, self.sector_size, self.num_sectors, self.active)
    }

    /// Fail the next command on this namespace with `status`.
    ///
    /// Injected statuses are consumed in order, one per command.
    pub fn inject_error(&self, status: NvmeStatus) {
        self.injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(status);
    }

    /// Contents of one sector; unwritten sectors read as zeroes.
    pub fn sector(&self, lba: u64) -> Vec<u8> {
        let sectors = self.sectors.lock().unwrap_or_else(PoisonError::into_inner);
        match sectors.get(&lba) {
            Some(data) => data.to_vec(),
            None => vec![0; self.sector_size as usize],
        }
    }

    /// Number of sectors holding data.
    pub fn sectors_written(&self) -> usize {
        self.sectors.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn transfer(&self, direction: IoDirection, lba: u64, lba_count: u32, buf: &mut [u8]) -> NvmeStatus {
        if let Some(status) = self
            .injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            return status;
        }

        let in_range = lba
            .checked_add(u64::from(lba_count))
            .is_some_and(|end| end <= self.num_sectors);
        if !in_range {
            return NvmeStatus::generic(SC_LBA_OUT_OF_RANGE);
        }

        let sector_size = self.sector_size as usize;
        let mut sectors = self.sectors.lock().unwrap_or_else(PoisonError::into_inner);
        for (i, chunk) in buf.chunks_mut(sector_size).enumerate() {
            let sector_lba = lba + i as u64;
            match direction {
                IoDirection::Read => match sectors.get(&sector_lba) {
                    Some(data) => chunk.copy_from_slice(data),
                    None => chunk.fill(0),
                },
                IoDirection::Write => {
                    sectors.insert(sector_lba, chunk.to_vec().into_boxed_slice());
                }
            }
        }
        NvmeStatus::SUCCESS
    }
}

struct MemoryQpair {
    id: u16,
    ctrlr: Arc<MemoryController>,
    max_requests: usize,
    pending: VecDeque<(u16, Box<IoContext>)>,
    next_cid: u16,
}

impl NvmeQpairOps for MemoryQpair {
    fn id(&self) -> u16 {
        self.id
    }

    fn submit(&mut self, io: Box<IoContext>) -> std::result::Result<(), Rejected> {
        self.ctrlr.gate.wait_open();

        if !self.ctrlr.is_attached() {
            return Err(Rejected { io, rc: -libc::ENXIO });
        }
        let rc = self.ctrlr.submit_failure.load(Ordering::Acquire);
        if rc != 0 {
            return Err(Rejected { io, rc });
        }
        if self.pending.len() >= self.max_requests {
            return Err(Rejected { io, rc: -libc::ENOMEM });
        }

        let cid = self.next_cid;
        self.next_cid = self.next_cid.wrapping_add(1);
        self.pending.push_back((cid, io));
        Ok(())
    }

    fn process_completions(
        &mut self,
        max_completions: u32,
        on_complete: &mut dyn FnMut(Box<IoContext>, NvmeCompletion),
    ) -> std::result::Result<u32, i32> {
        let rc = self.ctrlr.qpair_failure.load(Ordering::Acquire);
        if rc != 0 {
            return Err(rc);
        }

        let limit = match max_completions {
            0 => self.pending.len(),
            max => self.pending.len().min(max as usize),
        };
        for _ in 0..limit {
            let Some((cid, mut io)) = self.pending.pop_front() else {
                break;
            };
            let status = match self.ctrlr.namespaces.get(&io.nsid()) {
                Some(ns) if ns.active => {
                    let (direction, lba, lba_count) = (io.direction(), io.lba(), io.lba_count());
                    ns.transfer(direction, lba, lba_count, io.buf_mut().as_mut_slice())
                }
                _ => NvmeStatus::generic(SC_INVALID_NAMESPACE_OR_FORMAT),
            };
            on_complete(io, NvmeCompletion::with_status(self.id, cid, status));
        }
        Ok(limit as u32)
    }

    fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for MemoryQpair {
    fn drop(&mut self) {
        self.ctrlr.live_qpairs.fetch_sub(1, Ordering::AcqRel);
    }
}
