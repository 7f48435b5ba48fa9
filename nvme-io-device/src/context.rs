//! I/O contexts.
//!
//! An [`IoContext`] carries one read or write from submission to completion:
//! target namespace and LBA range, a DMA buffer sized to the request, the
//! caller's read destination and the completion callback. Contexts are
//! handed out by a [`ContextPool`], which counts how many are alive.
//!
//! The callback of a context fires exactly once. If a context is dropped
//! before it was completed (a queue pair freed with commands outstanding, a
//! ring drained on stop) the callback fires with `-ECANCELED`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::warn;

use crate::dma::DmaBuf;
use crate::error::{Error, Result, SubmitError};
use crate::nvme::NvmeStatus;

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

/// Outcome of a request, handed to its callback.
///
/// The request's context and DMA buffer are released before the callback
/// runs, so `live_contexts()` and `in_flight()` already exclude it.
#[derive(Debug)]
pub struct IoCompletion {
    /// 0 on success, the raw NVMe status on a device error, or a negative
    /// errno when the request never completed on the device
    pub result: i32,
    /// Bytes moved; 0 unless `result` is 0
    pub bytes_transferred: u32,
    /// Read destination, handed back whatever the outcome
    pub data: Option<Vec<u8>>,
}

impl IoCompletion {
    pub fn is_success(&self) -> bool {
        self.result == 0
    }

    /// Bytes transferred, or the failure as an [`Error`].
    pub fn status(&self) -> Result<u32> {
        match self.result {
            0 => Ok(self.bytes_transferred),
            rc if rc == -libc::ECANCELED => Err(Error::Cancelled),
            rc if rc < 0 => Err(Error::from_rc(rc)),
            raw => {
                let status = NvmeStatus::from_raw(raw as u16);
                Err(Error::Nvme {
                    sct: status.sct,
                    sc: status.sc,
                })
            }
        }
    }
}

/// Completion callback of a request.
pub type IoCallback = Box<dyn FnOnce(IoCompletion) + Send + 'static>;

/// Namespace a context targets.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IoTarget {
    pub nsid: u32,
    pub sector_size: u32,
}

/// State of one in-flight request.
pub struct IoContext {
    nsid: u32,
    sector_size: u32,
    direction: IoDirection,
    lba: u64,
    lba_count: u32,
    buf: DmaBuf,
    dest: Option<Vec<u8>>,
    callback: Option<IoCallback>,
    _guard: PoolGuard,
}

impl IoContext {
    pub fn nsid(&self) -> u32 {
        self.nsid
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn direction(&self) -> IoDirection {
        self.direction
    }

    /// First sector of the transfer.
    pub fn lba(&self) -> u64 {
        self.lba
    }

    pub fn lba_count(&self) -> u32 {
        self.lba_count
    }

    /// Transfer length in bytes (`lba_count * sector_size`).
    pub fn len(&self) -> u32 {
        self.lba_count * self.sector_size
    }

    pub fn is_empty(&self) -> bool {
        self.lba_count == 0
    }

    /// DMA buffer the device transfers to or from.
    pub fn buf(&self) -> &DmaBuf {
        &self.buf
    }

    pub fn buf_mut(&mut self) -> &mut DmaBuf {
        &mut self.buf
    }

    /// Copy the transferred data into the read destination.
    pub(crate) fn copy_to_dest(&mut self) {
        let len = self.len() as usize;
        if let Some(dest) = self.dest.as_mut() {
            dest[..len].copy_from_slice(&self.buf.as_slice()[..len]);
        }
    }

    /// Release the context, then fire the callback.
    pub(crate) fn finish(mut self: Box<Self>, result: i32, bytes_transferred: u32) {
        let callback = self.callback.take();
        let data = self.dest.take();
        drop(self);
        if let Some(callback) = callback {
            callback(IoCompletion {
                result,
                bytes_transferred,
                data,
            });
        }
    }

    /// Release the context without firing the callback.
    ///
    /// Used when submission fails synchronously and the caller learns of it
    /// from the returned error instead.
    pub(crate) fn discard(mut self: Box<Self>) {
        self.callback = None;
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(IoCompletion {
                result: -libc::ECANCELED,
                bytes_transferred: 0,
                data: self.dest.take(),
            });
        }
    }
}

impl fmt::Debug for IoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoContext")
            .field("nsid", &self.nsid)
            .field("direction", &self.direction)
            .field("lba", &self.lba)
            .field("lba_count", &self.lba_count)
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// Allocator and live counter for I/O contexts.
#[derive(Debug, Default)]
pub struct ContextPool {
    live: AtomicUsize,
    allocated: AtomicU64,
    max_live: Option<usize>,
}

impl ContextPool {
    pub fn new(max_live: Option<usize>) -> Self {
        Self {
            live: AtomicUsize::new(0),
            allocated: AtomicU64::new(0),
            max_live,
        }
    }

    /// Contexts currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Contexts allocated over the pool's lifetime.
    pub fn allocated_total(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Allocate a context for `length` bytes at byte `offset`.
    ///
    /// `length` must already be a non-zero multiple of the sector size.
    pub(crate) fn alloc(
        self: &Arc<Self>,
        target: IoTarget,
        direction: IoDirection,
        offset: u64,
        length: u32,
        dest: Option<Vec<u8>>,
        callback: IoCallback,
    ) -> std::result::Result<Box<IoContext>, SubmitError> {
        let guard = self.reserve()?;

        let align = if target.sector_size.is_power_of_two() {
            target.sector_size as usize
        } else {
            0
        };
        let buf = DmaBuf::alloc(length as usize, align).map_err(|e| {
            warn!(length, error = %e, "I/O buffer allocation failed");
            SubmitError::OutOfMemory
        })?;
        self.allocated.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(IoContext {
            nsid: target.nsid,
            sector_size: target.sector_size,
            direction,
            lba: offset / u64::from(target.sector_size),
            lba_count: length / target.sector_size,
            buf,
            dest,
            callback: Some(callback),
            _guard: guard,
        }))
    }

    fn reserve(self: &Arc<Self>) -> std::result::Result<PoolGuard, SubmitError> {
        let max = self.max_live.unwrap_or(usize::MAX);
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < max).then_some(live + 1)
            })
            .map_err(|_| SubmitError::OutOfMemory)?;
        Ok(PoolGuard {
            pool: Arc::clone(self),
        })
    }
}

/// Decrements the live counter when its context goes away.
struct PoolGuard {
    pool: Arc<ContextPool>,
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        self.pool.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const TARGET: IoTarget = IoTarget {
        nsid: 1,
        sector_size: 512,
    };

    fn recorder() -> (Arc<Mutex<Vec<(i32, u32)>>>, IoCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let cb: IoCallback = Box::new(move |c: IoCompletion| {
            seen2.lock().unwrap().push((c.result, c.bytes_transferred));
        });
        (seen, cb)
    }

    #[test]
    fn test_geometry() {
        let pool = Arc::new(ContextPool::default());
        let (_, cb) = recorder();
        let io = pool
            .alloc(TARGET, IoDirection::Write, 1536, 1024, None, cb)
            .unwrap();
        assert_eq!(io.lba(), 3);
        assert_eq!(io.lba_count(), 2);
        assert_eq!(io.len(), 1024);
        assert_eq!(io.buf().as_ptr() as usize % 512, 0);
        io.discard();
    }

    #[test]
    fn test_drop_cancels_once() {
        let pool = Arc::new(ContextPool::default());
        let (seen, cb) = recorder();
        let io = pool
            .alloc(TARGET, IoDirection::Read, 0, 512, Some(vec![0; 512]), cb)
            .unwrap();
        assert_eq!(pool.live(), 1);
        drop(io);
        assert_eq!(pool.live(), 0);
        assert_eq!(*seen.lock().unwrap(), vec![(-libc::ECANCELED, 0)]);
    }

    #[test]
    fn test_finish_releases_before_callback() {
        let pool = Arc::new(ContextPool::default());
        let observed = Arc::new(Mutex::new(None));
        let (pool2, observed2) = (pool.clone(), observed.clone());
        let io = pool
            .alloc(
                TARGET,
                IoDirection::Write,
                0,
                512,
                None,
                Box::new(move |_| *observed2.lock().unwrap() = Some(pool2.live())),
            )
            .unwrap();
        io.finish(0, 512);
        assert_eq!(*observed.lock().unwrap(), Some(0));
        assert_eq!(pool.allocated_total(), 1);
    }

    #[test]
    fn test_discard_is_silent() {
        let pool = Arc::new(ContextPool::default());
        let (seen, cb) = recorder();
        let io = pool.alloc(TARGET, IoDirection::Write, 0, 512, None, cb).unwrap();
        io.discard();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_pool_limit() {
        let pool = Arc::new(ContextPool::new(Some(1)));
        let (_, cb1) = recorder();
        let (_, cb2) = recorder();
        let io = pool.alloc(TARGET, IoDirection::Write, 0, 512, None, cb1).unwrap();
        let err = pool
            .alloc(TARGET, IoDirection::Write, 0, 512, None, cb2)
            .unwrap_err();
        assert_eq!(err, SubmitError::OutOfMemory);
        io.discard();
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_completion_status() {
        let ok = IoCompletion {
            result: 0,
            bytes_transferred: 512,
            data: None,
        };
        assert_eq!(ok.status().unwrap(), 512);

        let raw = NvmeStatus::generic(crate::nvme::status::SC_LBA_OUT_OF_RANGE).raw();
        let err = IoCompletion {
            result: i32::from(raw),
            bytes_transferred: 0,
            data: None,
        };
        assert!(matches!(err.status(), Err(Error::Nvme { sct: 0, sc: 0x80 })));

        let cancelled = IoCompletion {
            result: -libc::ECANCELED,
            bytes_transferred: 0,
            data: None,
        };
        assert!(matches!(cancelled.status(), Err(Error::Cancelled)));
    }
}
