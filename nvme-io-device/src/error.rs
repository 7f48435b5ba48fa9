//! Error types for nvme-io-device
//!
//! Each public operation has its own error enum so callers can match on the
//! failures that operation can actually produce. [`Error`] wraps all of them
//! for code that just wants to propagate with `?`.

use std::io;

/// Result type for nvme-io-device operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Registry initialization failed
    #[error(transparent)]
    Init(#[from] InitError),

    /// Namespace registration failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Device creation failed
    #[error(transparent)]
    Create(#[from] CreateError),

    /// Request submission failed
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// Poller control or completion draining failed
    #[error(transparent)]
    Poll(#[from] PollError),

    /// Invalid argument provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// DMA allocation failed
    #[error("DMA allocation of {0} bytes failed")]
    DmaAlloc(usize),

    /// Command completed with an NVMe error status
    #[error("NVMe error: sct={sct:#x} sc={sc:#x}")]
    Nvme { sct: u8, sc: u8 },

    /// Operation was cancelled before it reached the hardware
    #[error("Operation cancelled")]
    Cancelled,

    /// A spawned thread panicked
    #[error("Thread panicked")]
    ThreadPanic,

    /// OS error with errno
    #[error("OS error: {0}")]
    Os(i32),
}

impl Error {
    /// Create an OS error from errno
    pub fn from_errno(errno: i32) -> Self {
        Error::Os(errno)
    }

    /// Create from a driver return code (negative errno)
    pub fn from_rc(rc: i32) -> Self {
        if rc < 0 {
            Error::Os(-rc)
        } else {
            Error::Os(rc)
        }
    }
}

/// Errors from [`initialize`](crate::registry::initialize) and
/// [`Registry::probe`](crate::Registry::probe).
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// Driver environment setup failed
    #[error("driver environment initialization failed: rc={0}")]
    EnvironmentInit(i32),

    /// Controller enumeration failed
    #[error("controller probe failed: rc={0}")]
    Probe(i32),

    /// A namespace could not be registered
    #[error("namespace registration failed: {0}")]
    Attach(#[source] RegistryError),

    /// Enumeration finished without a single active namespace
    #[error("no NVMe namespace found")]
    NoNamespaceFound,

    /// An earlier initialization attempt failed; the process must restart
    #[error("initialization previously failed")]
    PreviouslyFailed,
}

/// Errors from [`Registry::register_namespace`](crate::Registry::register_namespace).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The fixed registry capacity is exhausted
    #[error("too many namespaces, the max number is {max}")]
    RegistryFull { max: usize },

    /// The namespace id is already registered
    #[error("namespace {0} already registered")]
    DuplicateNamespace(u32),

    /// The namespace reports a geometry that cannot address I/O
    #[error("namespace {nsid} has invalid sector size {sector_size}")]
    InvalidGeometry { nsid: u32, sector_size: u32 },
}

/// Errors from [`DeviceHandle::create`](crate::DeviceHandle::create).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreateError {
    /// No registered namespace has this id
    #[error("namespace {0} not found")]
    NamespaceNotFound(u32),

    /// The controller could not hand out another I/O queue pair
    #[error("I/O queue pair allocation failed: rc={0}")]
    QueuePairAllocationFailed(i32),
}

/// Errors from request submission. No callback fires when one of these is
/// returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Length is not a multiple of the namespace sector size
    #[error("I/O size {length} is not sector aligned, sector size is {sector_size}")]
    UnalignedLength { length: u32, sector_size: u32 },

    /// Zero-length request, or one too large to describe in a single command
    #[error("invalid I/O length {length}")]
    InvalidLength { length: usize },

    /// The caller's buffer is shorter than the requested length
    #[error("buffer holds {actual} bytes, request needs {needed}")]
    BufferTooSmall { needed: usize, actual: usize },

    /// The I/O context or its DMA buffer could not be allocated
    #[error("out of memory allocating I/O context")]
    OutOfMemory,

    /// The submission ring is full
    #[error("submission ring is full")]
    QueueFull,

    /// The driver rejected the command synchronously
    #[error("driver rejected command: rc={rc}")]
    Rejected { rc: i32 },

    /// The queue pair was lost with a panicked poller thread
    #[error("queue pair unavailable")]
    QueuePairUnavailable,
}

/// Errors from polling and poller control.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// A poller thread is already attached to this device
    #[error("device is already polling")]
    AlreadyPolling,

    /// The background poller owns the queue pair
    #[error("background poller owns the queue pair")]
    PollerActive,

    /// The poller thread could not be spawned
    #[error("failed to create poller thread: {0}")]
    ThreadCreate(#[source] io::Error),

    /// The poller thread panicked; its queue pair is gone
    #[error("poller thread panicked")]
    PollerPanicked,

    /// Completion processing failed on the queue pair
    #[error("completion processing failed: rc={0}")]
    Qpair(i32),

    /// The queue pair was lost with a panicked poller thread
    #[error("queue pair unavailable")]
    QueuePairUnavailable,
}
