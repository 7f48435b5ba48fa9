//! Background poller thread.
//!
//! While polling is active the device's queue pair lives on a dedicated
//! thread. Submitters push requests into a [`SubmissionRing`]; the thread
//! drains it, issues each request, reaps completions and dispatches them.
//!
//! ```text
//!  submitter threads                 poller thread
//! ┌──────────────────┐          ┌──────────────────────────────┐
//! │ submit_read()    │          │ loop {                       │
//! │ submit_write()   │──ring───▶│   dequeue_burst → submit     │
//! └──────────────────┘          │   process_completions        │
//!                               │     → dispatch::complete     │
//!                               │   every N iters: check flag  │
//!                               │ }                            │
//!                               └──────────────────────────────┘
//! ```
//!
//! The queue pair moves into the thread when it starts and comes back when
//! it is joined, so it is never touched by two threads at once.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering, fence};
use std::thread;

use crossbeam::channel;
use tracing::{debug, error, info, warn};

use crate::affinity;
use crate::config::PollerConfig;
use crate::dispatch;
use crate::error::PollError;
use crate::nvme::NvmeQpair;
use crate::ring::SubmissionRing;

/// Lifecycle of a device's background poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PollerState {
    /// No poller thread
    Stopped = 0,
    /// Thread spawned, not yet looping
    Starting = 1,
    /// Thread is looping
    Running = 2,
    /// Running flag cleared, waiting for the thread to exit
    StopRequested = 3,
}

impl PollerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PollerState::Starting,
            2 => PollerState::Running,
            3 => PollerState::StopRequested,
            _ => PollerState::Stopped,
        }
    }
}

struct Shared {
    running: AtomicBool,
    state: AtomicU8,
}

impl Shared {
    fn state(&self) -> PollerState {
        PollerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PollerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// A running poller thread and the ring feeding it.
pub(crate) struct Poller {
    ring: Arc<SubmissionRing>,
    shared: Arc<Shared>,
    handle: thread::JoinHandle<Option<NvmeQpair>>,
}

impl Poller {
    /// Spawn the poller thread and move `qpair` into it.
    ///
    /// On failure the queue pair is handed back with the error and no thread
    /// is left running.
    pub(crate) fn start(
        qpair: NvmeQpair,
        ring_name: String,
        affinity: Option<usize>,
        config: &PollerConfig,
    ) -> Result<Self, (NvmeQpair, PollError)> {
        // Builder::spawn panics on interior NUL bytes
        if config.thread_name.contains('\0') {
            error!(name = ?config.thread_name, "invalid polling thread name");
            let e = io::Error::new(
                io::ErrorKind::InvalidInput,
                "thread name contains a NUL byte",
            );
            return Err((qpair, PollError::ThreadCreate(e)));
        }

        let ring = Arc::new(SubmissionRing::new(ring_name, config.ring_capacity));
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            state: AtomicU8::new(PollerState::Starting as u8),
        });

        // The queue pair only crosses over once the thread exists
        let (tx, rx) = channel::bounded::<NvmeQpair>(1);

        let thread_ring = Arc::clone(&ring);
        let thread_shared = Arc::clone(&shared);
        let thread_config = config.clone();
        let spawned = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let mut qpair = rx.recv().ok()?;
                if let Some(core) = affinity {
                    match affinity::pin_current(core) {
                        Ok(()) => debug!(core, "poller pinned"),
                        Err(e) => warn!(core, error = %e, "failed to pin poller thread"),
                    }
                }
                let _ = thread_shared.state.compare_exchange(
                    PollerState::Starting as u8,
                    PollerState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                info!(ring = thread_ring.name(), qpair = qpair.id(), "polling thread started");

                run(&mut qpair, &thread_ring, &thread_shared.running, &thread_config);

                info!(ring = thread_ring.name(), "polling thread exit");
                Some(qpair)
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "failed to create polling thread");
                shared.running.store(false, Ordering::SeqCst);
                shared.set_state(PollerState::Stopped);
                return Err((qpair, PollError::ThreadCreate(e)));
            }
        };

        if let Err(channel::SendError(qpair)) = tx.send(qpair) {
            // Thread died before taking the queue pair
            shared.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            shared.set_state(PollerState::Stopped);
            return Err((qpair, PollError::PollerPanicked));
        }

        Ok(Self {
            ring,
            shared,
            handle,
        })
    }

    pub(crate) fn ring(&self) -> &SubmissionRing {
        &self.ring
    }

    pub(crate) fn state(&self) -> PollerState {
        self.shared.state()
    }

    /// Stop the thread and take the queue pair back.
    ///
    /// Blocks until the thread exits. Requests still in the ring are
    /// cancelled.
    pub(crate) fn stop(self) -> Result<NvmeQpair, PollError> {
        let Poller {
            ring,
            shared,
            handle,
        } = self;

        shared.set_state(PollerState::StopRequested);
        shared.running.store(false, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        let joined = handle.join();
        shared.set_state(PollerState::Stopped);

        let mut cancelled = 0usize;
        while let Some(io) = ring.pop() {
            dispatch::cancel(io);
            cancelled += 1;
        }
        if cancelled > 0 {
            warn!(ring = ring.name(), cancelled, "cancelled requests left in submission ring");
        }

        match joined {
            Ok(Some(qpair)) => Ok(qpair),
            Ok(None) => Err(PollError::PollerPanicked),
            Err(_) => {
                error!(ring = ring.name(), "polling thread panicked");
                Err(PollError::PollerPanicked)
            }
        }
    }
}

/// The polling loop.
fn run(qpair: &mut NvmeQpair, ring: &SubmissionRing, running: &AtomicBool, config: &PollerConfig) {
    let mut pending = Vec::with_capacity(config.dequeue_burst);
    let check_interval = config.flag_check_interval.max(1);
    let mut is_polling = running.load(Ordering::Acquire);
    let mut poll_count = 0u32;
    let mut qpair_failed = false;

    while is_polling {
        ring.dequeue_burst(&mut pending, config.dequeue_burst);
        for io in pending.drain(..) {
            if let Err(rejected) = qpair.submit(io) {
                dispatch::fail(rejected.io, rejected.rc);
            }
        }

        match qpair.process_completions(config.completion_batch, dispatch::complete) {
            Ok(_) => qpair_failed = false,
            Err(rc) => {
                if !qpair_failed {
                    error!(qpair = qpair.id(), rc, "completion processing failed");
                }
                qpair_failed = true;
            }
        }

        poll_count += 1;
        if poll_count >= check_interval {
            poll_count = 0;
            is_polling = running.load(Ordering::Acquire);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            PollerState::Stopped,
            PollerState::Starting,
            PollerState::Running,
            PollerState::StopRequested,
        ] {
            assert_eq!(PollerState::from_u8(state as u8), state);
        }
    }
}
