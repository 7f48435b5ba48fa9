//! Completion dispatch.
//!
//! Every request ends in one of the functions below. Each consumes the
//! context, so the callback fires once and the context is freed right after.

use tracing::{debug, warn};

use crate::context::{IoContext, IoDirection};
use crate::nvme::NvmeCompletion;

/// Deliver a device completion.
pub(crate) fn complete(mut io: Box<IoContext>, cpl: NvmeCompletion) {
    if cpl.is_error() {
        warn!(
            sqid = cpl.sqid,
            cid = cpl.cid,
            nsid = io.nsid(),
            lba = io.lba(),
            "I/O error status: {}",
            cpl.status.as_str()
        );
        io.finish(i32::from(cpl.status_raw()), 0);
        return;
    }

    if io.direction() == IoDirection::Read {
        io.copy_to_dest();
    }
    let bytes = io.len();
    io.finish(0, bytes);
}

/// Fail a request the driver refused to issue.
pub(crate) fn fail(io: Box<IoContext>, rc: i32) {
    debug!(nsid = io.nsid(), lba = io.lba(), rc, "command issuance failed");
    io.finish(rc, 0);
}

/// Cancel a request that never reached the device.
pub(crate) fn cancel(io: Box<IoContext>) {
    io.finish(-libc::ECANCELED, 0);
}
