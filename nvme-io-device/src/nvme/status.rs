//! NVMe completion status.

use std::fmt;

/// Status code type: generic command status.
pub const SCT_GENERIC: u8 = 0x0;
/// Status code type: command specific status.
pub const SCT_COMMAND_SPECIFIC: u8 = 0x1;
/// Status code type: media and data integrity errors.
pub const SCT_MEDIA_ERROR: u8 = 0x2;
/// Status code type: path related status.
pub const SCT_PATH: u8 = 0x3;
/// Status code type: vendor specific.
pub const SCT_VENDOR_SPECIFIC: u8 = 0x7;

pub const SC_SUCCESS: u8 = 0x00;
pub const SC_INVALID_OPCODE: u8 = 0x01;
pub const SC_INVALID_FIELD: u8 = 0x02;
pub const SC_DATA_TRANSFER_ERROR: u8 = 0x04;
pub const SC_INTERNAL_DEVICE_ERROR: u8 = 0x06;
pub const SC_ABORTED_BY_REQUEST: u8 = 0x07;
pub const SC_ABORTED_SQ_DELETION: u8 = 0x08;
pub const SC_INVALID_NAMESPACE_OR_FORMAT: u8 = 0x0b;
pub const SC_LBA_OUT_OF_RANGE: u8 = 0x80;
pub const SC_CAPACITY_EXCEEDED: u8 = 0x81;
pub const SC_NAMESPACE_NOT_READY: u8 = 0x82;

/// Media error: write fault.
pub const SC_WRITE_FAULTS: u8 = 0x80;
/// Media error: unrecovered read error.
pub const SC_UNRECOVERED_READ_ERROR: u8 = 0x81;

/// Status field of a completion queue entry.
///
/// A command is successful if both SCT and SC are 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NvmeStatus {
    /// Status Code Type (bits 9:11 of the raw status)
    pub sct: u8,
    /// Status Code (bits 1:8 of the raw status)
    pub sc: u8,
}

impl NvmeStatus {
    pub const SUCCESS: NvmeStatus = NvmeStatus {
        sct: SCT_GENERIC,
        sc: SC_SUCCESS,
    };

    pub fn new(sct: u8, sc: u8) -> Self {
        Self { sct, sc }
    }

    pub fn generic(sc: u8) -> Self {
        Self::new(SCT_GENERIC, sc)
    }

    pub fn is_error(&self) -> bool {
        self.sct != 0 || self.sc != 0
    }

    /// Raw 16-bit status as laid out in the completion entry, phase bit clear.
    pub fn raw(&self) -> u16 {
        (((self.sct & 0x7) as u16) << 9) | ((self.sc as u16) << 1)
    }

    /// Decode a raw completion status.
    pub fn from_raw(raw: u16) -> Self {
        Self {
            sct: ((raw >> 9) & 0x7) as u8,
            sc: ((raw >> 1) & 0xff) as u8,
        }
    }

    /// Human-readable status string.
    pub fn as_str(&self) -> &'static str {
        match (self.sct, self.sc) {
            (SCT_GENERIC, SC_SUCCESS) => "SUCCESS",
            (SCT_GENERIC, SC_INVALID_OPCODE) => "INVALID OPCODE",
            (SCT_GENERIC, SC_INVALID_FIELD) => "INVALID FIELD",
            (SCT_GENERIC, SC_DATA_TRANSFER_ERROR) => "DATA TRANSFER ERROR",
            (SCT_GENERIC, SC_INTERNAL_DEVICE_ERROR) => "INTERNAL DEVICE ERROR",
            (SCT_GENERIC, SC_ABORTED_BY_REQUEST) => "ABORTED - BY REQUEST",
            (SCT_GENERIC, SC_ABORTED_SQ_DELETION) => "ABORTED - SQ DELETION",
            (SCT_GENERIC, SC_INVALID_NAMESPACE_OR_FORMAT) => "INVALID NAMESPACE OR FORMAT",
            (SCT_GENERIC, SC_LBA_OUT_OF_RANGE) => "LBA OUT OF RANGE",
            (SCT_GENERIC, SC_CAPACITY_EXCEEDED) => "CAPACITY EXCEEDED",
            (SCT_GENERIC, SC_NAMESPACE_NOT_READY) => "NAMESPACE NOT READY",
            (SCT_MEDIA_ERROR, SC_WRITE_FAULTS) => "WRITE FAULTS",
            (SCT_MEDIA_ERROR, SC_UNRECOVERED_READ_ERROR) => "UNRECOVERED READ ERROR",
            (SCT_VENDOR_SPECIFIC, _) => "VENDOR SPECIFIC",
            _ => "RESERVED",
        }
    }
}

impl fmt::Display for NvmeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:02x}/{:02x})", self.as_str(), self.sct, self.sc)
    }
}

/// A completion queue entry as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvmeCompletion {
    /// Submission queue the command was issued on
    pub sqid: u16,
    /// Command identifier
    pub cid: u16,
    pub status: NvmeStatus,
}

impl NvmeCompletion {
    pub fn success(sqid: u16, cid: u16) -> Self {
        Self {
            sqid,
            cid,
            status: NvmeStatus::SUCCESS,
        }
    }

    pub fn with_status(sqid: u16, cid: u16, status: NvmeStatus) -> Self {
        Self { sqid, cid, status }
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    pub fn status_raw(&self) -> u16 {
        self.status.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_layout() {
        let status = NvmeStatus::generic(SC_LBA_OUT_OF_RANGE);
        assert_eq!(status.raw(), 0x80 << 1);
        assert_eq!(NvmeStatus::from_raw(status.raw()), status);

        let media = NvmeStatus::new(SCT_MEDIA_ERROR, SC_UNRECOVERED_READ_ERROR);
        assert_eq!(media.raw(), (2 << 9) | (0x81 << 1));
        assert_eq!(NvmeStatus::from_raw(media.raw() | 1), media);
    }

    #[test]
    fn test_status_strings() {
        assert!(!NvmeStatus::SUCCESS.is_error());
        assert_eq!(NvmeStatus::SUCCESS.as_str(), "SUCCESS");
        assert_eq!(
            NvmeStatus::generic(SC_LBA_OUT_OF_RANGE).to_string(),
            "LBA OUT OF RANGE (00/80)"
        );
        assert_eq!(NvmeStatus::new(SCT_PATH, 0x01).as_str(), "RESERVED");
    }
}
