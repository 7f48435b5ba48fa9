//! NVMe queue pair options.

/// NVMe queue pair options.
///
/// Configure queue pair behavior when allocating.
#[derive(Debug, Default, Clone)]
pub struct NvmeQpairOpts {
    /// Queue depth
    pub io_queue_size: Option<u32>,
    /// Maximum outstanding requests; submissions beyond it are rejected
    pub io_queue_requests: Option<u32>,
}

impl NvmeQpairOpts {
    /// Default queue depth when none is requested.
    pub const DEFAULT_IO_QUEUE_SIZE: u32 = 256;
    /// Default request pool size when none is requested.
    pub const DEFAULT_IO_QUEUE_REQUESTS: u32 = 512;

    pub fn io_queue_size(mut self, size: u32) -> Self {
        self.io_queue_size = Some(size);
        self
    }

    pub fn io_queue_requests(mut self, requests: u32) -> Self {
        self.io_queue_requests = Some(requests);
        self
    }

    /// Request pool size after applying defaults.
    pub fn effective_requests(&self) -> u32 {
        let size = self.io_queue_size.unwrap_or(Self::DEFAULT_IO_QUEUE_SIZE);
        self.io_queue_requests
            .unwrap_or(Self::DEFAULT_IO_QUEUE_REQUESTS)
            .max(size)
    }
}
