//! Integration test for failed process-wide initialization
//!
//! A failed initialization is final for the process, so this runs in its
//! own test binary.

use nvme_io_device::nvme::{MemoryController, MemoryDriver, TransportId};
use nvme_io_device::{EnvOpts, InitError, registry};

#[test]
fn test_initialize_failure_is_final() {
    let broken = MemoryDriver::new().fail_env_init(-libc::ENOMEM);
    let err = registry::initialize(&broken, &EnvOpts::default()).unwrap_err();
    assert!(matches!(err, InitError::EnvironmentInit(rc) if rc == -libc::ENOMEM));
    assert!(registry::global().is_none());

    // Even a working driver can't recover the process
    let ctrlr = MemoryController::builder(TransportId::pcie("0000:00:04.0").unwrap())
        .namespace(1, 512, 1024)
        .build();
    let working = MemoryDriver::new().with_controller(ctrlr.clone());
    let err = registry::initialize(&working, &EnvOpts::default()).unwrap_err();
    assert!(matches!(err, InitError::PreviouslyFailed));
    assert!(!working.env_initialized());
    assert!(!ctrlr.is_attached());
    assert!(registry::global().is_none());
}
