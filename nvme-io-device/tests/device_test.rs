//! Integration tests for caller-polled devices
//!
//! Every test builds its own memory-backed controller and registry, so they
//! are independent of the process-wide registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nvme_io_device::nvme::status::{SC_LBA_OUT_OF_RANGE, SC_UNRECOVERED_READ_ERROR, SCT_MEDIA_ERROR};
use nvme_io_device::nvme::{MemoryController, MemoryDriver, NvmeQpairOpts, NvmeStatus, TransportId};
use nvme_io_device::{
    CreateError, DeviceHandle, DeviceOpts, EnvOpts, IoCompletion, PollError, Registry, Result,
    SubmitError,
};

const GIB: u64 = 1 << 30;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup(sector_size: u32, num_sectors: u64) -> Result<(Arc<MemoryController>, Registry)> {
    init_tracing();
    let ctrlr = MemoryController::builder(TransportId::pcie("0000:00:04.0")?)
        .namespace(1, sector_size, num_sectors)
        .max_io_qpairs(4)
        .build();
    let driver = MemoryDriver::new().with_controller(ctrlr.clone());
    let registry = Registry::probe(&driver, &EnvOpts::new("device_test"))?;
    Ok((ctrlr, registry))
}

type Seen = Arc<Mutex<Vec<IoCompletion>>>;

fn recorder() -> (Seen, impl Fn() -> Box<dyn FnOnce(IoCompletion) + Send>) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let make = move || {
        let seen = seen2.clone();
        Box::new(move |c: IoCompletion| seen.lock().unwrap().push(c)) as Box<dyn FnOnce(IoCompletion) + Send>
    };
    (seen, make)
}

/// Poll until `n` completions were recorded.
fn poll_until(device: &mut DeviceHandle, seen: &Seen, n: usize) -> Result<()> {
    for _ in 0..1000 {
        if seen.lock().unwrap().len() >= n {
            return Ok(());
        }
        device.poll(0)?;
    }
    panic!("only {} of {} completions arrived", seen.lock().unwrap().len(), n);
}

#[test]
fn test_hello_world() -> Result<()> {
    // 1 GiB namespace with 512-byte sectors
    let (ctrlr, registry) = setup(512, GIB / 512)?;
    assert_eq!(registry.namespace_size(1), Some(GIB));
    assert_eq!(registry.namespace_sector_size(1), Some(512));

    let mut device = registry.create_device(1, DeviceOpts::default())?;
    assert_eq!(device.capacity(), GIB);
    assert!(!device.is_polling());

    // "hello world" zero-padded to 4096 bytes, eight sectors
    let mut msg = b"hello world".to_vec();
    msg.resize(4096, 0);

    let (seen, cb) = recorder();
    device.submit_write(&msg, 0, 4096, cb())?;
    poll_until(&mut device, &seen, 1)?;
    device.submit_read(0, vec![0; 4096], 4096, cb())?;
    poll_until(&mut device, &seen, 2)?;

    let seen = seen.lock().unwrap();
    assert_eq!((seen[0].result, seen[0].bytes_transferred), (0, 4096));
    assert_eq!((seen[1].result, seen[1].bytes_transferred), (0, 4096));
    let data = seen[1].data.as_ref().unwrap();
    assert_eq!(data, &msg);
    eprintln!("{}", String::from_utf8_lossy(&data[..11]));

    assert_eq!(ctrlr.storage(1).unwrap().sectors_written(), 8);
    assert_eq!(device.live_contexts(), 0);
    Ok(())
}

#[test]
fn test_round_trip_multi_sector() -> Result<()> {
    let (ctrlr, registry) = setup(4096, 256)?;
    let mut device = registry.create_device(1, DeviceOpts::default())?;

    let pattern: Vec<u8> = (0..16384u32).map(|i| (i % 251) as u8).collect();
    let (seen, cb) = recorder();
    device.submit_write(&pattern, 8192, 16384, cb())?;
    poll_until(&mut device, &seen, 1)?;

    // LBAs 2..6 now hold the pattern
    let ns = ctrlr.storage(1).unwrap();
    assert_eq!(ns.sector(2), pattern[..4096].to_vec());
    assert_eq!(ns.sector(5), pattern[12288..].to_vec());

    // Destination may be larger than the request
    device.submit_read(8192, vec![0xff; 20000], 16384, cb())?;
    poll_until(&mut device, &seen, 2)?;

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].bytes_transferred, 16384);
    assert!(seen[0].data.is_none());
    let data = seen[1].data.as_ref().unwrap();
    assert_eq!(&data[..16384], &pattern[..]);
    assert!(data[16384..].iter().all(|&b| b == 0xff));
    Ok(())
}

#[test]
fn test_offset_is_floored_to_sector() -> Result<()> {
    let (ctrlr, registry) = setup(512, 64)?;
    let mut device = registry.create_device(1, DeviceOpts::default())?;

    let (seen, cb) = recorder();
    device.submit_write(&[0x11; 512], 700, 512, cb())?;
    poll_until(&mut device, &seen, 1)?;

    let ns = ctrlr.storage(1).unwrap();
    assert_eq!(ns.sector(1), vec![0x11; 512]);
    assert_eq!(ns.sector(2), vec![0; 512]);
    Ok(())
}

#[test]
fn test_invalid_requests_have_no_side_effects() -> Result<()> {
    let (_ctrlr, registry) = setup(512, 64)?;
    let mut device = registry.create_device(1, DeviceOpts::default())?;
    let fired = Arc::new(AtomicUsize::new(0));

    let f = fired.clone();
    let err = device
        .submit_write(&[0; 512], 0, 100, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_err();
    assert_eq!(
        err,
        SubmitError::UnalignedLength {
            length: 100,
            sector_size: 512
        }
    );

    let f = fired.clone();
    let err = device
        .submit_read(0, vec![0; 256], 512, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_err();
    assert_eq!(
        err,
        SubmitError::BufferTooSmall {
            needed: 512,
            actual: 256
        }
    );

    let f = fired.clone();
    let err = device
        .submit_read(0, Vec::new(), 0, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_err();
    assert_eq!(err, SubmitError::InvalidLength { length: 0 });

    device.poll(0)?;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(device.contexts_allocated(), 0);
    assert_eq!(device.live_contexts(), 0);
    Ok(())
}

#[test]
fn test_unknown_namespace() -> Result<()> {
    let (ctrlr, registry) = setup(512, 64)?;

    let err = registry.create_device(999, DeviceOpts::default()).unwrap_err();
    assert_eq!(err, CreateError::NamespaceNotFound(999));
    assert_eq!(ctrlr.live_qpairs(), 0);
    assert_eq!(registry.namespace_size(999), None);
    Ok(())
}

#[test]
fn test_qpair_allocation_failure() -> Result<()> {
    init_tracing();
    let ctrlr = MemoryController::builder(TransportId::pcie("0000:00:04.0")?)
        .namespace(1, 512, 64)
        .max_io_qpairs(1)
        .build();
    let driver = MemoryDriver::new().with_controller(ctrlr.clone());
    let registry = Registry::probe(&driver, &EnvOpts::default())?;

    let first = registry.create_device(1, DeviceOpts::default())?;
    let err = registry.create_device(1, DeviceOpts::default()).unwrap_err();
    assert_eq!(err, CreateError::QueuePairAllocationFailed(-libc::ENOMEM));

    first.destroy()?;
    assert_eq!(ctrlr.live_qpairs(), 0);
    let _second = registry.create_device(1, DeviceOpts::default())?;
    assert_eq!(ctrlr.live_qpairs(), 1);
    Ok(())
}

#[test]
fn test_error_completions() -> Result<()> {
    let (ctrlr, registry) = setup(512, 64)?;
    let mut device = registry.create_device(1, DeviceOpts::default())?;
    let (seen, cb) = recorder();

    // Runs past the last sector
    device.submit_write(&[1; 1024], 63 * 512, 1024, cb())?;
    poll_until(&mut device, &seen, 1)?;

    // Media error on a read leaves the destination untouched
    let media = NvmeStatus::new(SCT_MEDIA_ERROR, SC_UNRECOVERED_READ_ERROR);
    ctrlr.storage(1).unwrap().inject_error(media);
    device.submit_read(0, vec![0xee; 512], 512, cb())?;
    poll_until(&mut device, &seen, 2)?;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);

    let out_of_range = NvmeStatus::generic(SC_LBA_OUT_OF_RANGE);
    assert_eq!(seen[0].result, i32::from(out_of_range.raw()));
    assert_eq!(seen[0].bytes_transferred, 0);
    assert!(seen[0].status().is_err());

    assert_eq!(seen[1].result, i32::from(media.raw()));
    assert_eq!(seen[1].bytes_transferred, 0);
    assert_eq!(seen[1].data.as_deref(), Some(&[0xee; 512][..]));
    assert_eq!(device.live_contexts(), 0);
    Ok(())
}

#[test]
fn test_synchronous_rejection() -> Result<()> {
    let (ctrlr, registry) = setup(512, 64)?;
    let opts = DeviceOpts::default().qpair(NvmeQpairOpts::default().io_queue_size(2).io_queue_requests(2));
    let mut device = registry.create_device(1, opts)?;
    let (seen, cb) = recorder();

    device.submit_write(&[1; 512], 0, 512, cb())?;
    device.submit_write(&[2; 512], 512, 512, cb())?;
    let err = device.submit_write(&[3; 512], 1024, 512, cb()).unwrap_err();
    assert_eq!(err, SubmitError::Rejected { rc: -libc::ENOMEM });
    assert_eq!(device.in_flight(), 2);

    assert_eq!(device.poll(0)?, 2);
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(device.in_flight(), 0);

    ctrlr.fail_submissions(Some(-libc::EIO));
    let err = device.submit_read(0, vec![0; 512], 512, cb()).unwrap_err();
    assert_eq!(err, SubmitError::Rejected { rc: -libc::EIO });
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(device.live_contexts(), 0);
    Ok(())
}

#[test]
fn test_poll_batches_and_failures() -> Result<()> {
    let (ctrlr, registry) = setup(512, 64)?;
    let mut device = registry.create_device(1, DeviceOpts::default().throttle_limit(2))?;
    let (seen, cb) = recorder();

    for i in 0..5u64 {
        device.submit_write(&[i as u8; 512], i * 512, 512, cb())?;
    }
    assert_eq!(device.in_flight(), 5);
    assert!(device.throttle());

    assert_eq!(device.poll(2)?, 2);
    assert_eq!(device.poll(1)?, 1);
    assert!(!device.throttle());

    ctrlr.fail_qpairs(Some(-libc::ENXIO));
    assert!(matches!(device.poll(0), Err(PollError::Qpair(rc)) if rc == -libc::ENXIO));
    ctrlr.fail_qpairs(None);

    assert_eq!(device.poll(0)?, 2);
    assert_eq!(device.poll(0)?, 0);
    assert_eq!(seen.lock().unwrap().len(), 5);
    Ok(())
}

#[test]
fn test_destroy_cancels_outstanding() -> Result<()> {
    let (ctrlr, registry) = setup(512, 64)?;
    let mut device = registry.create_device(1, DeviceOpts::default())?;
    let (seen, cb) = recorder();

    device.submit_read(0, vec![0; 512], 512, cb())?;
    device.submit_write(&[1; 512], 0, 512, cb())?;
    device.destroy()?;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|c| c.result == -libc::ECANCELED && c.bytes_transferred == 0));
    // The read destination still comes back
    assert_eq!(seen[0].data.as_ref().map(Vec::len), Some(512));
    assert_eq!(ctrlr.live_qpairs(), 0);
    Ok(())
}
