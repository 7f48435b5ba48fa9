//! CPU core utilities.
//!
//! Used to pin the poller thread to a core and to hand the initializing
//! thread back to every core after the driver environment is set up.
//!
//! # Example
//!
//! ```
//! use nvme_io_device::affinity::Cores;
//!
//! for core in Cores::iter() {
//!     println!("core {core}");
//! }
//! ```

use std::io;

/// CPU core queries.
pub struct Cores;

impl Cores {
    /// Get the core the calling thread is running on.
    ///
    /// Returns `None` where the platform can't tell.
    pub fn current() -> Option<usize> {
        current_core()
    }

    /// Get the number of online cores.
    pub fn count() -> usize {
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }

    /// Iterate over online core ids.
    pub fn iter() -> impl Iterator<Item = usize> {
        0..Self::count()
    }
}

#[cfg(target_os = "linux")]
fn current_core() -> Option<usize> {
    let cpu = unsafe { libc::sched_getcpu() };
    usize::try_from(cpu).ok()
}

#[cfg(not(target_os = "linux"))]
fn current_core() -> Option<usize> {
    None
}

/// Pin the calling thread to `core`.
#[cfg(target_os = "linux")]
pub fn pin_current(core: usize) -> io::Result<()> {
    if core >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("core {core} out of range"),
        ));
    }
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        set_affinity(&set)
    }
}

/// Let the calling thread run on every online core again.
#[cfg(target_os = "linux")]
pub fn unpin_current() -> io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        // The kernel intersects the mask with the cores this process may use
        for core in 0..libc::CPU_SETSIZE as usize {
            libc::CPU_SET(core, &mut set);
        }
        set_affinity(&set)
    }
}

#[cfg(target_os = "linux")]
unsafe fn set_affinity(set: &libc::cpu_set_t) -> io::Result<()> {
    let ret = unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current(_core: usize) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(not(target_os = "linux"))]
pub fn unpin_current() -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_pin_and_unpin() {
        std::thread::spawn(|| {
            let core = Cores::current().unwrap();
            pin_current(core).unwrap();
            assert_eq!(Cores::current(), Some(core));
            unpin_current().unwrap();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_pin_out_of_range() {
        let err = pin_current(usize::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
