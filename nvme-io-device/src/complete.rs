//! Callback-to-future utilities.
//!
//! Request completion is reported through callbacks. This module turns
//! those into futures with oneshot channels.
//!
//! # Pattern
//!
//! 1. Create a completion pair with [`completion()`]
//! 2. Move the sender into the request callback
//! 3. In the callback, send the result
//! 4. Await the receiver (or drive it with [`block_on`])

use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use futures_channel::oneshot;

use crate::error::{Error, Result};

/// Sender half of a completion pair.
pub struct CompletionSender<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> CompletionSender<T> {
    /// Send a result.
    pub fn complete(self, result: Result<T>) {
        // Ignore send error - receiver may have been dropped
        let _ = self.tx.send(result);
    }
}

/// Receiver half of a completion pair.
///
/// Implements `Future` - await this to get the result. Resolves to
/// [`Error::Cancelled`] if the sender is dropped without sending.
pub struct CompletionReceiver<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> CompletionReceiver<T> {
    /// Take the result if it has arrived.
    pub fn try_recv(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(Some(result)) => Some(result),
            Ok(None) => None,
            Err(_) => Some(Err(Error::Cancelled)),
        }
    }
}

impl<T> Future for CompletionReceiver<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Create a completion sender/receiver pair.
pub fn completion<T>() -> (CompletionSender<T>, CompletionReceiver<T>) {
    let (tx, rx) = oneshot::channel();
    (CompletionSender { tx }, CompletionReceiver { rx })
}

/// A simple waker that does nothing - we poll manually.
struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

/// Block on a future, running `idle` while it is pending.
///
/// With a caller-polled device, completions are only delivered when the
/// device is polled, so `idle` is where that happens. With a background
/// poller `idle` can simply yield.
///
/// # Example
///
/// ```
/// use nvme_io_device::complete::block_on;
/// use nvme_io_device::nvme::{MemoryController, MemoryDriver, TransportId};
/// use nvme_io_device::{DeviceOpts, EnvOpts, Registry};
///
/// # fn main() -> nvme_io_device::Result<()> {
/// # let ctrlr = MemoryController::builder(TransportId::pcie("0000:00:04.0")?)
/// #     .namespace(1, 512, 64)
/// #     .build();
/// # let registry = Registry::probe(&MemoryDriver::new().with_controller(ctrlr), &EnvOpts::default())?;
/// let mut device = registry.create_device(1, DeviceOpts::default())?;
///
/// let rx = device.read_async(0, 512)?;
/// let data = block_on(rx, || {
///     device.poll(0).unwrap();
/// })?;
/// assert_eq!(data.len(), 512);
/// # Ok(())
/// # }
/// ```
pub fn block_on<F, I>(future: F, mut idle: I) -> F::Output
where
    F: Future,
    I: FnMut(),
{
    let waker = Waker::from(Arc::new(NoopWaker));
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);

    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => return result,
            Poll::Pending => idle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_success() {
        let (tx, rx) = completion::<i32>();
        tx.complete(Ok(42));

        // Use noop waker to poll the future
        let waker = futures_task::noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut rx = rx;
        match Pin::new(&mut rx).poll(&mut cx) {
            Poll::Ready(Ok(v)) => assert_eq!(v, 42),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_completion_error() {
        let (tx, rx) = completion::<()>();
        tx.complete(Err(Error::Nvme { sct: 2, sc: 0x81 }));

        let waker = futures_task::noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut rx = rx;
        match Pin::new(&mut rx).poll(&mut cx) {
            Poll::Ready(Err(Error::Nvme { sct: 2, sc: 0x81 })) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_dropped_sender_cancels() {
        let (tx, mut rx) = completion::<u32>();
        assert!(rx.try_recv().is_none());
        drop(tx);
        assert!(matches!(rx.try_recv(), Some(Err(Error::Cancelled))));
    }

    #[test]
    fn test_block_on_runs_idle_until_ready() {
        let (tx, rx) = completion::<u32>();
        let mut tx = Some(tx);
        let mut idle_calls = 0;
        let v = block_on(rx, || {
            idle_calls += 1;
            if idle_calls == 3 {
                if let Some(tx) = tx.take() {
                    tx.complete(Ok(7));
                }
            }
        })
        .unwrap();
        assert_eq!(v, 7);
        assert_eq!(idle_calls, 3);
    }
}
