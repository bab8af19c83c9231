//! A thread-safe allocator.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, Level};

use super::{AllocatorStats, WordAllocator};
use crate::error::AllocError;
use crate::handle::Handle;

/// A thread-safe allocator.
///
/// This is just a `Mutex` wrapper over any [`WordAllocator`], plus a `Condvar` so
/// callers can wait for blocks to be freed when a bounded allocator runs out.
/// Word access goes through [`with`](Self::with) and [`with_mut`](Self::with_mut),
/// which run a closure under the lock.
#[derive(Debug)]
pub struct SharedAllocator<A: WordAllocator> {
    inner: Mutex<A>,
    freed: Condvar,
}

impl<A: WordAllocator> SharedAllocator<A> {
    pub fn new(allocator: A) -> Self {
        SharedAllocator {
            inner: Mutex::new(allocator),
            freed: Condvar::new(),
        }
    }

    pub fn into_inner(self) -> A {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    // A panic inside an allocator call leaves it consistent enough to keep going.
    fn lock(&self) -> MutexGuard<'_, A> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn malloc(&self, size: usize) -> Result<Handle, AllocError> {
        self.lock().malloc(size)
    }

    /// Like [`malloc`](Self::malloc), but waits for other threads to free blocks
    /// while the allocator is out of memory. Gives up with [`AllocError::Timeout`]
    /// once `timeout` has passed; `None` waits forever.
    #[instrument(level = "debug", skip(self), ret(level = Level::TRACE), err(level = Level::DEBUG))]
    pub fn malloc_wait(&self, size: usize, timeout: Option<Duration>) -> Result<Handle, AllocError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.lock();
        loop {
            match inner.malloc(size) {
                Err(AllocError::OutOfMemory) => {}
                result => return result,
            }
            debug!(size, "Waiting for blocks to be freed.");
            inner = match deadline {
                None => self.freed.wait(inner).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(AllocError::Timeout);
                    }
                    self.freed
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    pub fn realloc(&self, handle: Handle, new_size: usize) -> Result<Handle, AllocError> {
        let result = self.lock().realloc(handle, new_size);
        // Shrinking may have released blocks.
        self.freed.notify_all();
        result
    }

    pub fn free(&self, handle: Handle) {
        self.lock().free(handle);
        self.freed.notify_all();
    }

    pub fn with<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&self.lock())
    }

    /// Runs `f` with exclusive access. Waiters are woken afterwards in case `f` freed blocks.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        let result = f(&mut self.lock());
        self.freed.notify_all();
        result
    }

    pub fn stats(&self) -> AllocatorStats {
        self.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::allocators::BlockAllocator;
    use crate::AllocatorConfig;

    fn shared(blocks: usize) -> Arc<SharedAllocator<BlockAllocator>> {
        let blocks = BlockAllocator::new(AllocatorConfig::new(2, blocks)).unwrap();
        Arc::new(SharedAllocator::new(blocks))
    }

    #[test]
    fn waits_for_free() {
        let a = shared(1);
        let h = a.malloc(2).unwrap();
        assert_eq!(a.malloc(2), Err(AllocError::OutOfMemory));

        let waiter = {
            let a = Arc::clone(&a);
            thread::spawn(move || a.malloc_wait(2, Some(Duration::from_secs(30))))
        };
        thread::sleep(Duration::from_millis(20));
        a.free(h);
        let got = waiter.join().unwrap().unwrap();
        assert_eq!(got, h);
        assert_eq!(a.stats().used_blocks, 1);
    }

    #[test]
    fn times_out() {
        let a = shared(1);
        let _h = a.malloc(1).unwrap();
        let start = Instant::now();
        assert_eq!(
            a.malloc_wait(1, Some(Duration::from_millis(30))),
            Err(AllocError::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn other_errors_do_not_wait() {
        let a = shared(1);
        assert!(matches!(a.malloc_wait(3, None), Err(AllocError::TooLarge { .. })));
    }

    #[test]
    fn word_access_under_lock() {
        let a = shared(4);
        let h = a.malloc(2).unwrap();
        a.with_mut(|inner| inner.set_long(h, 0, -5)).unwrap();
        assert_eq!(a.with(|inner| inner.get_long(h, 0)), Ok(-5));
        let inner = Arc::try_unwrap(a).unwrap().into_inner();
        assert_eq!(inner.used_blocks(), 1);
    }
}
