use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

struct PayloadInner {
    bytes: Bytes,
    refs: AtomicUsize,
    released: AtomicBool,
}

impl PayloadInner {
    fn release(&self) {
        let prev = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => {
                self.released.store(true, Ordering::Release);
                tracing::trace!("payload of {} bytes released", self.bytes.len());
            }
            Ok(_) => {}
            Err(_) => {
                tracing::error!(
                    "payload of {} bytes released more times than it was retained",
                    self.bytes.len()
                );
            }
        }
    }
}

/// A fan-out payload shared read-only by every delivery target.
///
/// The creator holds the first reference. Each target gets its own handle from
/// [`PayloadRef::retain`], and every handle gives its reference back when it is
/// dropped, so the count settles at zero exactly once after the last send
/// finishes (or is abandoned).
pub struct PayloadRef {
    inner: Arc<PayloadInner>,
}

impl PayloadRef {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: Arc::new(PayloadInner {
                bytes: bytes.into(),
                refs: AtomicUsize::new(1),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn retain(&self) -> PayloadRef {
        self.inner.refs.fetch_add(1, Ordering::AcqRel);
        PayloadRef {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.inner.bytes
    }

    /// Returns an observer that can watch the reference count without
    /// holding a reference of its own.
    pub fn tracker(&self) -> PayloadTracker {
        PayloadTracker {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for PayloadRef {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl fmt::Debug for PayloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadRef")
            .field("len", &self.inner.bytes.len())
            .field("refs", &self.inner.refs.load(Ordering::Acquire))
            .finish()
    }
}

#[derive(Clone)]
pub struct PayloadTracker {
    inner: Arc<PayloadInner>,
}

impl PayloadTracker {
    pub fn ref_count(&self) -> usize {
        self.inner.refs.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn force_release(&self) {
        self.inner.release();
    }
}
