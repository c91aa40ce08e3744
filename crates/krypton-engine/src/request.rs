//! # Requests and Completions
//!
//! A request crosses the caller/engine boundary exactly once in each
//! direction: ownership transfers to the engine at admission and the result
//! transfers back through a one-shot completion pair. The engine holds the
//! sender; the caller keeps the handle. Resolution consumes the sender, so
//! delivering a result twice is unrepresentable.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use krypton_core::{Error, IvSeed, KeySlotIndex, OperationKind, Result};

// =============================================================================
// COMPLETION PAIR
// =============================================================================

/// Observer hook invoked right before the one-shot resolves.
///
/// Runs on whichever context completes the request, possibly the channel's
/// notification context; it must not block.
pub type CompletionCallback = Box<dyn FnOnce(core::result::Result<(), Error>) + Send>;

#[derive(Debug)]
struct CompletionInner {
    slot: Mutex<Option<Result<Vec<u8>>>>,
    cv: Condvar,
}

/// Engine-held side of the completion pair
pub struct CompletionSender {
    inner: Arc<CompletionInner>,
    callback: Option<CompletionCallback>,
}

impl core::fmt::Debug for CompletionSender {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompletionSender")
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl CompletionSender {
    /// Deliver the result, consuming the sender.
    ///
    /// The move makes a second delivery a type error rather than a runtime
    /// hazard.
    pub(crate) fn resolve(mut self, result: Result<Vec<u8>>) {
        if let Some(callback) = self.callback.take() {
            callback(result.as_ref().map(|_| ()).map_err(|e| *e));
        }
        let mut slot = lock_ignore_poison(&self.inner.slot);
        debug_assert!(slot.is_none());
        *slot = Some(result);
        self.inner.cv.notify_all();
    }
}

/// Caller-held side of the completion pair
#[derive(Debug)]
pub struct CompletionHandle {
    inner: Arc<CompletionInner>,
}

impl CompletionHandle {
    /// Whether the result has arrived
    pub fn is_resolved(&self) -> bool {
        lock_ignore_poison(&self.inner.slot).is_some()
    }

    /// Take the result if it has arrived
    pub fn try_result(&self) -> Option<Result<Vec<u8>>> {
        lock_ignore_poison(&self.inner.slot).take()
    }

    /// Block until the result arrives
    pub fn wait(self) -> Result<Vec<u8>> {
        let mut slot = lock_ignore_poison(&self.inner.slot);
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            slot = wait_ignore_poison(&self.inner.cv, slot);
        }
    }

    /// Block until the result arrives or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Vec<u8>>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut slot = lock_ignore_poison(&self.inner.slot);
        loop {
            if let Some(result) = slot.take() {
                return Some(result);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            slot = wait_timeout_ignore_poison(&self.inner.cv, slot, deadline - now);
        }
    }
}

fn completion_pair(callback: Option<CompletionCallback>) -> (CompletionSender, CompletionHandle) {
    let inner = Arc::new(CompletionInner {
        slot: Mutex::new(None),
        cv: Condvar::new(),
    });
    (
        CompletionSender {
            inner: Arc::clone(&inner),
            callback,
        },
        CompletionHandle { inner },
    )
}

// =============================================================================
// CRYPTO REQUEST
// =============================================================================

/// One caller-submitted operation.
///
/// Owned by the caller until `enqueue`; in-flight ownership belongs to the
/// engine until the completion pair resolves.
pub struct CryptoRequest {
    pub(crate) kind: OperationKind,
    pub(crate) key_slot: KeySlotIndex,
    pub(crate) iv: Option<IvSeed>,
    pub(crate) payload: Vec<u8>,
    pub(crate) completion: CompletionSender,
}

impl core::fmt::Debug for CryptoRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CryptoRequest")
            .field("kind", &self.kind)
            .field("key_slot", &self.key_slot)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl CryptoRequest {
    /// Create a request and the handle its result arrives on
    pub fn new(
        kind: OperationKind,
        key_slot: KeySlotIndex,
        iv: Option<IvSeed>,
        payload: Vec<u8>,
    ) -> (Self, CompletionHandle) {
        Self::with_callback_opt(kind, key_slot, iv, payload, None)
    }

    /// Create a request with a completion observer.
    ///
    /// The callback fires exactly once, right before the handle resolves,
    /// on whichever context completed the request.
    pub fn with_callback(
        kind: OperationKind,
        key_slot: KeySlotIndex,
        iv: Option<IvSeed>,
        payload: Vec<u8>,
        callback: CompletionCallback,
    ) -> (Self, CompletionHandle) {
        Self::with_callback_opt(kind, key_slot, iv, payload, Some(callback))
    }

    fn with_callback_opt(
        kind: OperationKind,
        key_slot: KeySlotIndex,
        iv: Option<IvSeed>,
        payload: Vec<u8>,
        callback: Option<CompletionCallback>,
    ) -> (Self, CompletionHandle) {
        let (sender, handle) = completion_pair(callback);
        (
            Self {
                kind,
                key_slot,
                iv,
                payload,
                completion: sender,
            },
            handle,
        )
    }

    /// Algorithm tag
    #[inline]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Bound key slot
    #[inline]
    pub fn key_slot(&self) -> KeySlotIndex {
        self.key_slot
    }

    /// Payload length in bytes
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Complete the request with an error, consuming it
    pub(crate) fn fail(self, err: Error) {
        self.completion.resolve(Err(err));
    }
}

// =============================================================================
// LOCK HELPERS
// =============================================================================
//
// A poisoned lock here means a panic already tore through the engine; the
// protected state is a plain Option/flag that stays coherent regardless, so
// completion delivery proceeds instead of cascading the panic.

pub(crate) fn lock_ignore_poison<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn wait_ignore_poison<'a, T>(
    cv: &Condvar,
    guard: std::sync::MutexGuard<'a, T>,
) -> std::sync::MutexGuard<'a, T> {
    match cv.wait(guard) {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn wait_timeout_ignore_poison<'a, T>(
    cv: &Condvar,
    guard: std::sync::MutexGuard<'a, T>,
    timeout: Duration,
) -> std::sync::MutexGuard<'a, T> {
    match cv.wait_timeout(guard, timeout) {
        Ok((guard, _)) => guard,
        Err(poisoned) => poisoned.into_inner().0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> (CryptoRequest, CompletionHandle) {
        CryptoRequest::new(
            OperationKind::CipherEncrypt,
            KeySlotIndex::new(2),
            None,
            vec![1, 2, 3],
        )
    }

    #[test]
    fn test_resolve_reaches_handle() {
        let (req, handle) = request();
        req.completion.resolve(Ok(vec![9, 9]));
        assert_eq!(handle.wait().unwrap(), vec![9, 9]);
    }

    #[test]
    fn test_fail_reaches_handle() {
        let (req, handle) = request();
        req.fail(Error::ShuttingDown);
        assert_eq!(handle.wait().unwrap_err(), Error::ShuttingDown);
    }

    #[test]
    fn test_wait_blocks_until_resolution() {
        let (req, handle) = request();
        let resolver = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            req.completion.resolve(Ok(vec![7]));
        });
        assert_eq!(handle.wait().unwrap(), vec![7]);
        resolver.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let (_req, handle) = request();
        assert!(handle.wait_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_callback_fires_before_handle_resolves() {
        let calls = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&calls);
        let (req, handle) = CryptoRequest::with_callback(
            OperationKind::Digest,
            KeySlotIndex::new(0),
            None,
            vec![0],
            Box::new(move |result| {
                assert!(result.is_ok());
                observed.fetch_add(1, Ordering::SeqCst);
            }),
        );
        req.completion.resolve(Ok(vec![]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.wait().is_ok());
    }
}
