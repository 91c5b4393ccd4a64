use std::marker::PhantomData;
use std::sync::{
    atomic::{AtomicPtr, Ordering},
    Arc,
};

use ebr::{Ebr, Guard};

use crate::debug_delay;

// Every deferred item is a whole snapshot, so the epoch is advanced on
// every pin. A sealed garbage bag is then freed by the next write on the
// same handle instead of after the next hundred or so.
const BUMP_EPOCH_OPS: usize = 1;

/// The single mutable location of a container. It always points at
/// a pointer produced by `Arc::into_raw`, and that raw pointer owns
/// one strong count of the installed snapshot.
struct Inner<S> {
    ptr: AtomicPtr<S>,
    // auto traits must follow the owned `Arc<S>`, not the raw pointer
    _owned: PhantomData<Arc<S>>,
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        let ptr = *self.ptr.get_mut();
        assert!(!ptr.is_null());
        let installed: Arc<S> = unsafe { Arc::from_raw(ptr) };
        drop(installed);
    }
}

/// An atomically replaceable, reference-counted snapshot.
///
/// Readers pin an epoch only for the instant between loading the raw
/// pointer and bumping its strong count. Writers that replace a snapshot
/// defer dropping the slot's reference to it until every reader that may
/// have loaded the old pointer has unpinned, so that bump never touches
/// freed memory.
///
/// Each handle retains at most `LOCAL_GC_BUFFER_SIZE` replaced snapshots
/// that no reader holds any more.
///
/// Like the `ebr` handle it carries, a `Slot` is `Send` but not `Sync`.
/// Clone it to share the same slot with another thread.
pub(crate) struct Slot<S: 'static + Send + Sync, const LOCAL_GC_BUFFER_SIZE: usize> {
    ebr: Ebr<Arc<S>, LOCAL_GC_BUFFER_SIZE, BUMP_EPOCH_OPS>,
    inner: Arc<Inner<S>>,
}

impl<S: 'static + Send + Sync, const LOCAL_GC_BUFFER_SIZE: usize> Clone
    for Slot<S, LOCAL_GC_BUFFER_SIZE>
{
    fn clone(&self) -> Self {
        Slot {
            ebr: self.ebr.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<S: 'static + Send + Sync, const LOCAL_GC_BUFFER_SIZE: usize> Slot<S, LOCAL_GC_BUFFER_SIZE> {
    pub(crate) fn new(snapshot: S) -> Slot<S, LOCAL_GC_BUFFER_SIZE> {
        assert!(
            LOCAL_GC_BUFFER_SIZE > 0,
            "LOCAL_GC_BUFFER_SIZE must be greater than 0"
        );

        let ptr = Arc::into_raw(Arc::new(snapshot)) as *mut S;

        Slot {
            ebr: Ebr::default(),
            inner: Arc::new(Inner {
                ptr: AtomicPtr::new(ptr),
                _owned: PhantomData,
            }),
        }
    }

    /// Returns the currently installed snapshot.
    pub(crate) fn load(&self) -> Arc<S> {
        let guard = self.ebr.pin();
        self.acquire(&guard)
    }

    /// Install `replacement` if `expected` is still the installed snapshot.
    ///
    /// On failure the snapshot that won is returned, so that retry loops
    /// can recompute against it directly.
    pub(crate) fn cas(&self, expected: &Arc<S>, replacement: S) -> Result<(), Arc<S>> {
        let mut guard = self.ebr.pin();

        if debug_delay() {
            log::trace!("injecting spurious snapshot cas failure");
            return Err(self.acquire(&guard));
        }

        // `expected` is kept alive by the caller, so its address cannot be
        // recycled into a different snapshot while we compare against it.
        let expected_ptr = Arc::as_ptr(expected) as *mut S;
        let replacement_ptr = Arc::into_raw(Arc::new(replacement)) as *mut S;

        let res = self.inner.ptr.compare_exchange(
            expected_ptr,
            replacement_ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        match res {
            Ok(replaced_ptr) => {
                let replaced: Arc<S> = unsafe { Arc::from_raw(replaced_ptr) };
                guard.defer_drop(replaced);
                Ok(())
            }
            Err(actual_ptr) => {
                let failed_value: Arc<S> = unsafe { Arc::from_raw(replacement_ptr) };
                drop(failed_value);

                log::trace!("snapshot cas lost a race, retrying against the winner");

                Err(unsafe { Self::share(actual_ptr) })
            }
        }
    }

    /// Unconditionally install `replacement`.
    pub(crate) fn store(&self, replacement: S) {
        let mut guard = self.ebr.pin();

        let replacement_ptr = Arc::into_raw(Arc::new(replacement)) as *mut S;
        let replaced_ptr = self.inner.ptr.swap(replacement_ptr, Ordering::AcqRel);

        let replaced: Arc<S> = unsafe { Arc::from_raw(replaced_ptr) };
        guard.defer_drop(replaced);
    }

    fn acquire(
        &self,
        _guard: &Guard<'_, Arc<S>, LOCAL_GC_BUFFER_SIZE, BUMP_EPOCH_OPS>,
    ) -> Arc<S> {
        let ptr = self.inner.ptr.load(Ordering::Acquire);
        unsafe { Self::share(ptr) }
    }

    /// # Safety
    ///
    /// `ptr` must have been read from the slot while an epoch guard is
    /// held, and that guard must still be held.
    unsafe fn share(ptr: *mut S) -> Arc<S> {
        assert!(!ptr.is_null());
        Arc::increment_strong_count(ptr);
        Arc::from_raw(ptr)
    }
}

#[test]
fn basic_slot() {
    let slot = Slot::<Vec<u8>, 4>::new(vec![1]);

    let first = slot.load();
    assert_eq!(*first, vec![1]);

    while slot.cas(&first, vec![1, 2]).is_err() {}

    // the first snapshot is stale now, so comparing against it loses
    let actual = slot.cas(&first, vec![9]).unwrap_err();
    assert_eq!(*actual, vec![1, 2]);

    // readers keep their snapshots across replacement
    assert_eq!(*first, vec![1]);

    slot.store(vec![]);
    assert!(slot.load().is_empty());
}

#[test]
fn replaced_snapshots_are_released() {
    const BUFFER: usize = 2;

    let slot = Slot::<Vec<u64>, BUFFER>::new((0..1000).collect());

    let mut replaced = vec![];
    for i in 0..100 {
        let current = slot.load();
        replaced.push(Arc::downgrade(&current));

        let mut next = (*current).clone();
        next.push(i);
        while slot.cas(&slot.load(), next.clone()).is_err() {}
    }

    let alive = replaced
        .iter()
        .filter(|snapshot| snapshot.upgrade().is_some())
        .count();
    assert!(alive <= BUFFER, "{alive} replaced snapshots still alive");
}
