use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use crate::slot::Slot;

/// A lock-free, copy-on-write ordered set.
///
/// All reads are served by whichever immutable [`BTreeSet`] snapshot is
/// installed at the time of the call. Every write builds a complete new
/// snapshot and installs it with a single compare-and-swap, retrying
/// against the winning snapshot if a concurrent write got there first.
/// Writes that would leave the set unchanged return `false` (or `None`)
/// without installing anything.
///
/// Note that this structure is `Send` but NOT `Sync`. If you want to share
/// a [`CowSet`] between threads, simply clone it. Clones refer to the same
/// set, and each clone sets up its own thread-local memory reclamation
/// state.
///
/// The `LOCAL_GC_BUFFER_SIZE` const generic must be greater than 0. It
/// bounds how many replaced snapshots, no longer held by any reader, a
/// handle keeps alive before freeing them. Each of those is a full copy
/// of the set, so keep it small for large sets.
///
/// # Examples
///
/// ```
/// let set = cow_collections::CowSet::<u64>::default();
///
/// assert!(set.insert(3));
/// assert!(set.insert(1));
/// assert!(set.insert(2));
/// assert!(!set.insert(2));
///
/// assert_eq!(set.pop_first(), Some(1));
/// assert_eq!(set.pop_last(), Some(3));
/// assert_eq!(set.iter().collect::<Vec<_>>(), vec![2]);
/// ```
#[derive(Clone)]
pub struct CowSet<E, const LOCAL_GC_BUFFER_SIZE: usize = 4>
where
    E: 'static + Clone + Ord + Send + Sync,
{
    slot: Slot<BTreeSet<E>, LOCAL_GC_BUFFER_SIZE>,
}

impl<E, const LOCAL_GC_BUFFER_SIZE: usize> Default for CowSet<E, LOCAL_GC_BUFFER_SIZE>
where
    E: 'static + Clone + Ord + Send + Sync,
{
    fn default() -> CowSet<E, LOCAL_GC_BUFFER_SIZE> {
        CowSet::from(BTreeSet::new())
    }
}

impl<E, const LOCAL_GC_BUFFER_SIZE: usize> From<BTreeSet<E>> for CowSet<E, LOCAL_GC_BUFFER_SIZE>
where
    E: 'static + Clone + Ord + Send + Sync,
{
    fn from(set: BTreeSet<E>) -> CowSet<E, LOCAL_GC_BUFFER_SIZE> {
        CowSet {
            slot: Slot::new(set),
        }
    }
}

impl<E, const LOCAL_GC_BUFFER_SIZE: usize> fmt::Debug for CowSet<E, LOCAL_GC_BUFFER_SIZE>
where
    E: 'static + fmt::Debug + Clone + Ord + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CowSet ")?;
        f.debug_set().entries(self.snapshot().iter()).finish()
    }
}

impl<E, const LOCAL_GC_BUFFER_SIZE: usize> PartialEq for CowSet<E, LOCAL_GC_BUFFER_SIZE>
where
    E: 'static + Clone + Ord + Send + Sync,
{
    fn eq(&self, other: &Self) -> bool {
        let lhs = self.snapshot();
        let rhs = other.snapshot();
        Arc::ptr_eq(&lhs, &rhs) || lhs == rhs
    }
}

impl<E, const LOCAL_GC_BUFFER_SIZE: usize> CowSet<E, LOCAL_GC_BUFFER_SIZE>
where
    E: 'static + Clone + Ord + Send + Sync,
{
    /// Returns the snapshot that is currently installed.
    ///
    /// The snapshot never changes, even if this set is written to
    /// while it is held.
    ///
    /// # Examples
    /// ```
    /// let set = cow_collections::CowSet::<usize>::default();
    ///
    /// set.insert(1);
    ///
    /// let snapshot = set.snapshot();
    ///
    /// set.insert(2);
    ///
    /// assert_eq!(snapshot.len(), 1);
    /// assert_eq!(set.snapshot().len(), 2);
    /// ```
    pub fn snapshot(&self) -> Arc<BTreeSet<E>> {
        self.slot.load()
    }

    /// Returns `true` if the currently installed snapshot contains `value`.
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        E: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.snapshot().contains(value)
    }

    /// The number of elements in the currently installed snapshot.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns `true` if the currently installed snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Get the minimum element stored in this set.
    pub fn first(&self) -> Option<E> {
        self.snapshot().first().cloned()
    }

    /// Get the maximum element stored in this set.
    pub fn last(&self) -> Option<E> {
        self.snapshot().last().cloned()
    }

    /// Get the greatest element that is strictly less than `value`.
    ///
    /// # Examples
    /// ```
    /// let set: cow_collections::CowSet<usize> = [1, 3].into_iter().collect();
    ///
    /// assert_eq!(set.get_lt(&1), None);
    /// assert_eq!(set.get_lt(&3), Some(1));
    /// assert_eq!(set.get_lt(&4), Some(3));
    /// ```
    pub fn get_lt<Q>(&self, value: &Q) -> Option<E>
    where
        E: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.snapshot()
            .range::<Q, _>((Bound::Unbounded, Bound::Excluded(value)))
            .next_back()
            .cloned()
    }

    /// Get the greatest element that is less than or equal to `value`.
    ///
    /// # Examples
    /// ```
    /// let set: cow_collections::CowSet<usize> = [1, 3].into_iter().collect();
    ///
    /// assert_eq!(set.get_lte(&0), None);
    /// assert_eq!(set.get_lte(&1), Some(1));
    /// assert_eq!(set.get_lte(&2), Some(1));
    /// ```
    pub fn get_lte<Q>(&self, value: &Q) -> Option<E>
    where
        E: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.snapshot()
            .range::<Q, _>((Bound::Unbounded, Bound::Included(value)))
            .next_back()
            .cloned()
    }

    /// Get the least element that is strictly greater than `value`.
    pub fn get_gt<Q>(&self, value: &Q) -> Option<E>
    where
        E: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.snapshot()
            .range::<Q, _>((Bound::Excluded(value), Bound::Unbounded))
            .next()
            .cloned()
    }

    /// Get the least element that is greater than or equal to `value`.
    pub fn get_gte<Q>(&self, value: &Q) -> Option<E>
    where
        E: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.snapshot()
            .range::<Q, _>((Bound::Included(value), Bound::Unbounded))
            .next()
            .cloned()
    }

    /// Iterate over the set in ascending order.
    ///
    /// Unlike iterating a shared mutable structure, this is an atomic
    /// snapshot: the iterator observes exactly the elements that were
    /// present when it was created, regardless of concurrent writes.
    pub fn iter(&self) -> Iter<E> {
        self.range(..)
    }

    /// Iterate over a range of the set, over the snapshot installed when
    /// this is called.
    ///
    /// # Examples
    /// ```
    /// let set: cow_collections::CowSet<usize> = (0..10).collect();
    ///
    /// let forward: Vec<usize> = set.range(3..6).collect();
    /// assert_eq!(forward, vec![3, 4, 5]);
    ///
    /// let backward: Vec<usize> = set.range(3..=6).rev().collect();
    /// assert_eq!(backward, vec![6, 5, 4, 3]);
    /// ```
    pub fn range<R>(&self, range: R) -> Iter<E>
    where
        R: RangeBounds<E>,
    {
        Iter {
            snapshot: self.snapshot(),
            lo: range.start_bound().cloned(),
            hi: range.end_bound().cloned(),
        }
    }

    /// Atomically add `value` to the set, returning `true` if it was not
    /// already present.
    ///
    /// # Examples
    /// ```
    /// let set = cow_collections::CowSet::<usize>::default();
    ///
    /// assert!(set.insert(1));
    /// assert!(!set.insert(1));
    /// ```
    pub fn insert(&self, value: E) -> bool {
        let mut current = self.snapshot();
        loop {
            if current.contains(&value) {
                return false;
            }

            let mut next = (*current).clone();
            next.insert(value.clone());

            match self.slot.cas(&current, next) {
                Ok(()) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically add every element of `values` that is not already
    /// present, returning `true` if at least one element was added.
    ///
    /// All of the elements are added by the same snapshot installation,
    /// so no reader observes only some of them.
    ///
    /// # Examples
    /// ```
    /// let set = cow_collections::CowSet::<usize>::default();
    ///
    /// assert!(set.insert_all([1, 2]));
    /// assert!(set.insert_all([2, 3]));
    /// assert!(!set.insert_all([1, 3]));
    /// assert_eq!(set.len(), 3);
    /// ```
    pub fn insert_all<I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = E>,
    {
        let values: Vec<E> = values.into_iter().collect();

        let mut current = self.snapshot();
        loop {
            let mut absent = values
                .iter()
                .filter(|value| !current.contains(*value))
                .peekable();

            if absent.peek().is_none() {
                return false;
            }

            let mut next = (*current).clone();
            next.extend(absent.cloned());

            match self.slot.cas(&current, next) {
                Ok(()) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically remove `value` from the set, returning `true` if it
    /// was present.
    ///
    /// # Examples
    /// ```
    /// let set = cow_collections::CowSet::<usize>::default();
    ///
    /// assert!(!set.remove(&1));
    /// set.insert(1);
    /// assert!(set.remove(&1));
    /// ```
    pub fn remove<Q>(&self, value: &Q) -> bool
    where
        E: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut current = self.snapshot();
        loop {
            if !current.contains(value) {
                return false;
            }

            let mut next = (*current).clone();
            next.remove(value);

            match self.slot.cas(&current, next) {
                Ok(()) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically keep only the elements for which `f` returns `true`,
    /// returning `true` if any element was removed.
    ///
    /// `f` is evaluated against every element of each snapshot the
    /// operation reads, so it may be called more than once per element
    /// when racing with other writers.
    pub fn retain<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&E) -> bool,
    {
        let mut current = self.snapshot();
        loop {
            let kept: BTreeSet<E> = current.iter().filter(|value| f(*value)).cloned().collect();

            if kept.len() == current.len() {
                return false;
            }

            match self.slot.cas(&current, kept) {
                Ok(()) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically remove every element that also appears in `values`,
    /// returning `true` if any element was removed.
    ///
    /// # Examples
    /// ```
    /// let set: cow_collections::CowSet<usize> = (0..5).collect();
    ///
    /// assert!(set.remove_all(&[1, 3, 7]));
    /// assert!(!set.remove_all(&[7]));
    /// assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 2, 4]);
    /// ```
    pub fn remove_all<'a, I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = &'a E>,
    {
        let dropped: BTreeSet<&E> = values.into_iter().collect();
        self.retain(|value| !dropped.contains(&value))
    }

    /// Atomically remove every element that does not appear in `values`,
    /// returning `true` if any element was removed.
    ///
    /// # Examples
    /// ```
    /// let set: cow_collections::CowSet<usize> = (0..5).collect();
    ///
    /// assert!(set.retain_all(&[1, 3, 7]));
    /// assert!(!set.retain_all(&[1, 3]));
    /// assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 3]);
    /// ```
    pub fn retain_all<'a, I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = &'a E>,
    {
        let kept: BTreeSet<&E> = values.into_iter().collect();
        self.retain(|value| kept.contains(&value))
    }

    /// Atomically remove the minimum element stored in this set.
    ///
    /// # Examples
    /// ```
    /// let set: cow_collections::CowSet<usize> = [3, 1, 2].into_iter().collect();
    ///
    /// assert_eq!(set.pop_first(), Some(1));
    /// assert_eq!(set.pop_first(), Some(2));
    /// assert_eq!(set.pop_first(), Some(3));
    /// assert_eq!(set.pop_first(), None);
    /// ```
    pub fn pop_first(&self) -> Option<E> {
        let mut current = self.snapshot();
        loop {
            let first = current.first()?.clone();

            let rest: BTreeSet<E> = current
                .range::<E, _>((Bound::Excluded(&first), Bound::Unbounded))
                .cloned()
                .collect();

            match self.slot.cas(&current, rest) {
                Ok(()) => return Some(first),
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically remove the maximum element stored in this set.
    ///
    /// # Examples
    /// ```
    /// let set: cow_collections::CowSet<usize> = [3, 1, 2].into_iter().collect();
    ///
    /// assert_eq!(set.pop_last(), Some(3));
    /// assert_eq!(set.pop_last(), Some(2));
    /// assert_eq!(set.pop_last(), Some(1));
    /// assert_eq!(set.pop_last(), None);
    /// ```
    pub fn pop_last(&self) -> Option<E> {
        let mut current = self.snapshot();
        loop {
            let last = current.last()?.clone();

            let rest: BTreeSet<E> = current
                .range::<E, _>((Bound::Unbounded, Bound::Excluded(&last)))
                .cloned()
                .collect();

            match self.slot.cas(&current, rest) {
                Ok(()) => return Some(last),
                Err(actual) => current = actual,
            }
        }
    }

    /// Remove every element.
    ///
    /// This is an unconditional store rather than a compare-and-swap:
    /// a write racing with `clear` is either wiped out by it or applied
    /// on top of the empty set.
    pub fn clear(&self) {
        self.slot.store(BTreeSet::new());
    }
}

impl<E, const LOCAL_GC_BUFFER_SIZE: usize> FromIterator<E> for CowSet<E, LOCAL_GC_BUFFER_SIZE>
where
    E: 'static + Clone + Ord + Send + Sync,
{
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        CowSet::from(iter.into_iter().collect::<BTreeSet<E>>())
    }
}

impl<'a, E, const LOCAL_GC_BUFFER_SIZE: usize> IntoIterator for &'a CowSet<E, LOCAL_GC_BUFFER_SIZE>
where
    E: 'static + Clone + Ord + Send + Sync,
{
    type Item = E;
    type IntoIter = Iter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A double-ended iterator over one snapshot of a [`CowSet`].
///
/// Created by [`CowSet::iter`] and [`CowSet::range`]. The iterator owns
/// its snapshot, so it is not tied to the lifetime of the set and is
/// never affected by writes to it.
pub struct Iter<E>
where
    E: Clone + Ord,
{
    snapshot: Arc<BTreeSet<E>>,
    lo: Bound<E>,
    hi: Bound<E>,
}

impl<E> Iter<E>
where
    E: Clone + Ord,
{
    fn below_hi(&self, item: &E) -> bool {
        match &self.hi {
            Bound::Unbounded => true,
            Bound::Included(hi) => item <= hi,
            Bound::Excluded(hi) => item < hi,
        }
    }

    fn above_lo(&self, item: &E) -> bool {
        match &self.lo {
            Bound::Unbounded => true,
            Bound::Included(lo) => item >= lo,
            Bound::Excluded(lo) => item > lo,
        }
    }
}

impl<E> Iterator for Iter<E>
where
    E: Clone + Ord,
{
    type Item = E;

    fn next(&mut self) -> Option<E> {
        // one side of the range is left open so that BTreeSet::range
        // cannot panic on crossed bounds once both ends have advanced
        let item = self
            .snapshot
            .range::<E, _>((self.lo.as_ref(), Bound::Unbounded))
            .next()?
            .clone();

        if !self.below_hi(&item) {
            return None;
        }

        self.lo = Bound::Excluded(item.clone());
        Some(item)
    }
}

impl<E> DoubleEndedIterator for Iter<E>
where
    E: Clone + Ord,
{
    fn next_back(&mut self) -> Option<E> {
        let item = self
            .snapshot
            .range::<E, _>((Bound::Unbounded, self.hi.as_ref()))
            .next_back()?
            .clone();

        if !self.above_lo(&item) {
            return None;
        }

        self.hi = Bound::Excluded(item.clone());
        Some(item)
    }
}

#[test]
fn basic_set() {
    let set = CowSet::<usize>::default();

    let n = 64;
    for i in 0..=n {
        assert!(!set.contains(&i));
        assert!(set.insert(i));
        assert!(set.contains(&i), "failed to find element {i}");
    }

    for (i, k) in set.iter().enumerate() {
        assert_eq!(i, k);
    }

    for (i, k) in set.iter().rev().enumerate() {
        assert_eq!(n - i, k);
    }

    for (i, k) in set.range(0..n).enumerate() {
        assert_eq!(i, k);
    }

    for (i, k) in set.range(0..n).rev().enumerate() {
        assert_eq!((n - 1) - i, k);
    }

    for (i, k) in set.range(0..=n).rev().enumerate() {
        assert_eq!(n - i, k);
    }

    assert_eq!(set.len(), n + 1);
    assert_eq!(set.first(), Some(0));
    assert_eq!(set.last(), Some(n));
    assert_eq!(set.get_gt(&3), Some(4));
    assert_eq!(set.get_gte(&3), Some(3));
    assert_eq!(set.get_gt(&n), None);

    for i in 0..=n {
        assert!(set.remove(&i), "failed to remove element {i}");
        assert!(!set.remove(&i));
    }

    assert!(set.is_empty());
}

#[test]
fn poll_ordering() {
    let set: CowSet<usize> = [3, 1, 2].into_iter().collect();

    assert_eq!(set.pop_first(), Some(1));
    assert_eq!(set.pop_first(), Some(2));
    assert_eq!(set.pop_first(), Some(3));
    assert_eq!(set.pop_first(), None);

    let set: CowSet<usize> = [3, 1, 2].into_iter().collect();

    assert_eq!(set.pop_last(), Some(3));
    assert_eq!(set.pop_last(), Some(2));
    assert_eq!(set.pop_last(), Some(1));
    assert_eq!(set.pop_last(), None);
}

#[test]
fn unchanged_writes_install_nothing() {
    let set: CowSet<&str> = ["x", "y"].into_iter().collect();

    let before = set.snapshot();

    assert!(!set.retain_all(&["x", "y"]));
    assert!(!set.remove_all(&["z"]));
    assert!(!set.insert_all(["y", "x"]));
    assert!(!set.insert("x"));
    assert!(!set.remove(&"z"));
    assert!(!set.retain(|_| true));

    assert!(Arc::ptr_eq(&before, &set.snapshot()));

    assert!(set.retain_all(&["x"]));
    assert!(!Arc::ptr_eq(&before, &set.snapshot()));
    assert_eq!(set.iter().collect::<Vec<_>>(), vec!["x"]);
}

#[test]
fn iter_meets_in_the_middle() {
    let set: CowSet<u8> = (0..5).collect();

    let mut iter = set.iter();

    assert_eq!(iter.next(), Some(0));
    assert_eq!(iter.next_back(), Some(4));
    assert_eq!(iter.next(), Some(1));
    assert_eq!(iter.next_back(), Some(3));
    assert_eq!(iter.next(), Some(2));
    assert_eq!(iter.next_back(), None);
    assert_eq!(iter.next(), None);

    let empty: Vec<u8> = set.range(3..3).collect();
    assert!(empty.is_empty());
}

#[test]
fn clear_and_reuse() {
    let set: CowSet<u8> = (0..5).collect();
    let held = set.iter();

    set.clear();

    assert!(set.is_empty());
    assert_eq!(set.pop_first(), None);
    assert_eq!(held.count(), 5);

    assert!(set.insert(7));
    assert_eq!(set.first(), Some(7));
}

#[test]
fn construction_round_trip() {
    let source: BTreeSet<u32> = [9, 3, 27, 1, 81].into_iter().collect();

    let set = CowSet::<u32>::from(source.clone());

    assert_eq!(*set.snapshot(), source);
    assert_eq!(
        set.iter().collect::<Vec<_>>(),
        source.iter().copied().collect::<Vec<_>>()
    );
    assert_eq!(set.len(), 5);
    assert!(set.contains(&27));
}

#[test]
fn replaced_snapshots_are_released() {
    let set: CowSet<u64> = (0..1000).collect();

    let mut replaced = vec![];
    for i in 1000..1100 {
        replaced.push(Arc::downgrade(&set.snapshot()));
        assert!(set.insert(i));
    }

    let alive = replaced
        .iter()
        .filter(|snapshot| snapshot.upgrade().is_some())
        .count();
    assert!(alive <= 4, "{alive} replaced snapshots still alive");
}
