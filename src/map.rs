use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::slot::Slot;
use crate::CasFailure;

/// A lock-free, copy-on-write concurrent map.
///
/// All reads are served by whichever immutable [`HashMap`] snapshot is
/// installed at the time of the call. Every write builds a complete new
/// snapshot and installs it with a single compare-and-swap, retrying
/// against the winning snapshot if a concurrent write got there first.
/// Conditional writes re-check their condition against every snapshot
/// they retry against, and writes that would not change anything return
/// without installing a snapshot.
///
/// Note that this structure is `Send` but NOT `Sync`. If you want to share
/// a [`CowMap`] between threads, simply clone it. Clones refer to the same
/// map, and each clone sets up its own thread-local memory reclamation
/// state.
///
/// The `LOCAL_GC_BUFFER_SIZE` const generic must be greater than 0. It
/// bounds how many replaced snapshots, no longer held by any reader, a
/// handle keeps alive before freeing them.
///
/// Values are returned by cloning them out of the snapshot, so it can be
/// a good idea to use values that are cheap to clone, which can be easily
/// handled with `Arc` etc...
///
/// # Examples
///
/// ```
/// let map = cow_collections::CowMap::<&str, usize>::default();
///
/// assert_eq!(map.insert("a", 1), None);
/// assert_eq!(map.insert("a", 2), Some(1));
///
/// assert_eq!(map.insert_if_absent("a", 3), Some(2));
/// assert!(map.replace_if_eq(&"a", &2, 4));
/// assert!(!map.remove_if_eq(&"a", &2));
///
/// assert_eq!(map.get(&"a"), Some(4));
/// ```
#[derive(Clone)]
pub struct CowMap<K, V, const LOCAL_GC_BUFFER_SIZE: usize = 4>
where
    K: 'static + Clone + Eq + Hash + Send + Sync,
    V: 'static + Clone + Send + Sync,
{
    slot: Slot<HashMap<K, V>, LOCAL_GC_BUFFER_SIZE>,
}

impl<K, V, const LOCAL_GC_BUFFER_SIZE: usize> Default for CowMap<K, V, LOCAL_GC_BUFFER_SIZE>
where
    K: 'static + Clone + Eq + Hash + Send + Sync,
    V: 'static + Clone + Send + Sync,
{
    fn default() -> CowMap<K, V, LOCAL_GC_BUFFER_SIZE> {
        CowMap::from(HashMap::new())
    }
}

impl<K, V, const LOCAL_GC_BUFFER_SIZE: usize> From<HashMap<K, V>>
    for CowMap<K, V, LOCAL_GC_BUFFER_SIZE>
where
    K: 'static + Clone + Eq + Hash + Send + Sync,
    V: 'static + Clone + Send + Sync,
{
    fn from(map: HashMap<K, V>) -> CowMap<K, V, LOCAL_GC_BUFFER_SIZE> {
        CowMap {
            slot: Slot::new(map),
        }
    }
}

impl<K, V, const LOCAL_GC_BUFFER_SIZE: usize> fmt::Debug for CowMap<K, V, LOCAL_GC_BUFFER_SIZE>
where
    K: 'static + fmt::Debug + Clone + Eq + Hash + Send + Sync,
    V: 'static + fmt::Debug + Clone + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CowMap ")?;
        f.debug_map().entries(self.snapshot().iter()).finish()
    }
}

impl<K, V, const LOCAL_GC_BUFFER_SIZE: usize> PartialEq for CowMap<K, V, LOCAL_GC_BUFFER_SIZE>
where
    K: 'static + Clone + Eq + Hash + Send + Sync,
    V: 'static + Clone + PartialEq + Send + Sync,
{
    fn eq(&self, other: &Self) -> bool {
        let lhs = self.snapshot();
        let rhs = other.snapshot();
        Arc::ptr_eq(&lhs, &rhs) || lhs == rhs
    }
}

impl<K, V, const LOCAL_GC_BUFFER_SIZE: usize> CowMap<K, V, LOCAL_GC_BUFFER_SIZE>
where
    K: 'static + Clone + Eq + Hash + Send + Sync,
    V: 'static + Clone + Send + Sync,
{
    /// Returns the snapshot that is currently installed.
    ///
    /// The snapshot never changes, even if this map is written to
    /// while it is held.
    pub fn snapshot(&self) -> Arc<HashMap<K, V>> {
        self.slot.load()
    }

    /// Get a clone of the value associated with `key` in the currently
    /// installed snapshot.
    ///
    /// # Examples
    /// ```
    /// let map = cow_collections::CowMap::<usize, usize>::default();
    ///
    /// map.insert(1, 1);
    ///
    /// assert_eq!(map.get(&0), None);
    /// assert_eq!(map.get(&1), Some(1));
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.snapshot().get(key).cloned()
    }

    /// Returns `true` if `key` is bound in the currently installed snapshot.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.snapshot().contains_key(key)
    }

    /// Returns `true` if any key is bound to `value` in the currently
    /// installed snapshot. This is a linear scan.
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.snapshot().values().any(|bound| bound == value)
    }

    /// The number of entries in the currently installed snapshot.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns `true` if the currently installed snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Iterate over clones of every entry of the currently installed
    /// snapshot, in no particular order.
    pub fn iter(&self) -> std::vec::IntoIter<(K, V)> {
        let snapshot = self.snapshot();
        let entries: Vec<(K, V)> = snapshot
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.into_iter()
    }

    /// Atomically bind `key` to `value`, returning the previous value
    /// associated with this key if one existed.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = cow_collections::CowMap::<usize, usize>::default();
    ///
    /// assert_eq!(map.insert(1, 1), None);
    /// assert_eq!(map.insert(1, 1), Some(1));
    /// ```
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut current = self.snapshot();
        loop {
            let mut next = (*current).clone();
            let last = next.insert(key.clone(), value.clone());

            match self.slot.cas(&current, next) {
                Ok(()) => return last,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically remove the value associated with this key, returning
    /// the previous value if one existed.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = cow_collections::CowMap::<usize, usize>::default();
    ///
    /// assert_eq!(map.remove(&1), None);
    /// assert_eq!(map.insert(1, 1), None);
    /// assert_eq!(map.remove(&1), Some(1));
    /// ```
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut current = self.snapshot();
        loop {
            if !current.contains_key(key) {
                return None;
            }

            let mut next = (*current).clone();
            let removed = next.remove(key);

            match self.slot.cas(&current, next) {
                Ok(()) => return removed,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically bind every entry of `entries`, overwriting existing
    /// bindings for the same keys. When `entries` repeats a key, the last
    /// binding for it wins.
    ///
    /// If every entry is already bound to an equal value, nothing is
    /// installed.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = cow_collections::CowMap::<usize, usize>::default();
    ///
    /// map.insert(1, 1);
    /// map.insert_all([(1, 10), (2, 20)]);
    ///
    /// assert_eq!(map.get(&1), Some(10));
    /// assert_eq!(map.get(&2), Some(20));
    /// ```
    pub fn insert_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        V: PartialEq,
    {
        let batch: HashMap<K, V> = entries.into_iter().collect();

        let mut current = self.snapshot();
        loop {
            let changes_something = batch.iter().any(|(k, v)| current.get(k) != Some(v));

            if !changes_something {
                return;
            }

            let mut next = (*current).clone();
            next.extend(batch.iter().map(|(k, v)| (k.clone(), v.clone())));

            match self.slot.cas(&current, next) {
                Ok(()) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Remove every entry.
    ///
    /// This is an unconditional store rather than a compare-and-swap:
    /// a write racing with `clear` is either wiped out by it or applied
    /// on top of the empty map.
    pub fn clear(&self) {
        self.slot.store(HashMap::new());
    }

    /// Atomically bind `key` to `value` only if `key` is not bound yet.
    ///
    /// Returns `None` if this call created the binding, or the value
    /// that was already bound otherwise. If another writer binds `key`
    /// while this call is retrying, the other writer's value is returned
    /// and nothing is installed.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = cow_collections::CowMap::<usize, usize>::default();
    ///
    /// assert_eq!(map.insert_if_absent(1, 1), None);
    /// assert_eq!(map.insert_if_absent(1, 2), Some(1));
    /// assert_eq!(map.get(&1), Some(1));
    /// ```
    pub fn insert_if_absent(&self, key: K, value: V) -> Option<V> {
        let mut current = self.snapshot();
        loop {
            if let Some(existing) = current.get(&key) {
                return Some(existing.clone());
            }

            let mut next = (*current).clone();
            let displaced = next.insert(key.clone(), value.clone());
            assert!(
                displaced.is_none(),
                "insert_if_absent displaced a binding from a snapshot where the key was absent"
            );

            match self.slot.cas(&current, next) {
                Ok(()) => return None,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically remove the binding for `key` only if it is bound to
    /// `expected`. Returns `true` if the binding was removed.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = cow_collections::CowMap::<usize, usize>::default();
    ///
    /// map.insert(1, 2);
    ///
    /// assert!(!map.remove_if_eq(&1, &1));
    /// assert_eq!(map.get(&1), Some(2));
    ///
    /// assert!(map.remove_if_eq(&1, &2));
    /// assert_eq!(map.get(&1), None);
    /// ```
    pub fn remove_if_eq<Q>(&self, key: &Q, expected: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        let mut current = self.snapshot();
        loop {
            match current.get(key) {
                Some(bound) if bound == expected => {}
                _ => return false,
            }

            let mut next = (*current).clone();
            next.remove(key);

            match self.slot.cas(&current, next) {
                Ok(()) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically rebind `key` to `new` only if it is currently bound to
    /// `expected`. Returns `true` if the value was replaced.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = cow_collections::CowMap::<usize, usize>::default();
    ///
    /// assert!(!map.replace_if_eq(&1, &1, 2));
    ///
    /// map.insert(1, 1);
    ///
    /// assert!(map.replace_if_eq(&1, &1, 2));
    /// assert!(!map.replace_if_eq(&1, &1, 3));
    /// assert_eq!(map.get(&1), Some(2));
    /// ```
    pub fn replace_if_eq<Q>(&self, key: &Q, expected: &V, new: V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        let mut current = self.snapshot();
        loop {
            match current.get(key) {
                Some(bound) if bound == expected => {}
                _ => return false,
            }

            let mut next = (*current).clone();
            match next.get_mut(key) {
                Some(bound) => *bound = new.clone(),
                None => unreachable!("key vanished from a private copy of the snapshot"),
            }

            match self.slot.cas(&current, next) {
                Ok(()) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically rebind `key` to `value` only if `key` is already bound,
    /// returning the value it replaced. Unbound keys are left unbound and
    /// `None` is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = cow_collections::CowMap::<usize, usize>::default();
    ///
    /// assert_eq!(map.replace(&1, 1), None);
    /// assert_eq!(map.get(&1), None);
    ///
    /// map.insert(1, 1);
    ///
    /// assert_eq!(map.replace(&1, 2), Some(1));
    /// assert_eq!(map.get(&1), Some(2));
    /// ```
    pub fn replace<Q>(&self, key: &Q, value: V) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut current = self.snapshot();
        loop {
            if !current.contains_key(key) {
                return None;
            }

            let mut next = (*current).clone();
            let previous = match next.get_mut(key) {
                Some(bound) => std::mem::replace(bound, value.clone()),
                None => unreachable!("key vanished from a private copy of the snapshot"),
            };

            match self.slot.cas(&current, next) {
                Ok(()) => return Some(previous),
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically compare and swap the value associated with this key from the old value to the
    /// new one. An old value of `None` means "only create this value if it does not already
    /// exist". A new value of `None` means "delete this value, if it matches the provided old value".
    /// If successful, returns the old value if it existed. If unsuccessful, returns the proposed
    /// new value.
    ///
    /// # Examples
    ///
    /// ```
    /// let map = cow_collections::CowMap::<usize, usize>::default();
    ///
    /// // key 1 does not yet exist
    /// assert_eq!(map.get(&1), None);
    ///
    /// // uniquely create value 10
    /// map.cas(1, None, Some(10)).unwrap();
    ///
    /// assert_eq!(map.get(&1).unwrap(), 10);
    ///
    /// // compare and swap from value 10 to value 20
    /// map.cas(1, Some(&10_usize), Some(20)).unwrap();
    ///
    /// assert_eq!(map.get(&1).unwrap(), 20);
    ///
    /// // if we guess the wrong current value, a CasFailure is returned
    /// // which will tell us what the actual current value is (which we
    /// // failed to provide) and it will give us back our proposed new
    /// // value.
    /// let cas_result = map.cas(1, Some(&999999_usize), Some(30));
    ///
    /// let expected_cas_failure = Err(cow_collections::CasFailure {
    ///     actual: Some(20),
    ///     returned_new_value: Some(30),
    /// });
    ///
    /// assert_eq!(cas_result, expected_cas_failure);
    ///
    /// // conditionally delete
    /// map.cas(1, Some(&20_usize), None).unwrap();
    ///
    /// assert_eq!(map.get(&1), None);
    /// ```
    pub fn cas<VRef>(
        &self,
        key: K,
        old: Option<&VRef>,
        new: Option<V>,
    ) -> Result<Option<V>, CasFailure<V>>
    where
        V: Borrow<VRef>,
        VRef: PartialEq + ?Sized,
    {
        let mut current = self.snapshot();
        loop {
            let bound = current.get(&key);

            let matches = match (bound, old) {
                (None, None) => true,
                (Some(bound), Some(old)) => <V as Borrow<VRef>>::borrow(bound) == old,
                _ => false,
            };

            if !matches {
                return Err(CasFailure {
                    actual: bound.cloned(),
                    returned_new_value: new,
                });
            }

            if bound.is_none() && new.is_none() {
                // deleting an absent key changes nothing
                return Ok(None);
            }

            let mut next = (*current).clone();
            let previous = match &new {
                Some(value) => next.insert(key.clone(), value.clone()),
                None => next.remove(&key),
            };

            match self.slot.cas(&current, next) {
                Ok(()) => return Ok(previous),
                Err(actual) => current = actual,
            }
        }
    }
}

impl<K, V, const LOCAL_GC_BUFFER_SIZE: usize> FromIterator<(K, V)>
    for CowMap<K, V, LOCAL_GC_BUFFER_SIZE>
where
    K: 'static + Clone + Eq + Hash + Send + Sync,
    V: 'static + Clone + Send + Sync,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        CowMap::from(iter.into_iter().collect::<HashMap<K, V>>())
    }
}

impl<'a, K, V, const LOCAL_GC_BUFFER_SIZE: usize> IntoIterator
    for &'a CowMap<K, V, LOCAL_GC_BUFFER_SIZE>
where
    K: 'static + Clone + Eq + Hash + Send + Sync,
    V: 'static + Clone + Send + Sync,
{
    type Item = (K, V);
    type IntoIter = std::vec::IntoIter<(K, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[test]
fn basic_map() {
    let map = CowMap::<usize, usize>::default();

    let n = 64;
    for i in 0..=n {
        assert_eq!(map.get(&i), None);
        assert_eq!(map.insert(i, i), None);
        assert_eq!(map.get(&i), Some(i), "failed to get key {i}");
    }

    assert_eq!(map.len(), n + 1);
    assert!(map.contains_key(&n));
    assert!(map.contains_value(&n));
    assert!(!map.contains_value(&(n + 1)));

    let mut visible: Vec<(usize, usize)> = map.iter().collect();
    visible.sort_unstable();
    assert_eq!(visible, (0..=n).map(|i| (i, i)).collect::<Vec<_>>());

    for i in 0..=n {
        assert_eq!(map.remove(&i), Some(i), "failed to remove key {i}");
        assert_eq!(map.remove(&i), None);
    }

    assert!(map.is_empty());
}

#[test]
fn conditional_writes() {
    let map = CowMap::<&str, u32>::default();

    assert_eq!(map.insert_if_absent("k", 1), None);
    assert_eq!(map.insert_if_absent("k", 2), Some(1));

    // mismatched conditions leave the binding alone
    assert!(!map.remove_if_eq(&"k", &2));
    assert!(!map.replace_if_eq(&"k", &2, 3));
    assert_eq!(map.get(&"k"), Some(1));

    assert!(map.replace_if_eq(&"k", &1, 3));
    assert_eq!(map.replace(&"k", 4), Some(3));
    assert_eq!(map.replace(&"missing", 4), None);
    assert!(!map.contains_key(&"missing"));

    assert!(map.remove_if_eq(&"k", &4));
    assert!(map.is_empty());
}

#[test]
fn cas_semantics() {
    let map = CowMap::<u8, u8>::default();

    assert_eq!(map.cas(1, None::<&u8>, None), Ok(None));
    assert_eq!(map.cas(1, None::<&u8>, Some(1)), Ok(None));
    assert_eq!(
        map.cas(1, None::<&u8>, Some(2)),
        Err(CasFailure {
            actual: Some(1),
            returned_new_value: Some(2),
        })
    );
    assert_eq!(
        map.cas(2, Some(&1_u8), Some(2)),
        Err(CasFailure {
            actual: None,
            returned_new_value: Some(2),
        })
    );
    assert_eq!(map.cas(1, Some(&1_u8), None), Ok(Some(1)));
    assert!(map.is_empty());
}

#[test]
fn unchanged_writes_install_nothing() {
    let map: CowMap<u8, u8> = [(1, 1), (2, 2)].into_iter().collect();

    let before = map.snapshot();

    map.insert_all([(1, 1)]);
    map.insert_all(std::iter::empty());
    assert_eq!(map.remove(&3), None);
    assert_eq!(map.replace(&3, 3), None);
    assert_eq!(map.insert_if_absent(1, 9), Some(1));
    assert!(!map.remove_if_eq(&1, &9));
    assert!(!map.replace_if_eq(&1, &9, 9));
    assert_eq!(map.cas(3, None::<&u8>, None), Ok(None));

    assert!(Arc::ptr_eq(&before, &map.snapshot()));

    map.insert_all([(1, 1), (3, 3)]);
    assert!(!Arc::ptr_eq(&before, &map.snapshot()));
    assert_eq!(map.get(&3), Some(3));
}

#[test]
fn construction_round_trip() {
    let source: HashMap<String, u32> = (0..16).map(|i| (i.to_string(), i)).collect();

    let map = CowMap::<String, u32>::from(source.clone());

    assert_eq!(*map.snapshot(), source);
    assert_eq!(map.iter().collect::<HashMap<_, _>>(), source);
    assert_eq!(map.get("7"), Some(7));

    map.clear();
    assert!(map.is_empty());
    assert_eq!(map.len(), 0);
}

#[test]
fn replace_never_creates_keys() {
    let map = CowMap::<u64, u64>::default();

    assert_eq!(map.replace(&7, 7), None);
    assert_eq!(map.insert_if_absent(7, 1), None);
    assert_eq!(map.cas(7, Some(&1_u64), None), Ok(Some(1)));
    assert_eq!(map.replace(&7, 7), None);
    assert!(map.is_empty());
}
