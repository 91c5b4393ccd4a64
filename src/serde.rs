use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::marker::PhantomData;

use serde::de::{Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::{CowMap, CowSet};

impl<E, const LOCAL_GC_BUFFER_SIZE: usize> Serialize for CowSet<E, LOCAL_GC_BUFFER_SIZE>
where
    E: 'static + Serialize + Clone + Ord + Send + Sync,
{
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeSeq;
        let snapshot = self.snapshot();
        let mut seq = s.serialize_seq(Some(snapshot.len()))?;
        for item in snapshot.iter() {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

impl<K, V, const LOCAL_GC_BUFFER_SIZE: usize> Serialize for CowMap<K, V, LOCAL_GC_BUFFER_SIZE>
where
    K: 'static + Serialize + Clone + Eq + Hash + Send + Sync,
    V: 'static + Serialize + Clone + Send + Sync,
{
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;
        // one snapshot, so the length hint always matches the entries
        let snapshot = self.snapshot();
        let mut map = s.serialize_map(Some(snapshot.len()))?;
        for (k, v) in snapshot.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct CowSetVisitor<E, const LOCAL_GC_BUFFER_SIZE: usize> {
    pd: PhantomData<E>,
}

impl<'de, E, const LOCAL_GC_BUFFER_SIZE: usize> Visitor<'de>
    for CowSetVisitor<E, LOCAL_GC_BUFFER_SIZE>
where
    E: 'static + Deserialize<'de> + Clone + Ord + Send + Sync,
{
    type Value = CowSet<E, LOCAL_GC_BUFFER_SIZE>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("a sequence of set elements")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut set = BTreeSet::new();

        while let Some(item) = access.next_element()? {
            set.insert(item);
        }

        Ok(CowSet::from(set))
    }
}

impl<'de, E, const LOCAL_GC_BUFFER_SIZE: usize> Deserialize<'de>
    for CowSet<E, LOCAL_GC_BUFFER_SIZE>
where
    E: 'static + Deserialize<'de> + Clone + Ord + Send + Sync,
{
    fn deserialize<D>(d: D) -> Result<CowSet<E, LOCAL_GC_BUFFER_SIZE>, D::Error>
    where
        D: Deserializer<'de>,
    {
        d.deserialize_seq(CowSetVisitor { pd: PhantomData })
    }
}

struct CowMapVisitor<K, V, const LOCAL_GC_BUFFER_SIZE: usize> {
    pd: PhantomData<(K, V)>,
}

impl<'de, K, V, const LOCAL_GC_BUFFER_SIZE: usize> Visitor<'de>
    for CowMapVisitor<K, V, LOCAL_GC_BUFFER_SIZE>
where
    K: 'static + Deserialize<'de> + Clone + Eq + Hash + Send + Sync,
    V: 'static + Deserialize<'de> + Clone + Send + Sync,
{
    type Value = CowMap<K, V, LOCAL_GC_BUFFER_SIZE>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("a map of keys to values")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        // build the whole snapshot up front instead of paying a full
        // copy per entry through `insert`. The length hint comes from the
        // input, so it is not used to pre-size the map.
        let mut map = HashMap::new();

        while let Some((key, value)) = access.next_entry()? {
            map.insert(key, value);
        }

        Ok(CowMap::from(map))
    }
}

impl<'de, K, V, const LOCAL_GC_BUFFER_SIZE: usize> Deserialize<'de>
    for CowMap<K, V, LOCAL_GC_BUFFER_SIZE>
where
    K: 'static + Deserialize<'de> + Clone + Eq + Hash + Send + Sync,
    V: 'static + Deserialize<'de> + Clone + Send + Sync,
{
    fn deserialize<D>(d: D) -> Result<CowMap<K, V, LOCAL_GC_BUFFER_SIZE>, D::Error>
    where
        D: Deserializer<'de>,
    {
        d.deserialize_map(CowMapVisitor { pd: PhantomData })
    }
}

#[test]
fn serde_round_trip() {
    let set: CowSet<u64> = (0..32).collect();
    let serialized = bincode::serialize(&set).unwrap();
    let deserialized: CowSet<u64> = bincode::deserialize(&serialized).unwrap();
    assert_eq!(set, deserialized);

    let map: CowMap<String, u64> = (0..32).map(|i| (i.to_string(), i)).collect();
    let serialized = bincode::serialize(&map).unwrap();
    let deserialized: CowMap<String, u64> = bincode::deserialize(&serialized).unwrap();
    assert_eq!(map, deserialized);
}

#[test]
fn corrupt_length_prefix_is_an_error() {
    let corrupt = [0xff_u8; 8];

    assert!(bincode::deserialize::<CowMap<u64, u64>>(&corrupt).is_err());
    assert!(bincode::deserialize::<CowSet<u64>>(&corrupt).is_err());
}
