#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate arbitrary;
extern crate cow_collections;

use arbitrary::Arbitrary;

const KEYSPACE: u64 = 128;

#[derive(Debug)]
enum Op {
    Insert { key: u64, value: u64 },
    InsertIfAbsent { key: u64, value: u64 },
    Remove { key: u64 },
    RemoveIfEq { key: u64, value: u64 },
    Replace { key: u64, value: u64 },
    ReplaceIfEq { key: u64, old: u64, new: u64 },
    Cas { key: u64, old: Option<u64>, new: Option<u64> },
    InsertAll { keys: Vec<u64> },
    RetainAll { keys: Vec<u64> },
    PopFirst,
    PopLast,
    Clear,
}

fn key(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<u64> {
    u.int_in_range(0..=KEYSPACE)
}

fn keys(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Vec<u64>> {
    let len = u.int_in_range(0..=8)?;
    (0..len).map(|_| key(u)).collect()
}

fn maybe_key(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Option<u64>> {
    Ok(if u.ratio(1, 2)? { Some(key(u)?) } else { None })
}

impl<'a> Arbitrary<'a> for Op {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(match u.int_in_range(0..=11)? {
            0 => Op::Insert {
                key: key(u)?,
                value: key(u)?,
            },
            1 => Op::InsertIfAbsent {
                key: key(u)?,
                value: key(u)?,
            },
            2 => Op::Remove { key: key(u)? },
            3 => Op::RemoveIfEq {
                key: key(u)?,
                value: key(u)?,
            },
            4 => Op::Replace {
                key: key(u)?,
                value: key(u)?,
            },
            5 => Op::ReplaceIfEq {
                key: key(u)?,
                old: key(u)?,
                new: key(u)?,
            },
            6 => Op::Cas {
                key: key(u)?,
                old: maybe_key(u)?,
                new: maybe_key(u)?,
            },
            7 => Op::InsertAll { keys: keys(u)? },
            8 => Op::RetainAll { keys: keys(u)? },
            9 => Op::PopFirst,
            10 => Op::PopLast,
            _ => Op::Clear,
        })
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let map = cow_collections::CowMap::<u64, u64>::default();
    let set = cow_collections::CowSet::<u64>::default();
    let mut map_model = std::collections::HashMap::new();
    let mut set_model = std::collections::BTreeSet::new();

    for op in ops {
        match op {
            Op::Insert { key, value } => {
                assert_eq!(map.insert(key, value), map_model.insert(key, value));
                assert_eq!(set.insert(key), set_model.insert(key));
            }
            Op::InsertIfAbsent { key, value } => {
                let expected = map_model.get(&key).copied();
                if expected.is_none() {
                    map_model.insert(key, value);
                }
                assert_eq!(map.insert_if_absent(key, value), expected);
            }
            Op::Remove { key } => {
                assert_eq!(map.remove(&key), map_model.remove(&key));
                assert_eq!(set.remove(&key), set_model.remove(&key));
            }
            Op::RemoveIfEq { key, value } => {
                let expected = map_model.get(&key) == Some(&value);
                if expected {
                    map_model.remove(&key);
                }
                assert_eq!(map.remove_if_eq(&key, &value), expected);
            }
            Op::Replace { key, value } => {
                let expected = map_model.get_mut(&key).map(|bound| std::mem::replace(bound, value));
                assert_eq!(map.replace(&key, value), expected);
            }
            Op::ReplaceIfEq { key, old, new } => {
                let expected = map_model.get(&key) == Some(&old);
                if expected {
                    map_model.insert(key, new);
                }
                assert_eq!(map.replace_if_eq(&key, &old, new), expected);
            }
            Op::Cas { key, old, new } => {
                let succ = if old == map_model.get(&key).copied() {
                    if let Some(n) = new {
                        map_model.insert(key, n);
                    } else {
                        map_model.remove(&key);
                    }
                    true
                } else {
                    false
                };

                let res = map.cas(key, old.as_ref(), new);

                if succ {
                    assert_eq!(res, Ok(old));
                } else {
                    assert!(res.is_err());
                }
            }
            Op::InsertAll { keys } => {
                let mut changed = false;
                for key in &keys {
                    changed |= set_model.insert(*key);
                    map_model.insert(*key, *key);
                }
                assert_eq!(set.insert_all(keys.iter().copied()), changed);
                map.insert_all(keys.iter().map(|key| (*key, *key)));
            }
            Op::RetainAll { keys } => {
                let before = set_model.len();
                set_model.retain(|key| keys.contains(key));
                assert_eq!(set.retain_all(&keys), before != set_model.len());
            }
            Op::PopFirst => {
                let expected = set_model.iter().next().copied();
                if let Some(first) = expected {
                    set_model.remove(&first);
                }
                assert_eq!(set.pop_first(), expected);
            }
            Op::PopLast => {
                let expected = set_model.iter().next_back().copied();
                if let Some(last) = expected {
                    set_model.remove(&last);
                }
                assert_eq!(set.pop_last(), expected);
            }
            Op::Clear => {
                map.clear();
                set.clear();
                map_model.clear();
                set_model.clear();
            }
        };

        for (key, value) in &map_model {
            assert_eq!(map.get(key), Some(*value));
        }
        assert_eq!(map.len(), map_model.len());

        assert_eq!(set.len(), set_model.len());
    }

    let model_iter: Vec<_> = set_model.iter().copied().collect();
    let set_iter: Vec<_> = set.iter().collect();
    assert_eq!(set_iter, model_iter);

    assert_eq!(*map.snapshot(), map_model);
});
