use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Barrier};

use cow_collections::{CowMap, CowSet};

fn concurrency() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
        .clamp(2, 4)
        * 2
}

#[test]
fn concurrent_set_inserts_are_not_lost() {
    let n: u32 = 128;
    let concurrency = concurrency();

    let run = |set: CowSet<u32>, barrier: &Barrier, low_bits: u32| {
        let shift = concurrency.next_power_of_two().trailing_zeros();
        let unique_element = |element: u32| (element << shift) | low_bits;

        barrier.wait();
        for element in 0..n {
            let i = unique_element(element);
            assert!(!set.contains(&i));
            assert!(set.insert(i), "failed to insert element {i}");
            assert!(set.contains(&i), "failed to find element {i}");
        }
        for element in 0..n {
            let i = unique_element(element);
            assert!(!set.insert(i), "element {i} inserted twice");
        }
    };

    let set = CowSet::default();

    std::thread::scope(|s| {
        let barrier = Arc::new(Barrier::new(concurrency));
        let mut threads = vec![];
        for i in 0..concurrency {
            let set_2 = set.clone();
            let barrier_2 = barrier.clone();

            let thread = s.spawn(move || run(set_2, &barrier_2, u32::try_from(i).unwrap()));
            threads.push(thread);
        }
        for thread in threads {
            thread.join().unwrap();
        }
    });

    assert_eq!(set.len(), usize::try_from(n).unwrap() * concurrency);

    let sorted: Vec<u32> = set.iter().collect();
    assert!(sorted.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn two_writers_both_land() {
    for _ in 0..256 {
        let set = CowSet::<&str>::default();
        let barrier = Barrier::new(2);

        std::thread::scope(|s| {
            for element in ["a", "b"] {
                let set_2 = set.clone();
                let barrier_2 = &barrier;
                s.spawn(move || {
                    barrier_2.wait();
                    assert!(set_2.insert(element));
                });
            }
        });

        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}

#[test]
fn concurrent_pops_drain_each_element_once() {
    let n: u64 = 1024;
    let concurrency = concurrency();

    let set: CowSet<u64> = (0..n).collect();
    let barrier = Barrier::new(concurrency);

    let popped: Vec<Vec<u64>> = std::thread::scope(|s| {
        let mut threads = vec![];
        for i in 0..concurrency {
            let set_2 = set.clone();
            let barrier_2 = &barrier;
            let thread = s.spawn(move || {
                barrier_2.wait();
                let mut popped = vec![];
                loop {
                    let next = if i % 2 == 0 {
                        set_2.pop_first()
                    } else {
                        set_2.pop_last()
                    };
                    match next {
                        Some(element) => popped.push(element),
                        None => return popped,
                    }
                }
            });
            threads.push(thread);
        }
        threads
            .into_iter()
            .map(|thread| thread.join().unwrap())
            .collect()
    });

    let mut all: Vec<u64> = popped.into_iter().flatten().collect();
    all.sort_unstable();
    assert_eq!(all, (0..n).collect::<Vec<_>>());
    assert!(set.is_empty());
}

#[test]
fn concurrent_bulk_ops_are_atomic() {
    let concurrency = concurrency();
    let rounds = 128;

    let set = CowSet::<u64>::default();
    let barrier = Barrier::new(concurrency + 1);

    std::thread::scope(|s| {
        for i in 0..concurrency {
            let set_2 = set.clone();
            let barrier_2 = &barrier;
            let base = u64::try_from(i).unwrap() * 1_000_000;
            s.spawn(move || {
                barrier_2.wait();
                for round in 0..rounds {
                    let batch: Vec<u64> = (0..4).map(|j| base + round * 4 + j).collect();
                    assert!(set_2.insert_all(batch.iter().copied()));
                    assert!(set_2.remove_all(&batch));
                }
            });
        }

        // readers only ever observe whole batches
        let reader = set.clone();
        let barrier_2 = &barrier;
        s.spawn(move || {
            barrier_2.wait();
            for _ in 0..rounds * 4 {
                let snapshot = reader.snapshot();
                let mut batches: HashMap<u64, usize> = HashMap::new();
                for element in snapshot.iter() {
                    *batches.entry(element / 4).or_default() += 1;
                }
                assert!(batches.values().all(|count| *count == 4));
            }
        });
    });

    assert!(set.is_empty());
}

#[test]
fn concurrent_insert_if_absent_has_one_winner() {
    for _ in 0..256 {
        let map = CowMap::<&str, u32>::default();
        let barrier = Barrier::new(2);

        let results: Vec<(u32, Option<u32>)> = std::thread::scope(|s| {
            let threads: Vec<_> = [1, 2]
                .into_iter()
                .map(|value| {
                    let map_2 = map.clone();
                    let barrier_2 = &barrier;
                    s.spawn(move || {
                        barrier_2.wait();
                        (value, map_2.insert_if_absent("k", value))
                    })
                })
                .collect();
            threads
                .into_iter()
                .map(|thread| thread.join().unwrap())
                .collect()
        });

        let stored = map.get(&"k").unwrap();

        let winners: Vec<u32> = results
            .iter()
            .filter(|(_, previous)| previous.is_none())
            .map(|(value, _)| *value)
            .collect();
        assert_eq!(winners, vec![stored]);

        for (value, previous) in results {
            if value != stored {
                assert_eq!(previous, Some(stored));
            }
        }
    }
}

#[test]
fn concurrent_counters_via_replace_if_eq() {
    let increments: u64 = 512;
    let concurrency = concurrency();

    let map = CowMap::<&str, u64>::default();
    map.insert("counter", 0);

    let barrier = Barrier::new(concurrency);

    std::thread::scope(|s| {
        for _ in 0..concurrency {
            let map_2 = map.clone();
            let barrier_2 = &barrier;
            s.spawn(move || {
                barrier_2.wait();
                let mut done = 0;
                while done < increments {
                    let current = map_2.get(&"counter").unwrap();
                    if map_2.replace_if_eq(&"counter", &current, current + 1) {
                        done += 1;
                    }
                }
            });
        }
    });

    assert_eq!(
        map.get(&"counter"),
        Some(increments * u64::try_from(concurrency).unwrap())
    );
}

#[test]
fn concurrent_map_writers() {
    let n: u32 = 128;
    let concurrency = concurrency();

    let run = |map: CowMap<u32, u32>, barrier: &Barrier, low_bits: u32| {
        let shift = concurrency.next_power_of_two().trailing_zeros();
        let unique_key = |key: u32| (key << shift) | low_bits;

        barrier.wait();
        for key in 0..n {
            let i = unique_key(key);
            assert_eq!(map.get(&i), None);
            assert_eq!(map.insert(i, i), None);
            assert_eq!(map.get(&i), Some(i), "failed to get key {i}");
        }
        for key in 0..n {
            let i = unique_key(key);
            assert_eq!(
                map.cas(i, Some(&i), Some(unique_key(key * 2))),
                Ok(Some(i)),
                "failed to cas key {i}"
            );
        }
        for key in 0..n {
            let i = unique_key(key);
            let v = unique_key(key * 2);
            if v != i {
                assert!(!map.remove_if_eq(&i, &i));
            }
            assert!(map.remove_if_eq(&i, &v), "failed to remove key {i}");
        }
        for key in 0..n {
            let i = unique_key(key);
            assert_eq!(map.get(&i), None, "key {i} survived removal");
        }
    };

    let map = CowMap::default();

    std::thread::scope(|s| {
        let barrier = Arc::new(Barrier::new(concurrency));
        let mut threads = vec![];
        for i in 0..concurrency {
            let map_2 = map.clone();
            let barrier_2 = barrier.clone();

            let thread = s.spawn(move || run(map_2, &barrier_2, u32::try_from(i).unwrap()));
            threads.push(thread);
        }
        for thread in threads {
            thread.join().unwrap();
        }
    });

    assert!(map.is_empty());
}

#[test]
fn snapshots_are_stable_under_writes() {
    let set: CowSet<u32> = (0..64).collect();
    let held = set.snapshot();
    let expected: BTreeSet<u32> = (0..64).collect();

    std::thread::scope(|s| {
        let set_2 = set.clone();
        s.spawn(move || {
            for i in 64..128 {
                set_2.insert(i);
                set_2.pop_first();
            }
            set_2.clear();
        });
    });

    assert_eq!(*held, expected);
    assert!(set.is_empty());
}
