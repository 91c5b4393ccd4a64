use std::time::Instant;

use cow_collections::{CowMap, CowSet};

mod alloc {
    use std::alloc::{Layout, System};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[global_allocator]
    static ALLOCATOR: Alloc = Alloc;

    static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
    static FREED: AtomicUsize = AtomicUsize::new(0);
    static RESIDENT: AtomicUsize = AtomicUsize::new(0);

    pub fn allocated() -> usize {
        ALLOCATED.swap(0, Ordering::Relaxed) / 1_000_000
    }

    pub fn freed() -> usize {
        FREED.swap(0, Ordering::Relaxed) / 1_000_000
    }

    pub fn resident() -> usize {
        RESIDENT.load(Ordering::Relaxed) / 1_000_000
    }

    #[derive(Default, Debug, Clone, Copy)]
    struct Alloc;

    unsafe impl std::alloc::GlobalAlloc for Alloc {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            let ret = System.alloc(layout);
            assert_ne!(
                ret,
                std::ptr::null_mut(),
                "alloc returned null pointer for layout {layout:?}"
            );
            ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed);
            RESIDENT.fetch_add(layout.size(), Ordering::Relaxed);
            std::ptr::write_bytes(ret, 0xa1, layout.size());
            ret
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            std::ptr::write_bytes(ptr, 0xde, layout.size());
            FREED.fetch_add(layout.size(), Ordering::Relaxed);
            RESIDENT.fetch_sub(layout.size(), Ordering::Relaxed);
            System.dealloc(ptr, layout)
        }
    }
}

#[test]
fn leak_check() {
    let n: u32 = 256;

    let concurrency = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
        .min(4)
        * 2;

    let run = |map: CowMap<u32, Vec<u8>, 4>,
               set: CowSet<u32, 4>,
               barrier: &std::sync::Barrier,
               low_bits| {
        let shift = concurrency.next_power_of_two().trailing_zeros();
        let unique_key = |key| (key << shift) | low_bits;

        barrier.wait();
        for key in 0..n {
            let i = unique_key(key);
            assert_eq!(map.insert_if_absent(i, vec![1; 64]), None);
            assert!(set.insert(i));
        }
        for key in 0..n {
            let i = unique_key(key);
            assert!(map.replace_if_eq(&i, &vec![1; 64], vec![2; 64]));
            assert_eq!(set.get_gte(&i), Some(i));
        }
        for key in 0..n {
            let i = unique_key(key);
            assert_eq!(map.remove(&i), Some(vec![2; 64]), "failed to remove key {i}");
            assert!(set.remove(&i), "failed to remove element {i}");
        }
        set.insert_all((0..n).map(unique_key));
        while set.pop_first().is_some() {}
        map.clear();
    };

    let before = Instant::now();
    let resident_before = alloc::resident();

    let map = CowMap::default();
    let set = CowSet::default();
    std::thread::scope(|s| {
        for _ in 0..8 {
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(concurrency));
            let mut threads = vec![];
            for i in 0..concurrency {
                let map_2 = map.clone();
                let set_2 = set.clone();
                let barrier_2 = barrier.clone();

                let thread = s.spawn(move || {
                    run(map_2, set_2, &barrier_2, u32::try_from(i).unwrap())
                });
                threads.push(thread);
            }
            for thread in threads {
                thread.join().unwrap();
            }
        }
    });

    assert!(map.is_empty());
    assert!(set.is_empty());

    drop(map);
    drop(set);

    let resident_after = alloc::resident();

    println!(
        "{:.2} million wps {} mb allocated {} mb freed {} mb resident to insert {} items",
        n as f64 / (before.elapsed().as_micros().max(1)) as f64,
        alloc::allocated(),
        alloc::freed(),
        resident_after,
        n,
    );

    assert_eq!(
        resident_after - resident_before,
        0,
        "leaked {}mb",
        resident_after
    );
}
