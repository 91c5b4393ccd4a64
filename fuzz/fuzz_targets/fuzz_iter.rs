#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate cow_collections;

fuzz_target!(|data: (Vec<u64>, u64, u64)| {
    let (items, a, b) = data;
    let (start, end) = (a.min(b), a.max(b));

    let mut model = std::collections::BTreeSet::default();

    for item in &items {
        model.insert(*item);
    }

    let set = cow_collections::CowSet::<u64>::default();

    for item in &items {
        set.insert(*item);
    }

    let model_iter: Vec<_> = model.iter().copied().collect();
    let self_iter: Vec<_> = set.iter().collect();
    assert_eq!(self_iter, model_iter);

    let model_rev: Vec<_> = model.iter().rev().copied().collect();
    let self_rev: Vec<_> = set.iter().rev().collect();
    assert_eq!(self_rev, model_rev);

    let model_range: Vec<_> = model.range(start..end).copied().collect();
    let self_range: Vec<_> = set.range(start..end).collect();
    assert_eq!(self_range, model_range);

    // alternate ends, which must meet without skipping or repeating
    let mut zipped = vec![];
    let mut iter = set.range(start..=end);
    let mut front = true;
    loop {
        let next = if front { iter.next() } else { iter.next_back() };
        match next {
            Some(item) => zipped.push(item),
            None => break,
        }
        front = !front;
    }
    zipped.sort_unstable();
    let model_inclusive: Vec<_> = model.range(start..=end).copied().collect();
    assert_eq!(zipped, model_inclusive);
});
