#![no_main]
#[macro_use]
extern crate libfuzzer_sys;
extern crate cow_collections;

fuzz_target!(|data: Vec<u64>| {
    let set: cow_collections::CowSet<u64> = data.iter().copied().collect();

    let serialized = bincode::serialize(&set).unwrap();
    let deserialized = bincode::deserialize(&serialized).unwrap();
    assert_eq!(set, deserialized);

    let map: cow_collections::CowMap<u64, u64> = data.iter().map(|item| (*item, !*item)).collect();

    let serialized = bincode::serialize(&map).unwrap();
    let deserialized = bincode::deserialize(&serialized).unwrap();
    assert_eq!(map, deserialized);
});
