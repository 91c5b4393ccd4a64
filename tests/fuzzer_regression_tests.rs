/// Range iteration edge cases, re-played deterministically so they run
/// even on a machine without a fuzzer corpus loaded.

#[test]
fn test_00() {
    let set = cow_collections::CowSet::<u64>::default();
    set.insert(0);
    set.insert(103);

    let mut range = set.range(0..1);

    assert_eq!(range.next(), Some(0));
    assert_eq!(range.next_back(), None);
    assert_eq!(range.next(), None);

    let mut range = set.range(0..1);

    assert_eq!(range.next_back(), Some(0));
    assert_eq!(range.next(), None);
}

#[test]
fn test_01() {
    let set = cow_collections::CowSet::<u64>::default();
    let mut model = std::collections::BTreeSet::new();

    let items = [95, 126, 2, 73, 0, 106, 54];

    for item in items {
        set.insert(item);
        model.insert(item);
    }

    let bounds = 81..124;

    let expected = model.range(bounds.clone()).copied().collect::<Vec<_>>();
    let actual = set.range(bounds.clone()).collect::<Vec<_>>();
    assert_eq!(expected, actual);

    let expected_rev = model
        .range(bounds.clone())
        .rev()
        .copied()
        .collect::<Vec<_>>();
    let actual_rev = set.range(bounds).rev().collect::<Vec<_>>();

    assert_eq!(expected_rev, actual_rev);
}
