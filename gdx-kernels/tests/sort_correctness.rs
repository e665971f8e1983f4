mod common;

use common::{ColumnOrder, seeded_rng, verify_pairs_preserved, verify_sorted};
use gdx_kernels::{ExecutionGroup, ResultBuffer, bitonic_sort, errcode, host_sort};
use rand::Rng;

fn random_keys(rng: &mut impl Rng, n: usize) -> Vec<i64> {
    (0..n).map(|_| rng.gen_range(-1_000_000..1_000_000)).collect()
}

#[test]
fn sort_random_arrays_all_widths() {
    let sizes = [0usize, 1, 2, 3, 5, 17, 63, 64, 65, 255, 256, 1000, 4096];
    for (wi, width) in [2usize, 8, 256].into_iter().enumerate() {
        let group = ExecutionGroup::new(width).unwrap();
        for (si, &n) in sizes.iter().enumerate() {
            let mut rng = seeded_rng(4000 + (wi * 100 + si) as u64);
            let cmp = ColumnOrder {
                keys: random_keys(&mut rng, n),
            };
            let mut buf = ResultBuffer::for_chunk(7, n as u32);
            bitonic_sort(&group, &mut buf, &cmp);
            assert_eq!(buf.error().status(), errcode::SUCCESS);
            assert!(
                verify_pairs_preserved(&buf, 7, n),
                "width={} n={}: pair multiset changed",
                width,
                n
            );
            assert!(
                verify_sorted(&buf, &cmp.keys),
                "width={} n={}: not sorted",
                width,
                n
            );
        }
    }
}

#[test]
fn sort_non_power_of_two_tail() {
    // Sizes straddling partition boundaries for width 8 (partition 16).
    let group = ExecutionGroup::new(8).unwrap();
    for n in [15usize, 16, 17, 31, 33, 47, 49] {
        let mut rng = seeded_rng(5000 + n as u64);
        let cmp = ColumnOrder {
            keys: random_keys(&mut rng, n),
        };
        let mut buf = ResultBuffer::for_chunk(0, n as u32);
        bitonic_sort(&group, &mut buf, &cmp);
        assert_eq!(buf.error().status(), errcode::SUCCESS);
        assert!(verify_pairs_preserved(&buf, 0, n), "n = {}", n);
        assert!(verify_sorted(&buf, &cmp.keys), "n = {}", n);
    }
}

#[test]
fn sort_many_duplicate_keys() {
    let group = ExecutionGroup::new(8).unwrap();
    let mut rng = seeded_rng(6001);
    let n = 1000;
    let cmp = ColumnOrder {
        keys: (0..n).map(|_| rng.gen_range(0..8)).collect(),
    };
    let mut buf = ResultBuffer::for_chunk(0, n as u32);
    bitonic_sort(&group, &mut buf, &cmp);
    assert_eq!(buf.error().status(), errcode::SUCCESS);
    assert!(verify_pairs_preserved(&buf, 0, n));
    assert!(verify_sorted(&buf, &cmp.keys));
}

#[test]
fn sorting_twice_is_idempotent() {
    let group = ExecutionGroup::new(8).unwrap();
    let mut rng = seeded_rng(6002);
    let n = 777;
    let cmp = ColumnOrder {
        keys: random_keys(&mut rng, n),
    };
    let mut buf = ResultBuffer::for_chunk(0, n as u32);
    bitonic_sort(&group, &mut buf, &cmp);
    let first = buf.pairs().to_vec();
    bitonic_sort(&group, &mut buf, &cmp);
    assert_eq!(buf.error().status(), errcode::SUCCESS);
    assert_eq!(buf.pairs(), &first[..]);
}

#[test]
fn host_sort_matches_device_ordering() {
    let mut rng = seeded_rng(6003);
    let n = 513;
    let cmp = ColumnOrder {
        keys: random_keys(&mut rng, n),
    };

    let group = ExecutionGroup::new(8).unwrap();
    let mut device = ResultBuffer::for_chunk(0, n as u32);
    bitonic_sort(&group, &mut device, &cmp);

    let mut host = ResultBuffer::for_chunk(0, n as u32);
    host_sort(&mut host, &cmp);
    assert_eq!(host.error().status(), errcode::SUCCESS);

    let device_keys: Vec<i64> = device
        .pairs()
        .iter()
        .map(|p| cmp.keys[p.item_id as usize])
        .collect();
    let host_keys: Vec<i64> = host
        .pairs()
        .iter()
        .map(|p| cmp.keys[p.item_id as usize])
        .collect();
    assert_eq!(device_keys, host_keys);
}

#[test]
fn comparator_never_sees_out_of_range_items() {
    // ColumnOrder indexes its key column with the raw item id; any lane
    // escaping the array bound would panic here instead of passing.
    let group = ExecutionGroup::new(4).unwrap();
    for n in [1usize, 7, 9, 100, 129] {
        let mut rng = seeded_rng(6100 + n as u64);
        let cmp = ColumnOrder {
            keys: random_keys(&mut rng, n),
        };
        let mut buf = ResultBuffer::for_chunk(0, n as u32);
        bitonic_sort(&group, &mut buf, &cmp);
        assert_eq!(buf.error().status(), errcode::SUCCESS);
    }
}
