// Exercises net::collective::prefix_sum across 8 simulated hosts (spec.md
// §8): each host contributes its rank as a u64, and every host should see
// the running sum of everyone ranked at or below it (inclusive) or strictly
// below it (exclusive).

use thrill::net::{prefix_sum, Group};

#[test]
fn inclusive_prefix_sum_across_eight_hosts() {
    const NUM_HOSTS: usize = 8;
    let results = Group::execute_local_mock(NUM_HOSTS, |group| {
        let value = group.my_rank() as u64;
        prefix_sum(&group, value, &|a: &u64, b: &u64| a + b, true).unwrap()
    });

    let expected: Vec<u64> = (0..NUM_HOSTS as u64)
        .scan(0u64, |acc, rank| {
            *acc += rank;
            Some(*acc)
        })
        .collect();
    assert_eq!(results, expected);
}

#[test]
fn exclusive_prefix_sum_across_eight_hosts() {
    const NUM_HOSTS: usize = 8;
    let results = Group::execute_local_mock(NUM_HOSTS, |group| {
        let value = group.my_rank() as u64;
        prefix_sum(&group, value, &|a: &u64, b: &u64| a + b, false).unwrap()
    });

    let mut expected = Vec::with_capacity(NUM_HOSTS);
    let mut running = 0u64;
    for rank in 0..NUM_HOSTS as u64 {
        expected.push(running);
        running += rank;
    }
    assert_eq!(results, expected);
}
