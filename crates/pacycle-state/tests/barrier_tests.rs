use pacycle_state::CycleBarrier;

#[test]
fn test_release_requires_every_member() {
    let mut barrier = CycleBarrier::new(["ACS", "IDN", "MEM"]);
    barrier.arm(0);

    assert!(barrier.satisfy("ACS"));
    assert!(!barrier.is_released());
    assert!(barrier.satisfy("MEM"));
    assert!(!barrier.is_released());
    assert!(barrier.satisfy("IDN"));
    assert!(barrier.is_released());
}

#[test]
fn test_satisfy_is_idempotent() {
    let mut barrier = CycleBarrier::new(["X", "Y"]);
    barrier.arm(0);

    assert!(barrier.satisfy("X"));
    assert!(!barrier.satisfy("X"), "second END for the same tic is a no-op");
    assert!(!barrier.is_released());
    assert_eq!(barrier.outstanding().iter().collect::<Vec<_>>(), vec!["Y"]);
}

#[test]
fn test_satisfy_unknown_identity_is_noop() {
    let mut barrier = CycleBarrier::new(["X"]);
    barrier.arm(0);
    assert!(!barrier.satisfy("Z"));
    assert!(!barrier.is_released());
}

#[test]
fn test_rearm_resets_outstanding() {
    let mut barrier = CycleBarrier::new(["X", "Y"]);
    barrier.arm(0);
    barrier.satisfy("X");
    barrier.satisfy("Y");
    assert!(barrier.is_released());

    barrier.arm(1);
    assert_eq!(barrier.tic(), Some(1));
    assert!(!barrier.is_released());
    assert_eq!(barrier.outstanding().len(), 2);
}

#[test]
fn test_evict_outstanding_releases() {
    let mut barrier = CycleBarrier::new(["X", "Y"]);
    barrier.arm(0);
    barrier.satisfy("X");

    assert!(barrier.evict("Y"));
    assert!(barrier.is_released());
    assert!(!barrier.is_required("Y"));

    // Stays out of later cycles until required again.
    barrier.arm(1);
    assert_eq!(barrier.outstanding().iter().collect::<Vec<_>>(), vec!["X"]);
}

#[test]
fn test_evict_after_satisfy_reports_not_outstanding() {
    let mut barrier = CycleBarrier::new(["X", "Y"]);
    barrier.arm(0);
    barrier.satisfy("Y");
    assert!(!barrier.evict("Y"));
    assert!(!barrier.is_released());
}

#[test]
fn test_disarm() {
    let mut barrier = CycleBarrier::new(["X"]);
    barrier.arm(5);
    barrier.disarm();
    assert!(!barrier.is_armed());
    assert!(barrier.outstanding().is_empty());
    assert!(barrier.is_required("X"));
}

#[test]
fn test_release_matches_satisfied_set_for_all_orders() {
    let ids = ["A", "B", "C"];
    // Every subset of satisfied members, in both orders.
    for mask in 0u8..8 {
        for reverse in [false, true] {
            let mut barrier = CycleBarrier::new(ids);
            barrier.arm(0);
            let mut order: Vec<_> = ids
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, id)| *id)
                .collect();
            if reverse {
                order.reverse();
            }
            for id in &order {
                barrier.satisfy(id);
                barrier.satisfy(id);
            }
            assert_eq!(barrier.is_released(), mask == 0b111, "mask {mask:03b}");
        }
    }
}
