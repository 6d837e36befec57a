//! Slot allocator behavior observed through the tape API.

use bilby::{SlotPolicy, Tape, Var};

#[test]
fn looped_temporaries_recycle_one_slot() {
    let mut tape = Tape::<f64>::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.5);
    tape.register_input(&mut x);
    tape.new_recording();
    let baseline = tape.num_variables();

    for _ in 0..100 {
        let t = &x * &x;
        assert!(t.is_tracked());
    }

    // Every temporary returned its slot; the derivative vector never grew
    // past input + one temporary.
    assert_eq!(tape.num_variables(), baseline);
    assert!(tape.max_slot() <= 2);
}

#[test]
fn interior_slots_are_reissued_lowest_first() {
    let mut tape = Tape::<f64>::new();
    assert_eq!(tape.slot_policy(), SlotPolicy::RangeReuse);
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.0);
    tape.register_input(&mut x);
    tape.new_recording();

    let a = &x * &x; // slot 1
    let b = &x + &x; // slot 2
    assert_eq!((a.slot(), b.slot()), (1, 2));

    drop(a); // interior slot, pooled for reuse
    assert_eq!(tape.num_reusable_slots(), 1);
    assert_eq!(tape.num_reusable_ranges(), 1);

    let c = &x - &x;
    assert_eq!(c.slot(), 1);
    assert_eq!(tape.num_reusable_slots(), 0);
    drop((b, c));
}

#[test]
fn freeing_the_top_slot_retracts_the_cursor() {
    let mut tape = Tape::<f64>::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.0);
    tape.register_input(&mut x);
    tape.new_recording();

    let a = &x * &x; // slot 1
    let b = &x + &x; // slot 2
    drop(b); // top slot, cursor retracts instead of pooling
    assert_eq!(tape.num_reusable_slots(), 0);
    let c = &x - &x;
    assert_eq!(c.slot(), 2);
    drop((a, c));
}

#[test]
fn adjacent_frees_merge_and_fold_into_the_cursor() {
    let mut tape = Tape::<f64>::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.0);
    tape.register_input(&mut x);
    tape.new_recording();

    let a = &x * &x; // slot 1
    let b = &x + &x; // slot 2
    let c = &x - &x; // slot 3
    let d = &x / &x; // slot 4
    drop(a);
    drop(c);
    assert_eq!(tape.num_reusable_ranges(), 2);
    drop(b); // bridges [1,2) and [3,4) into [1,4)
    assert_eq!(tape.num_reusable_ranges(), 1);
    assert_eq!(tape.num_reusable_slots(), 3);
    // Freeing the top slot folds the adjacent range into the cursor.
    drop(d);
    assert_eq!(tape.num_reusable_ranges(), 0);
    assert_eq!(tape.num_reusable_slots(), 0);
    assert_eq!(tape.num_variables(), 1);
}

#[test]
fn watermark_policy_leaks_interior_slots() {
    let mut tape = Tape::with_policy(SlotPolicy::Watermark);
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.0);
    tape.register_input(&mut x);
    tape.new_recording();

    let a = &x * &x; // slot 1
    let b = &x + &x; // slot 2
    drop(a); // interior: not reclaimed under this policy
    assert_eq!(tape.num_reusable_slots(), 0);
    let c = &x - &x;
    assert_eq!(c.slot(), 3); // bump allocation, slot 1 is lost
    assert_eq!(tape.max_slot(), 4);
    drop((b, c));
}

#[test]
fn watermark_policy_reclaims_lifo_frees() {
    let mut tape = Tape::with_policy(SlotPolicy::Watermark);
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.0);
    tape.register_input(&mut x);
    tape.new_recording();

    // Strictly nested lifetimes retract the cursor every time.
    for _ in 0..50 {
        let t = &x * &x;
        assert_eq!(t.slot(), 1);
    }
    assert!(tape.max_slot() <= 2);
}
