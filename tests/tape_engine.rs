//! Recording lifecycle, rollback and failure-mode tests for the tape.

use approx::assert_relative_eq;
use bilby::{Error, GraphRecorder, SlotPolicy, Tape, Var};

#[test]
fn product_plus_sine_adjoints() {
    // z = x1*x2 + sin(x1)
    let mut tape = Tape::new();
    let _guard = tape.activate().unwrap();
    let mut x1 = Var::new(1.3);
    let mut x2 = Var::new(-0.7);
    tape.register_input(&mut x1);
    tape.register_input(&mut x2);
    tape.new_recording();
    let z = &x1 * &x2 + x1.sin();
    assert_relative_eq!(z.value(), 1.3 * -0.7 + 1.3_f64.sin(), max_relative = 1e-14);
    z.set_derivative(1.0).unwrap();
    tape.compute_adjoints().unwrap();
    assert_relative_eq!(
        x1.derivative().unwrap(),
        -0.7 + 1.3_f64.cos(),
        max_relative = 1e-14
    );
    assert_relative_eq!(x2.derivative().unwrap(), 1.3, max_relative = 1e-14);
}

#[test]
fn reseeded_sweep_reproduces_gradients() {
    let mut tape = Tape::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(0.8);
    tape.register_input(&mut x);
    tape.new_recording();
    let y = x.exp() * x.sin();
    y.set_derivative(1.0).unwrap();
    tape.compute_adjoints().unwrap();
    let first = x.derivative().unwrap();

    // The recording survives a sweep; zero the adjoints and seed again.
    tape.clear_derivatives();
    y.set_derivative(1.0).unwrap();
    tape.compute_adjoints().unwrap();
    assert_relative_eq!(x.derivative().unwrap(), first, max_relative = 1e-14);

    // A doubled seed scales the gradient linearly.
    tape.clear_derivatives();
    y.set_derivative(2.0).unwrap();
    tape.compute_adjoints().unwrap();
    assert_relative_eq!(x.derivative().unwrap(), 2.0 * first, max_relative = 1e-14);
}

#[test]
fn new_recording_preserves_registered_inputs() {
    let mut tape = Tape::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.7);
    tape.register_input(&mut x);
    tape.new_recording();
    let y1 = x.square();
    y1.set_derivative(1.0).unwrap();
    tape.compute_adjoints().unwrap();
    assert_relative_eq!(x.derivative().unwrap(), 2.0 * 1.7, max_relative = 1e-14);
    drop(y1);

    // Same input variable drives a second, unrelated recording.
    tape.new_recording();
    assert_eq!(tape.num_statements(), 0);
    assert!(x.is_tracked());
    let y2 = x.sin();
    y2.set_derivative(1.0).unwrap();
    tape.compute_adjoints().unwrap();
    assert_relative_eq!(x.derivative().unwrap(), 1.7_f64.cos(), max_relative = 1e-14);
}

#[test]
fn two_stage_sweep_matches_single_sweep() {
    let x0: f64 = 0.9;
    let single = {
        let mut tape = Tape::new();
        let _guard = tape.activate().unwrap();
        let mut x = Var::new(x0);
        tape.register_input(&mut x);
        tape.new_recording();
        let a = x.square();
        let b = a.sin();
        b.set_derivative(1.0).unwrap();
        tape.compute_adjoints().unwrap();
        x.derivative().unwrap()
    };

    let mut tape = Tape::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(x0);
    tape.register_input(&mut x);
    tape.new_recording();
    let a = x.square();
    let mid = tape.position();
    let b = a.sin();
    b.set_derivative(1.0).unwrap();
    // Sweep the tail first, then the rest; consumed adjoints keep the
    // second stage from double-counting the tail.
    tape.compute_adjoints_to(mid).unwrap();
    tape.compute_adjoints().unwrap();
    assert_relative_eq!(x.derivative().unwrap(), single, max_relative = 1e-14);
    assert_relative_eq!(single, (x0 * x0).cos() * 2.0 * x0, max_relative = 1e-12);
}

#[test]
fn appended_suffixes_replay_identically() {
    // Keep a recorded prefix and repeatedly append a suffix, sweep, roll
    // back and reseed. Every pass must assign the same slot to the suffix
    // and reproduce the same gradient.
    let x0: f64 = 0.6;
    let mut tape = Tape::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(x0);
    tape.register_input(&mut x);
    tape.new_recording();
    let a = x.square();
    let p = tape.position();
    let expected = (x0 * x0).cos() * 2.0 * x0;

    let mut suffix_slot = None;
    for _ in 0..5 {
        let y = a.sin();
        match suffix_slot {
            None => suffix_slot = Some(y.slot()),
            Some(slot) => assert_eq!(y.slot(), slot),
        }
        y.set_derivative(1.0).unwrap();
        // Suffix first, then the kept prefix down to the inputs.
        tape.compute_adjoints_to(p).unwrap();
        tape.compute_adjoints().unwrap();
        assert_relative_eq!(x.derivative().unwrap(), expected, max_relative = 1e-12);
        drop(y);
        tape.reset_to(p).unwrap();
        tape.clear_derivatives();
    }
    assert_eq!(tape.position(), p);
}

#[test]
fn repeated_sweep_leaves_gradients_unchanged() {
    let mut tape = Tape::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(2.0);
    tape.register_input(&mut x);
    tape.new_recording();
    let y = x.square() + x.sin();
    y.set_derivative(1.0).unwrap();
    tape.compute_adjoints().unwrap();
    let g = x.derivative().unwrap();
    // All non-input adjoints were consumed; a second pass is a no-op.
    tape.compute_adjoints().unwrap();
    assert_relative_eq!(x.derivative().unwrap(), g, max_relative = 1e-14);
}

#[test]
fn rollback_discards_tail_and_allows_rerecording() {
    let mut tape = Tape::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.1);
    tape.register_input(&mut x);
    tape.new_recording();
    let g = x.square();
    let pos = tape.position();
    let stmts = tape.num_statements();
    {
        let t = g.sin();
        assert!(tape.num_statements() > stmts);
        drop(t);
    }
    tape.reset_to(pos).unwrap();
    assert_eq!(tape.num_statements(), stmts);

    // Record a different tail on top of the kept prefix.
    let h = g.exp();
    h.set_derivative(1.0).unwrap();
    tape.compute_adjoints().unwrap();
    let expected = (1.1_f64 * 1.1).exp() * 2.0 * 1.1;
    assert_relative_eq!(x.derivative().unwrap(), expected, max_relative = 1e-12);
}

#[test]
fn statement_and_operation_counts() {
    let mut tape = Tape::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.0);
    let mut y = Var::new(2.0);
    tape.register_input(&mut x);
    tape.register_input(&mut y);
    tape.new_recording();
    assert_eq!(tape.num_statements(), 0);
    assert_eq!(tape.num_operations(), 0);
    let z = &x * &y;
    assert_eq!(tape.num_statements(), 1);
    assert_eq!(tape.num_operations(), 2);
    let w = &z + &x;
    assert_eq!(tape.num_statements(), 2);
    assert_eq!(tape.num_operations(), 4);
    drop(w);

    let stats = tape.stats();
    assert_eq!(stats.statements, 2);
    assert_eq!(stats.operations, 4);
    assert!(stats.memory > 0);
}

// ── Failure modes ──

#[test]
fn sweep_without_seeding_fails() {
    let mut tape = Tape::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.0);
    tape.register_input(&mut x);
    tape.new_recording();
    let _y = x.square();
    assert!(matches!(
        tape.compute_adjoints(),
        Err(Error::DerivativesNotInitialized)
    ));
}

#[test]
fn second_engine_activation_fails() {
    let mut tape = Tape::<f64>::new();
    let _guard = tape.activate().unwrap();

    let mut other = Tape::<f64>::new();
    assert!(matches!(
        other.activate(),
        Err(Error::EngineAlreadyActive)
    ));

    let mut recorder = GraphRecorder::<f64>::new();
    assert!(matches!(
        recorder.activate(),
        Err(Error::EngineAlreadyActive)
    ));

    // A tape for the other float type is unaffected.
    let mut tape32 = Tape::<f32>::new();
    assert!(tape32.activate().is_ok());
}

#[test]
fn activation_is_scoped_to_the_guard() {
    let mut tape = Tape::<f64>::new();
    {
        let _guard = tape.activate().unwrap();
        assert!(tape.is_active());
    }
    assert!(!tape.is_active());
    // A fresh activation works once the guard is gone.
    let _guard = tape.activate().unwrap();
    assert!(tape.is_active());
}

#[test]
fn derivative_without_engine_fails() {
    let x: Var<f64> = Var::new(2.0);
    assert!(matches!(x.derivative(), Err(Error::NoActiveEngine)));
    assert!(matches!(x.set_derivative(1.0), Err(Error::NoActiveEngine)));
}

#[test]
fn untracked_variable_reads_zero_derivative() {
    let mut tape = Tape::<f64>::new();
    let _guard = tape.activate().unwrap();
    let x: Var<f64> = Var::new(2.0);
    // Never registered: no adjoint to address, reads as zero.
    assert_eq!(x.derivative().unwrap(), 0.0);
    assert!(x.set_derivative(1.0).is_err());
}

#[test]
fn out_of_range_positions_and_slots_fail() {
    let mut tape = Tape::<f64>::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.0);
    tape.register_input(&mut x);
    tape.new_recording();
    let y = x.square();

    assert!(matches!(
        tape.reset_to(1000),
        Err(Error::OutOfRange { .. })
    ));
    assert!(matches!(
        tape.derivative(1000),
        Err(Error::OutOfRange { .. })
    ));

    y.set_derivative(1.0).unwrap();
    assert!(matches!(
        tape.compute_adjoints_to(1000),
        Err(Error::OutOfRange { .. })
    ));
}

#[test]
fn watermark_policy_tape_works_end_to_end() {
    let mut tape = Tape::with_policy(SlotPolicy::Watermark);
    assert_eq!(tape.slot_policy(), SlotPolicy::Watermark);
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(0.4);
    tape.register_input(&mut x);
    tape.new_recording();
    let y = x.sin() * x.cos();
    y.set_derivative(1.0).unwrap();
    tape.compute_adjoints().unwrap();
    let expected = 0.4_f64.cos() * 0.4_f64.cos() - 0.4_f64.sin() * 0.4_f64.sin();
    assert_relative_eq!(x.derivative().unwrap(), expected, max_relative = 1e-12);
}

#[test]
fn clear_all_resets_the_tape() {
    let mut tape = Tape::<f64>::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(1.0);
    tape.register_input(&mut x);
    tape.new_recording();
    let y = x.square();
    drop(y);
    tape.clear_all();
    assert_eq!(tape.num_statements(), 0);
    assert_eq!(tape.num_operations(), 0);
    assert_eq!(tape.num_variables(), 0);
    assert_eq!(tape.num_callbacks(), 0);
    // x's slot is gone with the reset; a re-registration starts over.
    let mut x2 = Var::new(2.0);
    tape.register_input(&mut x2);
    assert_eq!(x2.slot(), 0);
    // keep the stale handle from unregistering a recycled slot
    std::mem::forget(x);
}
