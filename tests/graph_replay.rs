//! Record-once, replay-many evaluation through the graph recorder and the
//! reference interpreter backend.

use approx::assert_relative_eq;
use bilby::{Error, GraphRecorder, Var};

/// Record `f`, evaluate at `x0` and return (value, gradient).
fn graph_grad(f: impl FnOnce(&Var<f64>) -> Var<f64>, x0: f64) -> (f64, f64) {
    let mut rec = GraphRecorder::new();
    let _guard = rec.activate().unwrap();
    let mut x = Var::new(x0);
    rec.register_input(&mut x);
    let mut y = f(&x);
    rec.register_output(&mut y);
    let mut out = [0.0];
    rec.forward(&mut out).unwrap();
    rec.set_derivative(y.slot(), 1.0).unwrap();
    rec.compute_adjoints().unwrap();
    (out[0], rec.get_derivative(x.slot()))
}

fn finite_diff(f: impl Fn(f64) -> f64, x: f64) -> f64 {
    let h = 1e-7;
    (f(x + h) - f(x - h)) / (2.0 * h)
}

fn check_graph_elemental(
    f_rec: impl FnOnce(&Var<f64>) -> Var<f64>,
    f_f64: impl Fn(f64) -> f64,
    x: f64,
) {
    let (value, grad) = graph_grad(f_rec, x);
    assert_relative_eq!(value, f_f64(x), max_relative = 1e-12);
    assert_relative_eq!(grad, finite_diff(&f_f64, x), max_relative = 1e-5);
}

#[test]
fn recorded_graph_replays_at_new_inputs() {
    let mut rec = GraphRecorder::new();
    let _guard = rec.activate().unwrap();
    let mut x = Var::new(0.5);
    let mut y = Var::new(1.5);
    rec.register_input(&mut x);
    rec.register_input(&mut y);
    let mut z = &x * &y + x.sin();
    rec.register_output(&mut z);

    // One recording, many evaluation points.
    for &(xv, yv) in &[
        (0.5_f64, 1.5),
        (2.0, -1.0),
        (-0.3, 0.7),
        (10.0, 0.1),
        (1.0, 1.0),
    ] {
        rec.set_input(0, xv).unwrap();
        rec.set_input(1, yv).unwrap();
        let mut out = [0.0];
        rec.forward(&mut out).unwrap();
        assert_relative_eq!(out[0], xv * yv + xv.sin(), max_relative = 1e-13);

        rec.clear_derivatives();
        rec.set_derivative(z.slot(), 1.0).unwrap();
        rec.compute_adjoints().unwrap();
        assert_relative_eq!(
            rec.get_derivative(x.slot()),
            yv + xv.cos(),
            max_relative = 1e-13
        );
        assert_relative_eq!(rec.get_derivative(y.slot()), xv, max_relative = 1e-13);
    }
}

#[test]
fn tracked_branch_re_decides_on_replay() {
    let mut rec = GraphRecorder::new();
    let _guard = rec.activate().unwrap();
    let mut x = Var::new(1.0);
    rec.register_input(&mut x);

    // Condition is false at the recording point.
    let threshold = Var::new(2.0);
    let cond = x.gt(&threshold);
    assert!(!cond.truth());
    assert!(cond.is_tracked());

    let seven_x = 7.0 * &x;
    let mut tracked = cond.select(&seven_x, &x);
    // A host-side `if` bakes the recording-time branch into the graph.
    let mut baked = if cond.truth() { seven_x.clone() } else { x.clone() };
    rec.register_output(&mut tracked);
    rec.register_output(&mut baked);

    // Replay where the other branch is live.
    rec.set_input(0, 3.0).unwrap();
    let mut out = [0.0; 2];
    rec.forward(&mut out).unwrap();
    assert_relative_eq!(out[0], 21.0, max_relative = 1e-14);
    assert_relative_eq!(out[1], 3.0, max_relative = 1e-14);

    rec.set_derivative(tracked.slot(), 1.0).unwrap();
    rec.compute_adjoints().unwrap();
    assert_relative_eq!(rec.get_derivative(x.slot()), 7.0, max_relative = 1e-14);
}

#[test]
fn untracked_bool_degrades_to_fixed_branch() {
    let mut rec = GraphRecorder::new();
    let _guard = rec.activate().unwrap();
    let mut x = Var::new(1.0);
    rec.register_input(&mut x);
    let cond = bilby::TrackedBool::new(false);
    let seven_x = 7.0 * &x;
    let mut picked = cond.select(&seven_x, &x);
    rec.register_output(&mut picked);

    // No condition node: the false branch stays baked in on replay.
    rec.set_input(0, 3.0).unwrap();
    let mut out = [0.0];
    rec.forward(&mut out).unwrap();
    assert_relative_eq!(out[0], 3.0, max_relative = 1e-14);
}

#[test]
fn new_recording_keeps_input_layout() {
    let mut rec = GraphRecorder::new();
    let _guard = rec.activate().unwrap();
    let mut x = Var::new(2.0);
    let mut y = Var::new(3.0);
    rec.register_input(&mut x);
    rec.register_input(&mut y);
    let mut z = &x * &y;
    rec.register_output(&mut z);
    let mut out = [0.0];
    rec.forward(&mut out).unwrap();
    assert_relative_eq!(out[0], 6.0, max_relative = 1e-14);

    rec.new_recording();
    assert_eq!(rec.num_inputs(), 2);
    assert_eq!(rec.num_outputs(), 0);

    // The original input variables keep their node ids and drive the next
    // recording.
    let mut w = &x + &y;
    rec.register_output(&mut w);
    rec.set_input(0, 4.0).unwrap();
    rec.set_input(1, 5.0).unwrap();
    let mut out = [0.0];
    rec.forward(&mut out).unwrap();
    assert_relative_eq!(out[0], 9.0, max_relative = 1e-14);
}

#[test]
fn repeated_constants_share_a_pool_entry() {
    let mut rec = GraphRecorder::new();
    let _guard = rec.activate().unwrap();
    let mut x = Var::new(1.0);
    rec.register_input(&mut x);
    let a = &x + 2.5;
    let b = &x * 2.5;
    let c = &x - 1.0;
    drop((a, b, c));
    // 2.5 is pooled once, 1.0 once.
    assert_eq!(rec.graph().num_constants(), 2);
}

#[test]
fn forward_output_count_must_match() {
    let mut rec = GraphRecorder::new();
    let _guard = rec.activate().unwrap();
    let mut x = Var::new(1.0);
    rec.register_input(&mut x);
    let mut y = x.sin();
    rec.register_output(&mut y);
    let mut wrong = [0.0; 2];
    assert!(matches!(
        rec.forward(&mut wrong),
        Err(Error::CountMismatch { .. })
    ));
}

#[test]
fn staging_an_unknown_input_fails() {
    let mut rec = GraphRecorder::<f64>::new();
    let _guard = rec.activate().unwrap();
    let mut x = Var::new(1.0);
    rec.register_input(&mut x);
    assert!(rec.set_input(0, 2.0).is_ok());
    assert!(matches!(
        rec.set_input(5, 2.0),
        Err(Error::OutOfRange { .. })
    ));
}

#[test]
fn adjoints_require_a_seeded_table() {
    let mut rec = GraphRecorder::<f64>::new();
    let _guard = rec.activate().unwrap();
    let mut x = Var::new(1.0);
    rec.register_input(&mut x);
    let mut y = x.sin();
    rec.register_output(&mut y);
    assert!(matches!(
        rec.compute_adjoints(),
        Err(Error::DerivativesNotInitialized)
    ));
}

#[test]
fn unknown_nodes_read_zero_derivative() {
    let mut rec = GraphRecorder::<f64>::new();
    // Reading never fails, even for ids the table does not cover.
    assert_eq!(rec.get_derivative(12345), 0.0);
}

#[test]
fn passive_output_gets_an_addressable_node() {
    let mut rec = GraphRecorder::<f64>::new();
    let _guard = rec.activate().unwrap();
    let mut c = Var::new(4.25);
    rec.register_output(&mut c);
    assert!(c.is_tracked());
    let mut out = [0.0];
    rec.forward(&mut out).unwrap();
    assert_relative_eq!(out[0], 4.25, max_relative = 1e-14);
    assert_eq!(rec.get_derivative(c.slot()), 0.0);
}

// ── Elementals through the interpreter ──

#[test]
fn interpreter_elementals_match_finite_differences() {
    check_graph_elemental(|x| x.sin(), |x| x.sin(), 0.7);
    check_graph_elemental(|x| x.cos(), |x| x.cos(), 0.7);
    check_graph_elemental(|x| x.tan(), |x| x.tan(), 0.4);
    check_graph_elemental(|x| x.exp(), |x| x.exp(), 0.9);
    check_graph_elemental(|x| x.ln(), |x| x.ln(), 2.3);
    check_graph_elemental(|x| x.sqrt(), |x| x.sqrt(), 3.1);
    check_graph_elemental(|x| x.cbrt(), |x| x.cbrt(), 8.0);
    check_graph_elemental(|x| x.tanh(), |x| x.tanh(), 0.8);
    check_graph_elemental(|x| x.asinh(), |x| x.asinh(), 1.2);
    check_graph_elemental(|x| x.exp_m1(), |x| x.exp_m1(), 0.4);
    check_graph_elemental(|x| x.ln_1p(), |x| x.ln_1p(), 0.4);
    check_graph_elemental(|x| x.square(), |x| x * x, 1.6);
    check_graph_elemental(|x| x.abs(), |x| x.abs(), -2.0);
    check_graph_elemental(|x| x.signum(), |x| x.signum(), -2.0);
    check_graph_elemental(|x| x.recip(), |x| x.recip(), 1.7);
    check_graph_elemental(|x| x.exp2(), |x| x.exp2(), 1.3);
    check_graph_elemental(|x| x.log2(), |x| x.log2(), 2.6);
    check_graph_elemental(|x| x.log10(), |x| x.log10(), 2.6);
    check_graph_elemental(|x| x.powi(3), |x| x.powi(3), 1.4);
    check_graph_elemental(|x| x.powf(&Var::new(2.5)), |x| x.powf(2.5), 1.4);
    check_graph_elemental(|x| x.hypot(&Var::new(2.0)), |x| x.hypot(2.0), 1.5);
    check_graph_elemental(|x| x.atan2(&Var::new(2.0)), |x| x.atan2(2.0), 1.5);
    check_graph_elemental(|x| x.min(&Var::new(0.5)), |x| x.min(0.5), 1.5);
    check_graph_elemental(|x| x.max(&Var::new(0.5)), |x| x.max(0.5), 1.5);
}

fn rosenbrock(x: &Var<f64>, y: &Var<f64>) -> Var<f64> {
    let a = 1.0 - x;
    let b = y - x.square();
    a.square() + 100.0 * b.square()
}

fn rosenbrock_grad_tape(xv: f64, yv: f64) -> (f64, f64, f64) {
    use bilby::Tape;
    let mut tape = Tape::new();
    let _guard = tape.activate().unwrap();
    let mut x = Var::new(xv);
    let mut y = Var::new(yv);
    tape.register_input(&mut x);
    tape.register_input(&mut y);
    tape.new_recording();
    let z = rosenbrock(&x, &y);
    z.set_derivative(1.0).unwrap();
    tape.compute_adjoints().unwrap();
    (
        z.value(),
        x.derivative().unwrap(),
        y.derivative().unwrap(),
    )
}

#[test]
fn graph_gradients_agree_with_tape_gradients() {
    let mut rec = GraphRecorder::new();
    let _guard = rec.activate().unwrap();
    let mut x = Var::new(0.0);
    let mut y = Var::new(0.0);
    rec.register_input(&mut x);
    rec.register_input(&mut y);
    let mut z = rosenbrock(&x, &y);
    rec.register_output(&mut z);
    drop(_guard); // free the engine for the tape runs below

    let points = [(0.0, 0.0), (1.0, 1.0), (-1.2, 1.0), (0.7, -0.4)];
    for &(xv, yv) in &points {
        let (tv, tgx, tgy) = rosenbrock_grad_tape(xv, yv);

        rec.set_input(0, xv).unwrap();
        rec.set_input(1, yv).unwrap();
        let mut out = [0.0];
        rec.forward(&mut out).unwrap();
        rec.clear_derivatives();
        rec.set_derivative(z.slot(), 1.0).unwrap();
        rec.compute_adjoints().unwrap();
        assert_relative_eq!(out[0], tv, max_relative = 1e-12);
        assert_relative_eq!(rec.get_derivative(x.slot()), tgx, max_relative = 1e-11);
        assert_relative_eq!(rec.get_derivative(y.slot()), tgy, max_relative = 1e-11);
    }
}
