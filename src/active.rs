//! Per-thread active engine registry.
//!
//! At most one engine (a [`Tape`] or a [`GraphRecorder`]) may be active per
//! thread and float type. Arithmetic on [`crate::Var`] consults these cells
//! on its hot path, so they are plain `Cell<*mut _>` rather than `RefCell`.

use std::cell::Cell;
use std::ptr;
use std::thread::LocalKey;

use crate::error::{Error, Result};
use crate::float::Float;
use crate::recorder::GraphRecorder;
use crate::tape::Tape;

thread_local! {
    static TAPE_F32: Cell<*mut Tape<f32>> = const { Cell::new(ptr::null_mut()) };
    static TAPE_F64: Cell<*mut Tape<f64>> = const { Cell::new(ptr::null_mut()) };
    static RECORDER_F32: Cell<*mut GraphRecorder<f32>> = const { Cell::new(ptr::null_mut()) };
    static RECORDER_F64: Cell<*mut GraphRecorder<f64>> = const { Cell::new(ptr::null_mut()) };
}

/// Float types that carry per-thread active-engine cells.
///
/// Implemented for `f32` and `f64`. The methods are plumbing for the
/// activation guards and not meant to be called directly.
pub trait ActiveFloat: Float {
    #[doc(hidden)]
    fn tape_cell() -> &'static LocalKey<Cell<*mut Tape<Self>>>;
    #[doc(hidden)]
    fn recorder_cell() -> &'static LocalKey<Cell<*mut GraphRecorder<Self>>>;
}

impl ActiveFloat for f32 {
    fn tape_cell() -> &'static LocalKey<Cell<*mut Tape<f32>>> {
        &TAPE_F32
    }
    fn recorder_cell() -> &'static LocalKey<Cell<*mut GraphRecorder<f32>>> {
        &RECORDER_F32
    }
}

impl ActiveFloat for f64 {
    fn tape_cell() -> &'static LocalKey<Cell<*mut Tape<f64>>> {
        &TAPE_F64
    }
    fn recorder_cell() -> &'static LocalKey<Cell<*mut GraphRecorder<f64>>> {
        &RECORDER_F64
    }
}

/// True if any engine is active on this thread for `F`.
pub fn engine_active<F: ActiveFloat>() -> bool {
    F::tape_cell().with(|c| !c.get().is_null())
        || F::recorder_cell().with(|c| !c.get().is_null())
}

/// Run `f` against the active tape, if one is installed.
pub(crate) fn with_tape<F: ActiveFloat, R>(f: impl FnOnce(&mut Tape<F>) -> R) -> Option<R> {
    F::tape_cell().with(|c| {
        let p = c.get();
        if p.is_null() {
            None
        } else {
            // Non-null only between guard construction and drop; the guard
            // holds the exclusive borrow for that whole window.
            Some(f(unsafe { &mut *p }))
        }
    })
}

/// Run `f` against the active graph recorder, if one is installed.
pub(crate) fn with_recorder<F: ActiveFloat, R>(
    f: impl FnOnce(&mut GraphRecorder<F>) -> R,
) -> Option<R> {
    F::recorder_cell().with(|c| {
        let p = c.get();
        if p.is_null() {
            None
        } else {
            Some(f(unsafe { &mut *p }))
        }
    })
}

pub(crate) fn activate_tape<F: ActiveFloat>(tape: *mut Tape<F>) -> Result<()> {
    if engine_active::<F>() {
        return Err(Error::EngineAlreadyActive);
    }
    F::tape_cell().with(|c| c.set(tape));
    Ok(())
}

pub(crate) fn deactivate_tape<F: ActiveFloat>(tape: *mut Tape<F>) {
    F::tape_cell().with(|c| {
        if c.get() == tape {
            c.set(ptr::null_mut());
        }
    });
}

pub(crate) fn activate_recorder<F: ActiveFloat>(recorder: *mut GraphRecorder<F>) -> Result<()> {
    if engine_active::<F>() {
        return Err(Error::EngineAlreadyActive);
    }
    F::recorder_cell().with(|c| c.set(recorder));
    Ok(())
}

pub(crate) fn deactivate_recorder<F: ActiveFloat>(recorder: *mut GraphRecorder<F>) {
    F::recorder_cell().with(|c| {
        if c.get() == recorder {
            c.set(ptr::null_mut());
        }
    });
}

pub(crate) fn tape_is<F: ActiveFloat>(tape: *const Tape<F>) -> bool {
    F::tape_cell().with(|c| c.get() as *const _ == tape)
}

pub(crate) fn recorder_is<F: ActiveFloat>(recorder: *const GraphRecorder<F>) -> bool {
    F::recorder_cell().with(|c| c.get() as *const _ == recorder)
}
