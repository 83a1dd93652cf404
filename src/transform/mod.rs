//! The lazification transformation.
//!
//! Converts eager call arguments into lazy thunks at the IR level: a
//! backward slice of the caller computes the argument, the slice is
//! outlined into a closure-carrying thunk function, and the callee is
//! cloned to force the thunk only where the argument is actually used.
//! With memoization enabled the result is call-by-need; without it,
//! call-by-name.
//!
//! # Pipeline
//!
//! ```text
//! seed instruction
//!   │
//!   ▼
//! GateMap ──────────── which branches steer each phi merge
//!   │
//!   ▼
//! ProgramSlice ─────── backward data + gated control dependences,
//!   │                  captured args, attractor map
//!   ▼
//! safety / escape ──── may this slice leave the caller?
//!   │
//!   ▼
//! outline / thunk ──── synthesized function + closure type,
//!   │                  prelude loads, optional memo guard
//!   ▼
//! callsite ─────────── cloned callee with forces, closure built
//!                      at the original call
//! ```
//!
//! [`LazifyPass`] drives the pipeline over caller-supplied candidates and
//! keeps the counters; everything else is usable piecemeal through
//! [`ProgramSlice`], [`outline`], and [`memoized_outline`].

mod callsite;
mod escape;
mod gates;
mod outline;
mod pass;
mod safety;
mod slice;
mod thunk;

pub use escape::address_escapes;
pub use gates::GateMap;
pub use pass::{CallSiteCandidate, LazifyOptions, LazifyPass, LazifyStats};
pub use safety::{can_outline, check_outline, UnsafeReason};
pub use slice::ProgramSlice;
pub use thunk::{memoized_outline, outline, OutlinedThunk};
