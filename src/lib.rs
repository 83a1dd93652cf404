// Copyright 2025-2026 The lazify Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! # lazify
//!
//! A compile-time transformation that converts eager function-call
//! arguments into **lazy thunks**, implementing call-by-need semantics at
//! the SSA IR level. Given a call site where some argument is expensive to
//! compute and may go unused inside the callee, `lazify`:
//!
//! 1. extracts a **backward program slice** of the caller that computes the
//!    argument, including the branch conditions gating every phi merge,
//! 2. checks that the slice can leave the caller without changing
//!    observable behavior (no memory effects, no unwinding, no divergence,
//!    no escaping stack slots, no trip-count changes),
//! 3. **outlines** the slice into a self-contained thunk function whose CFG
//!    is a subset of the caller's, rerouted through *attractor blocks*,
//! 4. wraps it in a closure ABI - `{ fn_ptr, captured args }`, with memo
//!    slots when memoization is on - and
//! 5. clones the callee to accept the closure and **force** it at each use,
//!    then redirects the original call.
//!
//! # Architecture
//!
//! The crate is organized into three layers:
//!
//! - [`ir`] - the SSA IR being transformed: modules, functions, blocks,
//!   typed values, a fluent builder, and a reference interpreter used as
//!   the semantic oracle in tests
//! - [`analysis`] - dominator/post-dominator trees, natural loops, and the
//!   SSA verifier that gates every generated function
//! - [`transform`] - the transformation itself: gate map, program slice,
//!   escape and safety analyses, function synthesis, thunk ABI, call-site
//!   rewriting, and the [`LazifyPass`](transform::LazifyPass) driver
//!
//! # Usage
//!
//! ```rust,ignore
//! use lazify::ir::Module;
//! use lazify::transform::{CallSiteCandidate, LazifyPass};
//!
//! // Candidates come from a separate heuristic analysis.
//! let mut pass = LazifyPass::new();
//! let changed = pass.run(&mut module, &candidates)?;
//!
//! if changed {
//!     println!(
//!         "lazified {} call sites ({} insts outlined)",
//!         pass.stats().call_sites_lazified,
//!         pass.stats().total_slice_size,
//!     );
//! }
//! # Ok::<(), lazify::Error>(())
//! ```
//!
//! # Guarantees
//!
//! - A rejected candidate leaves the module byte-for-byte unchanged; every
//!   mutation is deferred until the safety analysis accepts the slice.
//! - Every generated or mutated function is run through the SSA verifier;
//!   a failure is reported as [`Error::MalformedSsa`] and indicates a bug
//!   in the transformation, never in the input.
//! - Forcing a memoized thunk twice returns the cached value without
//!   re-entering the slice body.

pub mod analysis;
mod error;
pub mod ir;
pub mod transform;

pub use error::{Error, Result};
