//! Pipeline stages for office-to-PDF conversion.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! ingest ──▶ disk ──▶ invoke ──▶ resolve ──▶ (stream) ──▶ cleanup
//! (staging)  (preflight) (engine)  (diff)
//! ```
//!
//! 1. [`ingest`]:   stream the upload into the staging directory under a
//!    size ceiling
//! 2. [`disk`]:     check the output filesystem has room for the result
//! 3. [`launcher`] / [`invoke`]: build the platform command and run it under
//!    a timeout
//! 4. [`resolve`]:  find the produced PDF by diffing directory listings
//! 5. [`cleanup`]:  remove the staged input and the PDF exactly once

pub mod cleanup;
pub mod disk;
pub mod ingest;
pub mod invoke;
pub mod launcher;
pub mod resolve;
