//! Pipeline stages for XML-to-HTML conversion.
//!
//! Each submodule implements exactly one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! decode ──▶ document ──▶ resolve ──▶ ┌ fetch ──▶ transform ┐ ──▶ repair
//! (bytes)    (tree)       (URLs)      └──── per candidate ──┘     (mojibake)
//! ```
//!
//! 1. [`decode`]    — sniff the declared encoding and decode the report
//! 2. [`document`]  — two-step parse into a tree of elements and PIs
//! 3. [`resolve`]   — ordered stylesheet candidates from PIs, override, default
//! 4. [`fetch`]     — HTTP GET with timeout; the only stage with network I/O
//! 5. [`transform`] — parse, compile and apply a candidate stylesheet
//! 6. [`repair`]    — fix typographic and Cyrillic mojibake in the HTML

pub mod decode;
pub mod document;
pub mod fetch;
pub mod repair;
pub mod resolve;
pub mod transform;
