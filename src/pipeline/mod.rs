//! Pipeline stages for report rehydration.
//!
//! Each submodule implements one step of turning an `<img src="...">` into a
//! self-contained `<img src="data:...">`. The orchestration (per-image state
//! machine, concurrency, stats) lives in [`crate::rehydrate`].
//!
//! ## Data Flow
//!
//! ```text
//! html ──▶ resolve ──▶ classify ──▶ fetch ──▶ encode ──▶ html
//! (<img>)  (absolute)  (scheme)    (bytes)   (data URI) (splice)
//! ```
//!
//! 1. [`html`]: find `<img>` tags and splice edits back in, byte-exact
//! 2. [`resolve`]: strip query/fragment, swap origins, resolve relative URLs
//! 3. [`classify`]: ordered addressing-scheme matchers
//! 4. [`fetch`]: file store, plot cache or HTTP; the only stage with I/O
//! 5. [`encode`]: extension allow-list, MIME table and base64 data URIs

pub mod classify;
pub mod encode;
pub mod fetch;
pub mod html;
pub mod resolve;
