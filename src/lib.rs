//! Purpose: Library crate behind the `appendcache` CLI: a bounded LRU cache of append-mode file handles.
//! Exports: `api` (the public surface) and `core` (cache, appender, opener, retry, archive helpers).
//! Role: Shared by the CLI binary and integration tests.
//! Invariants: `api` is the supported path; `core` layout may change between releases.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
