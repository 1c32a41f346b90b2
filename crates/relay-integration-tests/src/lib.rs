//! Integration test crate for Session-Relay.
//!
//! All content lives in `tests/`; this library is intentionally empty.
