//! End-to-end integration tests for iotmq.
//!
//! All tests live in `tests/`; this library is intentionally empty.
