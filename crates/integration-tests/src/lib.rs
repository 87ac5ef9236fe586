//! End-to-end tests for Tasklane live in `tests/`.
