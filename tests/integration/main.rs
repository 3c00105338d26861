//! Integration test driver for `tests/integration/` submodules.
//!
//! Every test runs a real host on an ephemeral loopback port and talks to
//! it over HTTP, either with hand-signed requests or through a
//! `CordClient`.

mod admission_tests;
mod dispatch_tests;
mod harness;
mod lifecycle_tests;
mod security_tests;
