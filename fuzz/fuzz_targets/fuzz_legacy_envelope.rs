//! Fuzz target: legacy asymmetric envelopes.
//!
//! Every input is either decrypted or rejected with a typed error; the
//! software enclave stands in for the device.
//!
//! cargo fuzz run fuzz_legacy_envelope

#![no_main]

use libfuzzer_sys::fuzz_target;
use parachute::adapters::soft_enclave::SoftEnclave;
use parachute::rpc::legacy::decrypt_body;

fuzz_target!(|data: &[u8]| {
    let enclave = SoftEnclave::new(42);
    let _ = decrypt_body(&enclave, data);
});
