//! Fuzz target: inbound call envelopes.
//!
//! Mirrors what the host does with a decrypted cord body: parse the JSON
//! envelope, then decode both halves.  Failures are fine; panics are not.
//!
//! cargo fuzz run fuzz_call_envelope

#![no_main]

use libfuzzer_sys::fuzz_target;
use parachute::rpc::codec::CallEnvelope;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = serde_json::from_slice::<CallEnvelope>(data) {
        let _ = envelope.decode_args::<Value>();
        let _ = envelope.decode_kwargs::<Value>();
    }
});
