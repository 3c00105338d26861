//! Fuzz target: session frame parsing and stream reassembly.
//!
//! Arbitrary request bodies go through `split_frame` / `open_frame`, and
//! arbitrary response bytes through the newline reassembler.  Neither may
//! panic, and reassembled frames never contain the terminator.
//!
//! cargo fuzz run fuzz_session_frame

#![no_main]

use libfuzzer_sys::fuzz_target;
use parachute::rpc::cipher::{SymmetricKey, open_frame, split_frame};
use parachute::rpc::stream::FrameReassembler;

fuzz_target!(|data: &[u8]| {
    let _ = split_frame(data);
    let key = SymmetricKey::Aes256([0x11; 32]);
    let _ = open_frame(&key, data);

    let mut frames = FrameReassembler::new();
    for piece in data.chunks(7) {
        for frame in frames.feed(piece) {
            assert!(!frame.is_empty(), "reassembler yielded an empty frame");
            assert!(!frame.contains(&b'\n'), "frame kept its terminator");
        }
    }
    if let Some(tail) = frames.finish() {
        assert!(!tail.contains(&b'\n'));
    }
});
