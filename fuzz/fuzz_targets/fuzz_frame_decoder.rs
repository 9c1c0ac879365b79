//! Fuzz target: `FrameDecoder::feed`
//!
//! Drives arbitrary byte sequences into the streaming frame decoder, split
//! at an arbitrary point, and asserts that it never panics and never yields
//! an empty or oversized frame.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use ventcore::ipc::codec::{FrameDecoder, MAX_FRAME_SIZE};

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();
    let split = data.first().map_or(0, |&b| usize::from(b)).min(data.len());
    let (head, tail) = data.split_at(split);

    if decoder.feed(head).is_ok() {
        let _ = decoder.feed(tail);
    }
    while let Some(frame) = decoder.next_frame() {
        assert!(!frame.is_empty(), "decoder must not yield empty frames");
        assert!(frame.len() <= MAX_FRAME_SIZE, "frame exceeds MAX_FRAME_SIZE");
    }

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    let _ = decoder.feed(data);
});
