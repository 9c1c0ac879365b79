//! Fuzz target: `decode_message`
//!
//! Any payload either decodes into a message whose arguments match its
//! command, or is rejected with an error.  Accepted messages must survive
//! re-encoding.
//!
//! cargo fuzz run fuzz_decode_message

#![no_main]

use libfuzzer_sys::fuzz_target;
use ventcore::ipc::codec::{decode_message, encode_message};

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = decode_message(data) {
        assert!(msg.validate().is_ok());
        assert!(encode_message(&msg).is_ok());
    }
});
