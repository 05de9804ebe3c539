#![no_main]

use chatwire::core::frame::{decode_header, encode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // any accepted header must re-encode to a frame of the same width
    if let Ok(length) = decode_header(data) {
        if length <= 1 << 16 {
            let frame = encode(&vec![0u8; length], data.len().max(1));
            if let Ok(frame) = frame {
                assert_eq!(decode_header(&frame[..data.len().max(1)]).ok(), Some(length));
            }
        }
    }
});
