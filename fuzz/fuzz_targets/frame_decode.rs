//! Fuzz target for StompCodec decoding
//!
//! Arbitrary bytes are fed to the codec in arbitrary chunk sizes to find:
//! - Parser crashes or panics
//! - Scan offsets that run past the buffer
//! - Decoded frames that cannot be written back out
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use stompframe_proto::StompCodec;
use tokio_util::codec::Decoder;

#[derive(Debug, Arbitrary)]
struct Input {
    max_frame_size: u16,
    chunk_sizes: Vec<u8>,
    data: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let mut codec = StompCodec::with_max_frame_size(usize::from(input.max_frame_size).max(1));
    let mut buf = BytesMut::new();
    let mut rest = input.data.as_slice();
    let mut chunks = input.chunk_sizes.iter().map(|&n| usize::from(n).max(1)).cycle();

    while !rest.is_empty() {
        let take = chunks.next().unwrap_or(rest.len()).min(rest.len());
        buf.extend_from_slice(&rest[..take]);
        rest = &rest[take..];

        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => {
                    // Decoded frames must render without panicking
                    let mut encoded = BytesMut::new();
                    frame.encode(&mut encoded);
                    assert_eq!(encoded.last(), Some(&0));
                },
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }

    let _ = codec.decode_eof(&mut buf);
});
