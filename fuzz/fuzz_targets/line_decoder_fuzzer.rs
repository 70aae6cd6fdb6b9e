//! Fuzz target for [`LineCodec`] framing
//!
//! # Strategy
//!
//! - Arbitrary bytes: keywords, separators, invalid UTF-8, stray `\r`
//! - Arbitrary read boundaries: the same stream is fed in fuzzed chunk sizes
//! - Small line limit so over-long lines are reached quickly
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - Chunked decoding yields exactly what one-shot decoding yields
//! - Every decoded message re-encodes to a line that decodes to itself

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use wirenet_proto::{LineCodec, Message, ProtocolError};

const MAX_LINE: usize = 64;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    data: Vec<u8>,
    chunks: Vec<u8>,
}

fn drain(codec: &LineCodec, buf: &mut BytesMut, out: &mut Vec<Message>) -> Option<ProtocolError> {
    loop {
        match codec.decode(buf) {
            Ok(Some(message)) => out.push(message),
            Ok(None) => return None,
            Err(e) => return Some(e),
        }
    }
}

fuzz_target!(|input: FuzzInput| {
    let codec = LineCodec::with_max_line_length(MAX_LINE);

    let mut whole = BytesMut::from(&input.data[..]);
    let mut expected = Vec::new();
    let expected_error = drain(&codec, &mut whole, &mut expected);

    let mut chunked = BytesMut::new();
    let mut actual = Vec::new();
    let mut actual_error = None;
    let mut rest = &input.data[..];
    let mut sizes = input.chunks.iter().cycle();
    while !rest.is_empty() && actual_error.is_none() {
        let size = sizes.next().map_or(rest.len(), |s| usize::from(*s).max(1)).min(rest.len());
        let (head, tail) = rest.split_at(size);
        chunked.extend_from_slice(head);
        rest = tail;
        actual_error = drain(&codec, &mut chunked, &mut actual);
    }

    assert_eq!(actual, expected, "chunking changed the decoded messages");
    assert_eq!(actual_error, expected_error, "chunking changed the outcome");

    for message in expected {
        let mut line = BytesMut::new();
        codec.encode(&message, &mut line).expect("decoded message must encode");
        let decoded = LineCodec::new().decode(&mut line).expect("encoded line must decode");
        assert_eq!(decoded, Some(message));
        assert!(line.is_empty(), "encoding produced more than one line");
    }
});
