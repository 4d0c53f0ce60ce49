#![no_main]

//! Fuzz target for the selective JSON scanner and envelope parsing.
//!
//! Malformed bodies must come back as errors: no panics, no unbounded
//! allocation, and a batch never yields more items than the ceiling.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use tntgate::transport::jsonrpc::{ParsedRequests, parse_jsonrpc};
use tntgate::transport::scanner::{ScanLimits, scan};

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    body: Vec<u8>,
    max_batch_size: u8,
    preset: Option<String>,
}

fuzz_target!(|input: FuzzInput| {
    let limits = ScanLimits {
        max_body_size: 64 * 1024,
        max_batch_size: usize::from(input.max_batch_size).max(1),
    };

    let _ = scan(&input.body, &limits);

    if let Ok(ParsedRequests::Batch(items)) =
        parse_jsonrpc(&input.body, &limits, input.preset.as_deref())
    {
        assert!(!items.is_empty());
        assert!(items.len() <= limits.max_batch_size);
    }
});
