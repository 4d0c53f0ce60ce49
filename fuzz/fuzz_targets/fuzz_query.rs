#![no_main]

//! Fuzz target for query decoding and the format codec.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use tntgate::codec::format::FormatTemplate;
use tntgate::codec::query::{count_pairs, decode_path, parse_pairs};
use tntgate::codec::{CodecLimits, FormatCodec, SpaceAllowList};

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    template: String,
    query: String,
    path: String,
}

fuzz_target!(|input: FuzzInput| {
    let _ = decode_path(&input.path);

    let _ = count_pairs(&input.query);
    let Ok(pairs) = parse_pairs(&input.query) else {
        return;
    };

    let Ok(template) = FormatTemplate::parse(&input.template) else {
        return;
    };
    let allowed = SpaceAllowList::default();
    let codec = FormatCodec::new(
        &template,
        &allowed,
        CodecLimits {
            max_args: 64,
            max_select_limit: 100,
        },
    );
    if let Ok(decoded) = codec.decode(&pairs) {
        let _ = codec.encode(&decoded.tuple);
    }
});
