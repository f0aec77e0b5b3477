use futures::{StreamExt, stream};
use proptest::prelude::*;
use serde_json::{Value, json};

use replay_stream::{StreamError, decode_records};

type Chunk = Result<Vec<u8>, std::io::Error>;

fn chunked(bytes: &[u8], sizes: &[usize]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    let mut sizes = sizes.iter().cycle();
    while offset < bytes.len() {
        let size = sizes.next().copied().unwrap_or(1).max(1);
        let end = (offset + size).min(bytes.len());
        chunks.push(Ok(bytes[offset..end].to_vec()));
        offset = end;
    }
    chunks
}

fn collect(chunks: Vec<Chunk>) -> Vec<Result<Value, StreamError>> {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(decode_records(stream::iter(chunks)).collect())
}

fn arb_record() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<String>().prop_map(|k| json!({ "kernelId": k })),
        any::<String>().prop_map(|s| json!({ "source": s })),
        (any::<i64>(), any::<bool>()).prop_map(|(n, b)| json!({ "n": n, "flag": b })),
    ]
}

proptest! {
    #[test]
    fn chunking_never_changes_records(
        records in prop::collection::vec((arb_record(), any::<bool>()), 0..12),
        sizes in prop::collection::vec(1usize..24, 1..16),
    ) {
        let mut wire = String::new();
        for (record, blank_after) in &records {
            wire.push_str(&serde_json::to_string(record).unwrap());
            wire.push('\n');
            if *blank_after {
                wire.push_str(" \t\n");
            }
        }

        let decoded: Vec<Value> = collect(chunked(wire.as_bytes(), &sizes))
            .into_iter()
            .map(Result::unwrap)
            .collect();
        let expected: Vec<Value> = records.into_iter().map(|(r, _)| r).collect();
        prop_assert_eq!(decoded, expected);
    }
}

#[test]
fn kernel_descriptor_split_mid_key() {
    let chunks = vec![
        Ok(b"{\"kernelId".to_vec()),
        Ok(b"\":\"k1\"}\n{\"source\":\"<div></div>\"}\n".to_vec()),
    ];
    let records: Vec<Value> = collect(chunks).into_iter().map(Result::unwrap).collect();
    assert_eq!(
        records,
        vec![json!({"kernelId": "k1"}), json!({"source": "<div></div>"})]
    );
}

// The last line has no terminating delimiter. It is dropped rather than
// parsed: the server always terminates records, so a missing newline means
// the stream was cut short.
#[test]
fn unterminated_trailing_record_is_dropped() {
    let wire = b"{\"source\":\"a\"}\n{\"source\":\"b\"}";
    for size in 1..wire.len() {
        let records = collect(chunked(wire, &[size]));
        assert_eq!(records.len(), 1, "chunk size {}", size);
        assert_eq!(records[0].as_ref().unwrap(), &json!({"source": "a"}));
    }
}

#[test]
fn malformed_line_ends_stream_after_good_records() {
    let wire = b"{\"source\":\"ok\"}\nnot-json\n{\"source\":\"never\"}\n";
    for size in [1, 5, wire.len()] {
        let items = collect(chunked(wire, &[size]));
        assert_eq!(items.len(), 2, "chunk size {}", size);
        assert_eq!(items[0].as_ref().unwrap(), &json!({"source": "ok"}));
        assert!(matches!(items[1], Err(StreamError::Parse { line: 2, .. })));
    }
}

#[test]
fn invalid_utf8_ends_stream() {
    let mut wire = b"{\"source\":\"ok\"}\n{\"source\":\"".to_vec();
    wire.push(0xC3);
    wire.push(b'(');
    wire.extend_from_slice(b"\"}\n");

    let items = collect(chunked(&wire, &[3]));
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(items[1], Err(StreamError::Decode { .. })));
}

#[test]
fn multibyte_characters_split_across_chunks() {
    let record = json!({"source": "<p>naïve 🦀 ─ 日本語</p>"});
    let wire = format!("{}\n", record);
    for size in 1..8 {
        let records = collect(chunked(wire.as_bytes(), &[size]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap(), &record);
    }
}
