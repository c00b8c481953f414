//! Property-based tests using proptest
//!
//! Classification must never lose or reorder bytes: whatever a matcher reads
//! is replayed to the downstream server ahead of the rest of the socket.

use grpc_bootstrap::mux::matcher::{self, Matcher};
use grpc_bootstrap::mux::{MuxConnectInfo, MuxStream, Sniffer};
use proptest::prelude::*;
use std::io::Cursor;
use tokio::io::AsyncReadExt;

fn info() -> MuxConnectInfo {
    MuxConnectInfo {
        remote_addr: "127.0.0.1:40000".parse().unwrap(),
        local_addr: "127.0.0.1:9090".parse().unwrap(),
        tls: false,
    }
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

async fn read_all_in_chunks(mut stream: MuxStream, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

/// Byte strings biased towards protocol openings
fn arb_connection_bytes() -> impl Strategy<Value = Vec<u8>> {
    let openings = prop_oneof![
        Just(b"GET / HTTP/1.1\r\n\r\n".to_vec()),
        Just(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n".to_vec()),
        Just(b"GE".to_vec()),
        Just(Vec::new()),
    ];
    (openings, prop::collection::vec(any::<u8>(), 0..512)).prop_map(|(mut head, tail)| {
        head.extend(tail);
        head
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Any split between replay buffer and socket reads back unchanged
    #[test]
    fn prop_replay_preserves_bytes(
        data in prop::collection::vec(any::<u8>(), 0..2048),
        split in any::<prop::sample::Index>(),
        chunk in 1usize..300,
    ) {
        let at = if data.is_empty() { 0 } else { split.index(data.len() + 1) };
        let (replay, rest) = data.split_at(at);

        let stream = MuxStream::new(replay.to_vec(), Box::new(Cursor::new(rest.to_vec())), info());
        let out = block_on(read_all_in_chunks(stream, chunk));

        prop_assert_eq!(out, data);
    }

    /// Running matchers, in any outcome, leaves the stream intact
    #[test]
    fn prop_classification_is_non_destructive(
        data in arb_connection_bytes(),
        chunk in 1usize..64,
    ) {
        let out = block_on(async {
            let mut sniffer = Sniffer::new(Box::new(Cursor::new(data.clone())));
            let matchers: Vec<Box<dyn Matcher>> = vec![
                Box::new(matcher::grpc()),
                Box::new(matcher::http2()),
                Box::new(matcher::http1()),
                Box::new(matcher::http1_fast()),
            ];
            for m in &matchers {
                sniffer.rewind();
                let _ = m.matches(&mut sniffer).await;
            }
            read_all_in_chunks(sniffer.into_stream(info()), chunk).await
        });

        prop_assert_eq!(out, data);
    }

    /// The fast HTTP/1 matcher claims exactly the method-prefixed streams
    #[test]
    fn prop_http1_fast_agrees_with_method_list(data in arb_connection_bytes()) {
        let expected = matcher::HTTP1_METHODS
            .iter()
            .any(|m| data.starts_with(m.as_bytes()));

        let matched = block_on(async {
            let mut sniffer = Sniffer::new(Box::new(Cursor::new(data.clone())));
            matcher::http1_fast().matches(&mut sniffer).await.unwrap_or(false)
        });

        prop_assert_eq!(matched, expected);
    }
}
