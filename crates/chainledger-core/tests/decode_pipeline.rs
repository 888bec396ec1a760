//! End-to-end decode→normalize→store scenarios against the in-memory ledger.

use std::sync::Arc;

use chainledger_core::{
    abi::AbiRegistry,
    decode::EventDecoder,
    ingest::Ingestor,
    normalize::{RecordPayload, RecordType},
    store::{LedgerStore, QueryView},
    types::{BlockHead, RawLog},
};
use chainledger_storage::MemoryLedger;

const ERC20_ABI: &str = r#"[
    {"type":"event","name":"Transfer","anonymous":false,"inputs":[
        {"name":"from","type":"address","indexed":true},
        {"name":"to","type":"address","indexed":true},
        {"name":"value","type":"uint256","indexed":false}]}
]"#;

const TRANSFER_SIG: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";

fn padded_address(addr: &str) -> String {
    format!("0x{:0>64}", addr.trim_start_matches("0x"))
}

fn transfer_log(contract: &str, tx: &str, log_index: u32, value: u64) -> RawLog {
    let mut data = vec![0u8; 32];
    data[24..].copy_from_slice(&value.to_be_bytes());
    RawLog {
        address: contract.into(),
        topics: vec![
            TRANSFER_SIG.into(),
            padded_address("0x1111111111111111111111111111111111111111"),
            padded_address("0x2222222222222222222222222222222222222222"),
        ],
        data,
        block_number: 100,
        block_hash: "0xb100".into(),
        tx_hash: tx.into(),
        log_index,
    }
}

fn block_100() -> BlockHead {
    BlockHead {
        number: 100,
        hash: "0xb100".into(),
        parent_hash: "0xb099".into(),
        timestamp: 1_700_000_000,
    }
}

fn registry() -> AbiRegistry {
    let registry = AbiRegistry::new();
    registry
        .register("ethereum", USDT, ERC20_ABI, 1, 0, None)
        .unwrap();
    registry
}

#[tokio::test]
async fn known_and_unknown_logs_ingest_side_by_side() {
    let store = Arc::new(MemoryLedger::new());
    let ingestor = Ingestor::new("ethereum", registry(), store.clone(), 1);

    // a registered USDT transfer and a log from an unregistered contract
    let known = transfer_log(USDT, "0xt1", 0, 1);
    let unknown = transfer_log("0x9999999999999999999999999999999999999999", "0xt2", 1, 5);

    let summary = ingestor
        .ingest_block(&block_100(), &[known, unknown.clone()])
        .await
        .unwrap();
    assert_eq!(summary.decoded, 1);
    assert_eq!(summary.undecoded, 1);
    assert_eq!(summary.rejected, 0);
    assert_eq!(summary.stored, 2);

    // the transfer landed as a typed, canonical record with amount "1"
    let transfers = store
        .records_by_type("ethereum", RecordType::Transfer, QueryView::default())
        .await
        .unwrap();
    assert_eq!(transfers.len(), 1);
    assert!(transfers[0].meta.canonical);
    match &transfers[0].payload {
        RecordPayload::Transfer { from, to, amount, .. } => {
            assert_eq!(from, "0x1111111111111111111111111111111111111111");
            assert_eq!(to, "0x2222222222222222222222222222222222222222");
            assert_eq!(amount, "1");
        }
        other => panic!("wrong payload: {other:?}"),
    }

    // the unknown log became a generic "Unknown" record, payload verbatim
    let generics = store
        .records_by_type("ethereum", RecordType::Generic, QueryView::default())
        .await
        .unwrap();
    assert_eq!(generics.len(), 1);
    match &generics[0].payload {
        RecordPayload::Generic { event_name, args, .. } => {
            assert_eq!(event_name, "Unknown");
            assert_eq!(args["reason"], "missing_abi");
            assert_eq!(args["topics"][0], TRANSFER_SIG);
            assert_eq!(
                args["data"],
                format!("0x{}", hex::encode(&unknown.data))
            );
        }
        other => panic!("wrong payload: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_log_never_aborts_the_block() {
    let store = Arc::new(MemoryLedger::new());
    let ingestor = Ingestor::new("ethereum", registry(), store.clone(), 1);

    let mut logs: Vec<RawLog> = (0..5)
        .map(|i| transfer_log(USDT, &format!("0xt{i}"), i, 10 + i as u64))
        .collect();
    logs[2].data.truncate(7); // malformed payload in the middle of the batch

    let summary = ingestor.ingest_block(&block_100(), &logs).await.unwrap();
    assert_eq!(summary.decoded, 4);
    assert_eq!(summary.undecoded, 1);
    assert_eq!(summary.stored, 5);

    let transfers = store
        .records_by_type("ethereum", RecordType::Transfer, QueryView::default())
        .await
        .unwrap();
    assert_eq!(transfers.len(), 4);

    // exactly one parse-error-tagged raw record
    let generics = store
        .records_by_type("ethereum", RecordType::Generic, QueryView::default())
        .await
        .unwrap();
    assert_eq!(generics.len(), 1);
    match &generics[0].payload {
        RecordPayload::Generic { args, .. } => {
            let reason = args["reason"].as_str().unwrap();
            assert!(reason.starts_with("parse_error"), "reason was {reason}");
        }
        other => panic!("wrong payload: {other:?}"),
    }
}

#[tokio::test]
async fn replaying_a_block_stores_nothing_new() {
    let store = Arc::new(MemoryLedger::new());
    let ingestor = Ingestor::new("ethereum", registry(), store.clone(), 1);
    let logs = vec![transfer_log(USDT, "0xt1", 0, 1)];

    let first = ingestor.ingest_block(&block_100(), &logs).await.unwrap();
    assert_eq!(first.stored, 1);

    let replay = ingestor.ingest_block(&block_100(), &logs).await.unwrap();
    assert_eq!(replay.stored, 0);
    assert_eq!(store.record_count(), 1);
    assert_eq!(store.block_count(), 1);
}

#[tokio::test]
async fn decoder_batch_summary_counts() {
    let decoder = EventDecoder::new("ethereum", registry());
    let mut bad = transfer_log(USDT, "0xbad", 1, 2);
    bad.topics.pop();

    let (outcomes, summary) = decoder.decode_batch(&[
        transfer_log(USDT, "0xa", 0, 1),
        bad,
        transfer_log(USDT, "0xc", 2, 3),
    ]);

    assert_eq!(summary.decoded, 2);
    assert_eq!(summary.failed, 1);
    assert!(outcomes[0].is_decoded());
    assert!(!outcomes[1].is_decoded());
    assert!(outcomes[2].is_decoded());
}
