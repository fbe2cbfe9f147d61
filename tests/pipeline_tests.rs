//! End-to-end pipeline tests: sources -> scheduler -> ledger -> record API

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use k256::ecdsa::signature::Verifier;
use k256::ecdsa::Signature;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use pricing_oracle::ledger::{Ledger, MovingAverageSpec};
use pricing_oracle::oracle::sources::QuoteSource;
use pricing_oracle::oracle::{DeviationPolicy, QuoteAggregator, QuoteStyle, TickerSource};
use pricing_oracle::persistence::LedgerStore;
use pricing_oracle::scheduler::PollScheduler;
use pricing_oracle::server::{create_router, RecordServer};
use pricing_oracle::signing::{to_der, EcdsaSigner, MessageSigner, SignatureCompact};
use pricing_oracle::types::{AssetValues, MovingAverages, Ticker};

const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945387dc9f5a59e86cdc84e64546a1d8f76d59";

/// Fixed quotes keyed by ticker; missing tickers fail
struct StaticSource {
    prices: HashMap<Ticker, Decimal>,
}

#[async_trait]
impl QuoteSource for StaticSource {
    async fn fetch(&self, ticker: Ticker) -> anyhow::Result<Decimal> {
        self.prices
            .get(&ticker)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no quote for {}", ticker))
    }
}

fn aggregator(prices: &[(Ticker, Decimal)], style: QuoteStyle, decimals: u32) -> QuoteAggregator {
    let source: Arc<dyn QuoteSource> = Arc::new(StaticSource {
        prices: prices.iter().copied().collect(),
    });
    let entries = prices
        .iter()
        .map(|(ticker, _)| TickerSource {
            ticker: *ticker,
            label: "static".to_string(),
            source: source.clone(),
            style,
            decimals,
        })
        .collect();
    QuoteAggregator::new(entries, Duration::from_secs(1), 10_000)
}

async fn temp_store() -> LedgerStore {
    let path = std::env::temp_dir().join(format!("pipeline_{}.db", uuid::Uuid::new_v4()));
    LedgerStore::open(&format!("sqlite:{}", path.display()), 2)
        .await
        .unwrap()
}

async fn fetch_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn committed_record_is_served_and_verifiable_downstream() {
    let store = temp_store().await;
    let signer = EcdsaSigner::from_hex(TEST_KEY).unwrap();
    let verifier = signer.verifier();
    let signer: Arc<dyn MessageSigner> = Arc::new(signer);

    // Chainlink-style 8-decimal answers
    let primary = aggregator(
        &[
            (Ticker::XUSD, dec!(150000000)),
            (Ticker::XEUR, dec!(138000000)),
            (Ticker::XBTC, dec!(2500)),
        ],
        QuoteStyle::Direct,
        8,
    )
    .require(Ticker::XUSD);

    let ledger = Ledger::new(
        store.clone(),
        signer.clone(),
        vec![MovingAverageSpec::last_non_zero(Ticker::XUSD, 3)],
    );
    let scheduler = PollScheduler::new(
        primary,
        None,
        DeviationPolicy::default(),
        Ticker::XUSD,
        ledger,
        Duration::from_secs(30),
    );

    let first = scheduler.run_cycle().await.unwrap();
    let second = scheduler.run_cycle().await.unwrap();
    assert!(second.id > first.id);
    assert_eq!(second.values.get(Ticker::XUSD), 1_500_000_000_000);
    assert_eq!(second.values.get(Ticker::XBTC), 25_000_000);
    assert_eq!(second.averages.ma1, 1_500_000_000_000);
    assert_eq!(second.values.get(Ticker::XJPY), 0);

    let app = create_router(Arc::new(RecordServer::new(store, signer, 30, 10)));
    let (status, json) = fetch_json(app, "/pr?version=2").await;
    assert_eq!(status, StatusCode::OK);

    let pr = &json["pr"];
    assert_eq!(pr["id"], second.id);

    // Rebuild the signed payload and DER signature the way a consumer does
    let mut values = AssetValues::zeroed();
    for ticker in Ticker::ALL {
        values.set(ticker, pr[ticker.as_str()].as_u64().unwrap());
    }
    let averages = MovingAverages {
        ma1: pr["MA1"].as_u64().unwrap(),
        ma2: pr["MA2"].as_u64().unwrap(),
        ma3: pr["MA3"].as_u64().unwrap(),
    };
    let payload = Ledger::canonical_payload(&values, &averages).unwrap();
    let compact = SignatureCompact::from_hex(pr["signature"].as_str().unwrap()).unwrap();

    verifier.verify(payload.as_bytes(), &compact).unwrap();

    let der = to_der(&compact);
    let signature = Signature::from_der(&der).unwrap();
    let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(
        &hex::decode(verifier.public_key_hex()).unwrap(),
    )
    .unwrap();
    key.verify(payload.as_bytes(), &signature).unwrap();
}

#[tokio::test]
async fn sanity_rejections_flow_into_the_ledger() {
    let store = temp_store().await;
    let signer: Arc<dyn MessageSigner> = Arc::new(EcdsaSigner::from_hex(TEST_KEY).unwrap());

    let primary = aggregator(
        &[
            (Ticker::XUSD, dec!(1.00)),
            (Ticker::XAU, dec!(0.0020)),
            (Ticker::XCHF, dec!(0.90)),
        ],
        QuoteStyle::Direct,
        0,
    )
    .require(Ticker::XUSD);
    let secondary = aggregator(
        &[(Ticker::XUSD, dec!(1.01)), (Ticker::XAU, dec!(0.0010))],
        QuoteStyle::Direct,
        0,
    );

    let scheduler = PollScheduler::new(
        primary,
        Some(secondary),
        DeviationPolicy::default(),
        Ticker::XUSD,
        Ledger::new(store.clone(), signer, vec![]),
        Duration::from_secs(30),
    );

    let record = scheduler.run_cycle().await.unwrap();
    assert_eq!(record.values.get(Ticker::XUSD), 1_000_000_000_000);
    // twice the secondary
    assert_eq!(record.values.get(Ticker::XAU), 0);
    // no secondary quote, zeroed by policy
    assert_eq!(record.values.get(Ticker::XCHF), 0);
    assert_eq!(store.latest_record().await.unwrap(), Some(record));
}

#[tokio::test]
async fn inverse_quotes_are_reciprocal_and_floored() {
    let store = temp_store().await;
    let signer: Arc<dyn MessageSigner> = Arc::new(EcdsaSigner::from_hex(TEST_KEY).unwrap());

    let primary = aggregator(
        &[(Ticker::XUSD, dec!(100000000)), (Ticker::XJPY, dec!(300000000))],
        QuoteStyle::Inverse,
        8,
    )
    .require(Ticker::XUSD);

    let scheduler = PollScheduler::new(
        primary,
        None,
        DeviationPolicy::default(),
        Ticker::XUSD,
        Ledger::new(store, signer, vec![]),
        Duration::from_secs(30),
    );

    let record = scheduler.run_cycle().await.unwrap();
    assert_eq!(record.values.get(Ticker::XUSD), 1_000_000_000_000);
    assert_eq!(record.values.get(Ticker::XJPY), 333_333_330_000);
}
