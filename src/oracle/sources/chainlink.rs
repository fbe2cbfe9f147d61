//! Chainlink reference feeds over Ethereum JSON-RPC
//!
//! Each feed is an aggregator contract; `latestAnswer()` returns the price
//! as an `int256` with the feed's fixed decimal count.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, I256, U256};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::oracle::sources::QuoteSource;
use crate::types::Ticker;

/// keccak256("latestAnswer()")[..4]
const LATEST_ANSWER_SELECTOR: [u8; 4] = [0x50, 0xd2, 0x5b, 0xcd];

pub struct ChainlinkSource {
    provider: Provider<Http>,
    feeds: HashMap<Ticker, Address>,
}

impl ChainlinkSource {
    pub fn new(rpc_url: &str, feeds: HashMap<Ticker, Address>) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("Invalid RPC url {}", rpc_url))?;
        Ok(Self { provider, feeds })
    }
}

#[async_trait]
impl QuoteSource for ChainlinkSource {
    async fn fetch(&self, ticker: Ticker) -> Result<Decimal> {
        let feed = self
            .feeds
            .get(&ticker)
            .with_context(|| format!("No Chainlink feed configured for {}", ticker))?;

        let call: TypedTransaction = TransactionRequest::new()
            .to(*feed)
            .data(Bytes::from(LATEST_ANSWER_SELECTOR.to_vec()))
            .into();

        let raw = self
            .provider
            .call(&call, None)
            .await
            .with_context(|| format!("latestAnswer() call failed for {} ({:#x})", ticker, feed))?;

        decode_answer(&raw)
    }
}

/// Decode an ABI `int256` answer into a positive integer decimal
fn decode_answer(raw: &[u8]) -> Result<Decimal> {
    if raw.len() != 32 {
        bail!("latestAnswer() returned {} bytes, expected 32", raw.len());
    }
    let answer = I256::from_raw(U256::from_big_endian(raw));
    if answer <= I256::zero() {
        bail!("Non-positive feed answer {}", answer);
    }
    Decimal::from_str(&answer.to_string())
        .with_context(|| format!("Feed answer {} out of decimal range", answer))
}
