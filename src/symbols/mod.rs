//! Symbol master: instrument tokens by exchange and trading symbol.
//!
//! The master file (`allmaster.csv`) is a headerless CSV with one row per
//! instrument. The streaming session only needs it to check that a token
//! exists before subscribing, through the [`SymbolResolver`] trait.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SymbolError;
use crate::shared::{Exchange, SubscriptionKey};

/// Maps `(exchange, token or trading symbol)` to an instrument token.
///
/// Used for best-effort subscription validation; a session without a
/// resolver skips the check.
pub trait SymbolResolver: Send + Sync {
    fn lookup(&self, exchange: Exchange, token_or_symbol: &str) -> Option<String>;
}

/// One row of the master file, in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolRecord {
    pub segment: String,
    pub token: String,
    pub symbol: String,
    pub trading_symbol: String,
    pub instrument_type: String,
    pub expiry: String,
    pub tick_size: String,
    pub lot_size: String,
    pub option_type: String,
    pub strike: String,
    pub price_precision: String,
    pub multiplier: String,
    pub isin: String,
    pub price_mult: String,
}

impl SymbolRecord {
    pub fn exchange(&self) -> Option<Exchange> {
        self.segment.parse().ok()
    }
}

/// In-memory symbol master indexed by token and by trading symbol.
#[derive(Debug, Default)]
pub struct SymbolMaster {
    records: Vec<SymbolRecord>,
    by_token: HashMap<(Exchange, String), usize>,
    by_symbol: HashMap<(Exchange, String), usize>,
}

impl SymbolMaster {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SymbolError> {
        let file = std::fs::File::open(path.as_ref())?;
        let master = Self::from_reader(file)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            records = master.len(),
            "Loaded symbol master"
        );
        Ok(master)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SymbolError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut master = SymbolMaster::default();
        for row in rdr.deserialize::<SymbolRecord>() {
            master.insert(row?);
        }
        Ok(master)
    }

    fn insert(&mut self, record: SymbolRecord) {
        let idx = self.records.len();
        // Segments outside the streaming exchanges are kept but not indexed.
        if let Some(exchange) = record.exchange() {
            self.by_token.insert((exchange, record.token.clone()), idx);
            if !record.trading_symbol.is_empty() {
                self.by_symbol
                    .insert((exchange, record.trading_symbol.clone()), idx);
            }
        }
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SymbolRecord] {
        &self.records
    }

    /// Full record for a token.
    pub fn symbol(&self, exchange: Exchange, token: &str) -> Option<&SymbolRecord> {
        self.by_token
            .get(&(exchange, token.to_string()))
            .map(|&i| &self.records[i])
    }

    /// Subscription key for a trading symbol such as `SBIN-EQ`.
    pub fn token_for_symbol(
        &self,
        exchange: Exchange,
        trading_symbol: &str,
    ) -> Option<SubscriptionKey> {
        self.by_symbol
            .get(&(exchange, trading_symbol.to_string()))
            .map(|&i| SubscriptionKey::new(exchange, self.records[i].token.clone()))
    }
}

impl SymbolResolver for SymbolMaster {
    fn lookup(&self, exchange: Exchange, token_or_symbol: &str) -> Option<String> {
        self.symbol(exchange, token_or_symbol)
            .or_else(|| {
                self.by_symbol
                    .get(&(exchange, token_or_symbol.to_string()))
                    .map(|&i| &self.records[i])
            })
            .map(|r| r.token.clone())
    }
}
