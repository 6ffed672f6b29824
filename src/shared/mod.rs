//! Shared types used across the auth, symbol and streaming layers.
//!
//! These types serialize identically to the raw codes the Integrate backend
//! sends and expects (`"NSE"`, `"NSE|11536"`), so they can be used directly
//! in wire types without conversion.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

use crate::error::ValidationError;

// ─── Exchange ────────────────────────────────────────────────────────────────

/// Exchange segment an instrument token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Exchange {
    Nse,
    Bse,
    Nfo,
    Cds,
    Mcx,
}

impl Exchange {
    pub const ALL: [Exchange; 5] = [
        Exchange::Nse,
        Exchange::Bse,
        Exchange::Nfo,
        Exchange::Cds,
        Exchange::Mcx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nse => "NSE",
            Self::Bse => "BSE",
            Self::Nfo => "NFO",
            Self::Cds => "CDS",
            Self::Mcx => "MCX",
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Exchange::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidExchange(s.to_string()))
    }
}

impl Serialize for Exchange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Exchange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── SubscriptionKind ────────────────────────────────────────────────────────

/// The three independent streams a session can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Tick,
    Order,
    Depth,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tick => "TICK",
            Self::Order => "ORDER",
            Self::Depth => "DEPTH",
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubscriptionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TICK" => Ok(Self::Tick),
            "ORDER" => Ok(Self::Order),
            "DEPTH" => Ok(Self::Depth),
            _ => Err(ValidationError::InvalidSubscriptionKind(s.to_string())),
        }
    }
}

// ─── SubscriptionKey ─────────────────────────────────────────────────────────

/// An (exchange, token) pair. Wire form is `EX|token`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionKey {
    pub exchange: Exchange,
    pub token: String,
}

impl SubscriptionKey {
    pub fn new(exchange: Exchange, token: impl Into<String>) -> Self {
        Self {
            exchange,
            token: token.into(),
        }
    }

    /// Build a key from a raw exchange code, rejecting unknown exchanges.
    pub fn parse(exchange: &str, token: impl Into<String>) -> Result<Self, ValidationError> {
        Ok(Self::new(exchange.parse()?, token))
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.exchange, self.token)
    }
}

impl FromStr for SubscriptionKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('|') {
            Some((exchange, token)) => Self::parse(exchange, token),
            None => Err(ValidationError::InvalidExchange(s.to_string())),
        }
    }
}

impl From<(Exchange, &str)> for SubscriptionKey {
    fn from((exchange, token): (Exchange, &str)) -> Self {
        Self::new(exchange, token)
    }
}

/// Join keys into the `#`-separated list used by the `k` field.
pub fn join_keys<'a>(keys: impl IntoIterator<Item = &'a SubscriptionKey>) -> String {
    keys.into_iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join("#")
}
