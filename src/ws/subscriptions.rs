//! Subscription registry: what the caller wants to receive.
//!
//! The registry is the source of truth for what has to be re-sent after a
//! reconnect. It records the caller's last successful subscribe/unsubscribe
//! calls whether or not a connection is up, and never mirrors server state.

use std::collections::BTreeSet;

use crate::error::ValidationError;
use crate::shared::{SubscriptionKey, SubscriptionKind};
use crate::ws::MessageOut;

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub ticks: Vec<SubscriptionKey>,
    pub depth: Vec<SubscriptionKey>,
    pub orders: bool,
}

/// Tick and depth key sets plus the account-wide order flag.
///
/// Sets are ordered so snapshot frames are deterministic.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    ticks: BTreeSet<SubscriptionKey>,
    depth: BTreeSet<SubscriptionKey>,
    orders: bool,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, kind: SubscriptionKind) -> Option<&BTreeSet<SubscriptionKey>> {
        match kind {
            SubscriptionKind::Tick => Some(&self.ticks),
            SubscriptionKind::Depth => Some(&self.depth),
            SubscriptionKind::Order => None,
        }
    }

    fn set_mut(&mut self, kind: SubscriptionKind) -> Option<&mut BTreeSet<SubscriptionKey>> {
        match kind {
            SubscriptionKind::Tick => Some(&mut self.ticks),
            SubscriptionKind::Depth => Some(&mut self.depth),
            SubscriptionKind::Order => None,
        }
    }

    /// Record a subscription and build its frame.
    ///
    /// Tick and depth frames carry the whole updated set for that kind.
    /// `keys` is ignored for orders.
    pub fn subscribe(
        &mut self,
        kind: SubscriptionKind,
        keys: &[SubscriptionKey],
        actid: &str,
    ) -> Result<MessageOut, ValidationError> {
        match self.set_mut(kind) {
            Some(set) => {
                if keys.is_empty() {
                    return Err(ValidationError::MissingTokens(kind.to_string()));
                }
                set.extend(keys.iter().cloned());
                Ok(MessageOut::subscribe(kind, set.iter(), actid))
            }
            None => {
                self.orders = true;
                Ok(MessageOut::subscribe(kind, [], actid))
            }
        }
    }

    /// Remove subscriptions and build a frame listing only the removed keys.
    ///
    /// Fails without touching the registry if any key was never subscribed.
    pub fn unsubscribe(
        &mut self,
        kind: SubscriptionKind,
        keys: &[SubscriptionKey],
        actid: &str,
    ) -> Result<MessageOut, ValidationError> {
        match self.set_mut(kind) {
            Some(set) => {
                if keys.is_empty() {
                    return Err(ValidationError::MissingTokens(kind.to_string()));
                }
                if let Some(missing) = keys.iter().find(|k| !set.contains(*k)) {
                    return Err(ValidationError::NotSubscribed(missing.to_string()));
                }
                let removed: BTreeSet<SubscriptionKey> = keys.iter().cloned().collect();
                set.retain(|k| !removed.contains(k));
                Ok(MessageOut::unsubscribe(kind, removed.iter(), actid))
            }
            None => {
                if !self.orders {
                    return Err(ValidationError::NotSubscribed(kind.to_string()));
                }
                self.orders = false;
                Ok(MessageOut::unsubscribe(kind, [], actid))
            }
        }
    }

    /// Frames that restore the full registry on a fresh connection.
    ///
    /// Empty sets produce no frame. Never mutates the registry.
    pub fn replay(&self, actid: &str) -> Vec<MessageOut> {
        let mut frames = Vec::new();
        if !self.ticks.is_empty() {
            frames.push(MessageOut::subscribe(SubscriptionKind::Tick, &self.ticks, actid));
        }
        if self.orders {
            frames.push(MessageOut::subscribe(SubscriptionKind::Order, [], actid));
        }
        if !self.depth.is_empty() {
            frames.push(MessageOut::subscribe(SubscriptionKind::Depth, &self.depth, actid));
        }
        frames
    }

    pub fn contains(&self, kind: SubscriptionKind, key: &SubscriptionKey) -> bool {
        self.set(kind).is_some_and(|s| s.contains(key))
    }

    pub fn orders_subscribed(&self) -> bool {
        self.orders
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty() && self.depth.is_empty() && !self.orders
    }

    pub fn snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            ticks: self.ticks.iter().cloned().collect(),
            depth: self.depth.iter().cloned().collect(),
            orders: self.orders,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
