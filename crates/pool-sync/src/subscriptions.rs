use std::collections::HashMap;

use anchor_lang::prelude::Pubkey;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::RpcError;
use crate::rpc::{AccountNotification, LedgerRpc, SubscriptionHandle};

struct Registration<R> {
    route: R,
    handle: SubscriptionHandle,
}

/// Account subscriptions keyed by address. Each registration carries the
/// route its notifications are dispatched to and the handle that releases it.
pub struct SubscriptionRegistry<R> {
    entries: HashMap<Pubkey, Vec<Registration<R>>>,
}

impl<R> Default for SubscriptionRegistry<R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<R: Copy + Eq + std::fmt::Debug> SubscriptionRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, route: R, handle: SubscriptionHandle) {
        self.entries
            .entry(handle.address())
            .or_default()
            .push(Registration { route, handle });
    }

    /// Subscribes every address for `route`. Failures are returned, not fatal:
    /// the route keeps whatever subscriptions succeeded.
    pub async fn subscribe_all(
        &mut self,
        rpc: &dyn LedgerRpc,
        route: R,
        addresses: &[Pubkey],
        sink: &mpsc::UnboundedSender<AccountNotification>,
    ) -> Vec<RpcError> {
        let mut errors = Vec::new();
        for address in addresses {
            if self.contains(route, address) {
                continue;
            }
            match rpc.subscribe_account(*address, sink.clone()).await {
                Ok(handle) => self.insert(route, handle),
                Err(e) => {
                    warn!(?route, %address, error = %e, "account subscription failed");
                    errors.push(e);
                }
            }
        }
        debug!(?route, count = self.addresses(route).len(), "subscriptions registered");
        errors
    }

    pub fn contains(&self, route: R, address: &Pubkey) -> bool {
        self.entries
            .get(address)
            .is_some_and(|regs| regs.iter().any(|r| r.route == route))
    }

    pub fn routes_for(&self, address: &Pubkey) -> Vec<R> {
        self.entries
            .get(address)
            .map(|regs| regs.iter().map(|r| r.route).collect())
            .unwrap_or_default()
    }

    pub fn addresses(&self, route: R) -> Vec<Pubkey> {
        self.entries
            .iter()
            .filter(|(_, regs)| regs.iter().any(|r| r.route == route))
            .map(|(address, _)| *address)
            .collect()
    }

    /// Unsubscribes every registration of `route`; returns the released addresses.
    pub fn release(&mut self, route: R) -> Vec<Pubkey> {
        let mut released = Vec::new();
        for (address, regs) in self.entries.iter_mut() {
            let (drop, keep): (Vec<_>, Vec<_>) = regs.drain(..).partition(|r| r.route == route);
            *regs = keep;
            for registration in drop {
                registration.handle.unsubscribe();
                released.push(*address);
            }
        }
        self.entries.retain(|_, regs| !regs.is_empty());
        if !released.is_empty() {
            debug!(?route, count = released.len(), "subscriptions released");
        }
        released
    }

    pub fn release_all(&mut self) {
        for (_, regs) in self.entries.drain() {
            for registration in regs {
                registration.handle.unsubscribe();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
