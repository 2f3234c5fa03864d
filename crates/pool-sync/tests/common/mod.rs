#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anchor_lang::prelude::{AnchorSerialize, Pubkey};
use anchor_spl::associated_token::get_associated_token_address;
use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use tokio::sync::{mpsc, oneshot};

use pool_sync::config::SyncSettings;
use pool_sync::math::LinearFeeCurve;
use pool_sync::rpc::{AccountNotification, LatestBlockhash, SignatureStatus, SubscriptionHandle};
use pool_sync::state::{
    HistoricalTokenData, OracleAggregator, OracleTokenInfo, PoolConfig, PriceFeed, PriceStatus,
    SupportedToken,
};
use pool_sync::{
    AccountFetcher, LedgerRpc, PoolSynchronizer, RateLimiter, RetryPolicy, RpcError,
};

pub const NOW: i64 = 1_700_000_000;
pub const LAST_VALID_BLOCK_HEIGHT: u64 = 500;

struct Subscription {
    sink: mpsc::UnboundedSender<AccountNotification>,
    cancel: oneshot::Receiver<()>,
}

impl Subscription {
    fn is_active(&mut self) -> bool {
        matches!(
            self.cancel.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

/// In-memory ledger: account buffers, push notifications and a scripted
/// transaction pipeline.
#[derive(Default)]
pub struct MockLedger {
    accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
    subscriptions: Mutex<HashMap<Pubkey, Vec<Subscription>>>,
    pub fetch_calls: AtomicUsize,
    pub fail_fetches: AtomicBool,
    pub sent: Mutex<Vec<VersionedTransaction>>,
    pub send_error: Mutex<Option<RpcError>>,
    pub status: Mutex<Option<SignatureStatus>>,
    pub logs: Mutex<Vec<String>>,
    pub block_height: AtomicU64,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, address: Pubkey, data: Vec<u8>) {
        self.accounts.lock().unwrap().insert(address, data);
    }

    pub fn account(&self, address: &Pubkey) -> Option<Vec<u8>> {
        self.accounts.lock().unwrap().get(address).cloned()
    }

    pub fn remove(&self, address: &Pubkey) {
        self.accounts.lock().unwrap().remove(address);
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Subscriptions on `address` that have not been released.
    pub fn active_subscriptions(&self, address: &Pubkey) -> usize {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        subscriptions
            .get_mut(address)
            .map(|subs| subs.iter_mut().map(|s| s.is_active() as usize).sum::<usize>())
            .unwrap_or(0)
    }

    pub fn total_active_subscriptions(&self) -> usize {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        subscriptions
            .values_mut()
            .flat_map(|subs| subs.iter_mut())
            .map(|s| s.is_active() as usize)
            .sum()
    }

    /// Pushes a change notification to every live subscriber of `address`.
    pub fn notify(&self, address: Pubkey) {
        let data = self.accounts.lock().unwrap().get(&address).cloned();
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if let Some(subs) = subscriptions.get_mut(&address) {
            for sub in subs.iter_mut() {
                if !sub.is_active() {
                    continue;
                }
                let _ = sub.sink.send(AccountNotification {
                    address,
                    slot: 1,
                    data: data.clone(),
                });
            }
        }
    }

    pub fn confirm_with(&self, status: SignatureStatus) {
        *self.status.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>, RpcError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(RpcError::Transport("connection reset".into()));
        }
        let accounts = self.accounts.lock().unwrap();
        Ok(addresses.iter().map(|a| accounts.get(a).cloned()).collect())
    }

    async fn subscribe_account(
        &self,
        address: Pubkey,
        sink: mpsc::UnboundedSender<AccountNotification>,
    ) -> Result<SubscriptionHandle, RpcError> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.subscriptions
            .lock()
            .unwrap()
            .entry(address)
            .or_default()
            .push(Subscription {
                sink,
                cancel: cancel_rx,
            });
        Ok(SubscriptionHandle::new(address, cancel_tx))
    }

    async fn latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
        Ok(LatestBlockhash {
            blockhash: Hash::new_unique(),
            last_valid_block_height: LAST_VALID_BLOCK_HEIGHT,
        })
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, RpcError> {
        if let Some(e) = self.send_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.sent.lock().unwrap().push(transaction.clone());
        Ok(transaction.signatures[0])
    }

    async fn signature_status(
        &self,
        _signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcError> {
        Ok(self.status.lock().unwrap().clone())
    }

    async fn block_height(&self) -> Result<u64, RpcError> {
        Ok(self.block_height.load(Ordering::SeqCst))
    }

    async fn transaction_logs(&self, _signature: &Signature) -> Result<Vec<String>, RpcError> {
        Ok(self.logs.lock().unwrap().clone())
    }
}

pub fn with_discriminator<T: AnchorSerialize>(value: &T) -> Vec<u8> {
    let mut data = vec![9u8; 8];
    value.serialize(&mut data).unwrap();
    data
}

pub fn padded<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [0u8; N];
    out[..text.len()].copy_from_slice(text.as_bytes());
    out
}

pub fn mint_account(supply: u64, decimals: u8) -> Vec<u8> {
    let mut data = vec![0u8; 82];
    data[36..44].copy_from_slice(&supply.to_le_bytes());
    data[44] = decimals;
    data[45] = 1;
    data
}

pub fn token_account(amount: u64) -> Vec<u8> {
    let mut data = vec![0u8; 165];
    data[64..72].copy_from_slice(&amount.to_le_bytes());
    data
}

pub fn price_feed(price: i64, expo: i32, status: PriceStatus, age_secs: i64) -> Vec<u8> {
    with_discriminator(&PriceFeed {
        price,
        expo,
        symbol: "USD".into(),
        status,
        last_updated_timestamp: NOW - age_secs,
        bump: 254,
    })
}

pub fn oracle_account(listed: &[(Pubkey, &str, u64)]) -> Vec<u8> {
    with_discriminator(&OracleAggregator {
        authority: Pubkey::new_unique(),
        token_count: listed.len() as u32,
        data: listed
            .iter()
            .map(|(mint, symbol, dominance)| OracleTokenInfo {
                symbol: padded(symbol),
                dominance: *dominance,
                address: padded(&mint.to_string()),
                price_feed_id: padded("feed"),
                timestamp: NOW as u64,
            })
            .collect(),
    })
}

pub struct TokenSetup {
    pub symbol: &'static str,
    pub decimals: u8,
    pub vault_balance: u64,
    pub price: i64,
    pub expo: i32,
    pub price_age_secs: i64,
    pub listed_dominance: Option<u64>,
}

impl TokenSetup {
    /// 1.0 token of 6 decimals at $2.00, fully listed.
    pub fn two_dollar() -> Self {
        Self {
            symbol: "TWO",
            decimals: 6,
            vault_balance: 1_000_000,
            price: 200_000_000,
            expo: -8,
            price_age_secs: 5,
            listed_dominance: Some(10_000_000_000),
        }
    }
}

/// A pool installed into a [`MockLedger`].
pub struct PoolFixture {
    pub program_id: Pubkey,
    pub pool_config: Pubkey,
    pub config: PoolConfig,
    pub tokens: Vec<SupportedToken>,
}

impl PoolFixture {
    pub fn install(ledger: &MockLedger, setups: &[TokenSetup], total_value: u128, share_supply: u64) -> Self {
        let tokens: Vec<SupportedToken> = setups
            .iter()
            .map(|_| SupportedToken {
                mint: Pubkey::new_unique(),
                vault: Pubkey::new_unique(),
                token_history: Pubkey::new_unique(),
                price_feed: Pubkey::new_unique(),
            })
            .collect();
        let config = PoolConfig {
            admin: Pubkey::new_unique(),
            fee_recipient: Pubkey::new_unique(),
            share_mint: Pubkey::new_unique(),
            oracle_program: Pubkey::new_unique(),
            oracle_aggregator: Pubkey::new_unique(),
            lookup_table: Pubkey::default(),
            current_total_pool_value_scaled: total_value,
            supported_tokens: tokens.clone(),
        };
        let pool_config = Pubkey::new_unique();
        ledger.set(pool_config, with_discriminator(&config));
        ledger.set(config.share_mint, mint_account(share_supply, 6));

        let mut listed = Vec::new();
        for (token, setup) in tokens.iter().zip(setups) {
            ledger.set(token.mint, mint_account(1_000_000_000_000, setup.decimals));
            ledger.set(token.vault, token_account(setup.vault_balance));
            ledger.set(
                token.token_history,
                with_discriminator(&HistoricalTokenData {
                    price_feed_id: [3; 32],
                    decimals: setup.decimals,
                    symbol: padded(setup.symbol),
                }),
            );
            ledger.set(
                token.price_feed,
                price_feed(setup.price, setup.expo, PriceStatus::Trading, setup.price_age_secs),
            );
            if let Some(dominance) = setup.listed_dominance {
                listed.push((token.mint, setup.symbol, dominance));
            }
        }
        ledger.set(config.oracle_aggregator, oracle_account(&listed));

        Self {
            program_id: Pubkey::new_unique(),
            pool_config,
            config,
            tokens,
        }
    }

    pub fn oracle(&self) -> Pubkey {
        self.config.oracle_aggregator
    }

    pub fn share_mint(&self) -> Pubkey {
        self.config.share_mint
    }

    pub fn user_share_account(&self, owner: &Pubkey) -> Pubkey {
        get_associated_token_address(owner, &self.config.share_mint)
    }

    pub fn user_token_account(&self, owner: &Pubkey, index: usize) -> Pubkey {
        get_associated_token_address(owner, &self.tokens[index].mint)
    }

    /// Rewrites the pool config account (e.g. after a deposit changed the total).
    pub fn set_total_value(&mut self, ledger: &MockLedger, total_value: u128) {
        self.config.current_total_pool_value_scaled = total_value;
        ledger.set(self.pool_config, with_discriminator(&self.config));
    }
}

pub fn fetcher(ledger: Arc<MockLedger>) -> AccountFetcher {
    AccountFetcher::new(
        ledger,
        Arc::new(RateLimiter::per_second(1_000)),
        99,
        RetryPolicy {
            max_attempts: 1,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
        },
    )
}

pub fn synchronizer(ledger: &Arc<MockLedger>, pool: &PoolFixture) -> PoolSynchronizer {
    PoolSynchronizer::new(
        fetcher(ledger.clone()),
        pool.pool_config,
        SyncSettings::default(),
        Arc::new(LinearFeeCurve::default()),
    )
    .with_clock(|| NOW)
}
