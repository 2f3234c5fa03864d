use std::sync::Arc;

use anchor_lang::prelude::Pubkey;

use crate::math::{
    actual_dominance_percent, pool_share_value_scaled, rebalance_fee_bps,
    target_dominance_percent, token_value_usd_scaled, Direction, FeeCurve,
};
use crate::errors::DecodeError;
use crate::state::{OracleAggregator, PoolConfig, PriceQuote, PriceUnavailable};
use crate::sync::loaders::{PublicPoolState, PublicTokenState, UserBalances};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceHealth {
    Fresh,
    /// No feed configured, or the feed account does not exist
    Missing,
    /// The feed account exists but its data does not decode
    Undecodable(DecodeError),
    NotTrading,
    Stale { age_secs: i64 },
}

impl PriceHealth {
    pub fn is_fresh(&self) -> bool {
        matches!(self, PriceHealth::Fresh)
    }
}

/// Everything a consumer needs to render or act on one supported token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedTokenData {
    pub mint: Pubkey,
    pub vault: Pubkey,
    pub price_feed: Pubkey,
    pub token_history: Pubkey,
    pub symbol: String,
    pub decimals: u8,
    pub vault_balance: u64,
    /// Last decoded price, regardless of health
    pub price: Option<PriceQuote>,
    pub price_health: PriceHealth,
    pub value_usd_scaled: u128,
    /// Raw oracle dominance (1e10 scale); None when the oracle no longer lists the mint
    pub oracle_dominance: Option<u64>,
    pub target_dominance_percent: u64,
    pub actual_dominance_percent: u64,
    pub is_delisted: bool,
    /// None: deposits are not accepted
    pub deposit_fee_bps: Option<i64>,
    pub withdraw_fee_bps: Option<i64>,
    /// None until the user tier is ready, or when the wallet holds no account
    pub user_balance: Option<u64>,
    pub user_has_account: bool,
}

impl ProcessedTokenData {
    /// Price usable for a state transition.
    pub fn fresh_price(&self) -> Option<PriceQuote> {
        match self.price_health {
            PriceHealth::Fresh => self.price,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotGenerations {
    pub public: u64,
    pub oracle: u64,
    pub user: u64,
}

/// Consistent derived view over the three tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedSnapshot {
    pub generations: SnapshotGenerations,
    pub pool_config_address: Pubkey,
    pub config: Arc<PoolConfig>,
    pub tokens: Vec<ProcessedTokenData>,
    pub total_pool_value_scaled: u128,
    pub share_mint: Pubkey,
    pub share_supply: u64,
    pub share_decimals: u8,
    /// None while no shares are outstanding
    pub share_value_scaled: Option<u128>,
    /// Connected wallet, when the user tier was folded in
    pub owner: Option<Pubkey>,
    pub user_share_balance: Option<u64>,
    pub user_ready: bool,
    pub computed_at: i64,
}

impl ProcessedSnapshot {
    pub fn token(&self, mint: &Pubkey) -> Option<&ProcessedTokenData> {
        self.tokens.iter().find(|t| &t.mint == mint)
    }
}

/// Inputs of one derivation. `user` is None while the user tier is not
/// ready; a disconnected wallet is a ready tier with no owner.
pub struct DeriveInput<'a> {
    pub public: &'a PublicPoolState,
    pub oracle: &'a OracleAggregator,
    pub user: Option<&'a UserBalances>,
    pub generations: SnapshotGenerations,
    pub now: i64,
    pub freshness_window_secs: i64,
    pub fee_curve: &'a dyn FeeCurve,
}

fn price_health(token: &PublicTokenState, now: i64, window_secs: i64) -> PriceHealth {
    match &token.price_feed {
        None => PriceHealth::Missing,
        Some(Err(e)) => PriceHealth::Undecodable(e.clone()),
        Some(Ok(feed)) => match feed.fresh_quote(now, window_secs) {
            Ok(_) => PriceHealth::Fresh,
            Err(PriceUnavailable::NotTrading(_)) => PriceHealth::NotTrading,
            Err(PriceUnavailable::Stale { age_secs }) => PriceHealth::Stale { age_secs },
        },
    }
}

/// Pure function of the tier values; never touches the network.
pub fn derive_snapshot(input: DeriveInput<'_>) -> ProcessedSnapshot {
    let public = input.public;
    let total_pool_value = public.config.current_total_pool_value_scaled;
    let total_target = input.oracle.total_dominance();

    let tokens = public
        .tokens
        .iter()
        .map(|token| {
            let mint = token.token.mint;
            let oracle_entry = input.oracle.entry_for_mint(&mint);
            let (symbol, decimals) = match &token.history {
                Some(history) => (history.symbol(), history.decimals),
                None => (
                    oracle_entry
                        .map(|entry| entry.symbol())
                        .or_else(|| token.decoded_feed().map(|feed| feed.symbol.clone()))
                        .unwrap_or_default(),
                    token.mint.decimals,
                ),
            };
            let price = token.decoded_feed().map(|feed| feed.quote());
            let value = token_value_usd_scaled(token.vault_balance, decimals, price);
            let target = oracle_entry
                .map(|entry| target_dominance_percent(entry.dominance, total_target))
                .unwrap_or(0);
            let actual = actual_dominance_percent(value, total_pool_value);
            let is_delisted = token.history.is_some() && oracle_entry.is_none();
            let user_balance = input.user.and_then(|user| user.token_balance(&mint));

            ProcessedTokenData {
                mint,
                vault: token.token.vault,
                price_feed: token.token.price_feed,
                token_history: token.token.token_history,
                symbol,
                decimals,
                vault_balance: token.vault_balance,
                price,
                price_health: price_health(token, input.now, input.freshness_window_secs),
                value_usd_scaled: value,
                oracle_dominance: oracle_entry.map(|entry| entry.dominance),
                target_dominance_percent: target,
                actual_dominance_percent: actual,
                is_delisted,
                deposit_fee_bps: rebalance_fee_bps(
                    input.fee_curve,
                    actual,
                    target,
                    is_delisted,
                    Direction::Deposit,
                ),
                withdraw_fee_bps: rebalance_fee_bps(
                    input.fee_curve,
                    actual,
                    target,
                    is_delisted,
                    Direction::Withdraw,
                ),
                user_balance,
                user_has_account: input.user.is_some_and(|user| user.has_token_account(&mint)),
            }
        })
        .collect();

    ProcessedSnapshot {
        generations: input.generations,
        pool_config_address: public.address,
        config: Arc::new(public.config.clone()),
        tokens,
        total_pool_value_scaled: total_pool_value,
        share_mint: public.config.share_mint,
        share_supply: public.share_mint.supply,
        share_decimals: public.share_mint.decimals,
        share_value_scaled: pool_share_value_scaled(
            total_pool_value,
            public.share_mint.supply,
            public.share_mint.decimals,
        ),
        owner: input.user.and_then(|user| user.owner),
        user_share_balance: input.user.and_then(|user| user.share_balance),
        user_ready: input.user.is_some(),
        computed_at: input.now,
    }
}
