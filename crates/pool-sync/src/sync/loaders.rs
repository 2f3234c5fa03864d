use std::collections::HashMap;

use anchor_lang::prelude::Pubkey;
use anchor_spl::associated_token::get_associated_token_address;
use tracing::{debug, warn};

use crate::errors::{DecodeError, SyncError};
use crate::fetcher::AccountFetcher;
use crate::state::{
    decode_token_amount, HistoricalTokenData, MintInfo, OracleAggregator, PoolConfig, PriceFeed,
    SupportedToken,
};

/// Ledger state of one supported token as last fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicTokenState {
    pub token: SupportedToken,
    pub mint: MintInfo,
    pub vault_balance: u64,
    /// None when the token has no feed or the feed account is absent.
    /// A feed account that exists but does not decode is kept as the error.
    pub price_feed: Option<Result<PriceFeed, DecodeError>>,
    /// None until the first deposit of this mint
    pub history: Option<HistoricalTokenData>,
}

impl PublicTokenState {
    pub fn decoded_feed(&self) -> Option<&PriceFeed> {
        self.price_feed.as_ref().and_then(|feed| feed.as_ref().ok())
    }
}

/// Public tier: pool config, share mint, and every supported token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicPoolState {
    pub address: Pubkey,
    pub config: PoolConfig,
    pub share_mint: MintInfo,
    pub tokens: Vec<PublicTokenState>,
}

impl PublicPoolState {
    pub fn token(&self, mint: &Pubkey) -> Option<&PublicTokenState> {
        self.tokens.iter().find(|t| &t.token.mint == mint)
    }

    /// Addresses whose changes invalidate this tier.
    pub fn watched_accounts(&self) -> Vec<Pubkey> {
        let mut accounts = vec![self.address, self.config.share_mint];
        for token in &self.config.supported_tokens {
            accounts.push(token.vault);
            accounts.push(token.token_history);
            if token.has_price_feed() {
                accounts.push(token.price_feed);
            }
        }
        accounts
    }

    pub fn mints(&self) -> Vec<Pubkey> {
        self.config.supported_tokens.iter().map(|t| t.mint).collect()
    }
}

/// User tier: the connected wallet's share and token balances.
/// `None` for an account that does not exist yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserBalances {
    pub owner: Option<Pubkey>,
    pub share_balance: Option<u64>,
    pub token_balances: HashMap<Pubkey, Option<u64>>,
}

impl UserBalances {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn token_balance(&self, mint: &Pubkey) -> Option<u64> {
        self.token_balances.get(mint).copied().flatten()
    }

    pub fn has_token_account(&self, mint: &Pubkey) -> bool {
        matches!(self.token_balances.get(mint), Some(Some(_)))
    }
}

/// Associated token accounts of `owner` watched by the user tier.
pub fn user_accounts(owner: &Pubkey, share_mint: &Pubkey, mints: &[Pubkey]) -> Vec<Pubkey> {
    std::iter::once(share_mint)
        .chain(mints)
        .map(|mint| get_associated_token_address(owner, mint))
        .collect()
}

fn required<T>(
    data: Option<Vec<u8>>,
    address: Pubkey,
    what: &'static str,
    decode: fn(&[u8]) -> Result<T, DecodeError>,
) -> Result<T, SyncError> {
    let data = data.ok_or(SyncError::MissingAccount { address, what })?;
    decode(&data).map_err(|source| SyncError::Decode { address, source })
}

/// A configured price feed: None when the account is absent, the decode
/// result otherwise.
fn price_feed_account(
    data: Option<Vec<u8>>,
    address: Pubkey,
) -> Option<Result<PriceFeed, DecodeError>> {
    let data = data?;
    let feed = PriceFeed::decode(&data);
    if let Err(e) = &feed {
        warn!(%address, error = %e, "price feed account does not decode");
    }
    Some(feed)
}

/// Present accounts must decode; absent ones are reported as None.
fn present<T>(
    data: Option<Vec<u8>>,
    address: Pubkey,
    decode: fn(&[u8]) -> Result<T, DecodeError>,
) -> Result<Option<T>, SyncError> {
    data.map(|data| decode(&data).map_err(|source| SyncError::Decode { address, source }))
        .transpose()
}

pub async fn load_pool_config(
    fetcher: &AccountFetcher,
    address: Pubkey,
) -> Result<PoolConfig, SyncError> {
    let data = fetcher.fetch_multiple(&[address]).await?.pop().flatten();
    required(data, address, "pool config", PoolConfig::decode)
}

/// Pool config first, then the share mint and every token's mint, vault,
/// history and price feed in one batched fetch.
pub async fn load_public(
    fetcher: &AccountFetcher,
    address: Pubkey,
) -> Result<PublicPoolState, SyncError> {
    let config = load_pool_config(fetcher, address).await?;

    let mut addresses = Vec::with_capacity(1 + 4 * config.supported_tokens.len());
    addresses.push(config.share_mint);
    for token in &config.supported_tokens {
        addresses.extend([token.mint, token.vault, token.token_history]);
        if token.has_price_feed() {
            addresses.push(token.price_feed);
        }
    }
    let mut accounts = fetcher.fetch_multiple(&addresses).await?.into_iter();
    let mut next = move || accounts.next().flatten();

    let share_mint = required(next(), config.share_mint, "share mint", MintInfo::decode)?;
    let mut tokens = Vec::with_capacity(config.supported_tokens.len());
    for token in &config.supported_tokens {
        let mint = required(next(), token.mint, "token mint", MintInfo::decode)?;
        let vault_balance = required(next(), token.vault, "vault", decode_token_amount)?;
        let history = present(next(), token.token_history, HistoricalTokenData::decode)?;
        let price_feed = if token.has_price_feed() {
            price_feed_account(next(), token.price_feed)
        } else {
            None
        };
        tokens.push(PublicTokenState {
            token: token.clone(),
            mint,
            vault_balance,
            price_feed,
            history,
        });
    }
    debug!(pool = %address, tokens = tokens.len(), "public tier fetched");

    Ok(PublicPoolState {
        address,
        config,
        share_mint,
        tokens,
    })
}

pub async fn load_oracle(
    fetcher: &AccountFetcher,
    address: Pubkey,
) -> Result<OracleAggregator, SyncError> {
    let data = fetcher.fetch_multiple(&[address]).await?.pop().flatten();
    let aggregator = required(data, address, "oracle aggregator", OracleAggregator::decode)?;
    debug!(oracle = %address, entries = aggregator.data.len(), "oracle tier fetched");
    Ok(aggregator)
}

pub async fn load_user(
    fetcher: &AccountFetcher,
    owner: Pubkey,
    share_mint: Pubkey,
    mints: &[Pubkey],
) -> Result<UserBalances, SyncError> {
    let addresses = user_accounts(&owner, &share_mint, mints);
    let mut accounts = fetcher.fetch_multiple(&addresses).await?.into_iter();

    let share_balance = present(accounts.next().flatten(), addresses[0], decode_token_amount)?;
    let mut token_balances = HashMap::with_capacity(mints.len());
    for (mint, address) in mints.iter().zip(&addresses[1..]) {
        let balance = present(accounts.next().flatten(), *address, decode_token_amount)?;
        token_balances.insert(*mint, balance);
    }
    debug!(%owner, accounts = addresses.len(), "user tier fetched");

    Ok(UserBalances {
        owner: Some(owner),
        share_balance,
        token_balances,
    })
}

/// Accounts touched by a deposit or withdrawal of one mint.
#[derive(Debug, Clone)]
pub struct MintRefresh {
    pub config: PoolConfig,
    pub share_mint: MintInfo,
    pub vault_balance: u64,
    pub price_feed: Option<Result<PriceFeed, DecodeError>>,
    /// Some only when a wallet is connected
    pub user: Option<(Option<u64>, Option<u64>)>,
}

/// Re-reads only what one mint's transaction can have changed.
pub async fn load_mint_refresh(
    fetcher: &AccountFetcher,
    public: &PublicPoolState,
    token: &SupportedToken,
    owner: Option<Pubkey>,
) -> Result<MintRefresh, SyncError> {
    let config_address = public.address;
    let share_mint_address = public.config.share_mint;
    let mut addresses = vec![config_address, share_mint_address, token.vault];
    if token.has_price_feed() {
        addresses.push(token.price_feed);
    }
    let user_accounts = owner.map(|owner| {
        [
            get_associated_token_address(&owner, &share_mint_address),
            get_associated_token_address(&owner, &token.mint),
        ]
    });
    if let Some(user_accounts) = user_accounts {
        addresses.extend(user_accounts);
    }

    let mut accounts = fetcher.fetch_multiple(&addresses).await?.into_iter();
    let mut next = move || accounts.next().flatten();

    let config = required(next(), config_address, "pool config", PoolConfig::decode)?;
    let share_mint = required(next(), share_mint_address, "share mint", MintInfo::decode)?;
    let vault_balance = required(next(), token.vault, "vault", decode_token_amount)?;
    let price_feed = if token.has_price_feed() {
        price_feed_account(next(), token.price_feed)
    } else {
        None
    };
    let user = match user_accounts {
        Some([share_account, token_account]) => Some((
            present(next(), share_account, decode_token_amount)?,
            present(next(), token_account, decode_token_amount)?,
        )),
        None => None,
    };

    Ok(MintRefresh {
        config,
        share_mint,
        vault_balance,
        price_feed,
        user,
    })
}
