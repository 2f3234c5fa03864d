use anchor_lang::prelude::{borsh, AnchorDeserialize, AnchorSerialize, Pubkey};

use crate::constants::*;
use crate::errors::DecodeError;

/// Account body after the 8-byte Anchor discriminator.
fn account_body<'a>(data: &'a [u8], record: &'static str) -> Result<&'a [u8], DecodeError> {
    data.get(ACCOUNT_DISCRIMINATOR_LEN..)
        .ok_or(DecodeError::BufferTooShort {
            record,
            field: "discriminator",
            offset: 0,
            needed: ACCOUNT_DISCRIMINATOR_LEN,
            available: data.len(),
        })
}

/// Borsh-decodes one record from the front of `body`, advancing it.
fn deserialize<T: AnchorDeserialize>(
    body: &mut &[u8],
    record: &'static str,
) -> Result<T, DecodeError> {
    T::deserialize(body).map_err(|err| DecodeError::Malformed {
        record,
        message: err.to_string(),
    })
}

/// Rejects a vector whose declared length runs past the end of the buffer.
///
/// `len_offset` is the position of the borsh u32 length prefix. A buffer too
/// short to hold the prefix is left for the deserializer to report.
fn check_vec_len(
    data: &[u8],
    record: &'static str,
    field: &'static str,
    len_offset: usize,
    item_size: usize,
) -> Result<(), DecodeError> {
    let Some(declared) = data
        .get(len_offset..len_offset + 4)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .map(u32::from_le_bytes)
    else {
        return Ok(());
    };
    let needed = (declared as usize)
        .checked_mul(item_size)
        .and_then(|n| n.checked_add(len_offset + 4));
    match needed {
        Some(needed) if needed <= data.len() => Ok(()),
        _ => Err(DecodeError::VectorOverrun {
            record,
            field,
            declared,
        }),
    }
}

fn u64_at(
    data: &[u8],
    record: &'static str,
    field: &'static str,
    offset: usize,
) -> Result<u64, DecodeError> {
    data.get(offset..offset + 8)
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map(u64::from_le_bytes)
        .ok_or(DecodeError::BufferTooShort {
            record,
            field,
            offset,
            needed: 8,
            available: data.len().saturating_sub(offset),
        })
}

/// Text of a fixed-size, NUL-padded field, trimmed at the first NUL.
pub fn fixed_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// One token accepted by the pool.
#[derive(AnchorSerialize, AnchorDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct SupportedToken {
    pub mint: Pubkey,
    /// Pool-owned token account holding the deposits
    pub vault: Pubkey,
    /// HistoricalTokenData account for this mint
    pub token_history: Pubkey,
    /// Price feed account; Pubkey::default() when the token has none
    pub price_feed: Pubkey,
}

impl SupportedToken {
    pub const SIZE: usize = 32 * 4;

    pub fn has_price_feed(&self) -> bool {
        self.price_feed != Pubkey::default()
    }
}

/// Singleton pool configuration account.
#[derive(AnchorSerialize, AnchorDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub admin: Pubkey,
    pub fee_recipient: Pubkey,
    /// Mint of the pool share token
    pub share_mint: Pubkey,
    pub oracle_program: Pubkey,
    pub oracle_aggregator: Pubkey,
    pub lookup_table: Pubkey,
    /// Total pool value, USD-scaled
    pub current_total_pool_value_scaled: u128,
    pub supported_tokens: Vec<SupportedToken>,
}

impl PoolConfig {
    /// Size without any supported tokens.
    pub const BASE_SIZE: usize = ACCOUNT_DISCRIMINATOR_LEN
        + 32   // admin
        + 32   // fee_recipient
        + 32   // share_mint
        + 32   // oracle_program
        + 32   // oracle_aggregator
        + 32   // lookup_table
        + 16   // current_total_pool_value_scaled
        + 4; // supported_tokens length

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        check_vec_len(
            data,
            "PoolConfig",
            "supported_tokens",
            Self::BASE_SIZE - 4,
            SupportedToken::SIZE,
        )?;
        let mut body = account_body(data, "PoolConfig")?;
        deserialize(&mut body, "PoolConfig")
    }

    pub fn supported_token(&self, mint: &Pubkey) -> Option<&SupportedToken> {
        self.supported_tokens.iter().find(|t| &t.mint == mint)
    }

    pub fn has_lookup_table(&self) -> bool {
        self.lookup_table != Pubkey::default()
    }
}

/// Per-mint record written on first deposit; immutable afterwards.
#[derive(AnchorSerialize, AnchorDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct HistoricalTokenData {
    pub price_feed_id: [u8; FEED_ID_LEN],
    pub decimals: u8,
    pub symbol: [u8; SYMBOL_LEN],
}

impl HistoricalTokenData {
    pub const SIZE: usize = ACCOUNT_DISCRIMINATOR_LEN + FEED_ID_LEN + 1 + SYMBOL_LEN;

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut body = account_body(data, "HistoricalTokenData")?;
        deserialize(&mut body, "HistoricalTokenData")
    }

    pub fn symbol(&self) -> String {
        fixed_text(&self.symbol)
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct OracleTokenInfo {
    pub symbol: [u8; SYMBOL_LEN],
    /// Target dominance scaled by 1e10
    pub dominance: u64,
    /// Mint address as base58 text, NUL-padded
    pub address: [u8; ORACLE_TEXT_LEN],
    pub price_feed_id: [u8; ORACLE_TEXT_LEN],
    pub timestamp: u64,
}

impl OracleTokenInfo {
    pub const SIZE: usize = SYMBOL_LEN + 8 + ORACLE_TEXT_LEN + ORACLE_TEXT_LEN + 8;

    pub fn symbol(&self) -> String {
        fixed_text(&self.symbol)
    }

    pub fn address(&self) -> String {
        fixed_text(&self.address)
    }

    pub fn price_feed_id(&self) -> String {
        fixed_text(&self.price_feed_id)
    }

    pub fn is_for_mint(&self, mint: &Pubkey) -> bool {
        self.address() == mint.to_string()
    }
}

/// Snapshot of the oracle aggregator account (target dominances).
#[derive(AnchorSerialize, AnchorDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct OracleAggregator {
    pub authority: Pubkey,
    pub token_count: u32,
    pub data: Vec<OracleTokenInfo>,
}

impl OracleAggregator {
    /// Offset of the `data` length prefix.
    const DATA_LEN_OFFSET: usize = ACCOUNT_DISCRIMINATOR_LEN + 32 + 4;

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        Self::decode_with_len(data).map(|(aggregator, _)| aggregator)
    }

    /// Decodes and reports the offset just past the last entry.
    pub fn decode_with_len(data: &[u8]) -> Result<(Self, usize), DecodeError> {
        check_vec_len(
            data,
            "OracleAggregator",
            "data",
            Self::DATA_LEN_OFFSET,
            OracleTokenInfo::SIZE,
        )?;
        let mut body = account_body(data, "OracleAggregator")?;
        let aggregator = deserialize(&mut body, "OracleAggregator")?;
        Ok((aggregator, data.len() - body.len()))
    }

    pub fn entry_for_mint(&self, mint: &Pubkey) -> Option<&OracleTokenInfo> {
        self.data.iter().find(|entry| entry.is_for_mint(mint))
    }

    /// Sum of every listed target dominance.
    pub fn total_dominance(&self) -> u128 {
        self.data.iter().map(|entry| entry.dominance as u128).sum()
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceStatus {
    Unknown,
    Trading,
    Halted,
    Auction,
    Ignored,
}

/// Price and decimal exponent: value = price * 10^expo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    pub price: i64,
    pub expo: i32,
}

/// Why a decoded price may not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceUnavailable {
    NotTrading(PriceStatus),
    Stale { age_secs: i64 },
}

/// Per-mint price feed account.
#[derive(AnchorSerialize, AnchorDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct PriceFeed {
    pub price: i64,
    pub expo: i32,
    pub symbol: String,
    pub status: PriceStatus,
    pub last_updated_timestamp: i64,
    pub bump: u8,
}

impl PriceFeed {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut body = account_body(data, "PriceFeed")?;
        deserialize(&mut body, "PriceFeed")
    }

    pub fn quote(&self) -> PriceQuote {
        PriceQuote {
            price: self.price,
            expo: self.expo,
        }
    }

    pub fn age_secs(&self, now: i64) -> i64 {
        now.saturating_sub(self.last_updated_timestamp)
    }

    /// Usable only while trading and within the freshness window.
    pub fn fresh_quote(
        &self,
        now: i64,
        window_secs: i64,
    ) -> Result<PriceQuote, PriceUnavailable> {
        if self.status != PriceStatus::Trading {
            return Err(PriceUnavailable::NotTrading(self.status));
        }
        let age_secs = self.age_secs(now);
        if age_secs > window_secs {
            return Err(PriceUnavailable::Stale { age_secs });
        }
        Ok(self.quote())
    }
}

/// Raw u64 amount of an SPL token account.
pub fn decode_token_amount(data: &[u8]) -> Result<u64, DecodeError> {
    u64_at(data, "TokenAccount", "amount", TOKEN_ACCOUNT_AMOUNT_OFFSET)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintInfo {
    pub supply: u64,
    pub decimals: u8,
}

impl MintInfo {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let supply = u64_at(data, "Mint", "supply", MINT_SUPPLY_OFFSET)?;
        let decimals = data
            .get(MINT_DECIMALS_OFFSET)
            .copied()
            .ok_or(DecodeError::BufferTooShort {
                record: "Mint",
                field: "decimals",
                offset: MINT_DECIMALS_OFFSET,
                needed: 1,
                available: data.len().saturating_sub(MINT_DECIMALS_OFFSET),
            })?;
        Ok(Self { supply, decimals })
    }
}
