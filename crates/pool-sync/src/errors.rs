use anchor_lang::error::ERROR_CODE_OFFSET;
use anchor_lang::prelude::*;
use thiserror::Error;

/// Error catalog declared by the on-chain pool program. Variant order is the
/// wire contract: custom code = ERROR_CODE_OFFSET + discriminant.
#[error_code]
pub enum PoolProgramError {
    #[msg("Amount must be greater than zero")]
    InvalidAmount,

    #[msg("Slippage tolerance exceeded")]
    SlippageExceeded,

    #[msg("Token is not supported by this pool")]
    TokenNotSupported,

    #[msg("Token has been delisted: deposits are disabled")]
    TokenDelisted,

    #[msg("Price feed is stale")]
    PriceFeedStale,

    #[msg("Price feed is not trading")]
    PriceFeedNotTrading,

    #[msg("Price feed account does not match the supported token")]
    PriceFeedMismatch,

    #[msg("Oracle aggregator account does not match the pool config")]
    OracleMismatch,

    #[msg("Vault account does not match the supported token")]
    InvalidVault,

    #[msg("Insufficient share tokens for withdrawal")]
    InsufficientShares,

    #[msg("Insufficient liquidity in vault")]
    InsufficientLiquidity,

    #[msg("Pool total value is zero")]
    ZeroPoolValue,

    #[msg("Math overflow")]
    MathOverflow,

    #[msg("Unauthorized: signer does not match expected authority")]
    Unauthorized,

    #[msg("Remaining accounts do not cover every supported token")]
    MissingRemainingAccounts,
}

impl PoolProgramError {
    pub const ALL: [PoolProgramError; 15] = [
        PoolProgramError::InvalidAmount,
        PoolProgramError::SlippageExceeded,
        PoolProgramError::TokenNotSupported,
        PoolProgramError::TokenDelisted,
        PoolProgramError::PriceFeedStale,
        PoolProgramError::PriceFeedNotTrading,
        PoolProgramError::PriceFeedMismatch,
        PoolProgramError::OracleMismatch,
        PoolProgramError::InvalidVault,
        PoolProgramError::InsufficientShares,
        PoolProgramError::InsufficientLiquidity,
        PoolProgramError::ZeroPoolValue,
        PoolProgramError::MathOverflow,
        PoolProgramError::Unauthorized,
        PoolProgramError::MissingRemainingAccounts,
    ];

    /// Resolves a custom instruction error code against the catalog.
    pub fn from_code(code: u32) -> Option<Self> {
        if code < ERROR_CODE_OFFSET {
            return None;
        }
        Self::ALL.iter().copied().find(|e| u32::from(*e) == code)
    }
}

/// Decode failures are local to one account buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{record}: buffer too short reading {field} at offset {offset} (need {needed} bytes, have {available})")]
    BufferTooShort {
        record: &'static str,
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("{record}: {field} declares {declared} entries which overrun the buffer")]
    VectorOverrun {
        record: &'static str,
        field: &'static str,
        declared: u32,
    },

    #[error("{record}: malformed account data: {message}")]
    Malformed {
        record: &'static str,
        message: String,
    },
}

/// Provider-level failures of the ledger RPC.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("rpc transport error: {0}")]
    Transport(String),

    #[error("rpc rate limit exhausted: {0}")]
    RateLimited(String),

    #[error("subscription to {address} failed: {message}")]
    Subscription { address: Pubkey, message: String },

    #[error("transaction submission rejected: {0}")]
    Submission(String),

    #[error("rpc service is closed")]
    Closed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("batch fetch failed in {failed_chunks} of {total_chunks} chunks: {}", join_messages(.errors))]
    Batch {
        failed_chunks: usize,
        total_chunks: usize,
        errors: Vec<RpcError>,
    },
}

fn join_messages(errors: &[RpcError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of one tier fetch. The tier stays retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("account {address} failed to decode: {source}")]
    Decode { address: Pubkey, source: DecodeError },

    #[error("required account {address} ({what}) does not exist")]
    MissingAccount { address: Pubkey, what: &'static str },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("synchronizer has stopped")]
    Stopped,
}

/// Checked before any network call and reported synchronously.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("{0} data is not loaded yet")]
    TierNotReady(&'static str),

    #[error("no wallet connected")]
    NoIdentity,

    #[error("connected wallet cannot sign transactions")]
    NoSigner,

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("mint {0} is not supported by this pool")]
    UnsupportedMint(Pubkey),

    #[error("{symbol} is delisted: deposits are disabled")]
    DepositIntoDelisted { symbol: String },

    #[error("{symbol} is not delisted: a full delisted withdrawal is not available")]
    NotDelisted { symbol: String },

    #[error("{symbol} has no price feed")]
    MissingPriceFeed { symbol: String },

    #[error("{symbol} price is stale by {age_secs}s (window {window_secs}s)")]
    StalePrice {
        symbol: String,
        age_secs: i64,
        window_secs: i64,
    },

    #[error("{symbol} price feed is not trading")]
    PriceNotTrading { symbol: String },

    #[error("{symbol} price feed cannot be read: {reason}")]
    UndecodablePriceFeed { symbol: String, reason: DecodeError },

    #[error("{symbol} has no withdrawal fee for its current dominance")]
    FeeUnavailable { symbol: String },

    #[error("pool share value is unavailable (share supply is zero)")]
    ShareValueUnavailable,

    #[error("insufficient pool shares: need {required}, have {available}")]
    InsufficientShares { required: u64, available: u64 },

    #[error("amount overflows the supported range")]
    MathOverflow,

    #[error("transaction build failed: {0}")]
    Build(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("signing rejected: {0}")]
    Rejected(String),
}

/// Terminal failure of one transaction attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionFailure {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error("{message}{}", signature_suffix(.signature))]
    Failed {
        message: String,
        signature: Option<String>,
        raw: String,
    },
}

fn signature_suffix(signature: &Option<String>) -> String {
    match signature {
        Some(sig) => format!(" (transaction {sig})"),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid address in {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
