#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod constants;
pub mod errors;
pub mod fetcher;
pub mod math;
pub mod rpc;
pub mod state;
pub mod subscriptions;
pub mod sync;
pub mod telemetry;
pub mod throttle;
pub mod transaction;

pub use config::Settings;
pub use errors::*;
pub use fetcher::{AccountFetcher, RateLimiter, RetryPolicy};
pub use rpc::{LedgerRpc, SolanaRpc};
pub use sync::{PoolSynchronizer, ProcessedSnapshot, ProcessedTokenData, SyncHandle, SyncView};
pub use transaction::{
    KeypairSigner, PoolAction, PriorityFeeTier, TransactionManager, TransactionSigner, TxPhase,
};
