/// Leading Anchor account discriminator carried by every program-owned account
pub const ACCOUNT_DISCRIMINATOR_LEN: usize = 8;

/// Instruction discriminators (first 8 bytes of sha256("global:<name>"))
pub const DEPOSIT_DISCRIMINATOR: [u8; 8] = [242, 35, 198, 137, 82, 225, 242, 182];
pub const WITHDRAW_DISCRIMINATOR: [u8; 8] = [183, 18, 70, 156, 148, 109, 161, 34];

/// USD values are carried as integers scaled by 10^USD_SCALE_DECIMALS
pub const USD_SCALE_DECIMALS: u32 = 6;

/// On-chain dominance fields are scaled by 1e10 (1e10 == 100%)
pub const DOMINANCE_SCALE: u64 = 10_000_000_000;

/// Display percentages carry four decimals: 100% == 1_000_000
pub const PERCENT_SCALE: u64 = 10_000;
pub const FULL_PERCENT_SCALED: u64 = 100 * PERCENT_SCALE;

pub const BPS_DENOMINATOR: u64 = 10_000;

/// Fixed bonus paid on withdrawals of a delisted token: 5%
pub const DELISTED_WITHDRAW_BONUS_BPS: i64 = -500;
/// requiredShares = usdValue * 100 / 105 / shareValue
pub const DELISTED_BONUS_NUMERATOR: u64 = 100;
pub const DELISTED_BONUS_DENOMINATOR: u64 = 105;

/// Per-call account ceiling of the RPC provider's getMultipleAccounts
pub const MAX_ACCOUNTS_PER_REQUEST: usize = 99;
pub const DEFAULT_MAX_REQUESTS_PER_SECOND: u32 = 10;

/// Minimum spacing between notification-driven re-fetches of one account
pub const DEFAULT_THROTTLE_MS: u64 = 500;

/// Maximum age of a price-feed update before it is treated as stale
pub const DEFAULT_FRESHNESS_WINDOW_SECS: i64 = 60;

pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 400_000;
pub const DEFAULT_SLIPPAGE_BPS: u16 = 50;

/// Byte offset of the u64 amount inside an SPL token account
pub const TOKEN_ACCOUNT_AMOUNT_OFFSET: usize = 64;
/// Byte offsets of supply (u64) and decimals (u8) inside an SPL mint
pub const MINT_SUPPLY_OFFSET: usize = 36;
pub const MINT_DECIMALS_OFFSET: usize = 44;

pub const SYMBOL_LEN: usize = 10;
pub const FEED_ID_LEN: usize = 32;
pub const ORACLE_TEXT_LEN: usize = 64;
