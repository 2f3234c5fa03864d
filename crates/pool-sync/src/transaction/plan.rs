use anchor_lang::prelude::Pubkey;

use crate::errors::PreconditionError;
use crate::math::{
    delisted_withdraw_required_shares, estimate_shares_out, estimate_underlying_out,
    minimum_output_with_slippage, token_value_usd_scaled,
};
use crate::state::PriceQuote;
use crate::sync::{PriceHealth, ProcessedSnapshot, ProcessedTokenData, SyncView, Tier, TierStatus};

/// A mutating request against the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAction {
    /// Deposit `amount` raw units of `mint`.
    Deposit { mint: Pubkey, amount: u64 },
    /// Burn `share_amount` pool shares for `mint`.
    Withdraw { mint: Pubkey, share_amount: u64 },
    /// Empty the vault of a delisted `mint` at the fixed bonus.
    WithdrawAllDelisted { mint: Pubkey },
}

impl PoolAction {
    pub fn mint(&self) -> Pubkey {
        match self {
            PoolAction::Deposit { mint, .. }
            | PoolAction::Withdraw { mint, .. }
            | PoolAction::WithdrawAllDelisted { mint } => *mint,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    Deposit,
    Withdraw,
}

/// Sized instruction arguments plus what the caller needs to show them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPlan {
    pub action: PoolAction,
    pub kind: InstructionKind,
    pub mint: Pubkey,
    /// Token amount for a deposit, share amount for a withdrawal
    pub amount: u64,
    pub estimated_out: u64,
    pub minimum_out: u64,
    pub fee_bps: i64,
    /// Destination token account must be created first
    pub create_destination: bool,
}

fn require_ready(view: &SyncView, tier: Tier) -> Result<(), PreconditionError> {
    match view.readiness.status(tier) {
        TierStatus::Ready => Ok(()),
        _ => Err(PreconditionError::TierNotReady(tier.name())),
    }
}

fn fresh_price(
    token: &ProcessedTokenData,
    window_secs: i64,
) -> Result<PriceQuote, PreconditionError> {
    let symbol = token.symbol.clone();
    match (&token.price_health, token.price) {
        (PriceHealth::Fresh, Some(price)) => Ok(price),
        (PriceHealth::Stale { age_secs }, _) => Err(PreconditionError::StalePrice {
            symbol,
            age_secs: *age_secs,
            window_secs,
        }),
        (PriceHealth::NotTrading, _) => Err(PreconditionError::PriceNotTrading { symbol }),
        (PriceHealth::Undecodable(reason), _) => Err(PreconditionError::UndecodablePriceFeed {
            symbol,
            reason: reason.clone(),
        }),
        _ => Err(PreconditionError::MissingPriceFeed { symbol }),
    }
}

fn share_value(snapshot: &ProcessedSnapshot) -> Result<u128, PreconditionError> {
    snapshot
        .share_value_scaled
        .filter(|value| *value > 0)
        .ok_or(PreconditionError::ShareValueUnavailable)
}

/// Fails when the user tier knows the wallet holds fewer than `required` shares.
fn check_shares(snapshot: &ProcessedSnapshot, required: u64) -> Result<(), PreconditionError> {
    if !snapshot.user_ready || snapshot.owner.is_none() {
        return Ok(());
    }
    let available = snapshot.user_share_balance.unwrap_or(0);
    if available < required {
        return Err(PreconditionError::InsufficientShares {
            required,
            available,
        });
    }
    Ok(())
}

/// Validates `action` against the current view and sizes its arguments.
/// Never touches the network.
pub fn plan_action(
    view: &SyncView,
    action: PoolAction,
    slippage_bps: u16,
    freshness_window_secs: i64,
) -> Result<TransactionPlan, PreconditionError> {
    require_ready(view, Tier::Public)?;
    require_ready(view, Tier::Oracle)?;
    let snapshot = view
        .snapshot
        .as_deref()
        .ok_or(PreconditionError::TierNotReady(Tier::Public.name()))?;
    let mint = action.mint();
    let token = snapshot
        .token(&mint)
        .ok_or(PreconditionError::UnsupportedMint(mint))?;

    match action {
        PoolAction::Deposit { amount, .. } => {
            if amount == 0 {
                return Err(PreconditionError::ZeroAmount);
            }
            let fee_bps = token
                .deposit_fee_bps
                .ok_or_else(|| PreconditionError::DepositIntoDelisted {
                    symbol: token.symbol.clone(),
                })?;
            let price = fresh_price(token, freshness_window_secs)?;
            let share_value = share_value(snapshot)?;
            let value = token_value_usd_scaled(amount, token.decimals, Some(price));
            let estimated_out =
                estimate_shares_out(value, fee_bps, share_value, snapshot.share_decimals)
                    .ok_or(PreconditionError::MathOverflow)?;
            Ok(TransactionPlan {
                action,
                kind: InstructionKind::Deposit,
                mint,
                amount,
                estimated_out,
                minimum_out: minimum_output_with_slippage(estimated_out, slippage_bps),
                fee_bps,
                create_destination: !(snapshot.user_ready
                    && snapshot.user_share_balance.is_some()),
            })
        }
        PoolAction::Withdraw { share_amount, .. } => {
            if share_amount == 0 {
                return Err(PreconditionError::ZeroAmount);
            }
            let fee_bps = token
                .withdraw_fee_bps
                .ok_or_else(|| PreconditionError::FeeUnavailable {
                    symbol: token.symbol.clone(),
                })?;
            let price = fresh_price(token, freshness_window_secs)?;
            let share_value = share_value(snapshot)?;
            check_shares(snapshot, share_amount)?;
            let estimated_out = estimate_underlying_out(
                share_amount,
                share_value,
                snapshot.share_decimals,
                fee_bps,
                token.decimals,
                price,
            )
            .ok_or(PreconditionError::MathOverflow)?
            .min(token.vault_balance);
            Ok(TransactionPlan {
                action,
                kind: InstructionKind::Withdraw,
                mint,
                amount: share_amount,
                estimated_out,
                minimum_out: minimum_output_with_slippage(estimated_out, slippage_bps),
                fee_bps,
                create_destination: !token.user_has_account,
            })
        }
        PoolAction::WithdrawAllDelisted { .. } => {
            if !token.is_delisted {
                return Err(PreconditionError::NotDelisted {
                    symbol: token.symbol.clone(),
                });
            }
            let price = fresh_price(token, freshness_window_secs)?;
            let share_value = share_value(snapshot)?;
            let vault_value = token_value_usd_scaled(token.vault_balance, token.decimals, Some(price));
            let required = delisted_withdraw_required_shares(
                vault_value,
                share_value,
                snapshot.share_decimals,
            )
            .ok_or(PreconditionError::ShareValueUnavailable)?;
            check_shares(snapshot, required)?;
            Ok(TransactionPlan {
                action,
                kind: InstructionKind::Withdraw,
                mint,
                amount: required,
                estimated_out: token.vault_balance,
                minimum_out: minimum_output_with_slippage(token.vault_balance, slippage_bps),
                fee_bps: token.withdraw_fee_bps.unwrap_or_default(),
                create_destination: !token.user_has_account,
            })
        }
    }
}
