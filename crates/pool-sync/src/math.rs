use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::state::PriceQuote;

/// Largest power of ten that fits in a U256.
const MAX_POW10: i64 = 77;

fn pow10(exp: i64) -> U256 {
    U256::exp10(exp.clamp(0, MAX_POW10) as usize)
}

fn saturate_u128(value: U256) -> u128 {
    if value > U256::from(u128::MAX) {
        u128::MAX
    } else {
        value.as_u128()
    }
}

fn saturate_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}

/// Multiply by 10^scale when scale >= 0, divide by 10^-scale otherwise.
fn rescale(value: U256, scale: i64) -> U256 {
    if scale >= 0 {
        if scale > MAX_POW10 {
            return if value.is_zero() { U256::zero() } else { U256::MAX };
        }
        value.saturating_mul(pow10(scale))
    } else if -scale > MAX_POW10 {
        U256::zero()
    } else {
        value / pow10(-scale)
    }
}

/// USD value (scaled by 10^USD_SCALE_DECIMALS) of `amount` raw token units:
/// amount * price * 10^USD_SCALE / 10^(decimals - expo).
/// Zero when no price is available or the price is not positive.
pub fn token_value_usd_scaled(amount: u64, decimals: u8, price: Option<PriceQuote>) -> u128 {
    let Some(price) = price else {
        return 0;
    };
    if price.price <= 0 {
        return 0;
    }
    let product = U256::from(amount) * U256::from(price.price as u64);
    let scale = USD_SCALE_DECIMALS as i64 + price.expo as i64 - decimals as i64;
    saturate_u128(rescale(product, scale))
}

/// Raw token units worth `usd_scaled`; inverse of [`token_value_usd_scaled`]
/// (rounded down). None for a non-positive price.
pub fn token_amount_for_usd(usd_scaled: u128, decimals: u8, price: PriceQuote) -> Option<u64> {
    if price.price <= 0 {
        return None;
    }
    let scale = decimals as i64 - price.expo as i64 - USD_SCALE_DECIMALS as i64;
    let price = U256::from(price.price as u64);
    let amount = if scale >= 0 {
        rescale(U256::from(usd_scaled), scale) / price
    } else {
        U256::from(usd_scaled) / price.saturating_mul(pow10(-scale))
    };
    Some(saturate_u64(amount))
}

/// Target share of the pool in display percent (1% == PERCENT_SCALE).
pub fn target_dominance_percent(dominance: u64, total_target_dominance: u128) -> u64 {
    if total_target_dominance == 0 {
        return 0;
    }
    let scaled = U256::from(dominance) * U256::from(FULL_PERCENT_SCALED);
    saturate_u64(scaled / U256::from(total_target_dominance))
}

/// tokenValue * 100 / totalPoolValue in display percent; 0 for an empty pool.
pub fn actual_dominance_percent(token_value_scaled: u128, total_pool_value_scaled: u128) -> u64 {
    if total_pool_value_scaled == 0 {
        return 0;
    }
    let scaled = U256::from(token_value_scaled) * U256::from(FULL_PERCENT_SCALED);
    saturate_u64(scaled / U256::from(total_pool_value_scaled))
}

/// USD value (scaled) of one whole share token. None while no shares exist.
pub fn pool_share_value_scaled(
    total_pool_value_scaled: u128,
    share_supply: u64,
    share_decimals: u8,
) -> Option<u128> {
    if share_supply == 0 {
        return None;
    }
    let value = rescale(U256::from(total_pool_value_scaled), share_decimals as i64)
        / U256::from(share_supply);
    Some(saturate_u128(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Deposit,
    Withdraw,
}

/// Continuous rebalancing curve. Negative bps is a bonus, positive a fee.
///
/// Implementations must return a bonus when the move brings the actual
/// dominance toward its target, a fee when it moves away, with magnitude
/// non-decreasing in |actual - target|.
pub trait FeeCurve: Send + Sync {
    fn fee_bps(&self, actual_percent: u64, target_percent: u64, direction: Direction) -> i64;
}

/// Piecewise-linear curve driven entirely by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearFeeCurve {
    /// Fee charged for any move away from target
    pub base_fee_bps: u32,
    /// Additional bps per whole percent of distance from target
    pub slope_bps_per_percent: u32,
    pub max_fee_bps: u32,
    pub max_bonus_bps: u32,
}

impl Default for LinearFeeCurve {
    fn default() -> Self {
        Self {
            base_fee_bps: 10,
            slope_bps_per_percent: 5,
            max_fee_bps: 300,
            max_bonus_bps: 100,
        }
    }
}

impl FeeCurve for LinearFeeCurve {
    fn fee_bps(&self, actual_percent: u64, target_percent: u64, direction: Direction) -> i64 {
        let distance = actual_percent.abs_diff(target_percent) as u128;
        let magnitude = distance * self.slope_bps_per_percent as u128 / PERCENT_SCALE as u128;
        let toward = match direction {
            Direction::Deposit => actual_percent < target_percent,
            Direction::Withdraw => actual_percent > target_percent,
        };
        if toward {
            -(magnitude.min(self.max_bonus_bps as u128) as i64)
        } else {
            (self.base_fee_bps as u128 + magnitude).min(self.max_fee_bps as u128) as i64
        }
    }
}

/// Fee/bonus for one direction. None means the move is disallowed outright
/// (deposits into a delisted token). Delisted withdrawals get the fixed bonus.
pub fn rebalance_fee_bps(
    curve: &dyn FeeCurve,
    actual_percent: u64,
    target_percent: u64,
    delisted: bool,
    direction: Direction,
) -> Option<i64> {
    match (delisted, direction) {
        (true, Direction::Deposit) => None,
        (true, Direction::Withdraw) => Some(DELISTED_WITHDRAW_BONUS_BPS),
        (false, direction) => Some(curve.fee_bps(actual_percent, target_percent, direction)),
    }
}

/// Share tokens that must be burned to withdraw `usd_value_scaled` of a
/// delisted token: usdValue * 100/105 / shareValue, plus one unit to absorb
/// the integer-division truncation.
pub fn delisted_withdraw_required_shares(
    usd_value_scaled: u128,
    share_value_scaled: u128,
    share_decimals: u8,
) -> Option<u64> {
    if share_value_scaled == 0 {
        return None;
    }
    let numerator = rescale(
        U256::from(usd_value_scaled) * U256::from(DELISTED_BONUS_NUMERATOR),
        share_decimals as i64,
    );
    let denominator = U256::from(share_value_scaled) * U256::from(DELISTED_BONUS_DENOMINATOR);
    Some(saturate_u64(numerator / denominator).saturating_add(1))
}

/// estimatedOut - estimatedOut * slippageBps / 10_000, floored at zero.
pub fn minimum_output_with_slippage(estimated_out: u64, slippage_bps: u16) -> u64 {
    let cut = estimated_out as u128 * slippage_bps as u128 / BPS_DENOMINATOR as u128;
    (estimated_out as u128).saturating_sub(cut) as u64
}

/// Apply a signed fee in bps to a USD amount. None when the fee consumes
/// the whole amount.
fn apply_fee_bps(usd_scaled: u128, fee_bps: i64) -> Option<U256> {
    let keep = BPS_DENOMINATOR as i64 - fee_bps;
    if keep <= 0 {
        return None;
    }
    Some(U256::from(usd_scaled) * U256::from(keep as u64) / U256::from(BPS_DENOMINATOR))
}

/// Share tokens minted for a deposit worth `deposit_value_scaled`, net of
/// the fee (or plus the bonus).
pub fn estimate_shares_out(
    deposit_value_scaled: u128,
    fee_bps: i64,
    share_value_scaled: u128,
    share_decimals: u8,
) -> Option<u64> {
    if share_value_scaled == 0 {
        return None;
    }
    let net = apply_fee_bps(deposit_value_scaled, fee_bps)?;
    Some(saturate_u64(
        rescale(net, share_decimals as i64) / U256::from(share_value_scaled),
    ))
}

/// Underlying token units paid out for burning `share_amount` shares.
pub fn estimate_underlying_out(
    share_amount: u64,
    share_value_scaled: u128,
    share_decimals: u8,
    fee_bps: i64,
    decimals: u8,
    price: PriceQuote,
) -> Option<u64> {
    let usd = rescale(
        U256::from(share_amount) * U256::from(share_value_scaled),
        -(share_decimals as i64),
    );
    let net = apply_fee_bps(saturate_u128(usd), fee_bps)?;
    token_amount_for_usd(saturate_u128(net), decimals, price)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_USD: PriceQuote = PriceQuote {
        price: 200_000_000,
        expo: -8,
    };

    #[test]
    fn token_value_matches_reference_pricing() {
        // 1.0 token (6 decimals) at $2.00
        assert_eq!(token_value_usd_scaled(1_000_000, 6, Some(TWO_USD)), 2_000_000);
        // 3 SOL (9 decimals) at $150.5 with expo -2
        let sol = PriceQuote {
            price: 15_050,
            expo: -2,
        };
        assert_eq!(
            token_value_usd_scaled(3_000_000_000, 9, Some(sol)),
            451_500_000
        );
    }

    #[test]
    fn token_value_is_zero_without_price() {
        assert_eq!(token_value_usd_scaled(1_000_000, 6, None), 0);
        let negative = PriceQuote {
            price: -5,
            expo: -8,
        };
        assert_eq!(token_value_usd_scaled(1_000_000, 6, Some(negative)), 0);
    }

    #[test]
    fn token_value_is_monotonic() {
        let mut previous = 0;
        for amount in [0u64, 1, 10, 999, 1_000_000, u64::MAX / 2, u64::MAX] {
            let value = token_value_usd_scaled(amount, 6, Some(TWO_USD));
            assert!(value >= previous);
            previous = value;
        }
        let mut previous = 0;
        for price in [1i64, 2, 100, 200_000_000, i64::MAX] {
            let quote = PriceQuote { price, expo: -8 };
            let value = token_value_usd_scaled(1_000_000, 6, Some(quote));
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn wide_intermediates_do_not_overflow() {
        let huge = PriceQuote {
            price: i64::MAX,
            expo: 0,
        };
        // u64::MAX * i64::MAX * 10^6 overflows u128 but not U256
        let value = token_value_usd_scaled(u64::MAX, 0, Some(huge));
        assert_eq!(value, u128::MAX);
        let value = token_value_usd_scaled(u64::MAX, 18, Some(huge));
        assert!(value > 0 && value < u128::MAX);
    }

    #[test]
    fn amount_for_usd_inverts_value() {
        let usd = token_value_usd_scaled(1_234_567, 6, Some(TWO_USD));
        assert_eq!(token_amount_for_usd(usd, 6, TWO_USD), Some(1_234_567));
        assert_eq!(
            token_amount_for_usd(usd, 6, PriceQuote { price: 0, expo: -8 }),
            None
        );
    }

    #[test]
    fn dominance_percentages() {
        assert_eq!(target_dominance_percent(DOMINANCE_SCALE, DOMINANCE_SCALE as u128), 1_000_000);
        assert_eq!(
            target_dominance_percent(DOMINANCE_SCALE / 4, DOMINANCE_SCALE as u128),
            250_000
        );
        assert_eq!(target_dominance_percent(DOMINANCE_SCALE, 0), 0);
        assert_eq!(actual_dominance_percent(2_000_000, 2_000_000), 1_000_000);
        assert_eq!(actual_dominance_percent(1, 3), 333_333);
        assert_eq!(actual_dominance_percent(2_000_000, 0), 0);
    }

    #[test]
    fn share_value_unavailable_for_zero_supply() {
        assert_eq!(pool_share_value_scaled(1_000_000, 0, 6), None);
        // $10 pool, 5 shares (6 decimals) => $2 per share
        assert_eq!(pool_share_value_scaled(10_000_000, 5_000_000, 6), Some(2_000_000));
    }

    #[test]
    fn linear_curve_sign_follows_direction() {
        let curve = LinearFeeCurve::default();
        // under-weight: deposits help, withdrawals hurt
        assert!(curve.fee_bps(200_000, 500_000, Direction::Deposit) < 0);
        assert!(curve.fee_bps(200_000, 500_000, Direction::Withdraw) > 0);
        // over-weight: the opposite
        assert!(curve.fee_bps(800_000, 500_000, Direction::Deposit) > 0);
        assert!(curve.fee_bps(800_000, 500_000, Direction::Withdraw) < 0);
    }

    #[test]
    fn linear_curve_magnitude_is_monotonic_in_distance() {
        let curve = LinearFeeCurve::default();
        let target = 500_000;
        let mut last_fee = i64::MIN;
        let mut last_bonus = i64::MAX;
        for actual in (target..=1_000_000).step_by(50_000) {
            let fee = curve.fee_bps(actual, target, Direction::Deposit);
            assert!(fee >= last_fee);
            last_fee = fee;
            let bonus = curve.fee_bps(actual, target, Direction::Withdraw);
            assert!(bonus <= last_bonus);
            last_bonus = bonus;
        }
        assert_eq!(last_fee, 10 + 50 * 5);
        assert_eq!(curve.fee_bps(0, 1_000_000, Direction::Deposit), -100);
    }

    #[test]
    fn delisted_rules() {
        let curve = LinearFeeCurve::default();
        assert_eq!(
            rebalance_fee_bps(&curve, 100_000, 0, true, Direction::Deposit),
            None
        );
        assert_eq!(
            rebalance_fee_bps(&curve, 100_000, 0, true, Direction::Withdraw),
            Some(-500)
        );
        assert!(rebalance_fee_bps(&curve, 100_000, 0, false, Direction::Deposit).is_some());
    }

    #[test]
    fn delisted_required_shares_rounds_up() {
        // $2 at $1/share: 2 * 100/105 = 1.904761.. => 1_904_762
        assert_eq!(
            delisted_withdraw_required_shares(2_000_000, 1_000_000, 6),
            Some(1_904_762)
        );
        assert_eq!(delisted_withdraw_required_shares(2_000_000, 0, 6), None);
    }

    #[test]
    fn slippage_bound() {
        assert_eq!(minimum_output_with_slippage(1_000_000, 0), 1_000_000);
        assert_eq!(minimum_output_with_slippage(1_000_000, 50), 995_000);
        assert_eq!(minimum_output_with_slippage(1_000_000, 10_000), 0);
        assert_eq!(minimum_output_with_slippage(1_000_000, u16::MAX), 0);
        assert_eq!(minimum_output_with_slippage(u64::MAX, 1), u64::MAX - u64::MAX / 10_000);
    }

    #[test]
    fn share_estimates_apply_fees() {
        // $2 deposit at $1/share, no fee => 2 shares
        assert_eq!(estimate_shares_out(2_000_000, 0, 1_000_000, 6), Some(2_000_000));
        // 1% fee
        assert_eq!(estimate_shares_out(2_000_000, 100, 1_000_000, 6), Some(1_980_000));
        // 1% bonus
        assert_eq!(estimate_shares_out(2_000_000, -100, 1_000_000, 6), Some(2_020_000));
        assert_eq!(estimate_shares_out(2_000_000, 0, 0, 6), None);
        assert_eq!(estimate_shares_out(2_000_000, 10_000, 1_000_000, 6), None);

        // burn 1 share at $2/share for a $2 token => 1 token
        assert_eq!(
            estimate_underlying_out(1_000_000, 2_000_000, 6, 0, 6, TWO_USD),
            Some(1_000_000)
        );
    }
}
