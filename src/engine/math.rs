//! Fixed-point helpers.
//!
//! Products are formed in 256 bits so a 128-bit operand pair never overflows
//! before the division; only the final quotient must fit back into `u128`.
//! Every division floors.

use super::RewardsError;
use primitive_types::U256;

/// Scale of `reward_per_token` values (1e18).
pub const REWARD_RATE_FACTOR: u128 = 1_000_000_000_000_000_000;

/// `a * b / denominator`, floored.
pub fn mul_div(a: u128, b: u128, denominator: u128, what: &'static str) -> Result<u128, RewardsError> {
    if denominator == 0 {
        return Err(RewardsError::InvariantViolation(format!(
            "division by zero in {}",
            what
        )));
    }
    let product = U256::from(a) * U256::from(b);
    narrow(product / U256::from(denominator), what)
}

/// Reward-per-token increment for `elapsed` seconds at `rate` over `total_staked`.
pub fn reward_per_token_increment(
    rate: u128,
    elapsed: u64,
    total_staked: u128,
) -> Result<u128, RewardsError> {
    if total_staked == 0 {
        return Ok(0);
    }
    // rate < 2^128, elapsed < 2^64, factor < 2^60: the product stays below 2^252.
    let numerator = U256::from(rate) * U256::from(elapsed) * U256::from(REWARD_RATE_FACTOR);
    narrow(numerator / U256::from(total_staked), "reward per token")
}

fn narrow(value: U256, what: &'static str) -> Result<u128, RewardsError> {
    if value > U256::from(u128::MAX) {
        return Err(RewardsError::Overflow(what));
    }
    Ok(value.low_u128())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_floors() {
        assert_eq!(mul_div(10, 3, 4, "t").unwrap(), 7);
        assert_eq!(mul_div(0, 3, 4, "t").unwrap(), 0);
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // (2^127 * 4) / 8 fits even though the product does not fit in u128.
        let a = 1u128 << 127;
        assert_eq!(mul_div(a, 4, 8, "t").unwrap(), a / 2);
    }

    #[test]
    fn test_mul_div_overflow_and_zero_denominator() {
        assert_eq!(
            mul_div(u128::MAX, 2, 1, "t"),
            Err(RewardsError::Overflow("t"))
        );
        assert!(matches!(
            mul_div(1, 1, 0, "t"),
            Err(RewardsError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_reward_per_token_increment() {
        // 10 tokens/s for 100s over 1000 staked = 1 token per staked unit.
        assert_eq!(
            reward_per_token_increment(10, 100, 1_000).unwrap(),
            REWARD_RATE_FACTOR
        );
        assert_eq!(reward_per_token_increment(10, 100, 0).unwrap(), 0);
    }

    #[test]
    fn test_reward_per_token_increment_large_rate() {
        // 1e21 base units/s for four weeks over 1e18 staked stays representable.
        let rate = 1_000_000_000_000_000_000_000u128;
        let elapsed = 4 * 7 * 86_400;
        let inc = reward_per_token_increment(rate, elapsed, REWARD_RATE_FACTOR).unwrap();
        assert_eq!(inc, rate * elapsed as u128);
    }
}
