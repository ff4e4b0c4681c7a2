//! Conversions between user-facing amounts and on-chain base units.

use crate::error::{ClientError, Result};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
pub const SOL_DECIMALS: u8 = 9;

/// Scales a UI amount by `10^decimals`, rounding to the nearest base unit.
pub fn to_base_units(amount: f64, decimals: u8) -> Result<u64> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ClientError::InvalidAmount(format!("{amount} is not a valid amount")));
    }
    let scaled = (amount * 10f64.powi(decimals as i32)).round();
    if scaled >= u64::MAX as f64 {
        return Err(ClientError::InvalidAmount(format!("{amount} is too large")));
    }
    Ok(scaled as u64)
}

pub fn sol_to_lamports(sol: f64) -> Result<u64> {
    to_base_units(sol, SOL_DECIMALS)
}

pub fn from_base_units(value: u64, decimals: u8) -> f64 {
    value as f64 / 10f64.powi(decimals as i32)
}

/// Purchases are made in whole tokens.
pub fn whole_token_amount(amount: f64) -> Result<u64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ClientError::InvalidTokenAmount);
    }
    if amount.fract() != 0.0 {
        return Err(ClientError::FractionalTokenAmount);
    }
    if amount >= u64::MAX as f64 {
        return Err(ClientError::InvalidTokenAmount);
    }
    Ok(amount as u64)
}

pub fn whole_tokens_to_base_units(tokens: u64, decimals: u8) -> Result<u64> {
    10u64
        .checked_pow(decimals as u32)
        .and_then(|scale| tokens.checked_mul(scale))
        .ok_or_else(|| ClientError::InvalidAmount(format!("{tokens} tokens overflow base units")))
}

/// Lamports per whole token for a USD price at the given SOL/USD rate.
pub fn lamports_per_token(price_usd: f64, sol_usd: f64) -> Result<u64> {
    if !sol_usd.is_finite() || sol_usd <= 0.0 {
        return Err(ClientError::Price(format!("unusable SOL price {sol_usd}")));
    }
    if !price_usd.is_finite() || price_usd <= 0.0 {
        return Err(ClientError::InvalidTerms(format!("price {price_usd} must be positive")));
    }
    let lamports = (price_usd / sol_usd * LAMPORTS_PER_SOL as f64).floor();
    if lamports < 1.0 || lamports >= u64::MAX as f64 {
        return Err(ClientError::InvalidTerms(format!(
            "price {price_usd} USD is {lamports} lamports at {sol_usd} USD/SOL"
        )));
    }
    Ok(lamports as u64)
}
