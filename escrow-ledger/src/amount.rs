//! Ether <-> wei conversion for user-facing amounts

use crate::{error::LedgerError, models::Amount, LedgerResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Decimal places between ether and wei
pub const ETHER_DECIMALS: u32 = 18;

/// Parse a decimal ether string ("1", "0.25") into wei
pub fn parse_ether(input: &str) -> LedgerResult<Amount> {
    let trimmed = input.trim();
    let ether = Decimal::from_str(trimmed)
        .map_err(|e| LedgerError::invalid_amount(format!("'{}': {}", trimmed, e)))?;

    if ether.is_sign_negative() && !ether.is_zero() {
        return Err(LedgerError::invalid_amount(format!(
            "'{}' is negative",
            trimmed
        )));
    }

    if ether.scale() > ETHER_DECIMALS {
        return Err(LedgerError::invalid_amount(format!(
            "'{}' has more than {} decimal places",
            trimmed, ETHER_DECIMALS
        )));
    }

    let wei_per_ether = Decimal::from(10u64.pow(ETHER_DECIMALS));
    ether
        .checked_mul(wei_per_ether)
        .and_then(|wei| wei.to_u128())
        .ok_or_else(|| LedgerError::invalid_amount(format!("'{}' is out of range", trimmed)))
}

/// Format wei as a decimal ether string without trailing zeros
pub fn format_ether(wei: Amount) -> String {
    let signed = match i128::try_from(wei) {
        Ok(v) => v,
        Err(_) => return format!("{} wei", wei),
    };

    match Decimal::try_from_i128_with_scale(signed, ETHER_DECIMALS) {
        Ok(ether) => ether.normalize().to_string(),
        Err(_) => format!("{} wei", wei),
    }
}
