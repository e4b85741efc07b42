use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount must be positive, got {0}")]
    NotPositive(Decimal),

    #[error("amount {0} is smaller than one lamport")]
    BelowOneLamport(Decimal),

    #[error("amount {0} does not fit in a u64 lamport count")]
    Overflow(Decimal),
}

/// Convert SOL to lamports, dropping any fraction of a lamport.
///
/// Never rounds up, so the sender is not charged more than the configured amount.
pub fn sol_to_lamports(amount: Decimal) -> Result<u64, AmountError> {
    if amount.is_sign_negative() {
        return Err(AmountError::NotPositive(amount));
    }
    amount
        .checked_mul(Decimal::from(LAMPORTS_PER_SOL))
        .and_then(|d| d.trunc().to_u64())
        .ok_or(AmountError::Overflow(amount))
}

pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

/// Per-recipient transfer amount, validated to be at least one lamport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenAmount {
    sol: Decimal,
    lamports: u64,
}

impl TokenAmount {
    pub fn new(sol: Decimal) -> Result<Self, AmountError> {
        if sol <= Decimal::ZERO {
            return Err(AmountError::NotPositive(sol));
        }
        let lamports = sol_to_lamports(sol)?;
        if lamports == 0 {
            return Err(AmountError::BelowOneLamport(sol));
        }
        Ok(Self { sol, lamports })
    }

    pub fn sol(&self) -> Decimal {
        self.sol
    }

    pub fn lamports(&self) -> u64 {
        self.lamports
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} SOL ({} lamports)", self.sol, self.lamports)
    }
}
