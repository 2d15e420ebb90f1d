/// Balance movements. Every mutation of `User.balance` goes through here,
/// inside the caller's unit of work: the pure `apply_*` functions serve the
/// in-memory store, the sqlx functions run against the caller's transaction
/// (the row is locked with `SELECT ... FOR UPDATE` before the write, so two
/// concurrent debits on the same user cannot lose an update).
// region:    --- Imports
use crate::error::MarketError;
use sqlx::{Postgres, Row, Transaction};

// endregion: --- Imports

// region:    --- Pure Ledger

/// Debit against a known balance. Rejected if it would go negative.
pub fn apply_debit(balance: i64, amount: i64) -> Result<i64, MarketError> {
    if balance < amount {
        return Err(MarketError::InsufficientFunds {
            balance,
            required: amount,
        });
    }
    Ok(balance - amount)
}

pub fn apply_credit(balance: i64, amount: i64) -> i64 {
    balance + amount
}

// endregion: --- Pure Ledger

// region:    --- Transactional Ledger

/// Debits a user inside the caller's transaction. Re-reads the current
/// balance under the row lock before writing.
pub async fn debit(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    amount: i64,
) -> Result<i64, MarketError> {
    let row = sqlx::query("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(MarketError::NotFound("user"))?;

    let new_balance = apply_debit(row.try_get("balance")?, amount)?;

    sqlx::query("UPDATE users SET balance = $1 WHERE id = $2")
        .bind(new_balance)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    Ok(new_balance)
}

/// Credits a user inside the caller's transaction.
pub async fn credit(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    amount: i64,
) -> Result<i64, MarketError> {
    let row = sqlx::query(
        "UPDATE users SET balance = balance + $1 WHERE id = $2 RETURNING balance",
    )
    .bind(amount)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(MarketError::NotFound("user"))?;

    Ok(row.try_get("balance")?)
}

// endregion: --- Transactional Ledger

// region:    --- Tests


// endregion: --- Tests
