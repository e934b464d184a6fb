// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::models::{Currency, TxType};
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures surfaced by a recalculation pass. Every variant aborts the
/// in-progress pass and rolls back; previously committed state is untouched.
/// Unbalanced entries and negative lots indicate engine bugs, not user error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "transaction {txn_id}: disposal of {required} BTC exceeds open lots ({available} BTC available)"
    )]
    InsufficientBtc {
        txn_id: i64,
        required: Decimal,
        available: Decimal,
    },

    #[error("transaction {txn_id}: ledger entries sum to {delta} {currency}, expected zero")]
    UnbalancedEntries {
        txn_id: i64,
        currency: Currency,
        delta: Decimal,
    },

    #[error("transaction {txn_id}: lot from transaction {lot_txn_id} driven to {remaining} BTC")]
    NegativeLot {
        txn_id: i64,
        lot_txn_id: i64,
        remaining: Decimal,
    },

    #[error("transaction {txn_id}: unknown account {account_id}")]
    UnknownAccount { txn_id: i64, account_id: i64 },

    #[error("transaction {txn_id}: {field} is required for {tx_type}")]
    MissingField {
        txn_id: i64,
        field: &'static str,
        tx_type: TxType,
    },

    #[error("transaction {txn_id}: amount must be positive, got {amount}")]
    NonPositiveAmount { txn_id: i64, amount: Decimal },

    #[error("corrupt stored value for {what}: '{value}'")]
    Corrupt { what: &'static str, value: String },

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}
