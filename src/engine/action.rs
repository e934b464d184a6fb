// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::engine::error::EngineError;
use crate::models::{Currency, Transaction, TxType};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fee {
    pub amount: Decimal,
    pub currency: Currency,
}

/// A stored transaction narrowed to its type's legal fields. Account-role
/// legality is the caller's contract (see the command layer); the engine
/// re-checks the fields its own arithmetic depends on and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxAction {
    Deposit {
        to: i64,
        amount: Decimal,
        cost_basis_usd: Decimal,
        fee: Option<Fee>,
    },
    Withdrawal {
        from: i64,
        amount: Decimal,
        proceeds_usd: Decimal,
        fee: Option<Fee>,
    },
    Transfer {
        from: i64,
        to: i64,
        amount: Decimal,
        fee_btc: Option<Decimal>,
    },
    Buy {
        from: i64,
        to: i64,
        amount_btc: Decimal,
        cost_basis_usd: Decimal,
        fee_usd: Option<Decimal>,
    },
    Sell {
        from: i64,
        to: i64,
        amount_btc: Decimal,
        proceeds_usd: Decimal,
        fee_usd: Option<Decimal>,
    },
}

pub fn classify(txn: &Transaction) -> Result<TxAction, EngineError> {
    if txn.amount <= Decimal::ZERO {
        return Err(EngineError::NonPositiveAmount {
            txn_id: txn.id,
            amount: txn.amount,
        });
    }

    let fee = match txn.fee_amount {
        Some(amount) if amount < Decimal::ZERO => {
            return Err(EngineError::NonPositiveAmount {
                txn_id: txn.id,
                amount,
            });
        }
        Some(amount) if amount > Decimal::ZERO => {
            let currency = txn.fee_currency.ok_or(EngineError::MissingField {
                txn_id: txn.id,
                field: "fee_currency",
                tx_type: txn.tx_type,
            })?;
            Some(Fee { amount, currency })
        }
        _ => None,
    };

    match txn.tx_type {
        TxType::Deposit => Ok(TxAction::Deposit {
            to: txn.to_account_id,
            amount: txn.amount,
            cost_basis_usd: txn.cost_basis_usd.unwrap_or(Decimal::ZERO),
            fee,
        }),
        TxType::Withdrawal => Ok(TxAction::Withdrawal {
            from: txn.from_account_id,
            amount: txn.amount,
            proceeds_usd: txn.proceeds_usd.unwrap_or(Decimal::ZERO),
            fee,
        }),
        TxType::Transfer => {
            let fee_btc = match fee {
                Some(Fee {
                    amount,
                    currency: Currency::Btc,
                }) => Some(amount),
                Some(Fee { currency, .. }) => {
                    return Err(EngineError::Corrupt {
                        what: "transfer fee currency",
                        value: currency.as_str().to_string(),
                    });
                }
                None => None,
            };
            Ok(TxAction::Transfer {
                from: txn.from_account_id,
                to: txn.to_account_id,
                amount: txn.amount,
                fee_btc,
            })
        }
        TxType::Buy => {
            let cost_basis_usd = txn.cost_basis_usd.ok_or(EngineError::MissingField {
                txn_id: txn.id,
                field: "cost_basis_usd",
                tx_type: txn.tx_type,
            })?;
            Ok(TxAction::Buy {
                from: txn.from_account_id,
                to: txn.to_account_id,
                amount_btc: txn.amount,
                cost_basis_usd,
                fee_usd: usd_fee(txn, fee)?,
            })
        }
        TxType::Sell => {
            let proceeds_usd = txn.proceeds_usd.ok_or(EngineError::MissingField {
                txn_id: txn.id,
                field: "proceeds_usd",
                tx_type: txn.tx_type,
            })?;
            Ok(TxAction::Sell {
                from: txn.from_account_id,
                to: txn.to_account_id,
                amount_btc: txn.amount,
                proceeds_usd,
                fee_usd: usd_fee(txn, fee)?,
            })
        }
    }
}

// Buy and Sell fees settle in USD only.
fn usd_fee(txn: &Transaction, fee: Option<Fee>) -> Result<Option<Decimal>, EngineError> {
    match fee {
        Some(Fee {
            amount,
            currency: Currency::Usd,
        }) => Ok(Some(amount)),
        Some(Fee { currency, .. }) => Err(EngineError::Corrupt {
            what: "trade fee currency",
            value: format!("{} on {}", currency, txn.tx_type),
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn base_txn(tx_type: TxType) -> Transaction {
        Transaction {
            id: 1,
            tx_type,
            timestamp: Utc::now(),
            from_account_id: 1,
            to_account_id: 3,
            amount: Decimal::ONE,
            fee_amount: None,
            fee_currency: None,
            cost_basis_usd: None,
            proceeds_usd: None,
            realized_gain_usd: None,
            holding_period: None,
            purpose: None,
            source: None,
            is_locked: false,
            group_id: None,
        }
    }

    #[test]
    fn buy_requires_cost_basis() {
        let txn = base_txn(TxType::Buy);
        assert!(matches!(
            classify(&txn),
            Err(EngineError::MissingField {
                field: "cost_basis_usd",
                ..
            })
        ));
    }

    #[test]
    fn sell_requires_proceeds() {
        let txn = base_txn(TxType::Sell);
        assert!(matches!(
            classify(&txn),
            Err(EngineError::MissingField {
                field: "proceeds_usd",
                ..
            })
        ));
    }

    #[test]
    fn fee_without_currency_is_rejected() {
        let mut txn = base_txn(TxType::Deposit);
        txn.fee_amount = Some(Decimal::from_str("0.001").unwrap());
        assert!(matches!(
            classify(&txn),
            Err(EngineError::MissingField {
                field: "fee_currency",
                ..
            })
        ));
    }

    #[test]
    fn zero_fee_collapses_to_none() {
        let mut txn = base_txn(TxType::Deposit);
        txn.fee_amount = Some(Decimal::ZERO);
        match classify(&txn).unwrap() {
            TxAction::Deposit { fee, .. } => assert!(fee.is_none()),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let mut txn = base_txn(TxType::Deposit);
        txn.amount = Decimal::ZERO;
        assert!(matches!(
            classify(&txn),
            Err(EngineError::NonPositiveAmount { .. })
        ));
    }
}
