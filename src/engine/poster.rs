// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::db::ACCT_EXTERNAL;
use crate::engine::action::TxAction;
use crate::engine::error::EngineError;
use crate::engine::AccountDirectory;
use crate::models::Currency;
use rust_decimal::Decimal;
use std::collections::HashMap;

pub const ENTRY_TRANSFER: &str = "transfer";
pub const ENTRY_FEE: &str = "fee";

/// A ledger entry not yet persisted. Negative = outflow, positive = inflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    pub account_id: i64,
    pub amount: Decimal,
    pub currency: Currency,
    pub entry_type: &'static str,
}

fn draft(account_id: i64, amount: Decimal, currency: Currency, entry_type: &'static str) -> EntryDraft {
    EntryDraft {
        account_id,
        amount,
        currency,
        entry_type,
    }
}

/// Translate one classified transaction into its balanced posting set.
///
/// Single-currency types post discrete pairs (Deposit/Withdrawal) or the
/// three-entry form where the source entry absorbs the fee (Transfer).
/// Buy and Sell move value across currencies, so each leg is routed through
/// the External account to keep every currency's signed sum at zero.
pub fn post_entries(
    txn_id: i64,
    action: &TxAction,
    dir: &AccountDirectory,
) -> Result<Vec<EntryDraft>, EngineError> {
    let mut entries = Vec::new();

    match action {
        TxAction::Deposit {
            to, amount, fee, ..
        } => {
            let ccy = dir.currency_of(txn_id, *to)?;
            entries.push(draft(ACCT_EXTERNAL, -*amount, ccy, ENTRY_TRANSFER));
            entries.push(draft(*to, *amount, ccy, ENTRY_TRANSFER));
            if let Some(fee) = fee {
                entries.push(draft(*to, -fee.amount, fee.currency, ENTRY_FEE));
                entries.push(draft(
                    dir.fee_account(fee.currency),
                    fee.amount,
                    fee.currency,
                    ENTRY_FEE,
                ));
            }
        }
        TxAction::Withdrawal {
            from, amount, fee, ..
        } => {
            let ccy = dir.currency_of(txn_id, *from)?;
            entries.push(draft(*from, -*amount, ccy, ENTRY_TRANSFER));
            entries.push(draft(ACCT_EXTERNAL, *amount, ccy, ENTRY_TRANSFER));
            if let Some(fee) = fee {
                entries.push(draft(*from, -fee.amount, fee.currency, ENTRY_FEE));
                entries.push(draft(
                    dir.fee_account(fee.currency),
                    fee.amount,
                    fee.currency,
                    ENTRY_FEE,
                ));
            }
        }
        TxAction::Transfer {
            from,
            to,
            amount,
            fee_btc,
        } => {
            let ccy = dir.currency_of(txn_id, *from)?;
            let fee = fee_btc.unwrap_or(Decimal::ZERO);
            entries.push(draft(*from, -(*amount + fee), ccy, ENTRY_TRANSFER));
            entries.push(draft(*to, *amount, ccy, ENTRY_TRANSFER));
            if fee > Decimal::ZERO {
                entries.push(draft(
                    dir.fee_account(Currency::Btc),
                    fee,
                    Currency::Btc,
                    ENTRY_FEE,
                ));
            }
        }
        TxAction::Buy {
            from,
            to,
            amount_btc,
            cost_basis_usd,
            fee_usd,
        } => {
            let fee = fee_usd.unwrap_or(Decimal::ZERO);
            entries.push(draft(
                *from,
                -(*cost_basis_usd + fee),
                Currency::Usd,
                ENTRY_TRANSFER,
            ));
            entries.push(draft(
                ACCT_EXTERNAL,
                *cost_basis_usd,
                Currency::Usd,
                ENTRY_TRANSFER,
            ));
            if fee > Decimal::ZERO {
                entries.push(draft(
                    dir.fee_account(Currency::Usd),
                    fee,
                    Currency::Usd,
                    ENTRY_FEE,
                ));
            }
            entries.push(draft(ACCT_EXTERNAL, -*amount_btc, Currency::Btc, ENTRY_TRANSFER));
            entries.push(draft(*to, *amount_btc, Currency::Btc, ENTRY_TRANSFER));
        }
        TxAction::Sell {
            from,
            to,
            amount_btc,
            proceeds_usd,
            fee_usd,
        } => {
            let fee = fee_usd.unwrap_or(Decimal::ZERO);
            entries.push(draft(*from, -*amount_btc, Currency::Btc, ENTRY_TRANSFER));
            entries.push(draft(ACCT_EXTERNAL, *amount_btc, Currency::Btc, ENTRY_TRANSFER));
            entries.push(draft(
                ACCT_EXTERNAL,
                -*proceeds_usd,
                Currency::Usd,
                ENTRY_TRANSFER,
            ));
            entries.push(draft(*to, *proceeds_usd - fee, Currency::Usd, ENTRY_TRANSFER));
            if fee > Decimal::ZERO {
                entries.push(draft(
                    dir.fee_account(Currency::Usd),
                    fee,
                    Currency::Usd,
                    ENTRY_FEE,
                ));
            }
        }
    }

    verify_balanced(txn_id, &entries)?;
    Ok(entries)
}

/// The double-entry guarantee, verified rather than assumed: any nonzero
/// per-currency sum is an internal bug and fails the whole pass.
fn verify_balanced(txn_id: i64, entries: &[EntryDraft]) -> Result<(), EngineError> {
    let mut sums: HashMap<Currency, Decimal> = HashMap::new();
    for e in entries {
        *sums.entry(e.currency).or_insert(Decimal::ZERO) += e.amount;
    }
    for (currency, delta) in sums {
        if !delta.is_zero() {
            return Err(EngineError::UnbalancedEntries {
                txn_id,
                currency,
                delta,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ACCT_BANK, ACCT_COLD_STORAGE, ACCT_EXCHANGE_BTC, ACCT_EXCHANGE_USD, ACCT_FEES_BTC};
    use crate::engine::action::Fee;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn dir() -> AccountDirectory {
        AccountDirectory::seeded()
    }

    fn currency_sum(entries: &[EntryDraft], ccy: Currency) -> Decimal {
        entries
            .iter()
            .filter(|e| e.currency == ccy)
            .map(|e| e.amount)
            .sum()
    }

    #[test]
    fn deposit_posts_one_pair() {
        let action = TxAction::Deposit {
            to: ACCT_EXCHANGE_BTC,
            amount: dec("0.5"),
            cost_basis_usd: dec("20000"),
            fee: None,
        };
        let entries = post_entries(1, &action, &dir()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(currency_sum(&entries, Currency::Btc), Decimal::ZERO);
    }

    #[test]
    fn transfer_fee_uses_three_entry_form() {
        let action = TxAction::Transfer {
            from: ACCT_EXCHANGE_BTC,
            to: ACCT_COLD_STORAGE,
            amount: dec("1"),
            fee_btc: Some(dec("0.0002")),
        };
        let entries = post_entries(1, &action, &dir()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(currency_sum(&entries, Currency::Btc), Decimal::ZERO);
        let from_entry = entries.iter().find(|e| e.account_id == ACCT_EXCHANGE_BTC).unwrap();
        assert_eq!(from_entry.amount, dec("-1.0002"));
        let fee_entry = entries.iter().find(|e| e.account_id == ACCT_FEES_BTC).unwrap();
        assert_eq!(fee_entry.entry_type, ENTRY_FEE);
    }

    #[test]
    fn buy_balances_both_currencies() {
        let action = TxAction::Buy {
            from: ACCT_BANK,
            to: ACCT_EXCHANGE_BTC,
            amount_btc: dec("1"),
            cost_basis_usd: dec("40000"),
            fee_usd: Some(dec("25")),
        };
        let entries = post_entries(1, &action, &dir()).unwrap();
        assert_eq!(currency_sum(&entries, Currency::Usd), Decimal::ZERO);
        assert_eq!(currency_sum(&entries, Currency::Btc), Decimal::ZERO);
        let bank = entries.iter().find(|e| e.account_id == ACCT_BANK).unwrap();
        assert_eq!(bank.amount, dec("-40025"));
    }

    #[test]
    fn sell_nets_fee_out_of_proceeds() {
        let action = TxAction::Sell {
            from: ACCT_EXCHANGE_BTC,
            to: ACCT_EXCHANGE_USD,
            amount_btc: dec("1"),
            proceeds_usd: dec("60000"),
            fee_usd: Some(dec("30")),
        };
        let entries = post_entries(1, &action, &dir()).unwrap();
        assert_eq!(currency_sum(&entries, Currency::Usd), Decimal::ZERO);
        assert_eq!(currency_sum(&entries, Currency::Btc), Decimal::ZERO);
        let usd_in = entries
            .iter()
            .find(|e| e.account_id == ACCT_EXCHANGE_USD)
            .unwrap();
        assert_eq!(usd_in.amount, dec("59970"));
    }

    #[test]
    fn withdrawal_fee_posts_extra_pair() {
        let action = TxAction::Withdrawal {
            from: ACCT_COLD_STORAGE,
            amount: dec("0.25"),
            proceeds_usd: dec("15000"),
            fee: Some(Fee {
                amount: dec("0.0001"),
                currency: Currency::Btc,
            }),
        };
        let entries = post_entries(1, &action, &dir()).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(currency_sum(&entries, Currency::Btc), Decimal::ZERO);
    }
}
