// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Ledger, lot, and disposal state is never edited in place: it is a pure
//! function of the ordered transaction history, rebuilt here by replaying
//! that history. Callers mutate `transactions` rows and then invoke
//! `recalculate_all` (or `recalculate_from`); nothing else writes the
//! derived tables.

pub mod action;
pub mod error;
pub mod lots;
pub mod poster;
pub mod replay;

pub use error::EngineError;
pub use lots::{DisposalDraft, LotBook, LotState};
pub use replay::{replay, replay_with_book, Outcome, ReplayPolicy};

use crate::db::{
    ACCT_BANK, ACCT_COLD_STORAGE, ACCT_EXCHANGE_BTC, ACCT_EXCHANGE_USD, ACCT_EXTERNAL,
    ACCT_FEES_BTC, ACCT_FEES_USD,
};
use crate::models::{Currency, HoldingPeriod, Transaction, TxType};
use crate::utils::{fmt_timestamp, TransferFeePolicy};
use chrono::{DateTime, Utc};
use poster::EntryDraft;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// The fixed account set. Pure data: account ids and currencies, plus the
/// two classification questions the engine asks of them.
#[derive(Debug, Clone)]
pub struct AccountDirectory {
    currencies: HashMap<i64, Currency>,
}

impl AccountDirectory {
    pub fn load(conn: &Connection) -> Result<Self, EngineError> {
        let mut stmt = conn.prepare("SELECT id, currency FROM accounts")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?;
        let mut currencies = HashMap::new();
        for row in rows {
            let (id, ccy) = row?;
            let ccy = match ccy.as_str() {
                "USD" => Currency::Usd,
                "BTC" => Currency::Btc,
                _ => {
                    return Err(EngineError::Corrupt {
                        what: "account currency",
                        value: ccy,
                    });
                }
            };
            currencies.insert(id, ccy);
        }
        Ok(Self { currencies })
    }

    /// The directory exactly as `db::init_schema` seeds it, for running the
    /// pure replay without a database.
    pub fn seeded() -> Self {
        let mut currencies = HashMap::new();
        for (id, ccy) in [
            (ACCT_BANK, Currency::Usd),
            (ACCT_EXCHANGE_USD, Currency::Usd),
            (ACCT_EXCHANGE_BTC, Currency::Btc),
            (ACCT_COLD_STORAGE, Currency::Btc),
            (ACCT_FEES_USD, Currency::Usd),
            (ACCT_FEES_BTC, Currency::Btc),
            (ACCT_EXTERNAL, Currency::Usd),
        ] {
            currencies.insert(id, ccy);
        }
        Self { currencies }
    }

    pub fn currency_of(&self, txn_id: i64, account_id: i64) -> Result<Currency, EngineError> {
        self.currencies
            .get(&account_id)
            .copied()
            .ok_or(EngineError::UnknownAccount { txn_id, account_id })
    }

    /// BTC accounts that hold the user's coins. External and the fee sink
    /// participate in postings but never hold lots.
    pub fn is_holding_btc(&self, account_id: i64) -> bool {
        account_id != ACCT_EXTERNAL
            && account_id != ACCT_FEES_BTC
            && self.currencies.get(&account_id) == Some(&Currency::Btc)
    }

    pub fn fee_account(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Usd => ACCT_FEES_USD,
            Currency::Btc => ACCT_FEES_BTC,
        }
    }
}

/// Wipe every derived row and rebuild the full history in ascending
/// `(timestamp, id)` order, inside one storage transaction. This is what
/// makes backdated inserts safe; call it after any create, edit, or delete.
pub fn recalculate_all(conn: &mut Connection) -> Result<(), EngineError> {
    let tx = conn.transaction()?;
    rebuild_all(&tx)?;
    tx.commit()?;
    Ok(())
}

/// The body of `recalculate_all`, for callers that already hold the storage
/// transaction (so a rejected replay also rolls back the transaction-row
/// mutation that triggered it).
pub fn rebuild_all(conn: &Connection) -> Result<(), EngineError> {
    let dir = AccountDirectory::load(conn)?;
    let policy = load_policy(conn)?;
    let txns = load_transactions(conn)?;
    let outcome = replay(&dir, &txns, policy)?;

    conn.execute("DELETE FROM lot_disposals", [])?;
    conn.execute("DELETE FROM bitcoin_lots", [])?;
    conn.execute("DELETE FROM ledger_entries", [])?;

    let lot_ids = persist_lots(conn, &outcome.lots)?;
    insert_entries(conn, &outcome.entries)?;
    insert_disposals(conn, &outcome.disposals, &lot_ids)?;
    apply_rollups(conn, &outcome.rollups)?;
    Ok(())
}

/// Narrower variant: derived rows for transactions at or after `cutoff` are
/// removed and replayed on top of the pre-cutoff book carried forward;
/// pre-cutoff rows keep their identities. Converges to the same state as
/// `recalculate_all` on the same history.
pub fn recalculate_from(conn: &mut Connection, cutoff: DateTime<Utc>) -> Result<(), EngineError> {
    let tx = conn.transaction()?;
    rebuild_from(&tx, cutoff)?;
    tx.commit()?;
    Ok(())
}

/// The body of `recalculate_from`, for callers already inside a transaction.
pub fn rebuild_from(conn: &Connection, cutoff: DateTime<Utc>) -> Result<(), EngineError> {
    let dir = AccountDirectory::load(conn)?;
    let policy = load_policy(conn)?;
    let txns = load_transactions(conn)?;
    let split = txns.partition_point(|t| t.timestamp < cutoff);
    let (prefix, suffix) = txns.split_at(split);

    let cut = fmt_timestamp(&cutoff);
    conn.execute(
        "DELETE FROM lot_disposals WHERE transaction_id IN
             (SELECT id FROM transactions WHERE timestamp >= ?1)",
        params![cut],
    )?;
    conn.execute(
        "DELETE FROM bitcoin_lots WHERE created_txn_id IN
             (SELECT id FROM transactions WHERE timestamp >= ?1)",
        params![cut],
    )?;
    conn.execute(
        "DELETE FROM ledger_entries WHERE transaction_id IN
             (SELECT id FROM transactions WHERE timestamp >= ?1)",
        params![cut],
    )?;

    let carried = replay(&dir, prefix, policy)?;
    let outcome = replay_with_book(&dir, LotBook::from_lots(carried.lots), suffix, policy)?;

    let lot_ids = persist_lots(conn, &outcome.lots)?;
    insert_entries(conn, &outcome.entries)?;
    insert_disposals(conn, &outcome.disposals, &lot_ids)?;
    apply_rollups(conn, &outcome.rollups)?;
    Ok(())
}

/// Read-only point-in-time view: open lots as they stood just before
/// `cutoff`, via a pure replay of the prefix. Mutates nothing, so the
/// authoritative full-history state never needs restoring afterwards.
pub fn holdings_as_of(
    conn: &Connection,
    cutoff: DateTime<Utc>,
) -> Result<Vec<LotState>, EngineError> {
    let dir = AccountDirectory::load(conn)?;
    let policy = load_policy(conn)?;
    let txns = load_transactions(conn)?;
    let split = txns.partition_point(|t| t.timestamp < cutoff);
    let outcome = replay(&dir, &txns[..split], policy)?;
    Ok(outcome
        .lots
        .into_iter()
        .filter(|l| l.remaining_btc > Decimal::ZERO)
        .collect())
}

fn load_policy(conn: &Connection) -> Result<ReplayPolicy, EngineError> {
    let v: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key='transfer_fee_policy'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    let transfer_fee = match v.as_deref() {
        None | Some("taxable") => TransferFeePolicy::Taxable,
        Some("exempt") => TransferFeePolicy::Exempt,
        Some(other) => {
            return Err(EngineError::Corrupt {
                what: "transfer_fee_policy",
                value: other.to_string(),
            });
        }
    };
    Ok(ReplayPolicy { transfer_fee })
}

struct RawTxn {
    id: i64,
    tx_type: String,
    timestamp: String,
    from_account_id: i64,
    to_account_id: i64,
    amount: String,
    fee_amount: Option<String>,
    fee_currency: Option<String>,
    cost_basis_usd: Option<String>,
    proceeds_usd: Option<String>,
    realized_gain_usd: Option<String>,
    holding_period: Option<String>,
    purpose: Option<String>,
    source: Option<String>,
    is_locked: bool,
    group_id: Option<String>,
}

/// Load the full history in replay order.
pub fn load_transactions(conn: &Connection) -> Result<Vec<Transaction>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT id, type, timestamp, from_account_id, to_account_id, amount,
                fee_amount, fee_currency, cost_basis_usd, proceeds_usd,
                realized_gain_usd, holding_period, purpose, source, is_locked, group_id
         FROM transactions ORDER BY timestamp, id",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(RawTxn {
            id: r.get(0)?,
            tx_type: r.get(1)?,
            timestamp: r.get(2)?,
            from_account_id: r.get(3)?,
            to_account_id: r.get(4)?,
            amount: r.get(5)?,
            fee_amount: r.get(6)?,
            fee_currency: r.get(7)?,
            cost_basis_usd: r.get(8)?,
            proceeds_usd: r.get(9)?,
            realized_gain_usd: r.get(10)?,
            holding_period: r.get(11)?,
            purpose: r.get(12)?,
            source: r.get(13)?,
            is_locked: r.get(14)?,
            group_id: r.get(15)?,
        })
    })?;

    let mut txns = Vec::new();
    for row in rows {
        txns.push(convert_raw(row?)?);
    }
    Ok(txns)
}

fn convert_raw(raw: RawTxn) -> Result<Transaction, EngineError> {
    Ok(Transaction {
        id: raw.id,
        tx_type: parse_tx_type(&raw.tx_type)?,
        timestamp: parse_stored_timestamp(&raw.timestamp)?,
        from_account_id: raw.from_account_id,
        to_account_id: raw.to_account_id,
        amount: parse_stored_decimal("transaction amount", &raw.amount)?,
        fee_amount: parse_stored_decimal_opt("fee_amount", raw.fee_amount.as_deref())?,
        fee_currency: parse_currency_opt(raw.fee_currency.as_deref())?,
        cost_basis_usd: parse_stored_decimal_opt("cost_basis_usd", raw.cost_basis_usd.as_deref())?,
        proceeds_usd: parse_stored_decimal_opt("proceeds_usd", raw.proceeds_usd.as_deref())?,
        realized_gain_usd: parse_stored_decimal_opt(
            "realized_gain_usd",
            raw.realized_gain_usd.as_deref(),
        )?,
        holding_period: parse_holding_opt(raw.holding_period.as_deref())?,
        purpose: raw.purpose,
        source: raw.source,
        is_locked: raw.is_locked,
        group_id: raw.group_id,
    })
}

fn parse_tx_type(s: &str) -> Result<TxType, EngineError> {
    TxType::parse(s).map_err(|_| EngineError::Corrupt {
        what: "transaction type",
        value: s.to_string(),
    })
}

fn parse_stored_timestamp(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| EngineError::Corrupt {
            what: "timestamp",
            value: s.to_string(),
        })
}

fn parse_stored_decimal(what: &'static str, s: &str) -> Result<Decimal, EngineError> {
    Decimal::from_str_exact(s).map_err(|_| EngineError::Corrupt {
        what,
        value: s.to_string(),
    })
}

fn parse_stored_decimal_opt(
    what: &'static str,
    s: Option<&str>,
) -> Result<Option<Decimal>, EngineError> {
    s.map(|s| parse_stored_decimal(what, s)).transpose()
}

fn parse_currency_opt(s: Option<&str>) -> Result<Option<Currency>, EngineError> {
    s.map(|s| {
        Currency::parse(s).map_err(|_| EngineError::Corrupt {
            what: "fee currency",
            value: s.to_string(),
        })
    })
    .transpose()
}

fn parse_holding_opt(s: Option<&str>) -> Result<Option<HoldingPeriod>, EngineError> {
    s.map(|s| {
        HoldingPeriod::parse(s).map_err(|_| EngineError::Corrupt {
            what: "holding period",
            value: s.to_string(),
        })
    })
    .transpose()
}

/// Insert new lots and refresh the carried-forward remainder of surviving
/// ones; returns creating-transaction id -> lot row id for disposal linking.
fn persist_lots(
    conn: &Connection,
    lots: &[LotState],
) -> Result<HashMap<i64, i64>, EngineError> {
    let mut ids: HashMap<i64, i64> = HashMap::new();
    {
        let mut stmt = conn.prepare("SELECT created_txn_id, id FROM bitcoin_lots")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (created, id) = row?;
            ids.insert(created, id);
        }
    }

    let mut update = conn.prepare("UPDATE bitcoin_lots SET remaining_btc=?1 WHERE id=?2")?;
    let mut insert = conn.prepare(
        "INSERT INTO bitcoin_lots(created_txn_id, acquired_date, total_btc, remaining_btc, cost_basis_usd)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for lot in lots {
        match ids.get(&lot.created_txn_id) {
            Some(&row_id) => {
                update.execute(params![lot.remaining_btc.to_string(), row_id])?;
            }
            None => {
                insert.execute(params![
                    lot.created_txn_id,
                    fmt_timestamp(&lot.acquired_date),
                    lot.total_btc.to_string(),
                    lot.remaining_btc.to_string(),
                    lot.cost_basis_usd.to_string(),
                ])?;
                ids.insert(lot.created_txn_id, conn.last_insert_rowid());
            }
        }
    }
    Ok(ids)
}

fn insert_entries(
    conn: &Connection,
    entries: &[(i64, Vec<EntryDraft>)],
) -> Result<(), EngineError> {
    let mut stmt = conn.prepare(
        "INSERT INTO ledger_entries(transaction_id, account_id, amount, currency, entry_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (txn_id, drafts) in entries {
        for d in drafts {
            stmt.execute(params![
                txn_id,
                d.account_id,
                d.amount.to_string(),
                d.currency.as_str(),
                d.entry_type,
            ])?;
        }
    }
    Ok(())
}

fn insert_disposals(
    conn: &Connection,
    disposals: &[DisposalDraft],
    lot_ids: &HashMap<i64, i64>,
) -> Result<(), EngineError> {
    let mut stmt = conn.prepare(
        "INSERT INTO lot_disposals(lot_id, transaction_id, disposed_btc, disposal_basis_usd,
                                   proceeds_usd, realized_gain_usd, holding_period)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for d in disposals {
        let lot_id = lot_ids
            .get(&d.lot_txn_id)
            .copied()
            .ok_or(EngineError::Corrupt {
                what: "lot reference",
                value: d.lot_txn_id.to_string(),
            })?;
        stmt.execute(params![
            lot_id,
            d.transaction_id,
            d.disposed_btc.to_string(),
            d.disposal_basis_usd.to_string(),
            d.proceeds_usd.to_string(),
            d.realized_gain_usd.to_string(),
            d.holding_period.as_str(),
        ])?;
    }
    Ok(())
}

fn apply_rollups(
    conn: &Connection,
    rollups: &[replay::TxRollup],
) -> Result<(), EngineError> {
    let mut set = conn.prepare(
        "UPDATE transactions
         SET cost_basis_usd=?1, proceeds_usd=?2, realized_gain_usd=?3, holding_period=?4
         WHERE id=?5",
    )?;
    let mut clear = conn.prepare(
        "UPDATE transactions SET realized_gain_usd=NULL, holding_period=NULL
         WHERE id=?1 AND (realized_gain_usd IS NOT NULL OR holding_period IS NOT NULL)",
    )?;
    for r in rollups {
        match &r.disposal {
            Some(d) => {
                set.execute(params![
                    d.cost_basis_usd.to_string(),
                    d.proceeds_usd.to_string(),
                    d.realized_gain_usd.to_string(),
                    d.holding_period.as_str(),
                    r.transaction_id,
                ])?;
            }
            None => {
                clear.execute(params![r.transaction_id])?;
            }
        }
    }
    Ok(())
}
