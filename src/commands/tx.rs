// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::db::{ACCT_BANK, ACCT_EXCHANGE_BTC, ACCT_EXCHANGE_USD, ACCT_EXTERNAL, ACCT_FEES_BTC, ACCT_FEES_USD};
use crate::engine;
use crate::engine::AccountDirectory;
use crate::models::{Currency, TxType};
use crate::utils::{
    fmt_timestamp, id_for_account, maybe_print_json, parse_decimal, parse_timestamp, pretty_table,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::Serialize;

pub fn handle(conn: &mut Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sub)) => add(conn, sub),
        Some(("edit", sub)) => edit(conn, sub),
        Some(("rm", sub)) => rm(conn, sub),
        Some(("lock", sub)) => set_lock(conn, sub, true),
        Some(("unlock", sub)) => set_lock(conn, sub, false),
        Some(("list", sub)) => list(conn, sub),
        _ => Ok(()),
    }
}

/// A validated transaction ready for insertion. The engine assumes role
/// legality; this layer is where the account-role table is enforced.
pub struct Submission {
    pub tx_type: TxType,
    pub timestamp: DateTime<Utc>,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Decimal,
    pub fee_amount: Option<Decimal>,
    pub fee_currency: Option<Currency>,
    pub cost_basis_usd: Option<Decimal>,
    pub proceeds_usd: Option<Decimal>,
    pub purpose: Option<String>,
    pub source: Option<String>,
    pub group_id: Option<String>,
}

/// Account-role legality per transaction type:
///
///   Deposit     External -> any internal     fee matches deposited asset
///   Withdrawal  any internal -> External     fee matches withdrawn asset
///   Transfer    internal -> internal          same currency, BTC fee only
///   Buy         Bank | Exchange USD -> Exchange BTC   USD fee only
///   Sell        Exchange BTC -> Exchange USD          USD fee only
pub fn validate_submission(conn: &Connection, s: &Submission) -> Result<()> {
    if s.amount <= Decimal::ZERO {
        return Err(anyhow!("Amount must be positive, got {}", s.amount));
    }
    let fee = s.fee_amount.unwrap_or(Decimal::ZERO);
    if fee < Decimal::ZERO {
        return Err(anyhow!("Fee must not be negative, got {}", fee));
    }
    if fee > Decimal::ZERO && s.fee_currency.is_none() {
        return Err(anyhow!("fee_currency is required when a fee is present"));
    }

    let dir = AccountDirectory::load(conn)?;
    let from_ccy = dir.currency_of(0, s.from_account_id)?;
    let to_ccy = dir.currency_of(0, s.to_account_id)?;
    let fee_accounts = [ACCT_FEES_USD, ACCT_FEES_BTC];
    if fee_accounts.contains(&s.from_account_id) || fee_accounts.contains(&s.to_account_id) {
        return Err(anyhow!("Fee accounts cannot be a transaction endpoint"));
    }
    if s.from_account_id == s.to_account_id {
        return Err(anyhow!("From and to accounts must differ"));
    }

    match s.tx_type {
        TxType::Deposit => {
            if s.from_account_id != ACCT_EXTERNAL {
                return Err(anyhow!("Deposit must come from the External account"));
            }
            if s.to_account_id == ACCT_EXTERNAL {
                return Err(anyhow!("Deposit must land in an internal account"));
            }
            if fee > Decimal::ZERO && s.fee_currency != Some(to_ccy) {
                return Err(anyhow!(
                    "Deposit fee currency must match the deposited asset ({})",
                    to_ccy
                ));
            }
        }
        TxType::Withdrawal => {
            if s.to_account_id != ACCT_EXTERNAL {
                return Err(anyhow!("Withdrawal must go to the External account"));
            }
            if s.from_account_id == ACCT_EXTERNAL {
                return Err(anyhow!("Withdrawal must come from an internal account"));
            }
            if fee > Decimal::ZERO && s.fee_currency != Some(from_ccy) {
                return Err(anyhow!(
                    "Withdrawal fee currency must match the withdrawn asset ({})",
                    from_ccy
                ));
            }
            if s.purpose.as_deref() == Some("Spent") && s.proceeds_usd.is_none() {
                return Err(anyhow!("proceeds_usd is required for a Spent withdrawal"));
            }
        }
        TxType::Transfer => {
            if s.from_account_id == ACCT_EXTERNAL || s.to_account_id == ACCT_EXTERNAL {
                return Err(anyhow!("Transfer runs between internal accounts"));
            }
            if from_ccy != to_ccy {
                return Err(anyhow!(
                    "Transfer accounts must share a currency ({} vs {})",
                    from_ccy,
                    to_ccy
                ));
            }
            if fee > Decimal::ZERO
                && (s.fee_currency != Some(Currency::Btc) || from_ccy != Currency::Btc)
            {
                return Err(anyhow!("Transfer fees are BTC-only, on BTC transfers"));
            }
        }
        TxType::Buy => {
            if ![ACCT_BANK, ACCT_EXCHANGE_USD].contains(&s.from_account_id) {
                return Err(anyhow!("Buy must be funded from Bank or Exchange USD"));
            }
            if s.to_account_id != ACCT_EXCHANGE_BTC {
                return Err(anyhow!("Buy must land in Exchange BTC"));
            }
            if s.cost_basis_usd.is_none() {
                return Err(anyhow!("cost_basis_usd is required for a Buy"));
            }
            if fee > Decimal::ZERO && s.fee_currency != Some(Currency::Usd) {
                return Err(anyhow!("Buy fees settle in USD"));
            }
        }
        TxType::Sell => {
            if s.from_account_id != ACCT_EXCHANGE_BTC {
                return Err(anyhow!("Sell must draw from Exchange BTC"));
            }
            if s.to_account_id != ACCT_EXCHANGE_USD {
                return Err(anyhow!("Sell proceeds must land in Exchange USD"));
            }
            if s.proceeds_usd.is_none() {
                return Err(anyhow!("proceeds_usd is required for a Sell"));
            }
            if fee > Decimal::ZERO && s.fee_currency != Some(Currency::Usd) {
                return Err(anyhow!("Sell fees settle in USD"));
            }
        }
    }
    Ok(())
}

pub fn insert_submission(conn: &Connection, s: &Submission) -> Result<i64> {
    conn.execute(
        "INSERT INTO transactions(type, timestamp, from_account_id, to_account_id, amount,
                                  fee_amount, fee_currency, cost_basis_usd, proceeds_usd,
                                  purpose, source, group_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            s.tx_type.as_str(),
            fmt_timestamp(&s.timestamp),
            s.from_account_id,
            s.to_account_id,
            s.amount.to_string(),
            s.fee_amount.map(|d| d.to_string()),
            s.fee_currency.map(|c| c.as_str()),
            s.cost_basis_usd.map(|d| d.to_string()),
            s.proceeds_usd.map(|d| d.to_string()),
            s.purpose,
            s.source,
            s.group_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn submission_from_args(conn: &Connection, sub: &clap::ArgMatches) -> Result<Submission> {
    let tx_type = TxType::parse(sub.get_one::<String>("type").unwrap())?;
    let timestamp = parse_timestamp(sub.get_one::<String>("date").unwrap())?;
    let from_account_id = id_for_account(conn, sub.get_one::<String>("from").unwrap())?;
    let to_account_id = id_for_account(conn, sub.get_one::<String>("to").unwrap())?;
    let amount = parse_decimal(sub.get_one::<String>("amount").unwrap())?;
    let fee_amount = sub
        .get_one::<String>("fee")
        .map(|s| parse_decimal(s))
        .transpose()?;
    let fee_currency = sub
        .get_one::<String>("fee-currency")
        .map(|s| Currency::parse(s))
        .transpose()?;
    let cost_basis_usd = sub
        .get_one::<String>("cost-basis")
        .map(|s| parse_decimal(s))
        .transpose()?;
    let proceeds_usd = sub
        .get_one::<String>("proceeds")
        .map(|s| parse_decimal(s))
        .transpose()?;

    Ok(Submission {
        tx_type,
        timestamp,
        from_account_id,
        to_account_id,
        amount,
        fee_amount,
        fee_currency,
        cost_basis_usd,
        proceeds_usd,
        purpose: sub.get_one::<String>("purpose").map(|s| s.trim().to_string()),
        source: sub.get_one::<String>("source").map(|s| s.trim().to_string()),
        group_id: sub.get_one::<String>("group").map(|s| s.trim().to_string()),
    })
}

fn add(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let tx = conn.transaction()?;
    let submission = submission_from_args(&tx, sub)?;
    validate_submission(&tx, &submission)?;
    let id = insert_submission(&tx, &submission)?;
    // The replay sees the new row; an infeasible disposal rolls the insert
    // back along with everything else.
    engine::rebuild_all(&tx)?;
    tx.commit()?;
    println!(
        "Recorded {} #{} of {} on {}",
        submission.tx_type,
        id,
        submission.amount,
        fmt_timestamp(&submission.timestamp)
    );
    Ok(())
}

fn require_unlocked(conn: &Connection, id: i64) -> Result<()> {
    let locked: bool = conn
        .query_row(
            "SELECT is_locked FROM transactions WHERE id=?1",
            params![id],
            |r| r.get(0),
        )
        .map_err(|_| anyhow!("Transaction #{} not found", id))?;
    if locked {
        return Err(anyhow!("Transaction #{} is locked", id));
    }
    Ok(())
}

fn edit(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let id: i64 = sub
        .get_one::<String>("id")
        .unwrap()
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid transaction id"))?;

    let tx = conn.transaction()?;
    require_unlocked(&tx, id)?;

    let mut sets: Vec<String> = Vec::new();
    let mut vals: Vec<String> = Vec::new();
    if let Some(d) = sub.get_one::<String>("date") {
        sets.push("timestamp=?".into());
        vals.push(fmt_timestamp(&parse_timestamp(d)?));
    }
    if let Some(a) = sub.get_one::<String>("amount") {
        sets.push("amount=?".into());
        vals.push(parse_decimal(a)?.to_string());
    }
    if let Some(f) = sub.get_one::<String>("fee") {
        sets.push("fee_amount=?".into());
        vals.push(parse_decimal(f)?.to_string());
    }
    if let Some(c) = sub.get_one::<String>("fee-currency") {
        sets.push("fee_currency=?".into());
        vals.push(Currency::parse(c)?.as_str().to_string());
    }
    if let Some(b) = sub.get_one::<String>("cost-basis") {
        sets.push("cost_basis_usd=?".into());
        vals.push(parse_decimal(b)?.to_string());
    }
    if let Some(p) = sub.get_one::<String>("proceeds") {
        sets.push("proceeds_usd=?".into());
        vals.push(parse_decimal(p)?.to_string());
    }
    if let Some(p) = sub.get_one::<String>("purpose") {
        sets.push("purpose=?".into());
        vals.push(p.trim().to_string());
    }
    if let Some(s) = sub.get_one::<String>("source") {
        sets.push("source=?".into());
        vals.push(s.trim().to_string());
    }
    if let Some(g) = sub.get_one::<String>("group") {
        sets.push("group_id=?".into());
        vals.push(g.trim().to_string());
    }
    if sets.is_empty() {
        return Err(anyhow!("Nothing to edit"));
    }
    sets.push("updated_at=datetime('now')".into());

    let sql = format!(
        "UPDATE transactions SET {} WHERE id={}",
        sets.join(", "),
        id
    );
    let params: Vec<&dyn rusqlite::ToSql> =
        vals.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
    tx.execute(&sql, rusqlite::params_from_iter(params))?;

    engine::rebuild_all(&tx)?;
    tx.commit()?;
    println!("Updated transaction #{}", id);
    Ok(())
}

fn rm(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let id: i64 = sub
        .get_one::<String>("id")
        .unwrap()
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid transaction id"))?;

    let tx = conn.transaction()?;
    require_unlocked(&tx, id)?;
    let n = tx.execute("DELETE FROM transactions WHERE id=?1", params![id])?;
    if n == 0 {
        return Err(anyhow!("Transaction #{} not found", id));
    }
    engine::rebuild_all(&tx)?;
    tx.commit()?;
    println!("Removed transaction #{}", id);
    Ok(())
}

fn set_lock(conn: &Connection, sub: &clap::ArgMatches, locked: bool) -> Result<()> {
    let id: i64 = sub
        .get_one::<String>("id")
        .unwrap()
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid transaction id"))?;
    let n = conn.execute(
        "UPDATE transactions SET is_locked=?1, updated_at=datetime('now') WHERE id=?2",
        params![locked, id],
    )?;
    if n == 0 {
        return Err(anyhow!("Transaction #{} not found", id));
    }
    println!(
        "{} transaction #{}",
        if locked { "Locked" } else { "Unlocked" },
        id
    );
    Ok(())
}

#[derive(Serialize)]
pub struct TransactionRow {
    pub id: i64,
    pub timestamp: String,
    pub tx_type: String,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub fee: String,
    pub realized_gain_usd: String,
    pub holding_period: String,
    pub purpose: String,
    pub locked: bool,
    pub group_id: String,
}

pub fn query_rows(conn: &Connection, sub: &clap::ArgMatches) -> Result<Vec<TransactionRow>> {
    let mut sql = String::from(
        "SELECT t.id, t.timestamp, t.type, fa.name, ta.name, t.amount, t.fee_amount,
                t.fee_currency, t.realized_gain_usd, t.holding_period, t.purpose,
                t.is_locked, t.group_id
         FROM transactions t
         JOIN accounts fa ON t.from_account_id=fa.id
         JOIN accounts ta ON t.to_account_id=ta.id
         WHERE 1=1",
    );
    let mut params_vec: Vec<String> = Vec::new();

    if let Some(t) = sub.get_one::<String>("type") {
        sql.push_str(" AND t.type=?");
        params_vec.push(TxType::parse(t)?.as_str().to_string());
    }
    if let Some(acct) = sub.get_one::<String>("account") {
        sql.push_str(" AND (fa.name=? OR ta.name=?)");
        params_vec.push(acct.trim().into());
        params_vec.push(acct.trim().into());
    }
    if let Some(g) = sub.get_one::<String>("group") {
        sql.push_str(" AND t.group_id=?");
        params_vec.push(g.trim().into());
    }
    sql.push_str(" ORDER BY t.timestamp DESC, t.id DESC");
    if let Some(limit) = sub.get_one::<usize>("limit") {
        sql.push_str(" LIMIT ?");
        params_vec.push(limit.to_string());
    }

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = params_vec
        .iter()
        .map(|s| s as &dyn rusqlite::ToSql)
        .collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(params))?;

    let mut data = Vec::new();
    while let Some(r) = rows.next()? {
        let fee_amount: Option<String> = r.get(6)?;
        let fee_currency: Option<String> = r.get(7)?;
        let fee = match (fee_amount, fee_currency) {
            (Some(a), Some(c)) => format!("{} {}", a, c),
            _ => String::new(),
        };
        let gain: Option<String> = r.get(8)?;
        let holding: Option<String> = r.get(9)?;
        let purpose: Option<String> = r.get(10)?;
        let group_id: Option<String> = r.get(12)?;
        data.push(TransactionRow {
            id: r.get(0)?,
            timestamp: r.get(1)?,
            tx_type: r.get(2)?,
            from: r.get(3)?,
            to: r.get(4)?,
            amount: r.get(5)?,
            fee,
            realized_gain_usd: gain.unwrap_or_default(),
            holding_period: holding.unwrap_or_default(),
            purpose: purpose.unwrap_or_default(),
            locked: r.get(11)?,
            group_id: group_id.unwrap_or_default(),
        });
    }
    Ok(data)
}

fn list(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let json_flag = sub.get_flag("json");
    let jsonl_flag = sub.get_flag("jsonl");
    let data = query_rows(conn, sub)?;
    if !maybe_print_json(json_flag, jsonl_flag, &data)? {
        let rows: Vec<Vec<String>> = data
            .iter()
            .map(|r| {
                vec![
                    r.id.to_string(),
                    r.timestamp.clone(),
                    r.tx_type.clone(),
                    r.from.clone(),
                    r.to.clone(),
                    r.amount.clone(),
                    r.fee.clone(),
                    r.realized_gain_usd.clone(),
                    r.holding_period.clone(),
                    if r.locked { "yes".into() } else { String::new() },
                ]
            })
            .collect();
        println!(
            "{}",
            pretty_table(
                &["Id", "Timestamp", "Type", "From", "To", "Amount", "Fee", "Gain", "Term", "Locked"],
                rows,
            )
        );
    }
    Ok(())
}
