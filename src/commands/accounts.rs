// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::db::ACCT_EXTERNAL;
use crate::utils::{maybe_print_json, pretty_table};
use anyhow::{Context, Result};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("list", _)) => list(conn),
        Some(("balances", sub)) => balances(conn, sub),
        _ => Ok(()),
    }
}

fn list(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("SELECT id, name, currency FROM accounts ORDER BY id")?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
        ))
    })?;
    let mut data = Vec::new();
    for row in rows {
        let (id, name, ccy) = row?;
        data.push(vec![id.to_string(), name, ccy]);
    }
    println!("{}", pretty_table(&["Id", "Name", "Currency"], data));
    Ok(())
}

#[derive(Serialize)]
pub struct BalanceRow {
    pub account: String,
    pub currency: String,
    pub balance: String,
}

/// Per-account balance: the signed sum of ledger entries by account and
/// currency, summed exactly in Decimal. The External account nets value in
/// and out of the system and carries no balance of interest.
pub fn balance_rows(conn: &Connection) -> Result<Vec<BalanceRow>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.name, e.currency, e.amount
         FROM ledger_entries e JOIN accounts a ON e.account_id=a.id
         WHERE a.id != ?1
         ORDER BY a.id",
    )?;
    let rows = stmt.query_map([ACCT_EXTERNAL], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
        ))
    })?;

    let mut sums: BTreeMap<(i64, String, String), Decimal> = BTreeMap::new();
    for row in rows {
        let (id, name, ccy, amount_s) = row?;
        let amount = Decimal::from_str_exact(&amount_s)
            .with_context(|| format!("Invalid stored amount '{}' for account {}", amount_s, name))?;
        *sums.entry((id, name, ccy)).or_insert(Decimal::ZERO) += amount;
    }

    Ok(sums
        .into_iter()
        .map(|((_, account, currency), bal)| {
            let balance = if currency == "BTC" {
                format!("{:.8}", bal)
            } else {
                format!("{:.2}", bal)
            };
            BalanceRow {
                account,
                currency,
                balance,
            }
        })
        .collect())
}

fn balances(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let json_flag = sub.get_flag("json");
    let jsonl_flag = sub.get_flag("jsonl");
    let data = balance_rows(conn)?;
    if !maybe_print_json(json_flag, jsonl_flag, &data)? {
        let rows = data
            .iter()
            .map(|r| vec![r.account.clone(), r.currency.clone(), r.balance.clone()])
            .collect();
        println!("{}", pretty_table(&["Account", "CCY", "Balance"], rows));
    }
    Ok(())
}
