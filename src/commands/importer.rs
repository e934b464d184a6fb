// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::commands::tx::{insert_submission, validate_submission, Submission};
use crate::engine;
use crate::models::{Currency, TxType};
use crate::utils::{id_for_account, parse_decimal, parse_timestamp};
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use rusqlite::Connection;
use std::collections::{hash_map::Entry, HashMap};

pub fn handle(conn: &mut Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("transactions", sub)) => import_transactions(conn, sub),
        _ => Ok(()),
    }
}

/// Expected columns: timestamp, type, from_account, to_account, amount,
/// fee_amount, fee_currency, cost_basis_usd, proceeds_usd, purpose, source,
/// group_id. The batch is all-or-nothing: every row is validated and the
/// whole history replayed once before anything commits.
fn import_transactions(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let path = sub.get_one::<String>("path").unwrap().trim();
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Open CSV {}", path))?;

    let tx = conn.transaction()?;
    let mut account_cache: HashMap<String, i64> = HashMap::new();
    let mut imported = 0usize;

    for (i, result) in rdr.records().enumerate() {
        let rec = result?;
        let line = i + 2; // header is line 1
        let get = |idx: usize| rec.get(idx).map(|s| s.trim()).unwrap_or("");
        let opt = |idx: usize| {
            rec.get(idx)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };

        let timestamp = parse_timestamp(get(0))
            .with_context(|| format!("Row {}: invalid timestamp '{}'", line, get(0)))?;
        let tx_type = TxType::parse(get(1))
            .with_context(|| format!("Row {}: invalid type '{}'", line, get(1)))?;

        let mut account_id = |name: &str| -> Result<i64> {
            match account_cache.entry(name.to_string()) {
                Entry::Occupied(entry) => Ok(*entry.get()),
                Entry::Vacant(entry) => {
                    let id = id_for_account(&tx, name)?;
                    Ok(*entry.insert(id))
                }
            }
        };
        let from_account_id = account_id(get(2))
            .with_context(|| format!("Row {}: unknown from account '{}'", line, get(2)))?;
        let to_account_id = account_id(get(3))
            .with_context(|| format!("Row {}: unknown to account '{}'", line, get(3)))?;

        let amount = parse_decimal(get(4))
            .with_context(|| format!("Row {}: invalid amount '{}'", line, get(4)))?;
        let fee_amount = opt(5)
            .map(|s| parse_decimal(&s))
            .transpose()
            .with_context(|| format!("Row {}: invalid fee", line))?;
        let fee_currency = opt(6)
            .map(|s| Currency::parse(&s))
            .transpose()
            .with_context(|| format!("Row {}: invalid fee currency", line))?;
        let cost_basis_usd = opt(7)
            .map(|s| parse_decimal(&s))
            .transpose()
            .with_context(|| format!("Row {}: invalid cost basis", line))?;
        let proceeds_usd = opt(8)
            .map(|s| parse_decimal(&s))
            .transpose()
            .with_context(|| format!("Row {}: invalid proceeds", line))?;

        let submission = Submission {
            tx_type,
            timestamp,
            from_account_id,
            to_account_id,
            amount,
            fee_amount,
            fee_currency,
            cost_basis_usd,
            proceeds_usd,
            purpose: opt(9),
            source: opt(10),
            group_id: opt(11),
        };
        validate_submission(&tx, &submission).with_context(|| format!("Row {}", line))?;
        insert_submission(&tx, &submission)?;
        imported += 1;
    }

    engine::rebuild_all(&tx)?;
    tx.commit()?;
    println!("Imported {} transactions from {}", imported, path);
    Ok(())
}
