// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::Result;
use rusqlite::Connection;
use serde_json::json;

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("transactions", sub)) => export_transactions(conn, sub),
        Some(("disposals", sub)) => export_disposals(conn, sub),
        _ => Ok(()),
    }
}

fn export_transactions(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let fmt = sub.get_one::<String>("format").unwrap().to_lowercase();
    let out = sub.get_one::<String>("out").unwrap();

    let mut stmt = conn.prepare(
        "SELECT t.timestamp, t.type, fa.name, ta.name, t.amount, t.fee_amount, t.fee_currency,
                t.cost_basis_usd, t.proceeds_usd, t.realized_gain_usd, t.holding_period,
                t.purpose, t.source, t.group_id
         FROM transactions t
         JOIN accounts fa ON t.from_account_id=fa.id
         JOIN accounts ta ON t.to_account_id=ta.id
         ORDER BY t.timestamp, t.id",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, String>(4)?,
            r.get::<_, Option<String>>(5)?,
            r.get::<_, Option<String>>(6)?,
            r.get::<_, Option<String>>(7)?,
            r.get::<_, Option<String>>(8)?,
            r.get::<_, Option<String>>(9)?,
            r.get::<_, Option<String>>(10)?,
            r.get::<_, Option<String>>(11)?,
            r.get::<_, Option<String>>(12)?,
            r.get::<_, Option<String>>(13)?,
        ))
    })?;

    match fmt.as_str() {
        "csv" => {
            let mut wtr = csv::Writer::from_path(out)?;
            wtr.write_record([
                "timestamp",
                "type",
                "from_account",
                "to_account",
                "amount",
                "fee_amount",
                "fee_currency",
                "cost_basis_usd",
                "proceeds_usd",
                "realized_gain_usd",
                "holding_period",
                "purpose",
                "source",
                "group_id",
            ])?;
            for row in rows {
                let (ts, ty, fa, ta, amt, fee, fcy, basis, proceeds, gain, term, purpose, source, group) =
                    row?;
                wtr.write_record([
                    ts,
                    ty,
                    fa,
                    ta,
                    amt,
                    fee.unwrap_or_default(),
                    fcy.unwrap_or_default(),
                    basis.unwrap_or_default(),
                    proceeds.unwrap_or_default(),
                    gain.unwrap_or_default(),
                    term.unwrap_or_default(),
                    purpose.unwrap_or_default(),
                    source.unwrap_or_default(),
                    group.unwrap_or_default(),
                ])?;
            }
            wtr.flush()?;
        }
        "json" => {
            let mut items = Vec::new();
            for row in rows {
                let (ts, ty, fa, ta, amt, fee, fcy, basis, proceeds, gain, term, purpose, source, group) =
                    row?;
                items.push(json!({
                    "timestamp": ts, "type": ty, "from_account": fa, "to_account": ta,
                    "amount": amt, "fee_amount": fee, "fee_currency": fcy,
                    "cost_basis_usd": basis, "proceeds_usd": proceeds,
                    "realized_gain_usd": gain, "holding_period": term,
                    "purpose": purpose, "source": source, "group_id": group
                }));
            }
            std::fs::write(out, serde_json::to_string_pretty(&items)?)?;
        }
        _ => {
            eprintln!("Unknown format: {} (use csv|json)", fmt);
            return Ok(());
        }
    }
    println!("Exported transactions to {}", out);
    Ok(())
}

/// Disposal fragments with their lot acquisition context: the rows a
/// tax-form generator consumes.
fn export_disposals(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let fmt = sub.get_one::<String>("format").unwrap().to_lowercase();
    let out = sub.get_one::<String>("out").unwrap();

    let mut stmt = conn.prepare(
        "SELECT t.timestamp, l.acquired_date, d.disposed_btc, d.disposal_basis_usd,
                d.proceeds_usd, d.realized_gain_usd, d.holding_period, d.transaction_id, d.lot_id
         FROM lot_disposals d
         JOIN transactions t ON d.transaction_id=t.id
         JOIN bitcoin_lots l ON d.lot_id=l.id
         ORDER BY t.timestamp, t.id, d.id",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, String>(4)?,
            r.get::<_, String>(5)?,
            r.get::<_, String>(6)?,
            r.get::<_, i64>(7)?,
            r.get::<_, i64>(8)?,
        ))
    })?;

    match fmt.as_str() {
        "csv" => {
            let mut wtr = csv::Writer::from_path(out)?;
            wtr.write_record([
                "disposed_at",
                "acquired_at",
                "disposed_btc",
                "disposal_basis_usd",
                "proceeds_usd",
                "realized_gain_usd",
                "holding_period",
                "transaction_id",
                "lot_id",
            ])?;
            for row in rows {
                let (disposed, acquired, btc, basis, proceeds, gain, term, txn, lot) = row?;
                wtr.write_record([
                    disposed,
                    acquired,
                    btc,
                    basis,
                    proceeds,
                    gain,
                    term,
                    txn.to_string(),
                    lot.to_string(),
                ])?;
            }
            wtr.flush()?;
        }
        "json" => {
            let mut items = Vec::new();
            for row in rows {
                let (disposed, acquired, btc, basis, proceeds, gain, term, txn, lot) = row?;
                items.push(json!({
                    "disposed_at": disposed, "acquired_at": acquired, "disposed_btc": btc,
                    "disposal_basis_usd": basis, "proceeds_usd": proceeds,
                    "realized_gain_usd": gain, "holding_period": term,
                    "transaction_id": txn, "lot_id": lot
                }));
            }
            std::fs::write(out, serde_json::to_string_pretty(&items)?)?;
        }
        _ => {
            eprintln!("Unknown format: {} (use csv|json)", fmt);
            return Ok(());
        }
    }
    println!("Exported disposals to {}", out);
    Ok(())
}
