// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::engine;
use crate::models::HoldingPeriod;
use crate::utils::{
    fmt_btc, fmt_timestamp, fmt_usd, maybe_print_json, parse_timestamp, pretty_table,
};
use anyhow::{Context, Result};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("gains", sub)) => gains(conn, sub),
        Some(("lots", sub)) => lots(conn, sub),
        Some(("holdings", sub)) => holdings(conn, sub),
        _ => Ok(()),
    }
}

#[derive(Serialize)]
pub struct GainRow {
    pub disposed: String,
    pub tx_type: String,
    pub acquired: String,
    pub disposed_btc: String,
    pub basis_usd: String,
    pub proceeds_usd: String,
    pub gain_usd: String,
    pub term: String,
}

/// Disposal fragments for a tax year, straight from the lot_disposals table
/// (the fragment rows are the source of truth for reporting, not the
/// transaction-level rollups).
pub fn gain_rows(conn: &Connection, year: &str, term: Option<HoldingPeriod>) -> Result<Vec<GainRow>> {
    let mut sql = String::from(
        "SELECT t.timestamp, t.type, l.acquired_date, d.disposed_btc,
                d.disposal_basis_usd, d.proceeds_usd, d.realized_gain_usd, d.holding_period
         FROM lot_disposals d
         JOIN transactions t ON d.transaction_id=t.id
         JOIN bitcoin_lots l ON d.lot_id=l.id
         WHERE substr(t.timestamp,1,4)=?1",
    );
    if term.is_some() {
        sql.push_str(" AND d.holding_period=?2");
    }
    sql.push_str(" ORDER BY t.timestamp, t.id, d.id");

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok(GainRow {
            disposed: r.get(0)?,
            tx_type: r.get(1)?,
            acquired: r.get(2)?,
            disposed_btc: r.get(3)?,
            basis_usd: r.get(4)?,
            proceeds_usd: r.get(5)?,
            gain_usd: r.get(6)?,
            term: r.get(7)?,
        })
    };
    let rows = match term {
        Some(t) => stmt.query_map(rusqlite::params![year, t.as_str()], map_row)?,
        None => stmt.query_map(rusqlite::params![year], map_row)?,
    };

    let mut data = Vec::new();
    for row in rows {
        data.push(row?);
    }
    Ok(data)
}

fn gains(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let json_flag = sub.get_flag("json");
    let jsonl_flag = sub.get_flag("jsonl");
    let year = sub.get_one::<String>("year").unwrap().trim().to_string();
    let term = sub
        .get_one::<String>("term")
        .map(|s| HoldingPeriod::parse(s))
        .transpose()?;

    let data = gain_rows(conn, &year, term)?;
    if maybe_print_json(json_flag, jsonl_flag, &data)? {
        return Ok(());
    }

    let mut total_basis = Decimal::ZERO;
    let mut total_proceeds = Decimal::ZERO;
    let mut total_gain = Decimal::ZERO;
    let mut rows = Vec::new();
    for r in &data {
        total_basis += Decimal::from_str_exact(&r.basis_usd)
            .with_context(|| format!("Invalid stored basis '{}'", r.basis_usd))?;
        total_proceeds += Decimal::from_str_exact(&r.proceeds_usd)
            .with_context(|| format!("Invalid stored proceeds '{}'", r.proceeds_usd))?;
        total_gain += Decimal::from_str_exact(&r.gain_usd)
            .with_context(|| format!("Invalid stored gain '{}'", r.gain_usd))?;
        rows.push(vec![
            r.disposed.clone(),
            r.tx_type.clone(),
            r.acquired.clone(),
            r.disposed_btc.clone(),
            r.basis_usd.clone(),
            r.proceeds_usd.clone(),
            r.gain_usd.clone(),
            r.term.clone(),
        ]);
    }
    println!(
        "{}",
        pretty_table(
            &["Disposed", "Type", "Acquired", "BTC", "Basis", "Proceeds", "Gain", "Term"],
            rows,
        )
    );
    println!(
        "Total for {}: basis {} proceeds {} gain {}",
        year,
        fmt_usd(&total_basis),
        fmt_usd(&total_proceeds),
        fmt_usd(&total_gain)
    );
    Ok(())
}

#[derive(Serialize)]
pub struct LotRow {
    pub id: i64,
    pub created_txn_id: i64,
    pub acquired: String,
    pub total_btc: String,
    pub remaining_btc: String,
    pub cost_basis_usd: String,
}

pub fn lot_rows(conn: &Connection, include_closed: bool) -> Result<Vec<LotRow>> {
    let mut sql = String::from(
        "SELECT id, created_txn_id, acquired_date, total_btc, remaining_btc, cost_basis_usd
         FROM bitcoin_lots",
    );
    if !include_closed {
        sql.push_str(" WHERE CAST(remaining_btc AS REAL) > 0");
    }
    sql.push_str(" ORDER BY acquired_date, created_txn_id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |r| {
        Ok(LotRow {
            id: r.get(0)?,
            created_txn_id: r.get(1)?,
            acquired: r.get(2)?,
            total_btc: r.get(3)?,
            remaining_btc: r.get(4)?,
            cost_basis_usd: r.get(5)?,
        })
    })?;
    let mut data = Vec::new();
    for row in rows {
        data.push(row?);
    }
    Ok(data)
}

fn lots(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let json_flag = sub.get_flag("json");
    let jsonl_flag = sub.get_flag("jsonl");
    let include_closed = sub.get_flag("all");
    let data = lot_rows(conn, include_closed)?;
    if !maybe_print_json(json_flag, jsonl_flag, &data)? {
        let rows = data
            .iter()
            .map(|r| {
                vec![
                    r.id.to_string(),
                    r.created_txn_id.to_string(),
                    r.acquired.clone(),
                    r.total_btc.clone(),
                    r.remaining_btc.clone(),
                    r.cost_basis_usd.clone(),
                ]
            })
            .collect();
        println!(
            "{}",
            pretty_table(
                &["Lot", "Txn", "Acquired", "Total BTC", "Remaining", "Basis USD"],
                rows,
            )
        );
    }
    Ok(())
}

fn holdings(conn: &Connection, sub: &clap::ArgMatches) -> Result<()> {
    let cutoff = parse_timestamp(sub.get_one::<String>("as-of").unwrap())?;
    let open = engine::holdings_as_of(conn, cutoff)?;

    let mut total_btc = Decimal::ZERO;
    let mut rows = Vec::new();
    for lot in &open {
        total_btc += lot.remaining_btc;
        // Remaining basis follows the still-open fraction of the lot.
        let open_basis = crate::utils::round_usd(
            lot.cost_basis_usd * lot.remaining_btc / lot.total_btc,
        );
        rows.push(vec![
            lot.created_txn_id.to_string(),
            fmt_timestamp(&lot.acquired_date),
            fmt_btc(&lot.total_btc),
            fmt_btc(&lot.remaining_btc),
            fmt_usd(&open_basis),
        ]);
    }
    println!(
        "{}",
        pretty_table(
            &["Txn", "Acquired", "Total BTC", "Remaining", "Open Basis USD"],
            rows,
        )
    );
    println!(
        "Open BTC as of {}: {}",
        fmt_timestamp(&cutoff),
        fmt_btc(&total_btc)
    );
    Ok(())
}
