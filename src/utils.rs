// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::{Decimal, RoundingStrategy};

pub const TIMESTAMP_FMT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parse a UTC timestamp from either a full `YYYY-MM-DDTHH:MM:SSZ` stamp or
/// a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| {
        format!(
            "Invalid timestamp '{}', expected YYYY-MM-DD or RFC 3339",
            s
        )
    })?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()))
}

pub fn fmt_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FMT).to_string()
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

pub fn parse_decimal(s: &str) -> Result<Decimal> {
    s.trim()
        .parse::<Decimal>()
        .with_context(|| format!("Invalid decimal '{}'", s))
}

/// Uniform rounding for USD fragments of lot math: two decimal places,
/// midpoints toward zero, so a split never overstates basis or proceeds.
pub fn round_usd(d: Decimal) -> Decimal {
    d.round_dp_with_strategy(2, RoundingStrategy::MidpointTowardZero)
}

pub fn fmt_btc(d: &Decimal) -> String {
    format!("{:.8}", d)
}

pub fn fmt_usd(d: &Decimal) -> String {
    format!("{:.2}", d)
}

pub fn pretty_table(headers: &[&str], rows: Vec<Vec<String>>) -> Table {
    let mut t = Table::new();
    t.load_preset(UTF8_FULL);
    t.set_header(headers.iter().map(|h| Cell::new(*h)));
    for r in rows {
        t.add_row(r.into_iter().map(Cell::new));
    }
    t
}

pub fn maybe_print_json<T: serde::Serialize>(
    json_flag: bool,
    jsonl_flag: bool,
    v: &T,
) -> Result<bool> {
    if json_flag {
        println!("{}", serde_json::to_string_pretty(v)?);
        return Ok(true);
    }
    if jsonl_flag {
        // If v is an array, stream each element; else stream single line
        let val = serde_json::to_value(v)?;
        if let Some(arr) = val.as_array() {
            for item in arr {
                println!("{}", serde_json::to_string(item)?);
            }
        } else {
            println!("{}", serde_json::to_string(&val)?);
        }
        return Ok(true);
    }
    Ok(false)
}

pub fn id_for_account(conn: &Connection, name: &str) -> Result<i64> {
    let mut stmt = conn.prepare("SELECT id FROM accounts WHERE name=?1")?;
    let id: i64 = stmt
        .query_row(params![name.trim()], |r| r.get(0))
        .with_context(|| format!("Account '{}' not found", name.trim()))?;
    Ok(id)
}

/// Whether a BTC-denominated fee on a Transfer between the user's own
/// accounts counts as a taxable disposal. A policy embedded in settings
/// rather than hardcoded; `taxable` unless configured otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFeePolicy {
    Taxable,
    Exempt,
}

impl TransferFeePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferFeePolicy::Taxable => "taxable",
            TransferFeePolicy::Exempt => "exempt",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "taxable" => Ok(TransferFeePolicy::Taxable),
            "exempt" => Ok(TransferFeePolicy::Exempt),
            other => Err(anyhow!(
                "Unknown transfer fee policy '{}' (use taxable|exempt)",
                other
            )),
        }
    }
}

pub fn get_transfer_fee_policy(conn: &Connection) -> Result<TransferFeePolicy> {
    let v: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key='transfer_fee_policy'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    match v {
        Some(s) => TransferFeePolicy::parse(&s),
        None => Ok(TransferFeePolicy::Taxable),
    }
}

pub fn set_transfer_fee_policy(conn: &Connection, policy: TransferFeePolicy) -> Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES('transfer_fee_policy', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![policy.as_str()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parse_timestamp_accepts_bare_dates() {
        let ts = parse_timestamp("2024-02-01").unwrap();
        assert_eq!(fmt_timestamp(&ts), "2024-02-01T00:00:00Z");
    }

    #[test]
    fn parse_timestamp_accepts_rfc3339() {
        let ts = parse_timestamp("2024-02-01T09:30:00Z").unwrap();
        assert_eq!(fmt_timestamp(&ts), "2024-02-01T09:30:00Z");
    }

    #[test]
    fn round_usd_sends_midpoints_toward_zero() {
        assert_eq!(
            round_usd(Decimal::from_str("10.005").unwrap()),
            Decimal::from_str("10.00").unwrap()
        );
        assert_eq!(
            round_usd(Decimal::from_str("10.006").unwrap()),
            Decimal::from_str("10.01").unwrap()
        );
    }
}
