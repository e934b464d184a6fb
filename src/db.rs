// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;

static APP: Lazy<(&str, &str, &str)> =
    Lazy::new(|| ("com.alphavelocity", "Coinclip", "coinclip"));

// The account directory is fixed and seeded once; the engine never creates
// or mutates accounts. Id 99 is the virtual External account for value
// entering or leaving the tracked system.
pub const ACCT_BANK: i64 = 1;
pub const ACCT_EXCHANGE_USD: i64 = 2;
pub const ACCT_EXCHANGE_BTC: i64 = 3;
pub const ACCT_COLD_STORAGE: i64 = 4;
pub const ACCT_FEES_USD: i64 = 5;
pub const ACCT_FEES_BTC: i64 = 6;
pub const ACCT_EXTERNAL: i64 = 99;

pub fn db_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from(APP.0, APP.1, APP.2)
        .context("Could not determine platform-specific data dir")?;
    let data_dir = proj.data_dir();
    fs::create_dir_all(data_dir).context("Failed to create data dir")?;
    Ok(data_dir.join("coinclip.sqlite"))
}

pub fn open_or_init() -> Result<Connection> {
    let path = db_path()?;
    let mut conn =
        Connection::open(&path).with_context(|| format!("Open DB at {}", path.display()))?;
    init_schema(&mut conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS settings(
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS accounts(
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        currency TEXT NOT NULL CHECK(currency IN ('USD','BTC'))
    );

    CREATE TABLE IF NOT EXISTS transactions(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type TEXT NOT NULL CHECK(type IN ('Deposit','Withdrawal','Transfer','Buy','Sell')),
        timestamp TEXT NOT NULL,
        from_account_id INTEGER NOT NULL,
        to_account_id INTEGER NOT NULL,
        amount TEXT NOT NULL,
        fee_amount TEXT,
        fee_currency TEXT CHECK(fee_currency IN ('USD','BTC')),
        cost_basis_usd TEXT,
        proceeds_usd TEXT,
        realized_gain_usd TEXT,
        holding_period TEXT CHECK(holding_period IN ('SHORT','LONG')),
        purpose TEXT,
        source TEXT,
        is_locked INTEGER NOT NULL DEFAULT 0,
        group_id TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        FOREIGN KEY(from_account_id) REFERENCES accounts(id),
        FOREIGN KEY(to_account_id) REFERENCES accounts(id)
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions(timestamp, id);

    -- Derived state below this line is owned by the recalculation engine:
    -- wiped and rebuilt wholesale, never hand-edited.
    CREATE TABLE IF NOT EXISTS ledger_entries(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        transaction_id INTEGER NOT NULL,
        account_id INTEGER NOT NULL,
        amount TEXT NOT NULL,
        currency TEXT NOT NULL CHECK(currency IN ('USD','BTC')),
        entry_type TEXT NOT NULL CHECK(entry_type IN ('transfer','fee')),
        FOREIGN KEY(transaction_id) REFERENCES transactions(id) ON DELETE CASCADE,
        FOREIGN KEY(account_id) REFERENCES accounts(id)
    );
    CREATE INDEX IF NOT EXISTS idx_ledger_entries_txn ON ledger_entries(transaction_id);
    CREATE INDEX IF NOT EXISTS idx_ledger_entries_account ON ledger_entries(account_id);

    CREATE TABLE IF NOT EXISTS bitcoin_lots(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_txn_id INTEGER NOT NULL UNIQUE,
        acquired_date TEXT NOT NULL,
        total_btc TEXT NOT NULL,
        remaining_btc TEXT NOT NULL,
        cost_basis_usd TEXT NOT NULL,
        FOREIGN KEY(created_txn_id) REFERENCES transactions(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_lots_acquired ON bitcoin_lots(acquired_date, created_txn_id);

    CREATE TABLE IF NOT EXISTS lot_disposals(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        lot_id INTEGER NOT NULL,
        transaction_id INTEGER NOT NULL,
        disposed_btc TEXT NOT NULL,
        disposal_basis_usd TEXT NOT NULL,
        proceeds_usd TEXT NOT NULL,
        realized_gain_usd TEXT NOT NULL,
        holding_period TEXT NOT NULL CHECK(holding_period IN ('SHORT','LONG')),
        FOREIGN KEY(lot_id) REFERENCES bitcoin_lots(id) ON DELETE CASCADE,
        FOREIGN KEY(transaction_id) REFERENCES transactions(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_disposals_txn ON lot_disposals(transaction_id);
    "#,
    )?;
    seed_accounts(conn)?;
    Ok(())
}

fn seed_accounts(conn: &Connection) -> Result<()> {
    let seed: [(i64, &str, &str); 7] = [
        (ACCT_BANK, "Bank", "USD"),
        (ACCT_EXCHANGE_USD, "Exchange USD", "USD"),
        (ACCT_EXCHANGE_BTC, "Exchange BTC", "BTC"),
        (ACCT_COLD_STORAGE, "Cold Storage", "BTC"),
        (ACCT_FEES_USD, "USD Fees", "USD"),
        (ACCT_FEES_BTC, "BTC Fees", "BTC"),
        (ACCT_EXTERNAL, "External", "USD"),
    ];
    for (id, name, ccy) in seed {
        conn.execute(
            "INSERT OR IGNORE INTO accounts(id, name, currency) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, name, ccy],
        )?;
    }
    Ok(())
}
