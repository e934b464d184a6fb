// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use coinclip::{cli, commands, db, engine};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::str::FromStr;

fn setup() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    db::init_schema(&mut conn).unwrap();
    conn
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn run_tx(conn: &mut Connection, args: &[&str]) -> anyhow::Result<()> {
    let cli = cli::build_cli();
    let mut full = vec!["coinclip", "tx"];
    full.extend_from_slice(args);
    let matches = cli.get_matches_from(full);
    if let Some(("tx", sub)) = matches.subcommand() {
        commands::tx::handle(conn, sub)
    } else {
        panic!("no tx subcommand");
    }
}

fn add_buy(conn: &mut Connection, date: &str, amount: &str, basis: &str) {
    run_tx(
        conn,
        &[
            "add", "--type", "buy", "--date", date, "--from", "Bank", "--to", "Exchange BTC",
            "--amount", amount, "--cost-basis", basis,
        ],
    )
    .unwrap();
}

fn add_sell(conn: &mut Connection, date: &str, amount: &str, proceeds: &str) {
    run_tx(
        conn,
        &[
            "add", "--type", "sell", "--date", date, "--from", "Exchange BTC", "--to",
            "Exchange USD", "--amount", amount, "--proceeds", proceeds,
        ],
    )
    .unwrap();
}

fn sell_rollup(conn: &Connection, id: i64) -> (Decimal, Decimal, String) {
    conn.query_row(
        "SELECT cost_basis_usd, realized_gain_usd, holding_period FROM transactions WHERE id=?1",
        [id],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        },
    )
    .map(|(b, g, h)| (dec(&b), dec(&g), h))
    .unwrap()
}

#[test]
fn fifo_basic_scenario() {
    let mut conn = setup();
    add_buy(&mut conn, "2024-02-01", "1", "40000");
    add_buy(&mut conn, "2024-03-01", "1", "50000");
    add_sell(&mut conn, "2024-04-01", "1", "60000");

    let (basis, gain, term) = sell_rollup(&conn, 3);
    assert_eq!(basis, dec("40000"));
    assert_eq!(gain, dec("20000"));
    assert_eq!(term, "SHORT");

    // The sell drained the February lot and left March untouched.
    let (rem1, rem2): (String, String) = conn
        .query_row(
            "SELECT a.remaining_btc, b.remaining_btc FROM bitcoin_lots a, bitcoin_lots b
             WHERE a.created_txn_id=1 AND b.created_txn_id=2",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(dec(&rem1), Decimal::ZERO);
    assert_eq!(dec(&rem2), dec("1"));
}

#[test]
fn backdated_buy_reassigns_existing_sell() {
    let mut conn = setup();
    add_buy(&mut conn, "2024-02-01", "1", "40000");
    add_buy(&mut conn, "2024-03-01", "1", "50000");
    add_sell(&mut conn, "2024-04-01", "1", "60000");
    // Backdated to before the whole history; the sell must re-match.
    add_buy(&mut conn, "2024-01-15", "1", "30000");

    let (basis, gain, term) = sell_rollup(&conn, 3);
    assert_eq!(basis, dec("30000"));
    assert_eq!(gain, dec("30000"));
    assert_eq!(term, "SHORT");

    let lot_txn: i64 = conn
        .query_row(
            "SELECT l.created_txn_id FROM lot_disposals d JOIN bitcoin_lots l ON d.lot_id=l.id
             WHERE d.transaction_id=3",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(lot_txn, 4);
}

#[test]
fn partial_lot_split_persists_remainder() {
    let mut conn = setup();
    add_buy(&mut conn, "2024-01-01", "1.0", "20000");
    add_sell(&mut conn, "2024-02-01", "0.3", "9000");

    let (disposed, basis, gain): (String, String, String) = conn
        .query_row(
            "SELECT disposed_btc, disposal_basis_usd, realized_gain_usd FROM lot_disposals",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(dec(&disposed), dec("0.3"));
    assert_eq!(dec(&basis), dec("6000.00"));
    assert_eq!(dec(&gain), dec("3000.00"));

    let remaining: String = conn
        .query_row("SELECT remaining_btc FROM bitcoin_lots", [], |r| r.get(0))
        .unwrap();
    assert_eq!(dec(&remaining), dec("0.7"));
}

#[test]
fn insufficient_disposal_rejects_the_insert() {
    let mut conn = setup();
    add_buy(&mut conn, "2024-01-01", "0.5", "10000");

    let err = run_tx(
        &mut conn,
        &[
            "add", "--type", "sell", "--date", "2024-02-01", "--from", "Exchange BTC", "--to",
            "Exchange USD", "--amount", "0.8", "--proceeds", "30000",
        ],
    )
    .unwrap_err();
    assert!(err.to_string().contains("exceeds open lots"));

    // Nothing persisted: the offending transaction rolled back with the replay.
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 1);
    let remaining: String = conn
        .query_row("SELECT remaining_btc FROM bitcoin_lots", [], |r| r.get(0))
        .unwrap();
    assert_eq!(dec(&remaining), dec("0.5"));
}

#[test]
fn holding_period_boundary_365_vs_366_days() {
    let mut conn = setup();
    add_buy(&mut conn, "2023-01-01", "2", "40000");
    add_sell(&mut conn, "2024-01-01", "1", "30000");
    add_sell(&mut conn, "2024-01-02", "1", "30000");

    let (_, _, term_365) = sell_rollup(&conn, 2);
    let (_, _, term_366) = sell_rollup(&conn, 3);
    assert_eq!(term_365, "SHORT");
    assert_eq!(term_366, "LONG");
}

#[test]
fn double_entry_invariant_holds_per_currency() {
    let mut conn = setup();
    run_tx(
        &mut conn,
        &[
            "add", "--type", "deposit", "--date", "2024-01-01", "--from", "External", "--to",
            "Bank", "--amount", "50000",
        ],
    )
    .unwrap();
    run_tx(
        &mut conn,
        &[
            "add", "--type", "buy", "--date", "2024-01-02", "--from", "Bank", "--to",
            "Exchange BTC", "--amount", "1", "--cost-basis", "40000", "--fee", "25",
            "--fee-currency", "USD",
        ],
    )
    .unwrap();
    run_tx(
        &mut conn,
        &[
            "add", "--type", "transfer", "--date", "2024-01-03", "--from", "Exchange BTC", "--to",
            "Cold Storage", "--amount", "0.5", "--fee", "0.0002", "--fee-currency", "BTC",
        ],
    )
    .unwrap();
    run_tx(
        &mut conn,
        &[
            "add", "--type", "sell", "--date", "2024-01-04", "--from", "Exchange BTC", "--to",
            "Exchange USD", "--amount", "0.25", "--proceeds", "11000", "--fee", "10",
            "--fee-currency", "USD",
        ],
    )
    .unwrap();

    let mut stmt = conn
        .prepare("SELECT transaction_id, currency, amount FROM ledger_entries")
        .unwrap();
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .unwrap();
    use std::collections::HashMap;
    let mut sums: HashMap<(i64, String), Decimal> = HashMap::new();
    for row in rows {
        let (txn, ccy, amt) = row.unwrap();
        *sums.entry((txn, ccy)).or_insert(Decimal::ZERO) += dec(&amt);
    }
    assert!(!sums.is_empty());
    for ((txn, ccy), sum) in sums {
        assert_eq!(sum, Decimal::ZERO, "txn {} unbalanced in {}", txn, ccy);
    }
}

#[test]
fn conservation_invariant_per_lot() {
    let mut conn = setup();
    add_buy(&mut conn, "2024-01-01", "1", "30000");
    add_buy(&mut conn, "2024-02-01", "2", "80000");
    add_sell(&mut conn, "2024-03-01", "1.4", "70000");
    add_sell(&mut conn, "2024-04-01", "0.1", "5000");

    let mut stmt = conn
        .prepare(
            "SELECT l.total_btc, l.remaining_btc, IFNULL(
                 (SELECT GROUP_CONCAT(d.disposed_btc, '|') FROM lot_disposals d WHERE d.lot_id=l.id), '')
             FROM bitcoin_lots l",
        )
        .unwrap();
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .unwrap();
    for row in rows {
        let (total, remaining, disposed) = row.unwrap();
        let disposed_sum: Decimal = disposed
            .split('|')
            .filter(|s| !s.is_empty())
            .map(dec)
            .sum();
        assert_eq!(dec(&total), dec(&remaining) + disposed_sum);
    }
}

fn derived_fingerprint(conn: &Connection) -> Vec<String> {
    let mut out = Vec::new();
    let mut stmt = conn
        .prepare(
            "SELECT transaction_id, account_id, amount, currency, entry_type FROM ledger_entries
             ORDER BY transaction_id, account_id, currency, amount, entry_type",
        )
        .unwrap();
    let rows = stmt
        .query_map([], |r| {
            Ok(format!(
                "e:{}:{}:{}:{}:{}",
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .unwrap();
    for row in rows {
        out.push(row.unwrap());
    }
    let mut stmt = conn
        .prepare(
            "SELECT created_txn_id, acquired_date, total_btc, remaining_btc, cost_basis_usd
             FROM bitcoin_lots ORDER BY acquired_date, created_txn_id",
        )
        .unwrap();
    let rows = stmt
        .query_map([], |r| {
            Ok(format!(
                "l:{}:{}:{}:{}:{}",
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .unwrap();
    for row in rows {
        out.push(row.unwrap());
    }
    let mut stmt = conn
        .prepare(
            "SELECT d.transaction_id, l.created_txn_id, d.disposed_btc, d.disposal_basis_usd,
                    d.proceeds_usd, d.realized_gain_usd, d.holding_period
             FROM lot_disposals d JOIN bitcoin_lots l ON d.lot_id=l.id
             ORDER BY d.transaction_id, l.created_txn_id",
        )
        .unwrap();
    let rows = stmt
        .query_map([], |r| {
            Ok(format!(
                "d:{}:{}:{}:{}:{}:{}:{}",
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
            ))
        })
        .unwrap();
    for row in rows {
        out.push(row.unwrap());
    }
    out
}

#[test]
fn recalculate_all_round_trips_byte_identically() {
    let mut conn = setup();
    add_buy(&mut conn, "2024-01-01", "1", "30000");
    add_buy(&mut conn, "2024-02-01", "2", "80000");
    add_sell(&mut conn, "2024-03-01", "1.5", "75000");

    let first = derived_fingerprint(&conn);
    engine::recalculate_all(&mut conn).unwrap();
    let second = derived_fingerprint(&conn);
    engine::recalculate_all(&mut conn).unwrap();
    let third = derived_fingerprint(&conn);
    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[test]
fn submission_order_does_not_affect_final_state() {
    // Chronological submission on one connection, scrambled on the other.
    let mut a = setup();
    add_buy(&mut a, "2024-01-01", "1", "30000");
    add_buy(&mut a, "2024-02-01", "1", "50000");
    add_sell(&mut a, "2024-03-01", "1.5", "90000");

    let mut b = setup();
    add_buy(&mut b, "2024-02-01", "1", "50000");
    add_buy(&mut b, "2024-01-01", "1", "30000");
    add_sell(&mut b, "2024-03-01", "1.5", "90000");

    // Ids differ between the two histories, so compare on timestamps.
    let fingerprint = |conn: &Connection| -> Vec<String> {
        let mut stmt = conn
            .prepare(
                "SELECT t.timestamp, l.acquired_date, d.disposed_btc, d.disposal_basis_usd,
                        d.realized_gain_usd, d.holding_period
                 FROM lot_disposals d
                 JOIN transactions t ON d.transaction_id=t.id
                 JOIN bitcoin_lots l ON d.lot_id=l.id
                 ORDER BY t.timestamp, l.acquired_date",
            )
            .unwrap();
        let rows = stmt
            .query_map([], |r| {
                Ok(format!(
                    "{}:{}:{}:{}:{}:{}",
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                ))
            })
            .unwrap();
        rows.map(|r| r.unwrap()).collect()
    };
    assert_eq!(fingerprint(&a), fingerprint(&b));
}

#[test]
fn recalculate_from_matches_full_recalculation() {
    let mut conn = setup();
    add_buy(&mut conn, "2024-01-01", "1", "30000");
    add_buy(&mut conn, "2024-02-01", "2", "80000");
    add_sell(&mut conn, "2024-03-01", "1.4", "70000");
    add_sell(&mut conn, "2024-04-01", "0.2", "10000");

    let full = derived_fingerprint(&conn);
    let cutoff = coinclip::utils::parse_timestamp("2024-03-01").unwrap();
    engine::recalculate_from(&mut conn, cutoff).unwrap();
    assert_eq!(derived_fingerprint(&conn), full);
}

#[test]
fn holdings_as_of_reads_without_mutating() {
    let mut conn = setup();
    add_buy(&mut conn, "2024-01-01", "1", "30000");
    add_buy(&mut conn, "2024-02-01", "2", "80000");
    add_sell(&mut conn, "2024-03-01", "1.4", "70000");

    let before = derived_fingerprint(&conn);

    let at_feb = coinclip::utils::parse_timestamp("2024-02-01").unwrap();
    let open = engine::holdings_as_of(&conn, at_feb).unwrap();
    // Only the January lot exists strictly before Feb 1, untouched.
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].created_txn_id, 1);
    assert_eq!(open[0].remaining_btc, dec("1"));

    let at_apr = coinclip::utils::parse_timestamp("2024-04-01").unwrap();
    let open = engine::holdings_as_of(&conn, at_apr).unwrap();
    // Jan lot fully drained by the 1.4 sell; Feb lot keeps the rest.
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].created_txn_id, 2);
    assert_eq!(open[0].remaining_btc, dec("1.6"));

    assert_eq!(derived_fingerprint(&conn), before);
}

#[test]
fn multi_lot_disposal_emits_one_fragment_per_lot() {
    let mut conn = setup();
    add_buy(&mut conn, "2022-01-01", "0.5", "10000");
    add_buy(&mut conn, "2024-02-01", "1", "50000");
    add_sell(&mut conn, "2024-03-01", "1.0", "60000");

    let mut stmt = conn
        .prepare(
            "SELECT l.created_txn_id, d.disposed_btc, d.proceeds_usd, d.holding_period
             FROM lot_disposals d JOIN bitcoin_lots l ON d.lot_id=l.id
             WHERE d.transaction_id=3 ORDER BY l.acquired_date",
        )
        .unwrap();
    let rows: Vec<(i64, String, String, String)> = stmt
        .query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, 1);
    assert_eq!(dec(&rows[0].1), dec("0.5"));
    assert_eq!(dec(&rows[0].2), dec("30000.00"));
    assert_eq!(rows[0].3, "LONG");
    assert_eq!(rows[1].0, 2);
    assert_eq!(dec(&rows[1].1), dec("0.5"));
    assert_eq!(dec(&rows[1].2), dec("30000.00"));
    assert_eq!(rows[1].3, "SHORT");

    // Transaction-level holding period follows the oldest fragment.
    let (_, _, term) = sell_rollup(&conn, 3);
    assert_eq!(term, "LONG");
}

#[test]
fn gifted_deposit_creates_zero_basis_lot() {
    let mut conn = setup();
    run_tx(
        &mut conn,
        &[
            "add", "--type", "deposit", "--date", "2024-01-01", "--from", "External", "--to",
            "Cold Storage", "--amount", "0.5",
        ],
    )
    .unwrap();

    let (total, basis): (String, String) = conn
        .query_row(
            "SELECT total_btc, cost_basis_usd FROM bitcoin_lots",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(dec(&total), dec("0.5"));
    assert_eq!(dec(&basis), Decimal::ZERO);
}
