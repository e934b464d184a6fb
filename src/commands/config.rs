// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::engine;
use crate::utils::{get_transfer_fee_policy, set_transfer_fee_policy, TransferFeePolicy};
use anyhow::Result;
use rusqlite::Connection;

pub fn handle(conn: &mut Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("transfer-fee-policy", sub)) => transfer_fee_policy(conn, sub),
        Some(("show", _)) => show(conn),
        _ => Ok(()),
    }
}

fn show(conn: &Connection) -> Result<()> {
    let policy = get_transfer_fee_policy(conn)?;
    println!("transfer_fee_policy = {}", policy.as_str());
    Ok(())
}

/// Changing the policy changes which transfers dispose lots, so the whole
/// history is replayed under the new setting in the same transaction.
fn transfer_fee_policy(conn: &mut Connection, sub: &clap::ArgMatches) -> Result<()> {
    let policy = TransferFeePolicy::parse(sub.get_one::<String>("policy").unwrap())?;
    let tx = conn.transaction()?;
    set_transfer_fee_policy(&tx, policy)?;
    engine::rebuild_all(&tx)?;
    tx.commit()?;
    println!("Set transfer_fee_policy = {}", policy.as_str());
    Ok(())
}
