// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The closed set of transaction types the ledger understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    Deposit,
    Withdrawal,
    Transfer,
    Buy,
    Sell,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "Deposit",
            TxType::Withdrawal => "Withdrawal",
            TxType::Transfer => "Transfer",
            TxType::Buy => "Buy",
            TxType::Sell => "Sell",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "deposit" => Ok(TxType::Deposit),
            "withdrawal" => Ok(TxType::Withdrawal),
            "transfer" => Ok(TxType::Transfer),
            "buy" => Ok(TxType::Buy),
            "sell" => Ok(TxType::Sell),
            other => Err(anyhow!("Unknown transaction type '{}'", other)),
        }
    }
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "BTC")]
    Btc,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Btc => "BTC",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "BTC" => Ok(Currency::Btc),
            other => Err(anyhow!("Unknown currency '{}'", other)),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holding period of a disposed lot fragment: SHORT when held 365 days or
/// fewer, LONG beyond that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldingPeriod {
    #[serde(rename = "SHORT")]
    Short,
    #[serde(rename = "LONG")]
    Long,
}

impl HoldingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldingPeriod::Short => "SHORT",
            HoldingPeriod::Long => "LONG",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "SHORT" => Ok(HoldingPeriod::Short),
            "LONG" => Ok(HoldingPeriod::Long),
            other => Err(anyhow!("Unknown holding period '{}'", other)),
        }
    }
}

impl std::fmt::Display for HoldingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub currency: Currency,
}

/// A stored transaction, the only entity external callers create directly.
/// The computed fields (`cost_basis_usd` on disposals, `realized_gain_usd`,
/// `holding_period`) are written back by the recalculation engine, never by
/// callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub tx_type: TxType,
    pub timestamp: DateTime<Utc>,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Decimal,
    pub fee_amount: Option<Decimal>,
    pub fee_currency: Option<Currency>,
    pub cost_basis_usd: Option<Decimal>,
    pub proceeds_usd: Option<Decimal>,
    pub realized_gain_usd: Option<Decimal>,
    pub holding_period: Option<HoldingPeriod>,
    pub purpose: Option<String>,
    pub source: Option<String>,
    pub is_locked: bool,
    pub group_id: Option<String>,
}

impl Transaction {
    pub fn fee(&self) -> Decimal {
        self.fee_amount.unwrap_or(Decimal::ZERO)
    }

    pub fn has_btc_fee(&self) -> bool {
        self.fee() > Decimal::ZERO && self.fee_currency == Some(Currency::Btc)
    }
}

/// One signed posting owned by a transaction. Negative amounts are outflows,
/// positive amounts inflows; per transaction the amounts sum to zero within
/// each currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub transaction_id: i64,
    pub account_id: i64,
    pub amount: Decimal,
    pub currency: Currency,
    pub entry_type: String,
}

/// A batch of BTC acquired at one time and cost basis, consumed oldest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinLot {
    pub id: i64,
    pub created_txn_id: i64,
    pub acquired_date: DateTime<Utc>,
    pub total_btc: Decimal,
    pub remaining_btc: Decimal,
    pub cost_basis_usd: Decimal,
}

/// The fraction of one lot consumed by one disposing transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotDisposal {
    pub id: i64,
    pub lot_id: i64,
    pub transaction_id: i64,
    pub disposed_btc: Decimal,
    pub disposal_basis_usd: Decimal,
    pub proceeds_usd: Decimal,
    pub realized_gain_usd: Decimal,
    pub holding_period: HoldingPeriod,
}
