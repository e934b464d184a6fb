// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use clap::{arg, Command};

pub fn build_cli() -> Command {
    Command::new("coinclip")
        .about("Bitcoin double-entry ledger, FIFO tax lots, and capital gains")
        .subcommand(Command::new("init").about("Initialize the database and seed accounts"))
        .subcommand(
            Command::new("account")
                .about("Account directory and balances")
                .subcommand(Command::new("list").about("List the fixed account set"))
                .subcommand(
                    Command::new("balances")
                        .about("Per-account balances from ledger entries")
                        .arg(arg!(--json "Output JSON").required(false))
                        .arg(arg!(--jsonl "Output JSON Lines").required(false)),
                ),
        )
        .subcommand(
            Command::new("tx")
                .about("Create, edit, and list transactions")
                .subcommand(
                    Command::new("add")
                        .about("Record a transaction and recalculate")
                        .arg(arg!(--type <TYPE> "Deposit|Withdrawal|Transfer|Buy|Sell").required(true))
                        .arg(arg!(--date <DATE> "YYYY-MM-DD or RFC 3339 timestamp (UTC)").required(true))
                        .arg(arg!(--from <ACCOUNT> "Source account name").required(true))
                        .arg(arg!(--to <ACCOUNT> "Destination account name").required(true))
                        .arg(arg!(--amount <AMOUNT> "Quantity moved, in the source asset").required(true).allow_hyphen_values(true))
                        .arg(arg!(--fee <FEE>).required(false).allow_hyphen_values(true))
                        .arg(arg!(--"fee-currency" <CCY> "USD or BTC").required(false))
                        .arg(arg!(--"cost-basis" <USD> "Required for Buy").required(false).allow_hyphen_values(true))
                        .arg(arg!(--proceeds <USD> "Required for Sell and Spent withdrawals").required(false).allow_hyphen_values(true))
                        .arg(arg!(--purpose <TAG> "e.g. Spent, Gift, Donation, Lost").required(false))
                        .arg(arg!(--source <TAG>).required(false))
                        .arg(arg!(--group <ID> "Link multi-leg transactions").required(false)),
                )
                .subcommand(
                    Command::new("edit")
                        .about("Edit an unlocked transaction and recalculate")
                        .arg(arg!(<id> "Transaction id"))
                        .arg(arg!(--date <DATE>).required(false))
                        .arg(arg!(--amount <AMOUNT>).required(false).allow_hyphen_values(true))
                        .arg(arg!(--fee <FEE>).required(false).allow_hyphen_values(true))
                        .arg(arg!(--"fee-currency" <CCY>).required(false))
                        .arg(arg!(--"cost-basis" <USD>).required(false).allow_hyphen_values(true))
                        .arg(arg!(--proceeds <USD>).required(false).allow_hyphen_values(true))
                        .arg(arg!(--purpose <TAG>).required(false))
                        .arg(arg!(--source <TAG>).required(false))
                        .arg(arg!(--group <ID>).required(false)),
                )
                .subcommand(
                    Command::new("rm")
                        .about("Delete an unlocked transaction and recalculate")
                        .arg(arg!(<id> "Transaction id")),
                )
                .subcommand(
                    Command::new("lock")
                        .about("Protect a transaction from edits")
                        .arg(arg!(<id> "Transaction id")),
                )
                .subcommand(
                    Command::new("unlock")
                        .about("Allow edits again")
                        .arg(arg!(<id> "Transaction id")),
                )
                .subcommand(
                    Command::new("list")
                        .about("List transactions, newest first")
                        .arg(arg!(--type <TYPE>).required(false))
                        .arg(arg!(--account <ACCOUNT>).required(false))
                        .arg(arg!(--group <ID>).required(false))
                        .arg(
                            arg!(--limit <N>)
                                .required(false)
                                .value_parser(clap::value_parser!(usize)),
                        )
                        .arg(arg!(--json "Output JSON").required(false))
                        .arg(arg!(--jsonl "Output JSON Lines").required(false)),
                ),
        )
        .subcommand(
            Command::new("report")
                .about("Realized gains, lots, and point-in-time holdings")
                .subcommand(
                    Command::new("gains")
                        .about("Disposal fragments for a tax year")
                        .arg(arg!(--year <YYYY>).required(true))
                        .arg(arg!(--term <TERM> "short or long").required(false))
                        .arg(arg!(--json "Output JSON").required(false))
                        .arg(arg!(--jsonl "Output JSON Lines").required(false)),
                )
                .subcommand(
                    Command::new("lots")
                        .about("Acquisition lots (open by default)")
                        .arg(arg!(--all "Include fully consumed lots").required(false))
                        .arg(arg!(--json "Output JSON").required(false))
                        .arg(arg!(--jsonl "Output JSON Lines").required(false)),
                )
                .subcommand(
                    Command::new("holdings")
                        .about("Open lots as they stood just before a date")
                        .arg(arg!(--"as-of" <DATE> "YYYY-MM-DD").required(true)),
                ),
        )
        .subcommand(
            Command::new("import")
                .about("Import transactions from CSV")
                .subcommand(
                    Command::new("transactions")
                        .arg(arg!(--path <FILE> "CSV file path").required(true)),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Export transactions or disposal fragments")
                .subcommand(
                    Command::new("transactions")
                        .arg(arg!(--format <FMT> "csv or json").required(true))
                        .arg(arg!(--out <FILE>).required(true)),
                )
                .subcommand(
                    Command::new("disposals")
                        .arg(arg!(--format <FMT> "csv or json").required(true))
                        .arg(arg!(--out <FILE>).required(true)),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Engine policy settings")
                .subcommand(
                    Command::new("transfer-fee-policy")
                        .about("Whether BTC transfer fees are taxable disposals")
                        .arg(arg!(<policy> "taxable or exempt")),
                )
                .subcommand(Command::new("show").about("Show current settings")),
        )
}
