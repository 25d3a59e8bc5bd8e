//! Subcommand definitions and handlers

use std::io::Write;

use anyhow::Context;
use clap::Subcommand;
use tokio::sync::broadcast::error::TryRecvError;

use escrow_ledger::{
    format_ether, parse_ether, AccountId, EscrowNode, EscrowRecord, FundsRail, LedgerEventKind,
};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Deposit ether into a new escrow.
    Create {
        /// Depositor account (pays the deposit).
        #[arg(long)]
        from: String,
        /// Account allowed to approve the release.
        #[arg(long)]
        arbiter: String,
        /// Account that receives the funds on approval.
        #[arg(long)]
        beneficiary: String,
        /// Deposit in ether, e.g. `1` or `0.25`.
        #[arg(long)]
        value: String,
    },

    /// Approve an escrow and release its funds to the beneficiary.
    Approve {
        /// Caller account; must be the escrow's arbiter (exact match).
        #[arg(long)]
        from: String,
        #[arg(long)]
        id: u64,
    },

    /// Show one escrow.
    Show {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        json: bool,
    },

    /// List all escrows.
    List {
        /// Print the most recent escrow first.
        #[arg(long)]
        newest_first: bool,
        #[arg(long)]
        json: bool,
    },

    /// Print an account's balance in ether.
    Balance { account: String },

    /// Print the total held in custody.
    Custody,

    /// Credit a development account with ether.
    Mint {
        #[arg(long)]
        account: String,
        #[arg(long)]
        amount: String,
    },

    /// Make an account refuse incoming transfers (or accept them again).
    RejectIncoming {
        account: String,
        /// Accept transfers again.
        #[arg(long)]
        off: bool,
    },

    /// Check the custody invariant.
    Health,
}

/// Run one command, then print the events it committed
pub async fn execute<W: Write>(command: Command, node: &EscrowNode, out: &mut W) -> anyhow::Result<()> {
    let mut events = node.subscribe();

    dispatch(command, node, out).await?;

    loop {
        match events.try_recv() {
            Ok(event) => {
                let line = match event.kind {
                    LedgerEventKind::Created(id) => format!("event: Created({})", id),
                    LedgerEventKind::Approved(id) => format!("event: Approved({})", id),
                };
                writeln!(out, "{}", line)?;
            }
            Err(TryRecvError::Lagged(missed)) => {
                writeln!(out, "event: {} events dropped", missed)?;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    Ok(())
}

async fn dispatch<W: Write>(command: Command, node: &EscrowNode, out: &mut W) -> anyhow::Result<()> {
    match command {
        Command::Create {
            from,
            arbiter,
            beneficiary,
            value,
        } => {
            let value = parse_ether(&value)?;
            let id = node
                .create(&from.into(), &arbiter.into(), &beneficiary.into(), value)
                .await
                .context("create failed")?;
            writeln!(out, "created escrow {}", id)?;
        }

        Command::Approve { from, id } => {
            node.approve(&from.into(), id)
                .await
                .with_context(|| format!("approve of escrow {} failed", id))?;
            writeln!(out, "approved escrow {}", id)?;
        }

        Command::Show { id, json } => {
            let record = node.get_record(id).await?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&record)?)?;
            } else {
                write_record(out, &record)?;
            }
        }

        Command::List { newest_first, json } => {
            let mut records = node.list_records().await;
            if newest_first {
                records.reverse();
            }

            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
            } else if records.is_empty() {
                writeln!(out, "no escrows")?;
            } else {
                for record in &records {
                    write_record(out, record)?;
                }
            }
        }

        Command::Balance { account } => {
            let balance = node.balance_of(&account.into()).await?;
            writeln!(out, "{} ETH", format_ether(balance))?;
        }

        Command::Custody => {
            let custody = node.ledger().custody_balance().await;
            writeln!(
                out,
                "{} ETH held in {}",
                format_ether(custody),
                node.bank().custody_account()
            )?;
        }

        Command::Mint { account, amount } => {
            let amount = parse_ether(&amount)?;
            let balance = node.mint(&AccountId::from(account.as_str()), amount).await?;
            writeln!(out, "{}: {} ETH", account, format_ether(balance))?;
        }

        Command::RejectIncoming { account, off } => {
            node.set_rejects_incoming(&account.as_str().into(), !off)
                .await?;
            let state = if off { "accepts" } else { "rejects" };
            writeln!(out, "{} now {} incoming transfers", account, state)?;
        }

        Command::Health => {
            let health = node.health_check().await?;
            if health.healthy {
                writeln!(out, "healthy")?;
            } else {
                for issue in &health.issues {
                    writeln!(out, "issue: {}", issue)?;
                }
                anyhow::bail!("ledger is unhealthy");
            }
        }
    }

    Ok(())
}

fn write_record<W: Write>(out: &mut W, record: &EscrowRecord) -> std::io::Result<()> {
    let status = if record.is_approved { "approved" } else { "pending" };
    writeln!(
        out,
        "#{} [{}] {} ETH  depositor={} arbiter={} beneficiary={}",
        record.id,
        status,
        format_ether(record.amount),
        record.depositor,
        record.arbiter,
        record.beneficiary
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_ledger::{LedgerConfig, LedgerError};

    async fn node_in(dir: &std::path::Path) -> EscrowNode {
        let config = LedgerConfig {
            data_dir: dir.to_path_buf(),
            ..LedgerConfig::default()
        };
        EscrowNode::new(&config).await.unwrap()
    }

    async fn run(node: &EscrowNode, command: Command) -> anyhow::Result<String> {
        let mut out = Vec::new();
        execute(command, node, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_create_and_approve_across_restarts() {
        let dir = tempfile::tempdir().unwrap();

        let node = node_in(dir.path()).await;
        run(
            &node,
            Command::Mint {
                account: "0xAlice".into(),
                amount: "3".into(),
            },
        )
        .await
        .unwrap();
        let output = run(
            &node,
            Command::Create {
                from: "0xAlice".into(),
                arbiter: "0xArbiter".into(),
                beneficiary: "0xBob".into(),
                value: "1".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(output, "created escrow 0\nevent: Created(0)\n");
        drop(node);

        let node = node_in(dir.path()).await;
        let output = run(
            &node,
            Command::Approve {
                from: "0xArbiter".into(),
                id: 0,
            },
        )
        .await
        .unwrap();
        assert_eq!(output, "approved escrow 0\nevent: Approved(0)\n");

        let output = run(&node, Command::Balance { account: "0xBob".into() })
            .await
            .unwrap();
        assert_eq!(output, "1 ETH\n");

        let output = run(&node, Command::Health).await.unwrap();
        assert_eq!(output, "healthy\n");
    }

    #[tokio::test]
    async fn test_approve_by_lowercased_arbiter_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let node = node_in(dir.path()).await;
        node.mint(&"0xAlice".into(), 10).await.unwrap();
        node.create(&"0xAlice".into(), &"0xArbiter".into(), &"0xBob".into(), 10)
            .await
            .unwrap();

        let err = run(
            &node,
            Command::Approve {
                from: "0xarbiter".into(),
                id: 0,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let node = node_in(dir.path()).await;
        for _ in 0..3 {
            node.create(&"0xAlice".into(), &"0xArbiter".into(), &"0xBob".into(), 0)
                .await
                .unwrap();
        }

        let output = run(
            &node,
            Command::List {
                newest_first: true,
                json: false,
            },
        )
        .await
        .unwrap();
        let ids: Vec<&str> = output
            .lines()
            .map(|line| line.split_whitespace().next().unwrap())
            .collect();
        assert_eq!(ids, vec!["#2", "#1", "#0"]);
    }

    #[tokio::test]
    async fn test_custody_account_cannot_deposit() {
        let dir = tempfile::tempdir().unwrap();
        let node = node_in(dir.path()).await;

        let err = run(
            &node,
            Command::Create {
                from: "escrow-ledger".into(),
                arbiter: "0xMallory".into(),
                beneficiary: "0xMallory".into(),
                value: "0".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::TransferFailure(_))
        ));

        let output = run(&node, Command::Health).await.unwrap();
        assert_eq!(output, "healthy\n");
    }

    #[tokio::test]
    async fn test_show_unknown_escrow() {
        let dir = tempfile::tempdir().unwrap();
        let node = node_in(dir.path()).await;

        let err = run(&node, Command::Show { id: 9, json: false })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::InvalidId(9))
        ));
    }
}
