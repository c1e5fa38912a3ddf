//! Self-contained demo: a small stock inventory kept in a file-backed
//! store, closed, and reopened from its command log.
//!
//! Run with: `cargo run --example inventory`
//!
//! Set `RUST_LOG=eventfold_kv=debug` to see flushes and command spans.

use eventfold_kv::{CommandOutcome, CommandTable, KvStore, StoreContext};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// Stock level of one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Stock {
    sku: String,
    on_hand: u32,
}

/// Add units of a product, creating it if needed.
#[derive(Serialize, Deserialize)]
struct Receive {
    sku: String,
    units: u32,
}

/// Remove units of a product.
#[derive(Serialize, Deserialize)]
struct Ship {
    sku: String,
    units: u32,
}

/// Move units between two products, as a ship followed by a receive.
#[derive(Serialize, Deserialize)]
struct Transfer {
    from: String,
    to: String,
    units: u32,
}

#[derive(Debug, thiserror::Error)]
enum StockError {
    #[error("unknown sku {0}")]
    UnknownSku(String),
    #[error("only {on_hand} units of {sku} on hand")]
    Insufficient { sku: String, on_hand: u32 },
    #[error("stock of {0} would overflow")]
    Overflow(String),
}

fn receive(
    store: &mut StoreContext<'_, Stock>,
    cmd: Receive,
) -> Result<CommandOutcome<Stock>, StockError> {
    let on_hand = store.get(&cmd.sku).map_or(0, |s| s.on_hand);
    let on_hand = on_hand
        .checked_add(cmd.units)
        .ok_or_else(|| StockError::Overflow(cmd.sku.clone()))?;
    Ok(CommandOutcome::Replace(Stock {
        sku: cmd.sku,
        on_hand,
    }))
}

fn ship(store: &mut StoreContext<'_, Stock>, cmd: Ship) -> Result<CommandOutcome<Stock>, StockError> {
    let stock = store
        .get(&cmd.sku)
        .ok_or_else(|| StockError::UnknownSku(cmd.sku.clone()))?;
    if stock.on_hand < cmd.units {
        return Err(StockError::Insufficient {
            sku: cmd.sku,
            on_hand: stock.on_hand,
        });
    }
    Ok(CommandOutcome::Replace(Stock {
        sku: cmd.sku,
        on_hand: stock.on_hand - cmd.units,
    }))
}

fn transfer(
    store: &mut StoreContext<'_, Stock>,
    cmd: Transfer,
) -> Result<(), eventfold_kv::ExecuteError> {
    store.execute(Ship {
        sku: cmd.from,
        units: cmd.units,
    })?;
    store.execute(Receive {
        sku: cmd.to,
        units: cmd.units,
    })
}

fn commands() -> CommandTable<Stock> {
    CommandTable::new()
        .command("Receive", receive)
        .command("Ship", ship)
        .command("Transfer", transfer)
}

fn open(path: &std::path::Path) -> Result<KvStore<Stock>, eventfold_kv::OpenError> {
    KvStore::builder(|s: &Stock| s.sku.clone())
        .commands(commands())
        .path(path)
        .flush_interval_secs(1)
        .open()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("inventory.log");

    let store = open(&path)?;
    store.execute(Receive {
        sku: "widget".into(),
        units: 10,
    })?;
    store.execute_event(
        "receive",
        Receive {
            sku: "gadget".into(),
            units: 3,
        },
    )?;
    store.execute(Transfer {
        from: "widget".into(),
        to: "gizmo".into(),
        units: 4,
    })?;

    // Rejected: nothing is logged and nothing changes.
    let err = store
        .execute(Ship {
            sku: "gadget".into(),
            units: 5,
        })
        .expect_err("shipping more than on hand should fail");
    println!("rejected: {err}");

    let err = store
        .execute(Receive {
            sku: "widget".into(),
            units: u32::MAX,
        })
        .expect_err("receiving past u32::MAX should fail");
    println!("rejected: {err}");

    // Kept in memory only: direct writes are not replayed.
    store.add_or_update(Stock {
        sku: "sample".into(),
        on_hand: 1,
    })?;

    let mut before: Vec<Stock> = store.query(|_, s| s.on_hand > 0);
    before.sort_by(|a, b| a.sku.cmp(&b.sku));
    println!("before reopen: {before:?}");
    store.close()?;

    println!("log:\n{}", std::fs::read_to_string(&path)?);

    let reopened = open(&path)?;
    assert_eq!(reopened.get("widget").map(|s| s.on_hand), Some(6));
    assert_eq!(reopened.get("gizmo").map(|s| s.on_hand), Some(4));
    assert_eq!(reopened.get("gadget").map(|s| s.on_hand), Some(3));
    assert!(reopened.get("sample").is_none(), "direct writes are lost");
    println!("after reopen: {} products", reopened.len());

    reopened.close()?;
    Ok(())
}
