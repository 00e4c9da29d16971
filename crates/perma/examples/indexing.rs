//! Array indexing checks against a fresh pool file.
//!
//! Usage: `cargo run --example indexing -- <pool-file>`
//!
//! Creates the pool, allocates four arrays in one transaction, then runs
//! the indexing checks in a second one. Exits 0 if every check passes;
//! exits non-zero with a diagnostic if the path is missing, the pool
//! cannot be created, or a check fails.

use std::env;
use std::process::ExitCode;

use bytemuck::{Pod, Zeroable};
use perma::prelude::*;
use tracing::{error, info};

const LAYOUT: &str = "indexing.pass";

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Root {
    mutable: PRef<PArray<f64, 3>>,
    constant: PRef<PArray<f64, 3>>,
    empty: PRef<PArray<f64, 0>>,
    empty_const: PRef<PArray<f64, 0>>,
}

fn check(cond: bool, what: &str) -> Result<(), TxError> {
    if cond {
        Ok(())
    } else {
        Err(TxError::failed(format!("check failed: {what}")))
    }
}

fn mutable_case(tx: &mut Transaction<'_>, arr: PRef<PArray<f64, 3>>) -> Result<(), TxError> {
    let mut view = tx.array_mut(arr)?;
    let r1 = view.at_mut(0)?;
    check(*r1 == 1.0, "c[0] == 1")?;
    *r1 = 5.5;
    check(*view.front()? == 5.5, "front() == 5.5")?;

    let r2 = view.at_mut(2)?;
    check(*r2 == 3.5, "c[2] == 3.5")?;
    *r2 = 7.5;
    check(*view.back()? == 7.5, "back() == 7.5")
}

fn constant_case(tx: &Transaction<'_>, arr: PRef<PArray<f64, 3>>) -> Result<(), TxError> {
    let view: ArrayRef<'_, f64, 3> = tx.array(arr)?;
    let r1: &f64 = view.at(0)?;
    check(*r1 == 1.0, "const c[0] == 1")?;
    let r2: &f64 = view.at(2)?;
    check(*r2 == 3.5, "const c[2] == 3.5")
}

fn empty_case(tx: &mut Transaction<'_>, arr: PRef<PArray<f64, 0>>) -> Result<(), TxError> {
    let shared: Result<&f64, ContainerError> = tx.array(arr)?.at(0);
    check(shared.is_err(), "const empty c[0] rejected")?;

    let mut view = tx.array_mut(arr)?;
    check(view.size() == 0, "size() == 0")?;
    if view.size() > 0 {
        let _r1: &mut f64 = view.at_mut(0)?;
    }
    check(view.front_mut().is_err(), "empty front() rejected")?;
    check(view.back_mut().is_err(), "empty back() rejected")
}

fn empty_const_case(tx: &Transaction<'_>, arr: PRef<PArray<f64, 0>>) -> Result<(), TxError> {
    let view: ArrayRef<'_, f64, 0> = tx.array(arr)?;
    check(view.is_empty(), "size() == 0")?;
    let r1: Result<&f64, ContainerError> = view.at(0);
    let r2: Result<&f64, ContainerError> = view.front();
    check(r1.is_err() && r2.is_err(), "const empty access rejected")
}

fn run(pool: &Pool<Root>) -> Result<(), TxError> {
    let root = pool.root();
    pool.run(|tx| {
        let fresh = Root {
            mutable: make_array(tx, [1.0, 2.0, 3.5])?,
            constant: make_array(tx, [1.0, 2.0, 3.5])?,
            empty: make_array(tx, [])?,
            empty_const: make_array(tx, [])?,
        };
        tx.set(root, fresh)
    })?;

    pool.run(|tx| {
        let r = *tx.get(root)?;
        mutable_case(tx, r.mutable)?;
        constant_case(tx, r.constant)?;
        empty_case(tx, r.empty)?;
        empty_const_case(tx, r.empty_const)
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "indexing".into());
    let Some(path) = args.next() else {
        error!("usage: {program} file-name");
        return ExitCode::FAILURE;
    };

    let config = PoolConfig::default().with_mode(0o600);
    let pool = match Pool::<Root>::create(&path, LAYOUT, &config) {
        Ok(pool) => pool,
        Err(e) => {
            error!(path = %path, error = %e, "pool create failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = run(&pool) {
        error!(path = %path, error = %e, "indexing checks failed");
        return ExitCode::FAILURE;
    }
    if let Err(e) = pool.close() {
        error!(path = %path, error = %e, "pool close failed");
        return ExitCode::FAILURE;
    }
    info!(path = %path, "indexing checks passed");
    ExitCode::SUCCESS
}
