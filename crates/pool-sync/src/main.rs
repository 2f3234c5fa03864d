use std::env;
use std::str::FromStr;
use std::sync::Arc;

use anchor_lang::prelude::Pubkey;
use anyhow::{Context, Result};
use tracing::{error, info, warn};

use pool_sync::math::LinearFeeCurve;
use pool_sync::telemetry::init_tracing;
use pool_sync::{AccountFetcher, PoolSynchronizer, Settings, SolanaRpc, SyncView};

fn log_view(view: &SyncView) {
    let readiness = view.readiness;
    if let Some(error) = &view.last_error {
        warn!(%error, "last tier fetch failed");
    }
    let Some(snapshot) = &view.snapshot else {
        info!(?readiness, "waiting for pool data");
        return;
    };
    info!(
        ?readiness,
        tokens = snapshot.tokens.len(),
        total_value_scaled = %snapshot.total_pool_value_scaled,
        share_supply = snapshot.share_supply,
        share_value_scaled = ?snapshot.share_value_scaled,
        "pool snapshot"
    );
    for token in &snapshot.tokens {
        info!(
            mint = %token.mint,
            symbol = %token.symbol,
            value_scaled = %token.value_usd_scaled,
            actual_percent = token.actual_dominance_percent,
            target_percent = token.target_dominance_percent,
            delisted = token.is_delisted,
            price = ?token.price_health,
            deposit_fee_bps = ?token.deposit_fee_bps,
            withdraw_fee_bps = ?token.withdraw_fee_bps,
            user_balance = ?token.user_balance,
            "token"
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing("pool_sync=info");

    let config_path = env::args()
        .nth(1)
        .or_else(|| env::var("POOL_SYNC_CONFIG").ok())
        .unwrap_or_else(|| "pool-sync.toml".to_string());
    let settings = Settings::load(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;
    let pool_config = settings.pool.pool_config()?;

    let rpc = Arc::new(
        SolanaRpc::open(&settings.rpc)
            .await
            .context("failed to open rpc service")?,
    );
    let fetcher = AccountFetcher::from_settings(rpc.clone(), &settings.rpc);
    let fee_curve: LinearFeeCurve = settings.fees;
    let synchronizer = PoolSynchronizer::new(
        fetcher,
        pool_config,
        settings.sync.clone(),
        Arc::new(fee_curve),
    );
    let handle = synchronizer.handle();

    if let Ok(owner) = env::var("POOL_SYNC_OWNER") {
        let owner = Pubkey::from_str(owner.trim()).context("POOL_SYNC_OWNER is not an address")?;
        handle.connect_identity(owner)?;
    }

    let mut updates = handle.subscribe();
    let runner = tokio::spawn(synchronizer.run());
    info!(pool = %pool_config, "synchronizing");

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                if !view.readiness.any_loading() {
                    log_view(&view);
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "failed to listen for ctrl-c");
                }
                info!("shutting down");
                handle.shutdown()?;
                break;
            }
        }
    }

    if let Err(e) = runner.await {
        error!(error = %e, "synchronizer task failed");
    }
    rpc.close().await;
    Ok(())
}
