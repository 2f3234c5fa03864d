pub mod derive;
pub mod loaders;
pub mod tier;

pub use derive::*;
pub use loaders::{PublicPoolState, PublicTokenState, UserBalances};
pub use tier::*;

use std::sync::Arc;

use anchor_lang::prelude::Pubkey;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::errors::SyncError;
use crate::fetcher::AccountFetcher;
use crate::math::FeeCurve;
use crate::rpc::AccountNotification;
use crate::state::OracleAggregator;
use crate::subscriptions::SubscriptionRegistry;
use crate::throttle::{Throttle, ThrottleDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub public: TierStatus,
    pub oracle: TierStatus,
    pub user: TierStatus,
}

impl Readiness {
    pub fn status(&self, tier: Tier) -> TierStatus {
        match tier {
            Tier::Public => self.public,
            Tier::Oracle => self.oracle,
            Tier::User => self.user,
        }
    }

    pub fn any_loading(&self) -> bool {
        Tier::ALL
            .iter()
            .any(|tier| self.status(*tier) == TierStatus::Loading)
    }
}

/// What consumers observe: the latest consistent snapshot, tier readiness,
/// and the most recent fetch error.
#[derive(Debug, Clone, Default)]
pub struct SyncView {
    pub snapshot: Option<Arc<ProcessedSnapshot>>,
    pub readiness: Readiness,
    pub last_error: Option<SyncError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCommand {
    RefreshTier(Tier),
    /// Targeted refresh after a confirmed transaction on this mint
    RefreshMint(Pubkey),
    ConnectIdentity(Pubkey),
    DisconnectIdentity,
    /// Point the synchronizer at another pool config account
    SetPoolConfig(Pubkey),
    Shutdown,
}

/// Cloneable handle to a running [`PoolSynchronizer`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<SyncCommand>,
    view: watch::Receiver<SyncView>,
}

impl SyncHandle {
    pub fn view(&self) -> SyncView {
        self.view.borrow().clone()
    }

    pub fn snapshot(&self) -> Option<Arc<ProcessedSnapshot>> {
        self.view.borrow().snapshot.clone()
    }

    /// Receiver notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.view.clone()
    }

    fn send(&self, command: SyncCommand) -> Result<(), SyncError> {
        self.commands.send(command).map_err(|_| SyncError::Stopped)
    }

    pub fn refresh(&self, tier: Tier) -> Result<(), SyncError> {
        self.send(SyncCommand::RefreshTier(tier))
    }

    pub fn refresh_mint(&self, mint: Pubkey) -> Result<(), SyncError> {
        self.send(SyncCommand::RefreshMint(mint))
    }

    pub fn connect_identity(&self, owner: Pubkey) -> Result<(), SyncError> {
        self.send(SyncCommand::ConnectIdentity(owner))
    }

    pub fn disconnect_identity(&self) -> Result<(), SyncError> {
        self.send(SyncCommand::DisconnectIdentity)
    }

    pub fn set_pool_config(&self, address: Pubkey) -> Result<(), SyncError> {
        self.send(SyncCommand::SetPoolConfig(address))
    }

    pub fn shutdown(&self) -> Result<(), SyncError> {
        self.send(SyncCommand::Shutdown)
    }
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Keeps the public, oracle and user tiers in sync with the ledger and
/// publishes a derived [`ProcessedSnapshot`] whenever they are consistent.
///
/// Everything runs on one task: commands, push notifications and deferred
/// refreshes are handled in turn by [`PoolSynchronizer::run`].
pub struct PoolSynchronizer {
    fetcher: AccountFetcher,
    settings: SyncSettings,
    fee_curve: Arc<dyn FeeCurve>,
    clock: Clock,
    pool_config: Pubkey,
    identity: Option<Pubkey>,
    oracle_address: Option<Pubkey>,

    public: TierState<PublicPoolState>,
    oracle: TierState<OracleAggregator>,
    user: TierState<UserBalances>,
    snapshot: Option<Arc<ProcessedSnapshot>>,
    last_error: Option<SyncError>,

    registry: SubscriptionRegistry<Tier>,
    throttle: Throttle<Pubkey>,
    notifications_tx: mpsc::UnboundedSender<AccountNotification>,
    notifications_rx: mpsc::UnboundedReceiver<AccountNotification>,
    commands_tx: mpsc::UnboundedSender<SyncCommand>,
    commands_rx: mpsc::UnboundedReceiver<SyncCommand>,
    view_tx: watch::Sender<SyncView>,
}

impl PoolSynchronizer {
    pub fn new(
        fetcher: AccountFetcher,
        pool_config: Pubkey,
        settings: SyncSettings,
        fee_curve: Arc<dyn FeeCurve>,
    ) -> Self {
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(SyncView::default());
        let throttle = Throttle::new(settings.throttle_interval());

        Self {
            fetcher,
            settings,
            fee_curve,
            clock: Arc::new(unix_now),
            pool_config,
            identity: None,
            oracle_address: None,
            public: TierState::new(Tier::Public),
            oracle: TierState::new(Tier::Oracle),
            user: TierState::new(Tier::User),
            snapshot: None,
            last_error: None,
            registry: SubscriptionRegistry::new(),
            throttle,
            notifications_tx,
            notifications_rx,
            commands_tx,
            commands_rx,
            view_tx,
        }
    }

    /// Replaces the wall clock used for price freshness.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            commands: self.commands_tx.clone(),
            view: self.view_tx.subscribe(),
        }
    }

    pub fn pool_config(&self) -> Pubkey {
        self.pool_config
    }

    pub fn readiness(&self) -> Readiness {
        Readiness {
            public: self.public.status(),
            oracle: self.oracle.status(),
            user: self.user.status(),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<ProcessedSnapshot>> {
        self.snapshot.clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    pub fn subscribed_accounts(&self, tier: Tier) -> Vec<Pubkey> {
        self.registry.addresses(tier)
    }

    /// Initial load, then the event loop until shutdown.
    pub async fn run(mut self) {
        self.start().await;
        loop {
            let deadline = self.throttle.next_deadline();
            tokio::select! {
                command = self.commands_rx.recv() => {
                    match command {
                        Some(SyncCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                Some(notification) = self.notifications_rx.recv() => {
                    self.on_notification(notification).await;
                }
                _ = sleep_until_deadline(deadline) => {
                    self.run_due_refreshes().await;
                }
            }
        }
        self.stop();
    }

    /// Watches the pool config and loads every tier.
    pub async fn start(&mut self) {
        info!(pool = %self.pool_config, "synchronizer starting");
        let errors = self
            .registry
            .subscribe_all(
                self.fetcher.rpc().as_ref(),
                Tier::Public,
                &[self.pool_config],
                &self.notifications_tx,
            )
            .await;
        if let Some(e) = errors.into_iter().next() {
            self.record_error(e.into());
        }
        if self.identity.is_none() {
            self.user.set_ready(UserBalances::disconnected());
        }
        let _ = self.refresh_public().await;
    }

    /// Releases every subscription. Safe to call more than once.
    pub fn stop(&mut self) {
        self.registry.release_all();
        info!(pool = %self.pool_config, "synchronizer stopped");
    }

    pub async fn handle_command(&mut self, command: SyncCommand) {
        debug!(?command, "sync command");
        match command {
            SyncCommand::RefreshTier(tier) => {
                let _ = self.refresh_tier(tier).await;
            }
            SyncCommand::RefreshMint(mint) => {
                let _ = self.refresh_mint(mint).await;
            }
            SyncCommand::ConnectIdentity(owner) => self.connect_identity(owner).await,
            SyncCommand::DisconnectIdentity => self.disconnect_identity(),
            SyncCommand::SetPoolConfig(address) => self.set_pool_config(address).await,
            SyncCommand::Shutdown => self.stop(),
        }
    }

    pub async fn refresh_tier(&mut self, tier: Tier) -> Result<(), SyncError> {
        match tier {
            Tier::Public => self.refresh_public().await,
            Tier::Oracle => self.refresh_oracle().await,
            Tier::User => self.refresh_user().await,
        }
    }

    pub async fn refresh_public(&mut self) -> Result<(), SyncError> {
        let generation = self.public.begin();
        self.publish();
        let result = loaders::load_public(&self.fetcher, self.pool_config).await;
        let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);
        self.note_outcome(&outcome);
        if self.public.complete(generation, result) && outcome.is_ok() {
            self.after_public_loaded().await;
        }
        self.recompute();
        outcome
    }

    pub async fn refresh_oracle(&mut self) -> Result<(), SyncError> {
        let Some(address) = self.oracle_address else {
            debug!("oracle address unknown until the pool config loads");
            return Ok(());
        };
        if !self.registry.contains(Tier::Oracle, &address) {
            self.resubscribe(Tier::Oracle, vec![address]).await;
        }
        let generation = self.oracle.begin();
        self.publish();
        let result = loaders::load_oracle(&self.fetcher, address).await;
        let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);
        self.note_outcome(&outcome);
        self.oracle.complete(generation, result);
        self.recompute();
        outcome
    }

    pub async fn refresh_user(&mut self) -> Result<(), SyncError> {
        let Some(owner) = self.identity else {
            self.user.set_ready(UserBalances::disconnected());
            self.recompute();
            return Ok(());
        };
        let Some(public) = self.public.value().cloned() else {
            debug!(%owner, "user tier waits for the pool tier");
            return Ok(());
        };
        let mints = public.mints();
        let accounts = loaders::user_accounts(&owner, &public.config.share_mint, &mints);
        self.resubscribe(Tier::User, accounts).await;
        let generation = self.user.begin();
        self.publish();
        let result =
            loaders::load_user(&self.fetcher, owner, public.config.share_mint, &mints).await;
        let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);
        self.note_outcome(&outcome);
        self.user.complete(generation, result);
        self.recompute();
        outcome
    }

    /// Re-reads the accounts one mint's transaction touched and patches them
    /// into the current tiers. Falls back to a full reload when the pool's
    /// token list changed or nothing is loaded yet.
    pub async fn refresh_mint(&mut self, mint: Pubkey) -> Result<(), SyncError> {
        let Some(public) = self.public.ready_value().cloned() else {
            return self.refresh_public().await;
        };
        let Some(token) = public.config.supported_token(&mint).cloned() else {
            warn!(%mint, "refresh requested for unsupported mint");
            return self.refresh_public().await;
        };
        let owner = self.identity;

        let generation = self.public.begin();
        let user_generation = owner.map(|_| self.user.begin());
        self.publish();
        let result = loaders::load_mint_refresh(&self.fetcher, &public, &token, owner).await;

        let refresh = match result {
            Ok(refresh) => refresh,
            Err(e) => {
                warn!(%mint, error = %e, "targeted refresh failed; keeping previous state");
                self.record_error(e.clone());
                self.public.complete(generation, Ok((*public).clone()));
                if let Some(user_generation) = user_generation {
                    self.restore_user(user_generation);
                }
                self.recompute();
                return Err(e);
            }
        };

        if refresh.config.supported_tokens != public.config.supported_tokens {
            info!(%mint, "supported tokens changed; reloading pool");
            self.public.complete(generation, Ok((*public).clone()));
            if let Some(user_generation) = user_generation {
                self.restore_user(user_generation);
            }
            return self.refresh_public().await;
        }

        let mut patched = (*public).clone();
        patched.config = refresh.config;
        patched.share_mint = refresh.share_mint;
        if let Some(entry) = patched.tokens.iter_mut().find(|t| t.token.mint == mint) {
            entry.vault_balance = refresh.vault_balance;
            entry.price_feed = refresh.price_feed;
        }
        self.public.complete(generation, Ok(patched));
        self.last_error = None;

        let mut reload_user = false;
        if let Some(user_generation) = user_generation {
            match (self.user.value().map(|v| (**v).clone()), refresh.user) {
                (Some(mut balances), Some((share_balance, token_balance))) => {
                    balances.owner = owner;
                    balances.share_balance = share_balance;
                    balances.token_balances.insert(mint, token_balance);
                    self.user.complete(user_generation, Ok(balances));
                }
                (previous, _) => {
                    reload_user = previous.is_none();
                    self.restore_user(user_generation);
                }
            }
        }
        debug!(%mint, "mint refreshed");
        self.recompute();
        if reload_user {
            let _ = self.refresh_user().await;
        }
        Ok(())
    }

    fn restore_user(&mut self, generation: u64) {
        match self.user.value().map(|v| (**v).clone()) {
            Some(balances) => {
                self.user.complete(generation, Ok(balances));
            }
            None => self.user.reset(),
        }
    }

    /// Drops every tier of the current pool and loads `address` from scratch.
    pub async fn set_pool_config(&mut self, address: Pubkey) {
        if address == self.pool_config {
            return;
        }
        info!(old = %self.pool_config, new = %address, "pool config changed");
        for tier in Tier::ALL {
            self.release_tier(tier);
        }
        self.pool_config = address;
        self.oracle_address = None;
        self.public.reset();
        self.oracle.reset();
        self.user.reset();
        self.snapshot = None;
        self.last_error = None;
        self.start().await;
    }

    /// Tears down the previous wallet's subscriptions and loads the new one.
    pub async fn connect_identity(&mut self, owner: Pubkey) {
        if self.identity == Some(owner) {
            return;
        }
        info!(%owner, "identity connected");
        self.release_tier(Tier::User);
        self.identity = Some(owner);
        self.user.reset();
        let _ = self.refresh_user().await;
    }

    pub fn disconnect_identity(&mut self) {
        if let Some(owner) = self.identity.take() {
            info!(%owner, "identity disconnected");
        }
        self.release_tier(Tier::User);
        self.user.set_ready(UserBalances::disconnected());
        self.recompute();
    }

    async fn after_public_loaded(&mut self) {
        let Some(public) = self.public.ready_value().cloned() else {
            return;
        };
        self.resubscribe(Tier::Public, public.watched_accounts()).await;

        let oracle_address = public.config.oracle_aggregator;
        if self.oracle_address != Some(oracle_address) {
            if self.oracle_address.is_some() {
                info!(oracle = %oracle_address, "oracle aggregator changed");
            }
            self.release_tier(Tier::Oracle);
            self.oracle_address = Some(oracle_address);
            self.oracle.reset();
            let _ = self.refresh_oracle().await;
        } else if self.oracle.status() != TierStatus::Ready {
            let _ = self.refresh_oracle().await;
        }

        if let Some(owner) = self.identity {
            let expected = loaders::user_accounts(&owner, &public.config.share_mint, &public.mints());
            let mut current = self.registry.addresses(Tier::User);
            let mut wanted = expected.clone();
            current.sort();
            wanted.sort();
            if current != wanted || self.user.status() != TierStatus::Ready {
                let _ = self.refresh_user().await;
            }
        }
    }

    /// Replaces a tier's subscriptions when the watched set changed.
    async fn resubscribe(&mut self, tier: Tier, accounts: Vec<Pubkey>) {
        let mut current = self.registry.addresses(tier);
        let mut wanted = accounts.clone();
        current.sort();
        wanted.sort();
        wanted.dedup();
        if current == wanted {
            return;
        }
        self.release_tier(tier);
        let errors = self
            .registry
            .subscribe_all(
                self.fetcher.rpc().as_ref(),
                tier,
                &wanted,
                &self.notifications_tx,
            )
            .await;
        if let Some(e) = errors.into_iter().next() {
            self.record_error(e.into());
        }
    }

    fn release_tier(&mut self, tier: Tier) {
        for address in self.registry.release(tier) {
            if self.registry.routes_for(&address).is_empty() {
                self.throttle.forget(&address);
            }
        }
    }

    pub async fn on_notification(&mut self, notification: AccountNotification) {
        let address = notification.address;
        let tiers = self.registry.routes_for(&address);
        if tiers.is_empty() {
            debug!(%address, "notification for released subscription ignored");
            return;
        }
        match self.throttle.request(address, Instant::now()) {
            ThrottleDecision::RunNow => self.refresh_tiers(tiers).await,
            ThrottleDecision::Deferred(at) => {
                let wait = at.saturating_duration_since(Instant::now());
                debug!(%address, deferred_ms = wait.as_millis() as u64, "refresh deferred");
            }
            ThrottleDecision::Coalesced => debug!(%address, "refresh coalesced"),
        }
    }

    pub async fn run_due_refreshes(&mut self) {
        let mut tiers = Vec::new();
        for address in self.throttle.take_due(Instant::now()) {
            for tier in self.registry.routes_for(&address) {
                if !tiers.contains(&tier) {
                    tiers.push(tier);
                }
            }
        }
        self.refresh_tiers(tiers).await;
    }

    async fn refresh_tiers(&mut self, tiers: Vec<Tier>) {
        for tier in Tier::ALL {
            if tiers.contains(&tier) {
                let _ = self.refresh_tier(tier).await;
            }
        }
    }

    fn record_error(&mut self, error: SyncError) {
        self.last_error = Some(error);
    }

    /// `last_error` reflects the most recent fetch.
    fn note_outcome(&mut self, outcome: &Result<(), SyncError>) {
        match outcome {
            Ok(()) => self.last_error = None,
            Err(e) => self.record_error(e.clone()),
        }
    }

    /// Derives a new snapshot when the tiers are consistent, then publishes.
    fn recompute(&mut self) {
        let readiness = self.readiness();
        if !readiness.any_loading() {
            if let (Some(public), Some(oracle)) =
                (self.public.ready_value(), self.oracle.ready_value())
            {
                let snapshot = derive_snapshot(DeriveInput {
                    public,
                    oracle,
                    user: self.user.ready_value().map(|user| &**user),
                    generations: SnapshotGenerations {
                        public: self.public.generation(),
                        oracle: self.oracle.generation(),
                        user: self.user.generation(),
                    },
                    now: (self.clock)(),
                    freshness_window_secs: self.settings.freshness_window_secs,
                    fee_curve: self.fee_curve.as_ref(),
                });
                debug!(
                    tokens = snapshot.tokens.len(),
                    total_value = snapshot.total_pool_value_scaled as u64,
                    user_ready = snapshot.user_ready,
                    "snapshot derived"
                );
                self.snapshot = Some(Arc::new(snapshot));
            }
        }
        self.publish();
    }

    fn publish(&self) {
        self.view_tx.send_replace(SyncView {
            snapshot: self.snapshot.clone(),
            readiness: self.readiness(),
            last_error: self.last_error.clone(),
        });
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
