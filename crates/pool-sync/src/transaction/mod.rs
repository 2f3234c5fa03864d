pub mod classify;
pub mod instructions;
pub mod plan;

pub use classify::*;
pub use instructions::*;
pub use plan::*;

use std::sync::Arc;

use anchor_lang::prelude::Pubkey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::address_lookup_table::state::AddressLookupTable;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::{v0, AddressLookupTableAccount, VersionedMessage};
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::TransactionSettings;
use crate::errors::{PreconditionError, SignerError, TransactionFailure};
use crate::fetcher::AccountFetcher;
use crate::rpc::{LatestBlockhash, LedgerRpc};
use crate::sync::{SyncHandle, Tier};

/// Caller-selected priority fee level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityFeeTier {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TxPhase {
    #[default]
    Idle,
    Building,
    Signing,
    Submitted { signature: Signature },
    Confirming { signature: Signature },
    Succeeded { signature: Signature },
    Failed(TransactionFailure),
}

impl TxPhase {
    pub fn is_in_flight(&self) -> bool {
        !matches!(
            self,
            TxPhase::Idle | TxPhase::Succeeded { .. } | TxPhase::Failed(_)
        )
    }
}

/// Identity provider: a public address plus an asynchronous signing capability.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    /// False for watch-only identities.
    fn can_sign(&self) -> bool {
        true
    }

    async fn sign(&self, message: VersionedMessage) -> Result<VersionedTransaction, SignerError>;
}

pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign(&self, message: VersionedMessage) -> Result<VersionedTransaction, SignerError> {
        VersionedTransaction::try_new(message, &[&self.keypair])
            .map_err(|e| SignerError::Rejected(e.to_string()))
    }
}

/// Landed transaction. The caller should clear the input that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub signature: Signature,
    pub plan: TransactionPlan,
    pub clear_input: bool,
}

/// Pre-network result: a validated plan and its instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransaction {
    pub plan: TransactionPlan,
    pub payer: Pubkey,
    pub instructions: Vec<Instruction>,
    pub lookup_table: Option<Pubkey>,
}

/// Drives one deposit or withdrawal from building to confirmation.
pub struct TransactionManager {
    fetcher: AccountFetcher,
    sync: SyncHandle,
    program_id: Pubkey,
    settings: TransactionSettings,
    freshness_window_secs: i64,
    signer: Option<Arc<dyn TransactionSigner>>,
    phase: watch::Sender<TxPhase>,
}

impl TransactionManager {
    pub fn new(
        fetcher: AccountFetcher,
        sync: SyncHandle,
        program_id: Pubkey,
        settings: TransactionSettings,
        freshness_window_secs: i64,
    ) -> Self {
        let (phase, _) = watch::channel(TxPhase::Idle);
        Self {
            fetcher,
            sync,
            program_id,
            settings,
            freshness_window_secs,
            signer: None,
            phase,
        }
    }

    /// Connects (or disconnects) the identity and points the synchronizer's
    /// user tier at it.
    pub fn set_signer(&mut self, signer: Option<Arc<dyn TransactionSigner>>) {
        let result = match &signer {
            Some(signer) => self.sync.connect_identity(signer.pubkey()),
            None => self.sync.disconnect_identity(),
        };
        if let Err(e) = result {
            warn!(error = %e, "synchronizer did not accept identity change");
        }
        self.signer = signer;
    }

    pub fn phase(&self) -> TxPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TxPhase> {
        self.phase.subscribe()
    }

    /// Back to `Idle` after the caller has shown a terminal phase.
    pub fn reset(&self) {
        self.set_phase(TxPhase::Idle);
    }

    fn set_phase(&self, phase: TxPhase) {
        debug!(?phase, "transaction phase");
        self.phase.send_replace(phase);
    }

    fn fail(&self, failure: TransactionFailure) -> TransactionFailure {
        error!(error = %failure, "transaction failed");
        self.set_phase(TxPhase::Failed(failure.clone()));
        failure
    }

    /// Every check that can run without the network.
    pub fn prepare(
        &self,
        action: PoolAction,
        fee_tier: PriorityFeeTier,
    ) -> Result<PreparedTransaction, PreconditionError> {
        let signer = self.signer.as_ref().ok_or(PreconditionError::NoIdentity)?;
        if !signer.can_sign() {
            return Err(PreconditionError::NoSigner);
        }
        let view = self.sync.view();
        let plan = plan_action(
            &view,
            action,
            self.settings.slippage_bps,
            self.freshness_window_secs,
        )?;
        let snapshot = view
            .snapshot
            .ok_or(PreconditionError::TierNotReady(Tier::Public.name()))?;
        let payer = signer.pubkey();
        let instructions = build_instructions(
            self.program_id,
            snapshot.pool_config_address,
            &snapshot.config,
            payer,
            &plan,
            self.settings.compute_unit_limit,
            self.settings.priority_fee(fee_tier),
        )?;
        Ok(PreparedTransaction {
            plan,
            payer,
            instructions,
            lookup_table: snapshot
                .config
                .has_lookup_table()
                .then_some(snapshot.config.lookup_table),
        })
    }

    pub async fn execute(
        &self,
        action: PoolAction,
        fee_tier: PriorityFeeTier,
    ) -> Result<TransactionOutcome, TransactionFailure> {
        self.set_phase(TxPhase::Building);
        let prepared = self
            .prepare(action, fee_tier)
            .map_err(|e| self.fail(e.into()))?;
        let Some(signer) = self.signer.clone() else {
            return Err(self.fail(PreconditionError::NoIdentity.into()));
        };
        info!(
            mint = %prepared.plan.mint,
            kind = ?prepared.plan.kind,
            amount = prepared.plan.amount,
            minimum_out = prepared.plan.minimum_out,
            fee_bps = prepared.plan.fee_bps,
            "submitting pool transaction"
        );

        let lookup_tables = self.lookup_tables(prepared.lookup_table).await;
        let rpc = self.fetcher.rpc();
        let blockhash = rpc.latest_blockhash().await.map_err(|e| {
            self.fail(TransactionFailure::Failed {
                message: e.to_string(),
                signature: None,
                raw: e.to_string(),
            })
        })?;
        let message = v0::Message::try_compile(
            &prepared.payer,
            &prepared.instructions,
            &lookup_tables,
            blockhash.blockhash,
        )
        .map_err(|e| self.fail(PreconditionError::Build(e.to_string()).into()))?;

        self.set_phase(TxPhase::Signing);
        let transaction = signer
            .sign(VersionedMessage::V0(message))
            .await
            .map_err(|e| self.fail(e.into()))?;

        let signature = rpc.send_transaction(&transaction).await.map_err(|e| {
            let raw = e.to_string();
            self.fail(TransactionFailure::Failed {
                message: classify_failure(&[], None, &raw),
                signature: None,
                raw,
            })
        })?;
        self.set_phase(TxPhase::Submitted { signature });

        self.confirm(rpc.as_ref(), signature, blockhash)
            .await
            .map_err(|failure| self.fail(failure))?;

        info!(%signature, mint = %prepared.plan.mint, "transaction confirmed");
        self.set_phase(TxPhase::Succeeded { signature });
        if let Err(e) = self.sync.refresh_mint(prepared.plan.mint) {
            warn!(error = %e, "post-transaction refresh not scheduled");
        }
        Ok(TransactionOutcome {
            signature,
            plan: prepared.plan,
            clear_input: true,
        })
    }

    /// Missing or undecodable tables only cost transaction size.
    async fn lookup_tables(&self, address: Option<Pubkey>) -> Vec<AddressLookupTableAccount> {
        let Some(address) = address else {
            return Vec::new();
        };
        let data = match self.fetcher.fetch_multiple(&[address]).await {
            Ok(mut accounts) => accounts.pop().flatten(),
            Err(e) => {
                warn!(%address, error = %e, "lookup table fetch failed; compiling without it");
                return Vec::new();
            }
        };
        let Some(data) = data else {
            warn!(%address, "lookup table account missing; compiling without it");
            return Vec::new();
        };
        match AddressLookupTable::deserialize(&data) {
            Ok(table) => vec![AddressLookupTableAccount {
                key: address,
                addresses: table.addresses.to_vec(),
            }],
            Err(e) => {
                warn!(%address, error = %e, "lookup table undecodable; compiling without it");
                Vec::new()
            }
        }
    }

    /// Polls until the signature reaches the configured commitment, reverts,
    /// or the blockhash can no longer land.
    async fn confirm(
        &self,
        rpc: &dyn LedgerRpc,
        signature: Signature,
        blockhash: LatestBlockhash,
    ) -> Result<(), TransactionFailure> {
        self.set_phase(TxPhase::Confirming { signature });
        let started = Instant::now();
        let poll = self.settings.confirm_poll_interval();
        let timeout = self.settings.confirm_timeout();

        loop {
            match rpc.signature_status(&signature).await {
                Ok(Some(status)) if status.err.is_some() => {
                    return Err(self.reverted(rpc, signature, status.err).await);
                }
                Ok(Some(status)) if status.confirmed => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!(%signature, error = %e, "status poll failed"),
            }
            match rpc.block_height().await {
                Ok(height) if height > blockhash.last_valid_block_height => {
                    return Err(expired(signature, "blockhash expired before confirmation"));
                }
                Ok(_) => {}
                Err(e) => debug!(%signature, error = %e, "block height poll failed"),
            }
            if started.elapsed() >= timeout {
                return Err(expired(signature, "confirmation timed out"));
            }
            sleep(poll).await;
        }
    }

    async fn reverted(
        &self,
        rpc: &dyn LedgerRpc,
        signature: Signature,
        err: Option<TransactionError>,
    ) -> TransactionFailure {
        let logs = rpc.transaction_logs(&signature).await.unwrap_or_else(|e| {
            debug!(%signature, error = %e, "logs unavailable");
            Vec::new()
        });
        let raw = err
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "transaction reverted".to_string());
        TransactionFailure::Failed {
            message: classify_failure(&logs, err.as_ref(), &raw),
            signature: Some(signature.to_string()),
            raw,
        }
    }
}

fn expired(signature: Signature, message: &str) -> TransactionFailure {
    TransactionFailure::Failed {
        message: message.to_string(),
        signature: Some(signature.to_string()),
        raw: message.to_string(),
    }
}
