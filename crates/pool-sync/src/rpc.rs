use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anchor_lang::prelude::Pubkey;
use async_trait::async_trait;
use futures::StreamExt;
use solana_account_decoder::UiAccountEncoding;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{
    RpcAccountInfoConfig, RpcSendTransactionConfig, RpcTransactionConfig,
};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use solana_transaction_status::UiTransactionEncoding;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::config::RpcSettings;
use crate::errors::RpcError;

/// Push notification that an account changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountNotification {
    pub address: Pubkey,
    pub slot: u64,
    pub data: Option<Vec<u8>>,
}

/// Releases one account subscription. Dropping the handle also releases it,
/// but owners are expected to call [`SubscriptionHandle::unsubscribe`].
#[derive(Debug)]
pub struct SubscriptionHandle {
    address: Pubkey,
    cancel: Option<oneshot::Sender<()>>,
}

impl SubscriptionHandle {
    pub fn new(address: Pubkey, cancel: oneshot::Sender<()>) -> Self {
        Self {
            address,
            cancel: Some(cancel),
        }
    }

    pub fn address(&self) -> Pubkey {
        self.address
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestBlockhash {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    /// Reached the configured commitment
    pub confirmed: bool,
    pub err: Option<TransactionError>,
}

/// The ledger operations this crate depends on.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Same length and order as `addresses`; None for a missing account.
    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>, RpcError>;

    async fn subscribe_account(
        &self,
        address: Pubkey,
        sink: mpsc::UnboundedSender<AccountNotification>,
    ) -> Result<SubscriptionHandle, RpcError>;

    async fn latest_blockhash(&self) -> Result<LatestBlockhash, RpcError>;

    /// Submits with preflight simulation skipped.
    async fn send_transaction(&self, transaction: &VersionedTransaction)
        -> Result<Signature, RpcError>;

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcError>;

    async fn block_height(&self) -> Result<u64, RpcError>;

    /// Program log lines of a landed transaction (empty when unavailable).
    async fn transaction_logs(&self, signature: &Signature) -> Result<Vec<String>, RpcError>;
}

fn client_error(err: ClientError) -> RpcError {
    let message = err.to_string();
    if message.contains("429") || message.to_lowercase().contains("too many requests") {
        RpcError::RateLimited(message)
    } else {
        RpcError::Transport(message)
    }
}

/// One shared HTTP + websocket connection to a Solana RPC provider.
pub struct SolanaRpc {
    client: RpcClient,
    pubsub: Mutex<Option<Arc<PubsubClient>>>,
    commitment: CommitmentConfig,
    closed: AtomicBool,
}

impl SolanaRpc {
    pub async fn open(settings: &RpcSettings) -> Result<Self, RpcError> {
        let commitment = settings.commitment_config();
        let client = RpcClient::new_with_commitment(settings.http_url.clone(), commitment);
        let pubsub = PubsubClient::new(&settings.ws_url)
            .await
            .map_err(|e| RpcError::Transport(format!("websocket connect failed: {e}")))?;
        info!(http = %settings.http_url, ws = %settings.ws_url, "rpc service opened");

        Ok(Self {
            client,
            pubsub: Mutex::new(Some(Arc::new(pubsub))),
            commitment,
            closed: AtomicBool::new(false),
        })
    }

    /// Shuts the websocket down. Every later call fails with `RpcError::Closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pubsub) = self.pubsub.lock().await.take() {
            match Arc::try_unwrap(pubsub) {
                Ok(pubsub) => {
                    if let Err(e) = pubsub.shutdown().await {
                        warn!(error = %e, "websocket shutdown failed");
                    }
                }
                Err(_) => debug!("websocket still referenced by live subscriptions; dropping"),
            }
        }
        info!("rpc service closed");
    }

    fn ensure_open(&self) -> Result<(), RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RpcError::Closed)
        } else {
            Ok(())
        }
    }

    async fn pubsub(&self) -> Result<Arc<PubsubClient>, RpcError> {
        self.ensure_open()?;
        self.pubsub.lock().await.clone().ok_or(RpcError::Closed)
    }
}

#[async_trait]
impl LedgerRpc for SolanaRpc {
    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>, RpcError> {
        self.ensure_open()?;
        let response = self
            .client
            .get_multiple_accounts_with_commitment(addresses, self.commitment)
            .await
            .map_err(client_error)?;
        Ok(response
            .value
            .into_iter()
            .map(|account| account.map(|a| a.data))
            .collect())
    }

    async fn subscribe_account(
        &self,
        address: Pubkey,
        sink: mpsc::UnboundedSender<AccountNotification>,
    ) -> Result<SubscriptionHandle, RpcError> {
        let pubsub = self.pubsub().await?;
        let config = RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            commitment: Some(self.commitment),
            data_slice: None,
            min_context_slot: None,
        };
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let (mut stream, unsubscribe) =
                match pubsub.account_subscribe(&address, Some(config)).await {
                    Ok(subscription) => {
                        let _ = ready_tx.send(Ok(()));
                        subscription
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    update = stream.next() => {
                        let Some(update) = update else {
                            warn!(%address, "account stream ended");
                            break;
                        };
                        let notification = AccountNotification {
                            address,
                            slot: update.context.slot,
                            data: update.value.data.decode(),
                        };
                        if sink.send(notification).is_err() {
                            break;
                        }
                    }
                }
            }
            drop(stream);
            unsubscribe().await;
            debug!(%address, "account subscription released");
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(SubscriptionHandle::new(address, cancel_tx)),
            Ok(Err(message)) => Err(RpcError::Subscription { address, message }),
            Err(_) => Err(RpcError::Subscription {
                address,
                message: "subscription task exited".to_string(),
            }),
        }
    }

    async fn latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
        self.ensure_open()?;
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(client_error)?;
        Ok(LatestBlockhash {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, RpcError> {
        self.ensure_open()?;
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            preflight_commitment: Some(self.commitment.commitment),
            ..RpcSendTransactionConfig::default()
        };
        self.client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| RpcError::Submission(e.to_string()))
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, RpcError> {
        self.ensure_open()?;
        let response = self
            .client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(client_error)?;
        Ok(response
            .value
            .into_iter()
            .next()
            .flatten()
            .map(|status| SignatureStatus {
                confirmed: status.satisfies_commitment(self.commitment),
                err: status.err,
            }))
    }

    async fn block_height(&self) -> Result<u64, RpcError> {
        self.ensure_open()?;
        self.client
            .get_block_height_with_commitment(self.commitment)
            .await
            .map_err(client_error)
    }

    async fn transaction_logs(&self, signature: &Signature) -> Result<Vec<String>, RpcError> {
        self.ensure_open()?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let transaction = self
            .client
            .get_transaction_with_config(signature, config)
            .await
            .map_err(client_error)?;
        Ok(transaction
            .transaction
            .meta
            .and_then(|meta| Option::<Vec<String>>::from(meta.log_messages))
            .unwrap_or_default())
    }
}
