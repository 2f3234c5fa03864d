mod common;

use std::sync::Arc;

use anchor_lang::prelude::Pubkey;
use async_trait::async_trait;
use solana_sdk::instruction::InstructionError;
use solana_sdk::message::VersionedMessage;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use tokio::task::JoinHandle;

use pool_sync::config::TransactionSettings;
use pool_sync::rpc::SignatureStatus;
use pool_sync::{
    KeypairSigner, PoolAction, PreconditionError, PriorityFeeTier, RpcError, SignerError,
    SyncHandle, SyncView, TransactionFailure, TransactionManager, TransactionSigner, TxPhase,
};

use common::*;

struct WatchOnly(Pubkey);

#[async_trait]
impl TransactionSigner for WatchOnly {
    fn pubkey(&self) -> Pubkey {
        self.0
    }

    fn can_sign(&self) -> bool {
        false
    }

    async fn sign(&self, _message: VersionedMessage) -> Result<VersionedTransaction, SignerError> {
        Err(SignerError::Rejected("watch-only".into()))
    }
}

struct Harness {
    ledger: Arc<MockLedger>,
    pool: PoolFixture,
    handle: SyncHandle,
    runner: JoinHandle<()>,
    manager: TransactionManager,
}

impl Harness {
    async fn start(pool: PoolFixture, ledger: Arc<MockLedger>) -> Self {
        let sync = synchronizer(&ledger, &pool);
        let handle = sync.handle();
        let runner = tokio::spawn(sync.run());
        let settings = TransactionSettings {
            confirm_poll_ms: 10,
            confirm_timeout_secs: 5,
            ..TransactionSettings::default()
        };
        let manager = TransactionManager::new(
            fetcher(ledger.clone()),
            handle.clone(),
            pool.program_id,
            settings,
            60,
        );
        let harness = Self {
            ledger,
            pool,
            handle,
            runner,
            manager,
        };
        harness.wait_until(|v| v.snapshot.is_some()).await;
        harness
    }

    async fn single_token() -> Self {
        let ledger = MockLedger::new();
        let pool = PoolFixture::install(&ledger, &[TokenSetup::two_dollar()], 2_000_000, 2_000_000);
        Self::start(pool, ledger).await
    }

    async fn wait_until(&self, ready: impl Fn(&SyncView) -> bool) -> SyncView {
        let mut rx = self.handle.subscribe();
        let view = rx
            .wait_for(|v| !v.readiness.any_loading() && ready(v))
            .await
            .unwrap();
        view.clone()
    }

    async fn connect(&mut self) -> Pubkey {
        let keypair = Keypair::new();
        let owner = keypair.pubkey();
        self.manager
            .set_signer(Some(Arc::new(KeypairSigner::new(keypair))));
        self.wait_until(|v| v.snapshot.as_ref().is_some_and(|s| s.owner == Some(owner)))
            .await;
        owner
    }

    fn deposit(&self) -> PoolAction {
        PoolAction::Deposit {
            mint: self.pool.tokens[0].mint,
            amount: 1_000_000,
        }
    }

    async fn shutdown(self) {
        self.handle.shutdown().unwrap();
        self.runner.await.unwrap();
    }
}

#[tokio::test]
async fn deposit_lands_and_refreshes_the_pool() {
    let mut h = Harness::single_token().await;
    h.connect().await;
    let before = h.handle.snapshot().unwrap();
    h.ledger.confirm_with(SignatureStatus {
        confirmed: true,
        err: None,
    });

    let outcome = h
        .manager
        .execute(h.deposit(), PriorityFeeTier::High)
        .await
        .unwrap();

    assert!(outcome.clear_input);
    assert_eq!(outcome.plan.estimated_out, 1_998_000);
    assert_eq!(outcome.plan.minimum_out, 1_988_010);
    assert!(outcome.plan.create_destination);
    assert_eq!(
        h.manager.phase(),
        TxPhase::Succeeded {
            signature: outcome.signature
        }
    );

    let sent = h.ledger.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].signatures[0], outcome.signature);
    // compute limit, compute price, share account create, deposit
    assert_eq!(sent[0].message.instructions().len(), 4);

    let after = h
        .wait_until(|v| {
            v.snapshot
                .as_ref()
                .is_some_and(|s| s.generations.public > before.generations.public)
        })
        .await;
    assert!(after.last_error.is_none());
    h.shutdown().await;
}

#[tokio::test]
async fn missing_lookup_table_falls_back_to_a_plain_message() {
    let ledger = MockLedger::new();
    let mut pool = PoolFixture::install(&ledger, &[TokenSetup::two_dollar()], 2_000_000, 2_000_000);
    pool.config.lookup_table = Pubkey::new_unique();
    ledger.set(pool.pool_config, with_discriminator(&pool.config));
    let mut h = Harness::start(pool, ledger).await;
    h.connect().await;
    h.ledger.confirm_with(SignatureStatus {
        confirmed: true,
        err: None,
    });

    let prepared = h.manager.prepare(h.deposit(), PriorityFeeTier::Low).unwrap();
    assert_eq!(prepared.lookup_table, Some(h.pool.config.lookup_table));

    h.manager
        .execute(h.deposit(), PriorityFeeTier::Low)
        .await
        .unwrap();
    let sent = h.ledger.sent.lock().unwrap().clone();
    assert!(sent[0].message.address_table_lookups().unwrap_or_default().is_empty());
    h.shutdown().await;
}

#[tokio::test]
async fn revert_reports_the_program_log_message() {
    let mut h = Harness::single_token().await;
    h.connect().await;
    h.ledger.confirm_with(SignatureStatus {
        confirmed: false,
        err: Some(TransactionError::InstructionError(
            3,
            InstructionError::Custom(6001),
        )),
    });
    *h.ledger.logs.lock().unwrap() = vec![
        "Program log: Instruction: Deposit".to_string(),
        "Program log: AnchorError occurred. Error Code: SlippageExceeded. Error Number: 6001. Error Message: Slippage tolerance exceeded.".to_string(),
    ];

    let failure = h
        .manager
        .execute(h.deposit(), PriorityFeeTier::Medium)
        .await
        .unwrap_err();

    match &failure {
        TransactionFailure::Failed {
            message, signature, ..
        } => {
            assert_eq!(message, "Slippage tolerance exceeded");
            assert!(signature.is_some());
        }
        other => panic!("unexpected failure {other:?}"),
    }
    assert_eq!(h.manager.phase(), TxPhase::Failed(failure));
    h.shutdown().await;
}

#[tokio::test]
async fn revert_without_logs_uses_the_error_catalog() {
    let mut h = Harness::single_token().await;
    h.connect().await;
    h.ledger.confirm_with(SignatureStatus {
        confirmed: false,
        err: Some(TransactionError::InstructionError(
            3,
            InstructionError::Custom(6003),
        )),
    });

    let failure = h
        .manager
        .execute(h.deposit(), PriorityFeeTier::Medium)
        .await
        .unwrap_err();
    assert!(matches!(
        failure,
        TransactionFailure::Failed { ref message, .. }
            if message == "Token has been delisted: deposits are disabled"
    ));
    h.shutdown().await;
}

#[tokio::test]
async fn rejected_submission_is_classified_from_the_hex_code() {
    let mut h = Harness::single_token().await;
    h.connect().await;
    *h.ledger.send_error.lock().unwrap() = Some(RpcError::Submission(
        "Transaction simulation failed: Error processing Instruction 3: custom program error: 0x1771"
            .to_string(),
    ));

    let failure = h
        .manager
        .execute(h.deposit(), PriorityFeeTier::Medium)
        .await
        .unwrap_err();
    match failure {
        TransactionFailure::Failed {
            message,
            signature,
            raw,
        } => {
            assert_eq!(message, "Slippage tolerance exceeded");
            assert_eq!(signature, None);
            assert!(raw.contains("0x1771"));
        }
        other => panic!("unexpected failure {other:?}"),
    }
    h.shutdown().await;
}

#[tokio::test]
async fn expired_blockhash_fails_the_attempt() {
    let mut h = Harness::single_token().await;
    h.connect().await;
    h.ledger
        .block_height
        .store(LAST_VALID_BLOCK_HEIGHT + 1, std::sync::atomic::Ordering::SeqCst);

    let failure = h
        .manager
        .execute(h.deposit(), PriorityFeeTier::Medium)
        .await
        .unwrap_err();
    assert!(matches!(
        failure,
        TransactionFailure::Failed { ref message, signature: Some(_), .. }
            if message == "blockhash expired before confirmation"
    ));
    h.shutdown().await;
}

#[tokio::test]
async fn no_identity_fails_before_any_network_call() {
    let h = Harness::single_token().await;
    let fetches = h.ledger.fetches();

    let failure = h
        .manager
        .execute(h.deposit(), PriorityFeeTier::Medium)
        .await
        .unwrap_err();

    assert_eq!(
        failure,
        TransactionFailure::Precondition(PreconditionError::NoIdentity)
    );
    assert_eq!(h.ledger.fetches(), fetches);
    assert!(h.ledger.sent.lock().unwrap().is_empty());
    h.shutdown().await;
}

#[tokio::test]
async fn watch_only_identity_cannot_submit() {
    let mut h = Harness::single_token().await;
    let owner = Pubkey::new_unique();
    h.ledger.set(h.pool.user_share_account(&owner), token_account(5));
    h.manager.set_signer(Some(Arc::new(WatchOnly(owner))));
    let view = h
        .wait_until(|v| v.snapshot.as_ref().is_some_and(|s| s.owner == Some(owner)))
        .await;
    assert_eq!(view.snapshot.unwrap().user_share_balance, Some(5));

    assert_eq!(
        h.manager.prepare(h.deposit(), PriorityFeeTier::Medium),
        Err(PreconditionError::NoSigner)
    );
    h.shutdown().await;
}

#[tokio::test]
async fn delisted_deposit_is_rejected_locally() {
    let ledger = MockLedger::new();
    let delisted = TokenSetup {
        listed_dominance: None,
        ..TokenSetup::two_dollar()
    };
    let pool = PoolFixture::install(&ledger, &[delisted], 2_000_000, 2_000_000);
    let mut h = Harness::start(pool, ledger).await;
    h.connect().await;
    let fetches = h.ledger.fetches();

    let failure = h
        .manager
        .execute(h.deposit(), PriorityFeeTier::Medium)
        .await
        .unwrap_err();
    assert!(matches!(
        failure,
        TransactionFailure::Precondition(PreconditionError::DepositIntoDelisted { ref symbol })
            if symbol == "TWO"
    ));
    assert_eq!(h.ledger.fetches(), fetches);

    let prepared = h
        .manager
        .prepare(
            PoolAction::WithdrawAllDelisted {
                mint: h.pool.tokens[0].mint,
            },
            PriorityFeeTier::Medium,
        );
    // the wallet holds no shares
    assert!(matches!(
        prepared,
        Err(PreconditionError::InsufficientShares { available: 0, .. })
    ));
    h.shutdown().await;
}
