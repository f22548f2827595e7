use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use sandcall_messaging::AddableAction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed to fetch tapos: {0}")]
    Tapos(String),

    #[error("failed to sign transaction: {0}")]
    Signing(String),

    #[error("failed to push transaction: {0}")]
    Push(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Acknowledgement of a pushed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub transaction_id: String,
    pub actions: usize,
}

/// Submits the actions of a completed call chain as one transaction.
pub trait Submitter: Send + Sync {
    fn submit<'a>(
        &'a self,
        actions: &'a [AddableAction],
    ) -> Pin<Box<dyn Future<Output = Result<TxReceipt, SubmitError>> + Send + 'a>>;
}

/// An unsigned transaction: reference block data plus the actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub tapos: Value,
    pub actions: Vec<AddableAction>,
}

/// The chain-facing services a transaction passes through.
pub trait TransactionService: Send + Sync {
    /// Reference block data the transaction is anchored to.
    fn tapos<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Value, SubmitError>> + Send + 'a>>;

    fn build_and_sign<'a>(
        &'a self,
        transaction: &'a Transaction,
    ) -> Pin<Box<dyn Future<Output = Result<Value, SubmitError>> + Send + 'a>>;

    fn push<'a>(
        &'a self,
        signed: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<TxReceipt, SubmitError>> + Send + 'a>>;
}

/// [`Submitter`] that runs tapos, signing and push in order.
pub struct ChainSubmitter<S> {
    service: S,
}

impl<S: TransactionService> ChainSubmitter<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

impl<S: TransactionService> Submitter for ChainSubmitter<S> {
    fn submit<'a>(
        &'a self,
        actions: &'a [AddableAction],
    ) -> Pin<Box<dyn Future<Output = Result<TxReceipt, SubmitError>> + Send + 'a>> {
        Box::pin(async move {
            let tapos = self.service.tapos().await?;
            let transaction = Transaction {
                tapos,
                actions: actions.to_vec(),
            };
            let signed = self.service.build_and_sign(&transaction).await?;
            let receipt = self.service.push(&signed).await?;
            tracing::info!(
                transaction_id = %receipt.transaction_id,
                actions = receipt.actions,
                "Transaction pushed"
            );
            Ok(receipt)
        })
    }
}

/// Content-derived id: SHA-256 over the serialized actions.
pub fn transaction_id(actions: &[AddableAction]) -> String {
    let mut hasher = Sha256::new();
    for action in actions {
        hasher.update(action.service.as_bytes());
        hasher.update([0u8]);
        hasher.update(action.action.as_bytes());
        hasher.update([0u8]);
        hasher.update(&action.args);
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Submitter that keeps every batch in memory. Used by the simulator.
#[derive(Default)]
pub struct RecordingSubmitter {
    batches: Mutex<Vec<Vec<AddableAction>>>,
    reject_with: Option<String>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A submitter whose every submission is rejected with `reason`.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            batches: Mutex::default(),
            reject_with: Some(reason.into()),
        }
    }

    pub fn batches(&self) -> Vec<Vec<AddableAction>> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }
}

impl Submitter for RecordingSubmitter {
    fn submit<'a>(
        &'a self,
        actions: &'a [AddableAction],
    ) -> Pin<Box<dyn Future<Output = Result<TxReceipt, SubmitError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(reason) = &self.reject_with {
                return Err(SubmitError::Rejected(reason.clone()));
            }
            if let Ok(mut batches) = self.batches.lock() {
                batches.push(actions.to_vec());
            }
            Ok(TxReceipt {
                transaction_id: transaction_id(actions),
                actions: actions.len(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeChain {
        steps: AtomicUsize,
        fail_push: bool,
    }

    impl TransactionService for FakeChain {
        fn tapos<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Result<Value, SubmitError>> + Send + 'a>> {
            Box::pin(async move {
                self.steps.fetch_add(1, Ordering::Relaxed);
                Ok(json!({"refBlockIndex": 7, "refBlockSuffix": 1234}))
            })
        }

        fn build_and_sign<'a>(
            &'a self,
            transaction: &'a Transaction,
        ) -> Pin<Box<dyn Future<Output = Result<Value, SubmitError>> + Send + 'a>> {
            Box::pin(async move {
                self.steps.fetch_add(1, Ordering::Relaxed);
                let mut signed = serde_json::to_value(transaction)
                    .map_err(|e| SubmitError::Signing(e.to_string()))?;
                signed["signature"] = json!("sig");
                Ok(signed)
            })
        }

        fn push<'a>(
            &'a self,
            signed: &'a Value,
        ) -> Pin<Box<dyn Future<Output = Result<TxReceipt, SubmitError>> + Send + 'a>> {
            Box::pin(async move {
                self.steps.fetch_add(1, Ordering::Relaxed);
                if self.fail_push {
                    return Err(SubmitError::Push("node unavailable".into()));
                }
                let actions: Vec<AddableAction> =
                    serde_json::from_value(signed["actions"].clone())
                        .map_err(|e| SubmitError::Push(e.to_string()))?;
                assert_eq!(signed["signature"], json!("sig"));
                Ok(TxReceipt {
                    transaction_id: transaction_id(&actions),
                    actions: actions.len(),
                })
            })
        }
    }

    fn actions() -> Vec<AddableAction> {
        vec![
            AddableAction::new("tokens", "credit", vec![1, 2]),
            AddableAction::new("tokens", "debit", vec![3]),
        ]
    }

    #[tokio::test]
    async fn chain_submitter_runs_all_three_steps() {
        let submitter = ChainSubmitter::new(FakeChain {
            steps: AtomicUsize::new(0),
            fail_push: false,
        });

        let receipt = submitter.submit(&actions()).await.unwrap();
        assert_eq!(receipt.actions, 2);
        assert_eq!(receipt.transaction_id, transaction_id(&actions()));
        assert_eq!(submitter.service.steps.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn chain_submitter_surfaces_push_failure() {
        let submitter = ChainSubmitter::new(FakeChain {
            steps: AtomicUsize::new(0),
            fail_push: true,
        });

        let err = submitter.submit(&actions()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Push(_)));
    }

    #[tokio::test]
    async fn recording_submitter_keeps_batches() {
        let submitter = RecordingSubmitter::new();
        submitter.submit(&actions()).await.unwrap();

        assert_eq!(submitter.batches(), vec![actions()]);
    }

    #[tokio::test]
    async fn rejecting_submitter_records_nothing() {
        let submitter = RecordingSubmitter::rejecting("out of resources");
        let err = submitter.submit(&actions()).await.unwrap_err();

        assert!(err.to_string().contains("out of resources"));
        assert!(submitter.batches().is_empty());
    }

    #[test]
    fn transaction_id_depends_on_order() {
        let mut reversed = actions();
        reversed.reverse();
        assert_ne!(transaction_id(&actions()), transaction_id(&reversed));
    }
}
