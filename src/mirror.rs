//! Display-only balance mirror
//!
//! Rebuilt from account store notifications. Nothing in the game core reads
//! balances from here; settlement always goes through atomic increments.

use crate::account_store::AccountDocument;
use crate::games::types::AccountId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

#[derive(Clone, Default)]
pub struct BalanceMirror {
    documents: Arc<DashMap<AccountId, AccountDocument>>,
}

impl BalanceMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow a store's notification stream until it closes
    pub fn follow(&self, mut receiver: broadcast::Receiver<AccountDocument>) -> JoinHandle<()> {
        let documents = self.documents.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(doc) => {
                        documents.insert(doc.account_id.clone(), doc);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Later notifications carry full documents, so the view self-heals
                        tracing::warn!(skipped, "balance mirror lagged behind store notifications");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn get(&self, account: &AccountId) -> Option<AccountDocument> {
        self.documents.get(account).map(|d| d.clone())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
