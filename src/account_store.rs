//! Account store
//!
//! The store owns every account balance. The game core only ever sends it
//! deltas tagged with an operation id; the store applies each id at most once
//! and publishes the resulting document to subscribers.
//!
//! Dedupe memory is bounded: each account remembers its most recent
//! `op_retention` applied ids and forgets older ones. Replays only happen
//! while a credit is pending, long before that many newer ops accumulate.

use crate::errors::StoreError;
use crate::games::types::{AccountId, Credits};
use async_trait::async_trait;
use dashmap::DashMap;
use rocksdb::{Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const ACCOUNT_PREFIX: &str = "account:";
const OP_PREFIX: &str = "op:";
const OP_LOG_PREFIX: &str = "ops:";
const NOTIFY_CAPACITY: usize = 1024;

/// Applied op ids kept per account unless configured otherwise
pub const DEFAULT_OP_RETENTION: usize = 1024;

/// Per-account document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDocument {
    pub account_id: AccountId,
    pub credits: Credits,
    pub rounds_played: u64,
    pub rounds_won: u64,
}

impl AccountDocument {
    pub fn new(account_id: AccountId, credits: Credits) -> Self {
        Self {
            account_id,
            credits,
            rounds_played: 0,
            rounds_won: 0,
        }
    }
}

/// Atomic delta applied to one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Idempotency key; replays of the same id are no-ops
    pub op_id: String,
    pub credits_delta: Credits,
    pub rounds_played_delta: u64,
    pub rounds_won_delta: u64,
}

impl Mutation {
    /// Take a stake and count a played round
    pub fn debit(op_id: String, amount: Credits) -> Self {
        Self {
            op_id,
            credits_delta: amount.negate(),
            rounds_played_delta: 1,
            rounds_won_delta: 0,
        }
    }

    /// Pay winnings and count a won round
    pub fn credit(op_id: String, amount: Credits) -> Self {
        Self {
            op_id,
            credits_delta: amount,
            rounds_played_delta: 0,
            rounds_won_delta: 1,
        }
    }

    /// Apply to a document, refusing to take the balance below zero
    fn apply_to(&self, doc: &mut AccountDocument) -> Result<(), StoreError> {
        let credits = doc
            .credits
            .checked_add(self.credits_delta)
            .ok_or_else(|| StoreError::Corrupted(format!("credit overflow on {}", doc.account_id)))?;
        if credits < Credits::ZERO {
            return Err(StoreError::InsufficientFunds {
                requested: self.credits_delta.negate(),
                available: doc.credits,
            });
        }
        doc.credits = credits;
        doc.rounds_played += self.rounds_played_delta;
        doc.rounds_won += self.rounds_won_delta;
        Ok(())
    }
}

/// Durable per-account document store with atomic increments
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create an account document; fails if one exists
    async fn open_account(
        &self,
        account: &AccountId,
        starting_credits: Credits,
    ) -> Result<AccountDocument, StoreError>;

    /// Point read
    async fn get(&self, account: &AccountId) -> Result<Option<AccountDocument>, StoreError>;

    /// Atomically apply a delta. The balance check happens inside the same
    /// atomic step. Replaying an already-applied `op_id` returns the current
    /// document without changing it.
    async fn increment(
        &self,
        account: &AccountId,
        mutation: &Mutation,
    ) -> Result<AccountDocument, StoreError>;

    /// Change notifications, one per applied mutation or opened account
    fn subscribe(&self) -> broadcast::Receiver<AccountDocument>;
}

struct AccountRecord {
    document: AccountDocument,
    applied_ops: HashSet<String>,
    op_order: VecDeque<String>,
}

impl AccountRecord {
    fn new(document: AccountDocument) -> Self {
        Self {
            document,
            applied_ops: HashSet::new(),
            op_order: VecDeque::new(),
        }
    }

    fn remember(&mut self, op_id: &str, retention: usize) {
        self.applied_ops.insert(op_id.to_string());
        self.op_order.push_back(op_id.to_string());
        while self.op_order.len() > retention {
            if let Some(evicted) = self.op_order.pop_front() {
                self.applied_ops.remove(&evicted);
            }
        }
    }
}

/// In-process store, used for simulations and tests
pub struct InMemoryAccountStore {
    accounts: DashMap<AccountId, AccountRecord>,
    notifier: broadcast::Sender<AccountDocument>,
    op_retention: usize,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            accounts: DashMap::new(),
            notifier,
            op_retention: DEFAULT_OP_RETENTION,
        }
    }

    pub fn with_op_retention(mut self, retention: usize) -> Self {
        self.op_retention = retention.max(1);
        self
    }

    /// Op ids currently remembered for an account
    pub fn retained_ops(&self, account: &AccountId) -> usize {
        self.accounts.get(account).map(|r| r.op_order.len()).unwrap_or(0)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn open_account(
        &self,
        account: &AccountId,
        starting_credits: Credits,
    ) -> Result<AccountDocument, StoreError> {
        let document = match self.accounts.entry(account.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StoreError::AccountExists(account.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let document = AccountDocument::new(account.clone(), starting_credits);
                slot.insert(AccountRecord::new(document.clone()));
                document
            }
        };
        let _ = self.notifier.send(document.clone());
        Ok(document)
    }

    async fn get(&self, account: &AccountId) -> Result<Option<AccountDocument>, StoreError> {
        Ok(self.accounts.get(account).map(|r| r.document.clone()))
    }

    async fn increment(
        &self,
        account: &AccountId,
        mutation: &Mutation,
    ) -> Result<AccountDocument, StoreError> {
        let document = {
            // Shard write lock makes check-and-apply atomic for this account
            let mut record = self
                .accounts
                .get_mut(account)
                .ok_or_else(|| StoreError::AccountNotFound(account.to_string()))?;
            if record.applied_ops.contains(&mutation.op_id) {
                return Ok(record.document.clone());
            }
            let mut updated = record.document.clone();
            mutation.apply_to(&mut updated)?;
            record.document = updated.clone();
            record.remember(&mutation.op_id, self.op_retention);
            updated
        };
        let _ = self.notifier.send(document.clone());
        Ok(document)
    }

    fn subscribe(&self) -> broadcast::Receiver<AccountDocument> {
        self.notifier.subscribe()
    }
}

/// RocksDB-backed store. Documents are JSON under `account:<id>`; applied
/// operation ids are marker keys under `op:<id>` written in the same batch.
/// `ops:<account>` lists the account's retained ids oldest first, and markers
/// that fall off it are deleted in that same batch.
pub struct RocksAccountStore {
    db: Arc<DB>,
    write_lock: Mutex<()>,
    notifier: broadcast::Sender<AccountDocument>,
    op_retention: usize,
}

impl RocksAccountStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
            notifier,
            op_retention: DEFAULT_OP_RETENTION,
        })
    }

    pub fn with_op_retention(mut self, retention: usize) -> Self {
        self.op_retention = retention.max(1);
        self
    }

    fn op_log_key(account: &AccountId) -> Vec<u8> {
        format!("{}{}", OP_LOG_PREFIX, account).into_bytes()
    }

    fn read_op_log(&self, account: &AccountId) -> Result<VecDeque<String>, StoreError> {
        let Some(bytes) = self
            .db
            .get(Self::op_log_key(account))
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        else {
            return Ok(VecDeque::new());
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupted(format!("op log for {}: {}", account, e)))
    }

    /// Op ids currently remembered for an account
    pub fn retained_ops(&self, account: &AccountId) -> Result<usize, StoreError> {
        Ok(self.read_op_log(account)?.len())
    }

    fn account_key(account: &AccountId) -> Vec<u8> {
        format!("{}{}", ACCOUNT_PREFIX, account).into_bytes()
    }

    fn op_key(op_id: &str) -> Vec<u8> {
        format!("{}{}", OP_PREFIX, op_id).into_bytes()
    }

    fn read(&self, account: &AccountId) -> Result<Option<AccountDocument>, StoreError> {
        let Some(bytes) = self
            .db
            .get(Self::account_key(account))
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupted(format!("account {}: {}", account, e)))
    }

    fn encode(document: &AccountDocument) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(document)
            .map_err(|e| StoreError::Corrupted(format!("account {}: {}", document.account_id, e)))
    }
}

#[async_trait]
impl AccountStore for RocksAccountStore {
    async fn open_account(
        &self,
        account: &AccountId,
        starting_credits: Credits,
    ) -> Result<AccountDocument, StoreError> {
        let document = {
            let _guard = self
                .write_lock
                .lock()
                .map_err(|_| StoreError::Unavailable("write lock poisoned".to_string()))?;
            if self.read(account)?.is_some() {
                return Err(StoreError::AccountExists(account.to_string()));
            }
            let document = AccountDocument::new(account.clone(), starting_credits);
            self.db
                .put(Self::account_key(account), Self::encode(&document)?)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            document
        };
        let _ = self.notifier.send(document.clone());
        Ok(document)
    }

    async fn get(&self, account: &AccountId) -> Result<Option<AccountDocument>, StoreError> {
        self.read(account)
    }

    async fn increment(
        &self,
        account: &AccountId,
        mutation: &Mutation,
    ) -> Result<AccountDocument, StoreError> {
        let document = {
            let _guard = self
                .write_lock
                .lock()
                .map_err(|_| StoreError::Unavailable("write lock poisoned".to_string()))?;
            let current = self
                .read(account)?
                .ok_or_else(|| StoreError::AccountNotFound(account.to_string()))?;

            let op_key = Self::op_key(&mutation.op_id);
            let already_applied = self
                .db
                .get(&op_key)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?
                .is_some();
            if already_applied {
                return Ok(current);
            }

            let mut updated = current;
            mutation.apply_to(&mut updated)?;

            let mut op_log = self.read_op_log(account)?;
            op_log.push_back(mutation.op_id.clone());

            let mut batch = WriteBatch::default();
            batch.put(Self::account_key(account), Self::encode(&updated)?);
            batch.put(op_key, account.as_str().as_bytes());
            while op_log.len() > self.op_retention {
                if let Some(evicted) = op_log.pop_front() {
                    batch.delete(Self::op_key(&evicted));
                }
            }
            let op_log = serde_json::to_vec(&op_log)
                .map_err(|e| StoreError::Corrupted(format!("op log for {}: {}", account, e)))?;
            batch.put(Self::op_log_key(account), op_log);
            self.db
                .write(batch)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            updated
        };
        let _ = self.notifier.send(document.clone());
        Ok(document)
    }

    fn subscribe(&self) -> broadcast::Receiver<AccountDocument> {
        self.notifier.subscribe()
    }
}
