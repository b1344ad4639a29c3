//! Caller identity
//!
//! Authentication itself is external. The core only needs a stable account id
//! per request, or nothing, in which case every operation is rejected.

use crate::games::types::AccountId;
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves request credentials to an account
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, credential: Option<&str>) -> Option<AccountId>;
}

/// Fixed bearer-token table, loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticTokenIdentity {
    tokens: HashMap<String, AccountId>,
}

impl StaticTokenIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: &HashMap<String, String>) -> Self {
        Self {
            tokens: table
                .iter()
                .map(|(token, account)| (token.clone(), AccountId::new(account.clone())))
                .collect(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, account: AccountId) -> Self {
        self.tokens.insert(token.into(), account);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentity {
    async fn resolve(&self, credential: Option<&str>) -> Option<AccountId> {
        let token = credential?.trim();
        if token.is_empty() {
            return None;
        }
        self.tokens.get(token).cloned()
    }
}
