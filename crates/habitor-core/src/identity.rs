//! Account identity used to scope remote paths

use std::sync::{PoisonError, RwLock};

/// Who the remote documents belong to
pub trait AccountIdentity: Send + Sync {
    /// Account id when signed in, otherwise the device-scoped id
    fn current_id(&self) -> String;

    /// Whether remote sync is enabled for this identity
    fn is_authenticated(&self) -> bool;
}

/// Device id plus an optional signed-in account
///
/// Sign-in mechanics live elsewhere; callers just report the account id.
#[derive(Debug)]
pub struct SessionIdentity {
    device_id: String,
    account: RwLock<Option<String>>,
}

impl SessionIdentity {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            account: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_account(self, account: Option<String>) -> Self {
        *self.account.write().unwrap_or_else(PoisonError::into_inner) = account;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn account(&self) -> Option<String> {
        self.account
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sign_in(&self, account: impl Into<String>) {
        let account = account.into();
        tracing::info!("Signed in as {account}");
        *self.account.write().unwrap_or_else(PoisonError::into_inner) = Some(account);
    }

    pub fn sign_out(&self) {
        if let Some(account) = self
            .account
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            tracing::info!("Signed out of {account}");
        }
    }
}

impl AccountIdentity for SessionIdentity {
    fn current_id(&self) -> String {
        self.account().unwrap_or_else(|| self.device_id.clone())
    }

    fn is_authenticated(&self) -> bool {
        self.account().is_some()
    }
}
