//! Authenticated principal lookup.

use parking_lot::RwLock;

/// Supplies the principal that owns the remote collections.
pub trait AuthProvider: Send + Sync {
    /// Current principal id, or `None` when signed out.
    fn principal(&self) -> Option<String>;
}

/// A provider holding a principal set by the host application.
#[derive(Debug, Default)]
pub struct StaticAuth {
    principal: RwLock<Option<String>>,
}

impl StaticAuth {
    /// Creates a provider signed in as `principal`.
    pub fn signed_in(principal: impl Into<String>) -> Self {
        Self {
            principal: RwLock::new(Some(principal.into())),
        }
    }

    /// Creates a signed-out provider.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Signs in as `principal`.
    pub fn sign_in(&self, principal: impl Into<String>) {
        *self.principal.write() = Some(principal.into());
    }

    /// Signs out.
    pub fn sign_out(&self) {
        *self.principal.write() = None;
    }
}

impl AuthProvider for StaticAuth {
    fn principal(&self) -> Option<String> {
        self.principal.read().clone()
    }
}
