use std::sync::RwLock;

use tracing::info;

/// Answers "who is signed in". Authentication itself happens in the extension.
#[cfg_attr(test, mockall::automock)]
pub trait AuthProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;

    /// Credential for the remote store, when it needs one.
    fn id_token(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
struct SignedIn {
    user_id: String,
    id_token: Option<String>,
}

/// [AuthProvider] fed by the popup's login / logout messages.
#[derive(Default)]
pub struct SessionAuth {
    state: RwLock<Option<SignedIn>>,
}

impl SessionAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user_id: String, id_token: Option<String>) {
        info!("User {user_id} signed in");
        *self.state.write().unwrap_or_else(|e| e.into_inner()) =
            Some(SignedIn { user_id, id_token });
    }

    pub fn sign_out(&self) {
        info!("User signed out");
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn read(&self) -> Option<SignedIn> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl AuthProvider for SessionAuth {
    fn current_user_id(&self) -> Option<String> {
        self.read().map(|s| s.user_id)
    }

    fn id_token(&self) -> Option<String> {
        self.read().and_then(|s| s.id_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_and_out() {
        let auth = SessionAuth::new();
        assert_eq!(auth.current_user_id(), None);

        auth.sign_in("uid".into(), Some("token".into()));
        assert_eq!(auth.current_user_id().as_deref(), Some("uid"));
        assert_eq!(auth.id_token().as_deref(), Some("token"));

        auth.sign_out();
        assert_eq!(auth.current_user_id(), None);
        assert_eq!(auth.id_token(), None);
    }
}
