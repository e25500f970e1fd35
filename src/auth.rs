use kursiyer_common::info;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    SignedIn { email: String },
}

impl AuthState {
    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthState::SignedIn { .. })
    }
}

/// Current-user source for the sync core. Credential checks live behind the implementation.
pub trait AuthService: Send + Sync {
    fn watch(&self) -> watch::Receiver<AuthState>;
    fn sign_out(&self);
}

/// Auth state held in process; the CLI and tests sign in directly.
pub struct LocalAuthService {
    state_tx: watch::Sender<AuthState>,
}

impl Default for LocalAuthService {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAuthService {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(AuthState::SignedOut);
        Self { state_tx }
    }

    pub fn sign_in(&self, email: impl Into<String>) {
        let email = email.into();
        info!("signed in as {}", email);
        self.state_tx.send_replace(AuthState::SignedIn { email });
    }

    pub fn current(&self) -> AuthState {
        self.state_tx.borrow().clone()
    }
}

impl AuthService for LocalAuthService {
    fn watch(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    fn sign_out(&self) {
        let changed = self.state_tx.send_if_modified(|state| {
            if state.is_signed_in() {
                *state = AuthState::SignedOut;
                true
            } else {
                false
            }
        });
        if changed {
            info!("signed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_out_only_notifies_when_signed_in() {
        let auth = LocalAuthService::new();
        let mut rx = auth.watch();
        auth.sign_out();
        assert!(!rx.has_changed().unwrap());

        auth.sign_in("kurs@example.com");
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_signed_in());

        auth.sign_out();
        assert_eq!(*rx.borrow_and_update(), AuthState::SignedOut);
        assert_eq!(auth.current(), AuthState::SignedOut);
    }
}
