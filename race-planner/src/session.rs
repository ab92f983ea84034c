use std::sync::{PoisonError, RwLock};

use cairn::{Session, SessionProvider};

/// The signed-in user as the rest of the app sees it. The host updates it on sign-in, sign-out and when the
/// subscription status comes back; the store reads it on every change.
#[derive(Debug, Default)]
pub struct AppSession {
    current: RwLock<Session>,
}

impl AppSession {
    pub fn new(session: Session) -> Self {
        Self {
            current: RwLock::new(session),
        }
    }

    pub fn current(&self) -> Session {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Premium status is unknown until [`AppSession::set_premium`] is called.
    pub fn sign_in(&self, user_id: impl Into<String>, access_token: impl Into<String>) {
        let session = Session::signed_in(user_id, access_token);
        log::info!("Signed in as {:?}", session.user_id);
        self.replace(session);
    }

    pub fn sign_out(&self) {
        self.replace(Session::signed_out());
        log::info!("Signed out");
    }

    pub fn set_premium(&self, is_premium: bool) {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .is_premium = is_premium;
    }

    fn replace(&self, session: Session) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

impl SessionProvider for AppSession {
    fn session(&self) -> Session {
        self.current()
    }
}
