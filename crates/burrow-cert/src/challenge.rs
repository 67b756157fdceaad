//! Pending ACME HTTP-01 challenges

use dashmap::DashMap;
use tracing::debug;

/// Challenge callbacks handed to a certificate authority during issuance
pub trait ChallengeHooks: Send + Sync {
    /// Publish `key_authorization` under `token` for `hostname`
    fn set(&self, hostname: &str, token: &str, key_authorization: &str);

    /// Value to serve for `token` on `hostname`, if one is pending
    fn get(&self, hostname: &str, token: &str) -> Option<String>;

    /// Withdraw whatever is pending for `hostname`
    fn clear(&self, hostname: &str);
}

/// One outstanding HTTP-01 challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    pub token: String,
    pub key_authorization: String,
}

/// Challenge slot per hostname
///
/// Kept apart from the bundle cache: a challenge lives only for the duration
/// of one order.
#[derive(Debug, Default)]
pub struct ChallengeStore {
    pending: DashMap<String, PendingChallenge>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self, hostname: &str) -> Option<PendingChallenge> {
        self.pending
            .get(&hostname.to_ascii_lowercase())
            .map(|entry| entry.value().clone())
    }
}

impl ChallengeHooks for ChallengeStore {
    fn set(&self, hostname: &str, token: &str, key_authorization: &str) {
        debug!("Publishing HTTP-01 challenge for {}", hostname);
        self.pending.insert(
            hostname.to_ascii_lowercase(),
            PendingChallenge {
                token: token.to_string(),
                key_authorization: key_authorization.to_string(),
            },
        );
    }

    fn get(&self, hostname: &str, token: &str) -> Option<String> {
        self.pending
            .get(&hostname.to_ascii_lowercase())
            .filter(|entry| entry.token == token)
            .map(|entry| entry.key_authorization.clone())
    }

    fn clear(&self, hostname: &str) {
        if self.pending.remove(&hostname.to_ascii_lowercase()).is_some() {
            debug!("Withdrew HTTP-01 challenge for {}", hostname);
        }
    }
}
