//! Client identity context — read-mostly state snapshotted into every event
//! at enqueue time. Constructed and injected at the composition root; never
//! a process-wide global.

use parking_lot::RwLock;
use uuid::Uuid;

use pulse_core::types::IdentitySnapshot;

#[derive(Debug)]
struct IdentityState {
    custom_identifier: Option<String>,
    custom_email: Option<String>,
    session_token: Option<String>,
    anonymous_id: Uuid,
}

/// Mutations apply prospectively: only events enqueued after a change carry
/// the new identity. Reads never coordinate with queue locks.
pub struct IdentityContext {
    state: RwLock<IdentityState>,
}

impl IdentityContext {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IdentityState {
                custom_identifier: None,
                custom_email: None,
                session_token: None,
                anonymous_id: Uuid::new_v4(),
            }),
        }
    }

    /// Set a custom identifier matched against the customer database; it is
    /// attached to the parameters of every subsequent event.
    pub fn set_custom_identifier(&self, value: Option<String>) {
        self.state.write().custom_identifier = value;
    }

    pub fn set_custom_email(&self, value: Option<String>) {
        self.state.write().custom_email = value;
    }

    pub fn set_session_token(&self, value: Option<String>) {
        self.state.write().session_token = value;
    }

    pub fn session_token(&self) -> Option<String> {
        self.state.read().session_token.clone()
    }

    /// Sign-out: wipe identity and session, rotate the anonymous id so the
    /// next session is not linkable to the previous one.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.custom_identifier = None;
        state.custom_email = None;
        state.session_token = None;
        state.anonymous_id = Uuid::new_v4();
    }

    pub fn snapshot(&self) -> IdentitySnapshot {
        let state = self.state.read();
        IdentitySnapshot {
            custom_identifier: state.custom_identifier.clone(),
            custom_email: state.custom_email.clone(),
            anonymous_id: state.anonymous_id,
        }
    }
}

impl Default for IdentityContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_current_state() {
        let identity = IdentityContext::new();
        assert!(identity.snapshot().custom_identifier.is_none());

        identity.set_custom_identifier(Some("cust-1".into()));
        identity.set_custom_email(Some("a@example.com".into()));

        let snapshot = identity.snapshot();
        assert_eq!(snapshot.custom_identifier.as_deref(), Some("cust-1"));
        assert_eq!(snapshot.custom_email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_snapshots_are_independent() {
        let identity = IdentityContext::new();
        identity.set_custom_identifier(Some("before".into()));
        let frozen = identity.snapshot();

        identity.set_custom_identifier(Some("after".into()));
        assert_eq!(frozen.custom_identifier.as_deref(), Some("before"));
        assert_eq!(
            identity.snapshot().custom_identifier.as_deref(),
            Some("after")
        );
    }

    #[test]
    fn test_clear_rotates_anonymous_id() {
        let identity = IdentityContext::new();
        identity.set_custom_identifier(Some("cust-1".into()));
        identity.set_session_token(Some("jwt".into()));
        let old_anonymous = identity.snapshot().anonymous_id;

        identity.clear();

        let snapshot = identity.snapshot();
        assert!(snapshot.custom_identifier.is_none());
        assert!(identity.session_token().is_none());
        assert_ne!(snapshot.anonymous_id, old_anonymous);
    }
}
