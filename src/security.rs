use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::kernel::actor::ActorRole;
use crate::util::id::ActorGuid;

/// Identity attached to every wire record and management call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub name: String,
    pub guid: ActorGuid,
    /// Bearer credential; absent on trusted local calls.
    pub token: Option<String>,
}

impl AuthToken {
    pub fn new(name: impl Into<String>, guid: ActorGuid) -> Self {
        AuthToken { name: name.into(), guid, token: None }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.guid)
    }
}

/// Management actions subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionId {
    Query,
    Add,
    Update,
    Remove,
    Demand,
    Close,
    Extend,
    Claim,
    Reclaim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Slice,
    Reservation,
    Delegation,
    Unit,
    Actor,
}

/// Validates the bearer credential on a token. The production validator
/// checks a signature against a public key; tests install a static keyring.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &AuthToken) -> Result<()>;
}

/// Decides whether a validated identity may perform an action. The decision
/// point receives the full (action, resource kind, resource id, actor role)
/// tuple, so a deployment can scope rights per role.
pub trait PolicyDecisionPoint: Send + Sync {
    fn authorize(
        &self,
        token: &AuthToken,
        action: ActionId,
        resource: ResourceKind,
        resource_id: &str,
        role: ActorRole,
    ) -> Result<()>;
}

/// Accepts tokens whose credential matches a configured keyring entry.
pub struct KeyringValidator {
    keys: HashMap<String, String>,
}

impl KeyringValidator {
    pub fn new(keys: HashMap<String, String>) -> Self {
        KeyringValidator { keys }
    }
}

impl TokenValidator for KeyringValidator {
    fn validate(&self, token: &AuthToken) -> Result<()> {
        let credential = token
            .token
            .as_deref()
            .ok_or_else(|| Error::AuthenticationFailure(format!("no credential presented by {}", token.name)))?;
        match self.keys.get(&token.name) {
            Some(expected) if expected == credential => Ok(()),
            _ => Err(Error::AuthenticationFailure(format!("credential rejected for {}", token.name))),
        }
    }
}

/// Trusts every caller. Used for in-process peers and tests.
pub struct OpenValidator;

impl TokenValidator for OpenValidator {
    fn validate(&self, _token: &AuthToken) -> Result<()> {
        Ok(())
    }
}

/// Grants everything a valid token asks for.
pub struct PermitAll;

impl PolicyDecisionPoint for PermitAll {
    fn authorize(&self, _: &AuthToken, _: ActionId, _: ResourceKind, _: &str, _: ActorRole) -> Result<()> {
        Ok(())
    }
}

/// Front door for the management plane: authentication first, then the
/// decision point. The two failure modes surface as distinct error codes.
pub struct AccessChecker {
    validator: Box<dyn TokenValidator>,
    pdp: Box<dyn PolicyDecisionPoint>,
}

impl AccessChecker {
    pub fn new(validator: Box<dyn TokenValidator>, pdp: Box<dyn PolicyDecisionPoint>) -> Self {
        AccessChecker { validator, pdp }
    }

    pub fn open() -> Self {
        AccessChecker { validator: Box::new(OpenValidator), pdp: Box::new(PermitAll) }
    }

    pub fn check_access(
        &self,
        token: &AuthToken,
        action: ActionId,
        resource: ResourceKind,
        resource_id: &str,
        role: ActorRole,
    ) -> Result<()> {
        self.validator.validate(token)?;
        self.pdp.authorize(token, action, resource, resource_id, role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn unauthenticated_and_unauthorized_are_distinct() {
        struct DenyAll;
        impl PolicyDecisionPoint for DenyAll {
            fn authorize(
                &self,
                _: &AuthToken,
                _: ActionId,
                _: ResourceKind,
                _: &str,
                _: ActorRole,
            ) -> Result<()> {
                Err(Error::AccessDenied("not on the list".into()))
            }
        }

        let mut keys = HashMap::new();
        keys.insert("alice".to_string(), "secret".to_string());

        let checker = AccessChecker::new(Box::new(KeyringValidator::new(keys)), Box::new(DenyAll));

        let anonymous = AuthToken::new("alice", ActorGuid::new());
        let err = checker
            .check_access(&anonymous, ActionId::Add, ResourceKind::Slice, "s1", ActorRole::Orchestrator)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AuthenticationFailure);

        let alice = AuthToken::new("alice", ActorGuid::new()).with_token("secret");
        let err = checker
            .check_access(&alice, ActionId::Add, ResourceKind::Slice, "s1", ActorRole::Orchestrator)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AccessDenied);
    }

    #[test]
    fn decision_point_sees_the_actor_role() {
        struct BrokerOnly;
        impl PolicyDecisionPoint for BrokerOnly {
            fn authorize(
                &self,
                _: &AuthToken,
                _: ActionId,
                _: ResourceKind,
                _: &str,
                role: ActorRole,
            ) -> Result<()> {
                if role == ActorRole::Broker {
                    Ok(())
                } else {
                    Err(Error::AccessDenied(format!("not allowed on a {}", role.as_str())))
                }
            }
        }

        let checker = AccessChecker::new(Box::new(OpenValidator), Box::new(BrokerOnly));
        let token = AuthToken::new("alice", ActorGuid::new());

        assert!(checker
            .check_access(&token, ActionId::Query, ResourceKind::Actor, "", ActorRole::Broker)
            .is_ok());
        let err = checker
            .check_access(&token, ActionId::Query, ResourceKind::Actor, "", ActorRole::Authority)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AccessDenied);
    }
}
