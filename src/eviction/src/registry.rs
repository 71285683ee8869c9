//! Registered eviction policies and the active selection.
//!
//! The default policy sits at the head of the list from construction on and
//! cannot be unregistered. Registering a policy appends it and makes it
//! active. Mutations take the write lock, so administration is serialized.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::EvictionError;
use crate::policy::{DefaultPolicy, EvictionPolicy};

/// Maximum length of a policy name.
pub const POLICY_NAME_LEN: usize = 32;

/// Handle returned by [`PolicyRegistry::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PolicyId(u64);

struct Registration {
    id: PolicyId,
    policy: Arc<dyn EvictionPolicy>,
}

struct Inner {
    registrations: Vec<Registration>,
    active: PolicyId,
    next_id: u64,
}

impl Inner {
    fn active(&self) -> &Registration {
        self.registrations
            .iter()
            .find(|r| r.id == self.active)
            .unwrap_or(&self.registrations[0])
    }
}

pub struct PolicyRegistry {
    inner: RwLock<Inner>,
}

impl PolicyRegistry {
    const DEFAULT_ID: PolicyId = PolicyId(0);

    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                registrations: vec![Registration {
                    id: Self::DEFAULT_ID,
                    policy: Arc::new(DefaultPolicy),
                }],
                active: Self::DEFAULT_ID,
                next_id: 1,
            }),
        }
    }

    /// Append `policy` and make it active.
    ///
    /// Names are not required to be unique.
    pub fn register(&self, policy: Arc<dyn EvictionPolicy>) -> Result<PolicyId, EvictionError> {
        let name = policy.name();
        if name.is_empty() {
            return Err(EvictionError::invalid("policy has no name"));
        }
        if name.len() > POLICY_NAME_LEN {
            return Err(EvictionError::invalid(format!(
                "policy name '{name}' is longer than {POLICY_NAME_LEN} bytes"
            )));
        }

        let mut inner = self.inner.write();
        let id = PolicyId(inner.next_id);
        inner.next_id += 1;
        info!(policy = name, "Registering eviction policy");
        inner.registrations.push(Registration {
            id,
            policy: Arc::clone(&policy),
        });
        inner.active = id;
        info!(policy = name, "Active eviction policy changed");

        Ok(id)
    }

    /// Remove a registration.
    ///
    /// Returns `Ok(false)` when `id` is not registered. If the removed policy
    /// was active, the default policy becomes active again.
    pub fn unregister(&self, id: PolicyId) -> Result<bool, EvictionError> {
        if id == Self::DEFAULT_ID {
            warn!("Refusing to unregister the default eviction policy");
            return Err(EvictionError::invalid("the default policy cannot be unregistered"));
        }

        let mut inner = self.inner.write();
        let Some(position) = inner.registrations.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        let removed = inner.registrations.remove(position);
        info!(policy = removed.policy.name(), "Unregistered eviction policy");

        if inner.active == id {
            inner.active = Self::DEFAULT_ID;
            info!(policy = DefaultPolicy.name(), "Active eviction policy changed");
        }

        Ok(true)
    }

    /// Make the first policy registered under `name` active.
    pub fn select(&self, name: &str) -> Result<(), EvictionError> {
        if name.is_empty() {
            return Err(EvictionError::invalid("no policy name given"));
        }

        let mut inner = self.inner.write();
        let Some(id) = inner
            .registrations
            .iter()
            .find(|r| r.policy.name() == name)
            .map(|r| r.id)
        else {
            warn!(policy = name, "Unknown eviction policy");
            return Err(EvictionError::NotFound(format!("policy '{name}'")));
        };

        inner.active = id;
        info!(policy = name, "Active eviction policy changed");
        Ok(())
    }

    pub fn active(&self) -> Arc<dyn EvictionPolicy> {
        Arc::clone(&self.inner.read().active().policy)
    }

    pub fn active_id(&self) -> PolicyId {
        self.inner.read().active().id
    }

    pub fn active_name(&self) -> String {
        self.inner.read().active().policy.name().to_string()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .registrations
            .iter()
            .map(|r| r.policy.name().to_string())
            .collect()
    }

    pub fn default_id(&self) -> PolicyId {
        Self::DEFAULT_ID
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
