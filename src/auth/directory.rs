use std::collections::HashMap;

use async_trait::async_trait;

use super::{InternalUser, Result, UserDirectory};

/// Config-backed table from external id to internal user id
///
/// With `passthrough` set, unlisted identities resolve to themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: HashMap<String, String>,
    passthrough: bool,
}

impl StaticDirectory {
    pub fn new(users: HashMap<String, String>, passthrough: bool) -> Self {
        Self { users, passthrough }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let users = pairs
            .into_iter()
            .map(|(external, internal)| (external.to_string(), internal.to_string()))
            .collect();
        Self::new(users, false)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn resolve_user(&self, external_id: &str) -> Result<Option<InternalUser>> {
        let id = match self.users.get(external_id) {
            Some(id) => id.clone(),
            None if self.passthrough => external_id.to_string(),
            None => return Ok(None),
        };

        Ok(Some(InternalUser {
            id,
            external_id: external_id.to_string(),
        }))
    }
}
