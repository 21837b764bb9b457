//! Local user identity announced in descriptors and chat messages.

use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub user_id: String,
    nickname: Option<String>,
}

pub type SharedIdentity = Arc<RwLock<LocalIdentity>>;

impl LocalIdentity {
    /// Fresh identity: the first 8 hex characters of a random UUID.
    pub fn generate(nickname: Option<String>) -> Self {
        let mut user_id = Uuid::new_v4().simple().to_string();
        user_id.truncate(8);
        let mut id = Self {
            user_id,
            nickname: None,
        };
        id.set_nickname(nickname.as_deref().unwrap_or_default());
        id
    }

    pub fn shared(self) -> SharedIdentity {
        Arc::new(RwLock::new(self))
    }

    /// The chosen nickname, or `User <user_id>` when none was set.
    pub fn nickname(&self) -> String {
        match &self.nickname {
            Some(n) => n.clone(),
            None => format!("User {}", self.user_id),
        }
    }

    /// Blank input clears the nickname back to the default.
    pub fn set_nickname(&mut self, nickname: &str) {
        let trimmed = nickname.trim();
        self.nickname = (!trimmed.is_empty()).then(|| trimmed.to_string());
    }
}
