use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use ticket_relay::errors::{ServiceError, ServiceResult};
use ticket_relay::identity::{IdentityProvider, Session};

/// Token that makes verification fail as if the provider were unreachable.
pub const UNREACHABLE_TOKEN: &str = "provider-down";

#[derive(Default)]
struct Accounts {
    by_email: HashMap<String, (String, String)>,
    tokens: HashMap<String, String>,
}

#[derive(Default)]
pub struct FakeIdentity {
    accounts: Mutex<Accounts>,
}

impl FakeIdentity {
    /// Register `email` and return a bearer token for it.
    pub fn register(&self, email: &str) -> (String, String) {
        let mut accounts = self.accounts.lock();
        let user_id = format!("user-{}", accounts.by_email.len() + 1);
        let token = format!("token-{user_id}");
        accounts
            .by_email
            .insert(email.to_string(), ("secret".to_string(), user_id.clone()));
        accounts.tokens.insert(token.clone(), user_id.clone());
        (user_id, token)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn sign_up(&self, email: &str, password: &str) -> ServiceResult<String> {
        let mut accounts = self.accounts.lock();
        if accounts.by_email.contains_key(email) {
            return Err(ServiceError::Identity("User already registered".into()));
        }
        let user_id = format!("user-{}", accounts.by_email.len() + 1);
        accounts
            .by_email
            .insert(email.to_string(), (password.to_string(), user_id.clone()));
        Ok(user_id)
    }

    async fn sign_in(&self, email: &str, password: &str) -> ServiceResult<Session> {
        let mut accounts = self.accounts.lock();
        let user_id = match accounts.by_email.get(email) {
            Some((stored, user_id)) if stored == password => user_id.clone(),
            _ => return Err(ServiceError::Identity("Invalid login credentials".into())),
        };
        let token = format!("token-{user_id}");
        accounts.tokens.insert(token.clone(), user_id.clone());
        Ok(Session {
            user: json!({ "id": user_id, "email": email }),
            token,
        })
    }

    async fn verify_token(&self, token: &str) -> ServiceResult<Option<String>> {
        if token == UNREACHABLE_TOKEN {
            return Err(ServiceError::Identity("connection refused".into()));
        }
        Ok(self.accounts.lock().tokens.get(token).cloned())
    }

    async fn user_id_by_email(&self, email: &str) -> ServiceResult<String> {
        self.accounts
            .lock()
            .by_email
            .get(email)
            .map(|(_, user_id)| user_id.clone())
            .ok_or_else(|| ServiceError::Identity(format!("no user with email {email}")))
    }
}
