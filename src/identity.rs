//! Identity provider seam and its Supabase-compatible HTTP implementation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{ServiceError, ServiceResult};

/// Authenticated session returned by a successful sign-in.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub user: Value,
    pub token: String,
}

impl Session {
    pub fn user_id(&self) -> Option<&str> {
        self.user.get("id").and_then(Value::as_str)
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> ServiceResult<String>;

    async fn sign_in(&self, email: &str, password: &str) -> ServiceResult<Session>;

    /// Resolve a bearer token. `Ok(None)` means the provider rejected it.
    async fn verify_token(&self, token: &str) -> ServiceResult<Option<String>>;

    async fn user_id_by_email(&self, email: &str) -> ServiceResult<String>;
}

#[derive(Clone, Debug)]
pub struct SupabaseIdentity {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: Value,
}

#[derive(Deserialize)]
struct UserIdRow {
    id: String,
}

impl SupabaseIdentity {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ServiceResult<reqwest::Response> {
        let response = request
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|err| ServiceError::Identity(format!("identity provider unreachable: {err}")))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Err(ServiceError::Identity(provider_message(&body).unwrap_or_else(
            || format!("identity provider returned {status}"),
        )))
    }
}

fn provider_message(body: &Value) -> Option<String> {
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn decode_error(err: reqwest::Error) -> ServiceError {
    ServiceError::Identity(format!("unexpected identity provider response: {err}"))
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    async fn sign_up(&self, email: &str, password: &str) -> ServiceResult<String> {
        let response = self
            .send(
                self.client
                    .post(self.url("/auth/v1/signup"))
                    .json(&json!({ "email": email, "password": password })),
            )
            .await?;
        let body: Value = response.json().await.map_err(decode_error)?;
        // Depending on email confirmation settings the user is either nested or top level.
        body.get("user")
            .unwrap_or(&body)
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServiceError::Identity("sign-up response carried no user id".into()))
    }

    async fn sign_in(&self, email: &str, password: &str) -> ServiceResult<Session> {
        let response = self
            .send(
                self.client
                    .post(self.url("/auth/v1/token"))
                    .query(&[("grant_type", "password")])
                    .json(&json!({ "email": email, "password": password })),
            )
            .await?;
        let token: TokenResponse = response.json().await.map_err(decode_error)?;
        Ok(Session {
            user: token.user,
            token: token.access_token,
        })
    }

    async fn verify_token(&self, token: &str) -> ServiceResult<Option<String>> {
        let response = self
            .client
            .get(self.url("/auth/v1/user"))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| ServiceError::Identity(format!("identity provider unreachable: {err}")))?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                debug!("identity provider rejected bearer token");
                return Ok(None);
            }
            status if !status.is_success() => {
                return Err(ServiceError::Identity(format!(
                    "identity provider returned {status}"
                )))
            }
            _ => {}
        }
        let user: Value = response.json().await.map_err(decode_error)?;
        Ok(user
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string))
    }

    async fn user_id_by_email(&self, email: &str) -> ServiceResult<String> {
        let response = self
            .send(
                self.client
                    .post(self.url("/rest/v1/rpc/get_user_id_by_email"))
                    .bearer_auth(&self.api_key)
                    .json(&json!({ "email": email })),
            )
            .await?;
        let rows: Vec<UserIdRow> = response.json().await.map_err(decode_error)?;
        rows.into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| ServiceError::Identity("User not found".into()))
    }
}
