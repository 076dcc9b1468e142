use async_trait::async_trait;
use ethers::types::Address;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroizing;

use super::{CustodialWallet, WalletDirectory};
use crate::errors::{ServiceError, ServiceResult};

/// Wallet directory backed by a PostgREST table `(user_id, address, private_key)`.
#[derive(Clone, Debug)]
pub struct PostgrestWalletDirectory {
    client: Client,
    base_url: String,
    api_key: String,
    table: String,
}

#[derive(Serialize)]
struct WalletRow<'a> {
    user_id: &'a str,
    address: String,
    private_key: &'a str,
}

#[derive(Deserialize)]
struct StoredRow {
    address: String,
    private_key: String,
}

impl PostgrestWalletDirectory {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            table: table.into(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

fn transport(err: reqwest::Error) -> ServiceError {
    ServiceError::Directory(format!("wallet store unreachable: {err}"))
}

#[async_trait]
impl WalletDirectory for PostgrestWalletDirectory {
    async fn create(&self, user_id: &str) -> ServiceResult<Address> {
        if user_id.is_empty() {
            return Err(ServiceError::Directory("user id must not be empty".into()));
        }
        let fresh = CustodialWallet::generate(user_id);
        let row = WalletRow {
            user_id,
            address: format!("{:?}", fresh.address),
            private_key: fresh.private_key(),
        };
        let response = self
            .authorized(self.client.post(self.table_url()))
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Directory(format!(
                "wallet insert rejected with status {status}"
            )));
        }

        // A concurrent or earlier insert may have won; the stored row is authoritative.
        let stored = self
            .lookup(user_id)
            .await?
            .ok_or_else(|| ServiceError::Directory(format!("wallet for {user_id} not persisted")))?;
        if stored.address == fresh.address {
            info!(user = user_id, address = ?stored.address, "created custodial wallet");
        }
        Ok(stored.address)
    }

    async fn lookup(&self, user_id: &str) -> ServiceResult<Option<CustodialWallet>> {
        let response = self
            .authorized(self.client.get(self.table_url()))
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("select", "address,private_key".to_string()),
            ])
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Ok(None),
            status => {
                return Err(ServiceError::Directory(format!(
                    "wallet lookup rejected with status {status}"
                )))
            }
        }
        let rows: Vec<StoredRow> = response.json().await.map_err(transport)?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let address = row
            .address
            .parse::<Address>()
            .map_err(|_| ServiceError::Directory(format!("corrupt address for user {user_id}")))?;
        Ok(Some(CustodialWallet::new(
            user_id,
            address,
            Zeroizing::new(row.private_key),
        )))
    }
}
