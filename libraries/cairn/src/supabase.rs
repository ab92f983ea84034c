//! Backing up to a Supabase table.
//!
//! The table holds one row per user:
//! `user_id text primary key, entities jsonb, updated_at timestamptz`.
//! Row-level security should restrict each user to their own row.
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};

use crate::{
    backup::{RemoteBackup, Session},
    collection::{Collection, Snapshot},
    entity::Entity,
    error::BackupError,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

pub struct SupabaseBackup {
    client: reqwest::Client,
    config: SupabaseConfig,
    table: String,
}

impl SupabaseBackup {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            table: "snapshots".to_string(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    fn table_url(&self) -> String {
        let SupabaseConfig { supabase_url, .. } = &self.config;
        format!("{}/rest/v1/{}", supabase_url.trim_end_matches('/'), self.table)
    }

    fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        access_token: &str,
    ) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.config.supabase_anon_key)
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
    }
}

fn credentials(session: &Session) -> Result<(&str, &str), BackupError> {
    match (&session.user_id, &session.access_token) {
        (Some(user_id), Some(access_token)) => Ok((user_id.as_str(), access_token.as_str())),
        _ => Err(BackupError::Unauthenticated),
    }
}

#[derive(Serialize)]
#[serde(bound(serialize = "E: Entity"))]
struct UploadRow<'a, E: Entity> {
    user_id: &'a str,
    entities: &'a Collection<E>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "E: Entity"))]
struct StoredRow<E: Entity> {
    entities: Collection<E>,
    updated_at: DateTime<Utc>,
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, BackupError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(BackupError::Status {
        status: status.as_u16(),
        body,
    })
}

fn transport(e: reqwest::Error) -> BackupError {
    BackupError::Transport(e.to_string())
}

impl<E: Entity> RemoteBackup<E> for SupabaseBackup {
    fn push_snapshot<'a>(
        &'a self,
        session: &'a Session,
        snapshot: &'a Snapshot<E>,
    ) -> BoxFuture<'a, Result<(), BackupError>> {
        Box::pin(async move {
            let (user_id, access_token) = credentials(session)?;
            let row = UploadRow {
                user_id,
                entities: &snapshot.entities,
                updated_at: snapshot.modified_at.unwrap_or_else(Utc::now),
            };

            let response = self
                .authorized(self.client.post(self.table_url()), access_token)
                .header("Prefer", "resolution=merge-duplicates")
                .json(&row)
                .send()
                .await
                .map_err(transport)?;
            error_for_status(response).await?;

            log::info!(
                "Uploaded {} entities to {}",
                snapshot.entities.len(),
                self.table
            );
            Ok(())
        })
    }

    fn pull_if_newer<'a>(
        &'a self,
        session: &'a Session,
        local: &'a Snapshot<E>,
    ) -> BoxFuture<'a, Result<Option<Snapshot<E>>, BackupError>> {
        Box::pin(async move {
            let (user_id, access_token) = credentials(session)?;

            let response = self
                .authorized(self.client.get(self.table_url()), access_token)
                .query(&[
                    ("user_id", format!("eq.{user_id}")),
                    ("select", "entities,updated_at".to_string()),
                ])
                .send()
                .await
                .map_err(transport)?;
            let body = error_for_status(response)
                .await?
                .text()
                .await
                .map_err(transport)?;

            let rows: Vec<StoredRow<E>> = serde_json::from_str(&body).map_err(|e| {
                BackupError::Decode(format!("{e}\nResponse body: {body}"))
            })?;

            let Some(row) = rows.into_iter().next() else {
                return Ok(None);
            };
            let remote = Snapshot::new(row.entities, Some(row.updated_at));
            Ok(remote.is_newer_than(local).then_some(remote))
        })
    }
}
