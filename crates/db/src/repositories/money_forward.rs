use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::Row;

use super::{
    decode_error, parse_datetime, parse_optional_datetime, MoneyForwardTokenStore,
    RepositoryError,
};
use crate::DbPool;

/// OAuth tokens for the single Money Forward connection of this installation.
#[derive(Clone)]
pub struct MoneyForwardConnection {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl MoneyForwardConnection {
    /// Treats tokens within `leeway_secs` of expiry as already expired.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        self.expires_at
            .map(|expires_at| expires_at - chrono::Duration::seconds(leeway_secs) <= now)
            .unwrap_or(false)
    }
}

impl fmt::Debug for MoneyForwardConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MoneyForwardConnection")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

pub struct SqlMoneyForwardTokenStore {
    pool: DbPool,
}

impl SqlMoneyForwardTokenStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MoneyForwardTokenStore for SqlMoneyForwardTokenStore {
    async fn store_state(
        &self,
        state: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("INSERT OR REPLACE INTO mf_oauth_state (state, created_at) VALUES (?, ?)")
            .bind(state)
            .bind(created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn consume_state(
        &self,
        state: &str,
        not_before: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT created_at FROM mf_oauth_state WHERE state = ?")
            .bind(state)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let created_at: String = row.try_get("created_at").map_err(decode_error)?;
        let created_at = parse_datetime(&created_at)?;

        sqlx::query("DELETE FROM mf_oauth_state WHERE state = ?")
            .bind(state)
            .execute(&mut *tx)
            .await?;
        // Expired states are dropped as well so they cannot be retried.
        sqlx::query("DELETE FROM mf_oauth_state WHERE created_at < ?")
            .bind(not_before.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(created_at >= not_before)
    }

    async fn save_connection(
        &self,
        connection: &MoneyForwardConnection,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO mf_connection (id, access_token, refresh_token, expires_at, scope, updated_at)
             VALUES (1, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                scope = excluded.scope,
                updated_at = excluded.updated_at",
        )
        .bind(connection.access_token.expose_secret())
        .bind(connection.refresh_token.as_ref().map(|token| token.expose_secret().to_string()))
        .bind(connection.expires_at.map(|at| at.to_rfc3339()))
        .bind(&connection.scope)
        .bind(connection.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_connection(&self) -> Result<Option<MoneyForwardConnection>, RepositoryError> {
        let row = sqlx::query(
            "SELECT access_token, refresh_token, expires_at, scope, updated_at
             FROM mf_connection WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let access_token: String = row.try_get("access_token").map_err(decode_error)?;
        let refresh_token: Option<String> = row.try_get("refresh_token").map_err(decode_error)?;
        let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

        Ok(Some(MoneyForwardConnection {
            access_token: SecretString::from(access_token),
            refresh_token: refresh_token.map(SecretString::from),
            expires_at: parse_optional_datetime(row.try_get("expires_at").map_err(decode_error)?)?,
            scope: row.try_get("scope").map_err(decode_error)?,
            updated_at: parse_datetime(&updated_at)?,
        }))
    }

    async fn clear_connection(&self) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM mf_connection").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use secrecy::{ExposeSecret, SecretString};

    use super::{MoneyForwardConnection, SqlMoneyForwardTokenStore};
    use crate::repositories::test_support::setup;
    use crate::repositories::MoneyForwardTokenStore;

    fn connection(token: &str) -> MoneyForwardConnection {
        let now = Utc::now();
        MoneyForwardConnection {
            access_token: SecretString::from(token.to_string()),
            refresh_token: Some(SecretString::from("refresh-1".to_string())),
            expires_at: Some(now + Duration::hours(1)),
            scope: Some("mfc/invoice/data.write".to_string()),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let store = SqlMoneyForwardTokenStore::new(setup().await);
        let now = Utc::now();
        store.store_state("state-1", now).await.expect("store");

        let cutoff = now - Duration::minutes(10);
        assert!(store.consume_state("state-1", cutoff).await.expect("first consume"));
        assert!(!store.consume_state("state-1", cutoff).await.expect("replay"));
        assert!(!store.consume_state("unknown", cutoff).await.expect("unknown"));
    }

    #[tokio::test]
    async fn expired_state_is_rejected() {
        let store = SqlMoneyForwardTokenStore::new(setup().await);
        let issued = Utc::now() - Duration::minutes(30);
        store.store_state("old", issued).await.expect("store");

        assert!(!store.consume_state("old", Utc::now() - Duration::minutes(10)).await.expect("consume"));
    }

    #[tokio::test]
    async fn connection_is_replaced_and_cleared() {
        let store = SqlMoneyForwardTokenStore::new(setup().await);
        assert!(store.load_connection().await.expect("empty").is_none());

        store.save_connection(&connection("token-1")).await.expect("save 1");
        store.save_connection(&connection("token-2")).await.expect("save 2");

        let loaded = store.load_connection().await.expect("load").expect("connected");
        assert_eq!(loaded.access_token.expose_secret(), "token-2");
        assert!(!loaded.is_expired(Utc::now(), 60));
        assert!(!format!("{loaded:?}").contains("token-2"));

        store.clear_connection().await.expect("clear");
        assert!(store.load_connection().await.expect("cleared").is_none());
    }
}
