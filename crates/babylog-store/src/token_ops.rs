use babylog_core::{AccessToken, AccessTokenValue, FamilyId, Timestamp};
use redb_bincode::ReadableTable as _;
use snafu::OptionExt as _;
use tracing::info;

use crate::error::{FamilyNotFoundSnafu, TokenNotUsableSnafu};
use crate::tables::{AccessTokenRecord, access_links, families};
use crate::{Database, LOG_TARGET, StoreResult};

impl AccessTokenRecord {
    fn into_access_token(self, token: AccessTokenValue) -> AccessToken {
        AccessToken {
            token,
            family_id: self.family_id,
            label: self.label,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
            created_at: self.created_at,
        }
    }
}

impl Database {
    pub async fn issue_token(
        &self,
        family_id: FamilyId,
        label: Option<String>,
        expires_at: Option<Timestamp>,
    ) -> StoreResult<AccessToken> {
        self.write_with(move |tx| {
            let families_table = tx.open_table(&families::TABLE)?;
            if families_table.get(&family_id)?.is_none() {
                return FamilyNotFoundSnafu.fail();
            }
            drop(families_table);

            let token = AccessTokenValue::generate();
            let record = AccessTokenRecord {
                family_id,
                label,
                expires_at,
                revoked_at: None,
                created_at: Timestamp::now(),
            };
            let mut table = tx.open_table(&access_links::TABLE)?;
            table.insert(&token, &record)?;
            info!(target: LOG_TARGET, %family_id, "Issued access token");
            Ok(record.into_access_token(token))
        })
        .await
    }

    pub async fn revoke_token(&self, token: AccessTokenValue) -> StoreResult<()> {
        self.write_with(move |tx| {
            let mut table = tx.open_table(&access_links::TABLE)?;
            let Some(mut record) = table.get(&token)?.map(|g| g.value()) else {
                return TokenNotUsableSnafu.fail();
            };
            record.revoked_at = Some(Timestamp::now());
            table.insert(&token, &record)?;
            info!(target: LOG_TARGET, family_id = %record.family_id, "Revoked access token");
            Ok(())
        })
        .await
    }

    /// Returns every non-expired, non-revoked token for `family_id`, for
    /// operator display.
    pub async fn list_tokens(&self, family_id: FamilyId) -> StoreResult<Vec<AccessToken>> {
        let now = Timestamp::now();
        self.read_with(move |tx| {
            let table = tx.open_table(&access_links::TABLE)?;
            let mut out = Vec::new();
            for row in table.range(..)? {
                let (k, v) = row?;
                let record = v.value();
                if record.family_id == family_id {
                    let token = record.into_access_token(k.value());
                    if token.is_usable(now) {
                        out.push(token);
                    }
                }
            }
            Ok(out)
        })
        .await
    }

    /// Resolves a presented token to its family, treating expired or
    /// revoked tokens identically to unknown ones.
    pub async fn resolve_token(&self, token: AccessTokenValue) -> StoreResult<Option<AccessToken>> {
        self.read_with(move |tx| {
            let table = tx.open_table(&access_links::TABLE)?;
            let Some(record) = table.get(&token)?.map(|g| g.value()) else {
                return Ok(None);
            };
            let access_token = record.into_access_token(token);
            if access_token.is_usable(Timestamp::now()) {
                Ok(Some(access_token))
            } else {
                Ok(None)
            }
        })
        .await
    }
}
