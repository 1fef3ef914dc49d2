use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions, ReplaceOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;

use super::store::{PasswordResetStore, ReplaceOutcome, SessionStore, UserStore};
use super::ServiceError;
use crate::config::StoreConfig;
use crate::models::{session::generate_session_id, NewSession, PasswordReset, Session, User};

const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY
    )
}

fn to_bson_date(t: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_chrono(t)
}

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
    sessions_collection: String,
    users_collection: String,
    password_resets_collection: String,
}

impl MongoDb {
    pub async fn connect(config: &StoreConfig) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(&config.mongodb_uri)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to MongoDB: {}", e);
                AppError::from(e)
            })?;
        let db = client.database(&config.mongodb_database);
        tracing::info!(database = %config.mongodb_database, "Successfully connected to MongoDB database");
        Ok(Self {
            client,
            db,
            sessions_collection: config.sessions_collection.clone(),
            users_collection: config.users_collection.clone(),
            password_resets_collection: config.password_resets_collection.clone(),
        })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for board-auth");

        let session_user_index = IndexModel::builder()
            .keys(doc! { "user_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("session_user_lookup".to_string())
                    .build(),
            )
            .build();

        self.sessions()
            .create_index(session_user_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create user_id index on sessions collection: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created index on sessions.user_id");

        let session_created_index = IndexModel::builder()
            .keys(doc! { "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("session_created_at".to_string())
                    .build(),
            )
            .build();

        self.sessions()
            .create_index(session_created_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create created_at index on sessions collection: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created index on sessions.created_at");

        // One outstanding reset per user, enforced by the server.
        let reset_user_index = IndexModel::builder()
            .keys(doc! { "user_id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("password_reset_user_unique".to_string())
                    .build(),
            )
            .build();

        self.password_resets()
            .create_index(reset_user_index, None)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create unique user_id index on password resets collection: {}",
                    e
                );
                AppError::from(e)
            })?;
        tracing::info!("Created unique index on password_resets.user_id");

        for field in ["email", "name"] {
            let index = IndexModel::builder()
                .keys(doc! { field: 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .name(format!("user_{}_unique", field))
                        .build(),
                )
                .build();

            self.users().create_index(index, None).await.map_err(|e| {
                tracing::error!("Failed to create {} index on users collection: {}", field, e);
                AppError::from(e)
            })?;
            tracing::info!("Created unique index on users.{}", field);
        }

        Ok(())
    }

    pub fn sessions(&self) -> Collection<Session> {
        self.db.collection(&self.sessions_collection)
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection(&self.users_collection)
    }

    pub fn password_resets(&self) -> Collection<PasswordReset> {
        self.db.collection(&self.password_resets_collection)
    }

    async fn set_user_fields(
        &self,
        user_id: &str,
        fields: bson::Document,
    ) -> Result<(), ServiceError> {
        let result = self
            .users()
            .update_one(doc! { "_id": user_id }, doc! { "$set": fields }, None)
            .await?;
        if result.matched_count == 0 {
            return Err(ServiceError::UserNotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MongoDb {
    async fn get_by_id(&self, id: &str) -> Result<Option<User>, ServiceError> {
        Ok(self.users().find_one(doc! { "_id": id }, None).await?)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(self.users().find_one(doc! { "email": email }, None).await?)
    }

    async fn insert(&self, user: &User) -> Result<(), ServiceError> {
        match self.users().insert_one(user, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(ServiceError::UserAlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_password_hash(&self, user_id: &str, hash: &str) -> Result<(), ServiceError> {
        self.set_user_fields(user_id, doc! { "password_hash": hash }).await
    }

    async fn set_totp_secret(&self, user_id: &str, secret: &str) -> Result<(), ServiceError> {
        self.set_user_fields(user_id, doc! { "totp_secret": secret }).await
    }

    async fn enable_mfa(
        &self,
        user_id: &str,
        secret: &str,
        duration_seconds: i64,
        recovery_codes: &[String],
    ) -> Result<bool, ServiceError> {
        let result = self
            .users()
            .update_one(
                doc! {
                    "_id": user_id,
                    "has_2fa_enabled": { "$ne": true },
                    "totp_secret": secret,
                },
                doc! { "$set": {
                    "has_2fa_enabled": true,
                    "auth_duration_seconds": duration_seconds,
                    "recovery_codes": recovery_codes.to_vec(),
                } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn disable_mfa(&self, user_id: &str) -> Result<bool, ServiceError> {
        let result = self
            .users()
            .update_one(
                doc! { "_id": user_id, "has_2fa_enabled": true },
                doc! { "$set": { "has_2fa_enabled": false } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn set_recovery_codes(
        &self,
        user_id: &str,
        codes: &[String],
    ) -> Result<(), ServiceError> {
        self.set_user_fields(user_id, doc! { "recovery_codes": codes.to_vec() })
            .await
    }

    async fn redeem_recovery_code(&self, user_id: &str, code: &str) -> Result<bool, ServiceError> {
        // Matching on the code makes the pull a compare-and-remove.
        let result = self
            .users()
            .update_one(
                doc! { "_id": user_id, "recovery_codes": code },
                doc! { "$pull": { "recovery_codes": code } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1 && result.modified_count == 1)
    }
}

#[async_trait]
impl SessionStore for MongoDb {
    async fn insert(&self, session: NewSession) -> Result<String, ServiceError> {
        let session = session.into_session(generate_session_id());
        self.sessions().insert_one(&session, None).await?;
        Ok(session.id)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>, ServiceError> {
        Ok(self.sessions().find_one(doc! { "_id": id }, None).await?)
    }

    async fn find_by_user(
        &self,
        user_id: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Session>, ServiceError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1, "_id": -1 })
            .build();

        let cursor = self
            .sessions()
            .find(
                doc! {
                    "user_id": user_id,
                    "created_at": { "$gt": to_bson_date(created_after) },
                },
                options,
            )
            .await?;

        let sessions: Vec<Session> = cursor.try_collect().await?;
        Ok(sessions)
    }

    async fn replace(&self, session: &Session) -> Result<ReplaceOutcome, ServiceError> {
        let result = self
            .sessions()
            .replace_one(
                doc! { "_id": &session.id },
                session,
                ReplaceOptions::builder().upsert(false).build(),
            )
            .await?;

        Ok(match (result.matched_count, result.modified_count) {
            (0, _) => ReplaceOutcome::Missing,
            (_, 0) => ReplaceOutcome::Unchanged,
            _ => ReplaceOutcome::Modified,
        })
    }

    async fn delete(&self, id: &str) -> Result<bool, ServiceError> {
        let result = self.sessions().delete_one(doc! { "_id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<u64, ServiceError> {
        let result = self
            .sessions()
            .delete_many(doc! { "user_id": user_id }, None)
            .await?;
        Ok(result.deleted_count)
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PasswordResetStore for MongoDb {
    async fn insert_exclusive(
        &self,
        reset: &PasswordReset,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        // Expired resets would otherwise hold the unique user_id slot.
        self.password_resets()
            .delete_many(
                doc! {
                    "user_id": &reset.user_id,
                    "expires_at": { "$lte": to_bson_date(now) },
                },
                None,
            )
            .await?;

        match self.password_resets().insert_one(reset, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(ServiceError::ResetAlreadyRequested),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PasswordReset>, ServiceError> {
        Ok(self
            .password_resets()
            .find_one(doc! { "_id": id }, None)
            .await?)
    }

    async fn take(&self, id: &str) -> Result<Option<PasswordReset>, ServiceError> {
        Ok(self
            .password_resets()
            .find_one_and_delete(doc! { "_id": id }, None)
            .await?)
    }
}
