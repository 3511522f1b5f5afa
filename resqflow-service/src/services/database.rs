//! MongoDB-backed record store.
//!
//! Live queries are driven by change streams, so the deployment must run as a
//! replica set. Each change triggers a fresh read of the watched documents.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    bson::{doc, Document},
    change_stream::{event::ChangeStreamEvent, ChangeStream},
    error::{ErrorKind, WriteFailure},
    options::{
        Collation, CollationStrength, FindOneOptions, FindOptions, IndexOptions, ReplaceOptions,
    },
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;
use service_core::subscription::{self, Feed, LiveQuery};
use std::future::Future;

use super::store::{ADMINS, APPROVAL_SAGAS, APPROVED_USERS, PENDING_USERS};
use super::{RecordStore, StoreError};
use crate::models::{
    AdminPrincipal, ApprovalSaga, ApprovedOperator, EmergencyStatus, PendingRegistration,
};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for resqflow-service");

        let pending_email = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(
                IndexOptions::builder()
                    .name("pending_email_idx".to_string())
                    .build(),
            )
            .build();
        self.pending()
            .create_index(pending_email, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create pending email index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        let pending_timestamp = IndexModel::builder()
            .keys(doc! { "timestamp": 1 })
            .options(
                IndexOptions::builder()
                    .name("pending_timestamp_idx".to_string())
                    .build(),
            )
            .build();
        self.pending()
            .create_index(pending_timestamp, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create pending timestamp index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        let operator_email = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(
                IndexOptions::builder()
                    .name("operator_email_idx".to_string())
                    .build(),
            )
            .build();
        self.operators()
            .create_index(operator_email, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create operator email index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        let admin_email = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(
                IndexOptions::builder()
                    .name("admin_email_idx".to_string())
                    .unique(true)
                    .collation(email_collation())
                    .build(),
            )
            .build();
        self.admins()
            .create_index(admin_email, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create admin email index: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    fn pending(&self) -> Collection<PendingRegistration> {
        self.db.collection(PENDING_USERS)
    }

    fn operators(&self) -> Collection<ApprovedOperator> {
        self.db.collection(APPROVED_USERS)
    }

    fn admins(&self) -> Collection<AdminPrincipal> {
        self.db.collection(ADMINS)
    }

    fn approvals(&self) -> Collection<ApprovalSaga> {
        self.db.collection(APPROVAL_SAGAS)
    }

    fn raw(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }
}

/// Secondary strength compares letters without case.
fn email_collation() -> Collation {
    Collation::builder()
        .locale("en".to_string())
        .strength(CollationStrength::Secondary)
        .build()
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY
        }
        _ => false,
    }
}

/// Forward one reloaded snapshot per change event until the consumer goes
/// away or the stream ends.
fn forward_changes<T, F, Fut>(
    collection: &'static str,
    mut stream: ChangeStream<ChangeStreamEvent<Document>>,
    feed: Feed<T>,
    reload: F,
) where
    T: Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = feed.closed() => break,
                event = stream.next() => match event {
                    Some(Ok(_)) => match reload().await {
                        Ok(snapshot) => {
                            if !feed.send(snapshot) {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(collection, error = %e, "Failed to reload watched documents");
                            break;
                        }
                    },
                    Some(Err(e)) => {
                        tracing::warn!(collection, error = %e, "Change stream failed");
                        break;
                    }
                    None => break,
                },
            }
        }
        tracing::debug!(collection, "Change stream closed");
    });
}

#[async_trait]
impl RecordStore for MongoStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                StoreError::Database(e)
            })?;
        Ok(())
    }

    async fn insert_pending(
        &self,
        mut registration: PendingRegistration,
    ) -> Result<PendingRegistration, StoreError> {
        registration.id = Some(uuid::Uuid::new_v4().simple().to_string());
        self.pending()
            .insert_one(&registration, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to insert pending registration: {}", e);
                StoreError::Database(e)
            })?;
        Ok(registration)
    }

    async fn find_pending(&self, id: &str) -> Result<Option<PendingRegistration>, StoreError> {
        Ok(self.pending().find_one(doc! { "_id": id }, None).await?)
    }

    async fn find_pending_by_email(
        &self,
        email: &str,
    ) -> Result<Option<PendingRegistration>, StoreError> {
        Ok(self.pending().find_one(doc! { "email": email }, None).await?)
    }

    async fn list_pending(&self) -> Result<Vec<PendingRegistration>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": 1, "_id": 1 })
            .build();
        let cursor = self.pending().find(doc! {}, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn delete_pending(&self, id: &str) -> Result<(), StoreError> {
        self.pending()
            .delete_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| {
                tracing::error!(pending_id = %id, "Failed to delete pending registration: {}", e);
                StoreError::Database(e)
            })?;
        Ok(())
    }

    async fn watch_pending(&self) -> Result<LiveQuery<Vec<PendingRegistration>>, StoreError> {
        // Open the stream before reading so no change between the two is lost.
        let stream = self
            .raw(PENDING_USERS)
            .watch(Vec::<Document>::new(), None)
            .await?;
        let snapshot = self.list_pending().await?;

        let (feed, query) = subscription::channel();
        feed.send(snapshot);

        let store = self.clone();
        forward_changes(PENDING_USERS, stream, feed, move || {
            let store = store.clone();
            async move { store.list_pending().await }
        });
        Ok(query)
    }

    async fn find_admin_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AdminPrincipal>, StoreError> {
        let options = FindOneOptions::builder()
            .collation(email_collation())
            .build();
        Ok(self
            .admins()
            .find_one(doc! { "email": email }, options)
            .await?)
    }

    async fn find_operator(&self, uid: &str) -> Result<Option<ApprovedOperator>, StoreError> {
        Ok(self.operators().find_one(doc! { "_id": uid }, None).await?)
    }

    async fn find_operator_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ApprovedOperator>, StoreError> {
        Ok(self.operators().find_one(doc! { "email": email }, None).await?)
    }

    async fn put_operator(&self, operator: &ApprovedOperator) -> Result<(), StoreError> {
        // Upserting on an `_id` filter keys the new document by the uid.
        let options = ReplaceOptions::builder().upsert(true).build();
        self.operators()
            .replace_one(doc! { "_id": operator.uid.as_str() }, operator, options)
            .await
            .map_err(|e| {
                tracing::error!(uid = %operator.uid, "Failed to write approved operator: {}", e);
                StoreError::Database(e)
            })?;
        Ok(())
    }

    async fn set_operator_status(
        &self,
        uid: &str,
        status: EmergencyStatus,
    ) -> Result<(), StoreError> {
        let result = self
            .operators()
            .update_one(
                doc! { "_id": uid },
                doc! { "$set": { "status": status.as_str() } },
                None,
            )
            .await
            .map_err(|e| {
                tracing::error!(uid = %uid, "Failed to update operator status: {}", e);
                StoreError::Database(e)
            })?;

        if result.matched_count == 0 {
            return Err(StoreError::NotFound(format!("{}/{}", APPROVED_USERS, uid)));
        }
        Ok(())
    }

    async fn watch_operator(
        &self,
        uid: &str,
    ) -> Result<LiveQuery<Option<ApprovedOperator>>, StoreError> {
        let pipeline = vec![doc! { "$match": { "documentKey._id": uid } }];
        let stream = self.raw(APPROVED_USERS).watch(pipeline, None).await?;
        let snapshot = self.find_operator(uid).await?;

        let (feed, query) = subscription::channel();
        feed.send(snapshot);

        let store = self.clone();
        let uid = uid.to_string();
        forward_changes(APPROVED_USERS, stream, feed, move || {
            let store = store.clone();
            let uid = uid.clone();
            async move { store.find_operator(&uid).await }
        });
        Ok(query)
    }

    async fn claim_approval(&self, saga: &ApprovalSaga) -> Result<(), StoreError> {
        match self.approvals().insert_one(saga, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::Conflict(format!(
                "{}/{}",
                APPROVAL_SAGAS, saga.pending_id
            ))),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn update_approval(&self, saga: &ApprovalSaga) -> Result<(), StoreError> {
        let result = self
            .approvals()
            .replace_one(doc! { "_id": saga.pending_id.as_str() }, saga, None)
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound(format!(
                "{}/{}",
                APPROVAL_SAGAS, saga.pending_id
            )));
        }
        Ok(())
    }

    async fn find_approval(&self, pending_id: &str) -> Result<Option<ApprovalSaga>, StoreError> {
        Ok(self
            .approvals()
            .find_one(doc! { "_id": pending_id }, None)
            .await?)
    }

    async fn release_approval(&self, pending_id: &str) -> Result<(), StoreError> {
        self.approvals()
            .delete_one(doc! { "_id": pending_id }, None)
            .await?;
        Ok(())
    }

    async fn list_approvals(&self) -> Result<Vec<ApprovalSaga>, StoreError> {
        let options = FindOptions::builder().sort(doc! { "started_at": 1 }).build();
        let cursor = self.approvals().find(doc! {}, options).await?;
        Ok(cursor.try_collect().await?)
    }
}
