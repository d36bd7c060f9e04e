use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use log::info;
use mongodb::{
    bson::{doc, Bson, Document},
    options::{ClientOptions, IndexOptions},
    Client, Collection, Database, IndexModel,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::models::{timestamp, CustomerProfile, Order, Payment, Staff, User};

pub const USERS: &str = "users";
pub const CUSTOMER_PROFILES: &str = "customer_profiles";
pub const STAFF: &str = "staff";
pub const ORDERS: &str = "orders";
pub const PAYMENTS: &str = "payments";

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    /// Builds the client. The driver connects lazily on the first operation.
    pub async fn init(uri: &str, db_name: &str) -> mongodb::error::Result<Self> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        Ok(MongoDB { client, db })
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection(USERS)
    }

    pub fn customer_profiles(&self) -> Collection<CustomerProfile> {
        self.db.collection(CUSTOMER_PROFILES)
    }

    pub fn staff(&self) -> Collection<Staff> {
        self.db.collection(STAFF)
    }

    pub fn orders(&self) -> Collection<Order> {
        self.db.collection(ORDERS)
    }

    pub fn payments(&self) -> Collection<Payment> {
        self.db.collection(PAYMENTS)
    }

    pub async fn ensure_indexes(&self) -> mongodb::error::Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.users()
            .create_index(IndexModel::builder().keys(doc! { "email": 1 }).options(unique()).build())
            .await?;
        self.customer_profiles()
            .create_index(IndexModel::builder().keys(doc! { "user_id": 1 }).options(unique()).build())
            .await?;
        self.staff()
            .create_index(IndexModel::builder().keys(doc! { "user_id": 1 }).options(unique()).build())
            .await?;
        self.orders()
            .create_index(IndexModel::builder().keys(doc! { "status": 1, "created_at": -1 }).build())
            .await?;
        self.payments()
            .create_index(IndexModel::builder().keys(doc! { "order_id": 1, "created_at": -1 }).build())
            .await?;

        info!("MongoDB indexes ensured");
        Ok(())
    }
}

pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
    )
}

/// `at` in the stored timestamp representation, for `$set` updates.
pub fn bson_time(at: DateTime<Utc>) -> Bson {
    Bson::String(timestamp::format(&at))
}

pub fn now_bson() -> Bson {
    bson_time(Utc::now())
}

/// Page/limit query parameters shared by list endpoints.
#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct Pagination {
    pub page: Option<u64>,
    pub limit: Option<i64>,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    /// Documents to skip, capped at `i64::MAX` so the driver can encode it.
    pub fn skip(&self) -> u64 {
        let page = self.page.unwrap_or(1).max(1);
        (page - 1)
            .saturating_mul(self.limit() as u64)
            .min(i64::MAX as u64)
    }
}

/// `?status=&page=&limit=` as accepted by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<i64>,
}

impl ListQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination { page: self.page, limit: self.limit }
    }
}

/// Newest-first page of documents matching `filter`.
pub async fn find_page<T>(
    collection: &Collection<T>,
    filter: Document,
    page: &Pagination,
) -> mongodb::error::Result<Vec<T>>
where
    T: DeserializeOwned + Send + Sync,
{
    collection
        .find(filter)
        .sort(doc! { "created_at": -1 })
        .skip(page.skip())
        .limit(page.limit())
        .await?
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults() {
        let p = Pagination::default();
        assert_eq!(p.limit(), 20);
        assert_eq!(p.skip(), 0);
    }

    #[test]
    fn test_pagination_clamps_limit_and_page() {
        let p = Pagination { page: Some(0), limit: Some(1000) };
        assert_eq!(p.limit(), 100);
        assert_eq!(p.skip(), 0);

        let p = Pagination { page: Some(3), limit: Some(10) };
        assert_eq!(p.skip(), 20);
    }

    #[test]
    fn test_huge_page_saturates() {
        let query = actix_web::web::Query::<ListQuery>::from_query("page=18446744073709551615")
            .unwrap();
        assert_eq!(query.pagination().skip(), i64::MAX as u64);

        let p = Pagination { page: Some(u64::MAX), limit: Some(1) };
        assert_eq!(p.skip(), i64::MAX as u64);
    }

    #[test]
    fn test_now_bson_is_fixed_width_string() {
        let Bson::String(now) = now_bson() else {
            panic!("timestamps are stored as strings");
        };
        assert_eq!(now.len(), "2026-01-01T00:00:00.000000000Z".len());
        assert!(now.ends_with('Z'));
    }
}
