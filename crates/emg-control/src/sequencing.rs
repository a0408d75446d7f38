use emg_db::entities::orders;
use emg_domain::order_number;
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, QueryOrder, QuerySelect};

/// Successor of the highest stored order number, `None` when the number
/// range is used up.
///
/// Read-then-compute without a lock. Two concurrent creators can compute the
/// same number; the unique index rejects the second insert.
pub async fn next_order_number<C: ConnectionTrait>(db: &C) -> Result<Option<String>, DbErr> {
    let latest = orders::Entity::find()
        .order_by_desc(orders::Column::OrderNumber)
        .limit(1)
        .one(db)
        .await?;

    Ok(order_number::next_after(
        latest.as_ref().map(|o| o.order_number.as_str()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::prelude::Uuid;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn order(number: &str) -> orders::Model {
        orders::Model {
            id: Uuid::new_v4(),
            order_number: number.to_string(),
            site: None,
            description: None,
            status: "aktiv".to_string(),
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: chrono::Utc::now().fixed_offset(),
        }
    }

    #[tokio::test]
    async fn increments_latest_number() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![order("510003.9999")]])
            .into_connection();
        assert_eq!(next_order_number(&db).await.unwrap().as_deref(), Some("510004.0001"));
    }

    #[tokio::test]
    async fn starts_fresh_without_orders() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<orders::Model>::new()])
            .into_connection();
        assert_eq!(next_order_number(&db).await.unwrap().as_deref(), Some("510001.0001"));
    }

    #[tokio::test]
    async fn reports_an_exhausted_range() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![order("519999.9999")]])
            .into_connection();
        assert_eq!(next_order_number(&db).await.unwrap(), None);
    }
}
