use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use ferry_core::schedule::{FareClass, Schedule, ScheduleLookup};
use ferry_core::{ClassId, CoreError, CoreResult, ScheduleId};

use crate::database::db_error;

pub struct PgScheduleLookup {
    pool: PgPool,
}

impl PgScheduleLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: i64,
    ship_alias: String,
    departure_harbor_alias: String,
    arrival_harbor_alias: String,
    departure_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct FareClassRow {
    id: i64,
    alias: String,
    #[sqlx(rename = "type")]
    class_type: String,
}

#[async_trait]
impl ScheduleLookup for PgScheduleLookup {
    async fn find_by_id(&self, schedule_id: ScheduleId) -> CoreResult<Schedule> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            r#"
            SELECT
                s.id,
                sh.alias AS ship_alias,
                dep.alias AS departure_harbor_alias,
                arr.alias AS arrival_harbor_alias,
                s.departure_at
            FROM schedule s
            JOIN ship sh ON sh.id = s.ship_id
            JOIN harbor dep ON dep.id = s.departure_harbor_id
            JOIN harbor arr ON arr.id = s.arrival_harbor_id
            WHERE s.id = $1
            "#,
        )
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| CoreError::NotFound(format!("schedule {schedule_id}")))?;

        Ok(Schedule {
            id: row.id,
            ship_alias: row.ship_alias,
            departure_harbor_alias: row.departure_harbor_alias,
            arrival_harbor_alias: row.arrival_harbor_alias,
            departure_at: row.departure_at,
        })
    }

    async fn find_class(&self, class_id: ClassId) -> CoreResult<FareClass> {
        let row = sqlx::query_as::<_, FareClassRow>("SELECT id, alias, type FROM fare_class WHERE id = $1")
            .bind(class_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| CoreError::NotFound(format!("fare class {class_id}")))?;

        Ok(FareClass {
            id: row.id,
            alias: row.alias,
            ticket_type: row.class_type.parse()?,
        })
    }
}
