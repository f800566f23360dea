use ajo_core::{
    ContributionObligation, DomainEvent, DomainEventKind, EventEnvelope, EventStore, Frequency,
    GroupConfig, GroupStatus, Member, PaymentRecord, Payout, PayoutPosition, PayoutStatus, Result,
    RotationError, RotationStore, SettlementState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Applies the bundled schema; safe to run repeatedly.
pub async fn ensure_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::raw_sql(include_str!("../sql/schema.sql"))
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgRotationStore {
    pool: PgPool,
}

impl PgRotationStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn group_guard_error(&self, group_id: Uuid) -> RotationError {
        match self.fetch_group(group_id).await {
            Ok(group) => RotationError::Conflict(format!(
                "group is {} (finalized: {})",
                group.status.as_str(),
                group.payout_order_finalized
            )),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl RotationStore for PgRotationStore {
    async fn fetch_group(&self, group_id: Uuid) -> Result<GroupConfig> {
        let row = sqlx::query(
            r#"
            SELECT id, creator_id, name, contribution_amount, frequency, max_participants,
                   start_date, end_date, payout_order_finalized, status, created_at
            FROM thrift_groups
            WHERE id = $1
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Err(RotationError::not_found("group", group_id));
        };
        group_from_row(&row)
    }

    async fn fetch_members(&self, group_id: Uuid) -> Result<Vec<Member>> {
        let rows = sqlx::query(
            r#"
            SELECT id, group_id, user_id, joined_at, payout_position
            FROM group_members
            WHERE group_id = $1
            ORDER BY joined_at ASC, id ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(member_from_row).collect()
    }

    async fn fetch_historical_obligations(
        &self,
        user_ids: &[Uuid],
        exclude_group_id: Uuid,
    ) -> Result<Vec<PaymentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, group_id, status, due_date, paid_date
            FROM contributions
            WHERE user_id = ANY($1) AND group_id <> $2
            "#,
        )
        .bind(user_ids)
        .bind(exclude_group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                Ok(PaymentRecord {
                    user_id: row.try_get("user_id").map_err(RotationError::store)?,
                    group_id: row.try_get("group_id").map_err(RotationError::store)?,
                    state: SettlementState::parse(
                        row.try_get::<String, _>("status")
                            .map_err(RotationError::store)?
                            .as_str(),
                    )?,
                    due_date: row.try_get("due_date").map_err(RotationError::store)?,
                    paid_at: row.try_get("paid_date").map_err(RotationError::store)?,
                })
            })
            .collect()
    }

    async fn persist_payout_positions(
        &self,
        group_id: Uuid,
        positions: &[PayoutPosition],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let finalized: Option<bool> = sqlx::query_scalar(
            "SELECT payout_order_finalized FROM thrift_groups WHERE id = $1 FOR UPDATE",
        )
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        match finalized {
            None => return Err(RotationError::not_found("group", group_id)),
            Some(true) => {
                return Err(RotationError::PermissionDenied(
                    "payout order is finalized".to_string(),
                ));
            }
            Some(false) => {}
        }

        // Cleared first so swapped positions never collide on the unique index.
        sqlx::query("UPDATE group_members SET payout_position = NULL WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        for entry in positions {
            let updated = sqlx::query(
                "UPDATE group_members SET payout_position = $3 WHERE id = $1 AND group_id = $2",
            )
            .bind(entry.member_id)
            .bind(group_id)
            .bind(to_i32(entry.position)?)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            if updated.rows_affected() == 0 {
                return Err(RotationError::Validation(format!(
                    "member {} does not belong to group {group_id}",
                    entry.member_id
                )));
            }
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn set_order_finalized(&self, group_id: Uuid) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE thrift_groups
            SET payout_order_finalized = TRUE, updated_at = now()
            WHERE id = $1 AND payout_order_finalized = FALSE
            "#,
        )
        .bind(group_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if updated.rows_affected() == 0 {
            return Err(match self.fetch_group(group_id).await {
                Ok(_) => RotationError::Conflict("payout order already finalized".to_string()),
                Err(err) => err,
            });
        }
        Ok(())
    }

    async fn activate_with_obligations(
        &self,
        group_id: Uuid,
        obligations: &[ContributionObligation],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let activated = sqlx::query(
            r#"
            UPDATE thrift_groups
            SET status = 'active', updated_at = now()
            WHERE id = $1 AND status = 'recruiting' AND payout_order_finalized = TRUE
            "#,
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if activated.rows_affected() == 0 {
            drop(tx);
            let group = self.fetch_group(group_id).await?;
            return Err(if group.status != GroupStatus::Recruiting {
                RotationError::Conflict(format!(
                    "schedule already generated; group is {}",
                    group.status.as_str()
                ))
            } else {
                RotationError::PreconditionFailed("payout order is not finalized".to_string())
            });
        }

        for obligation in obligations {
            sqlx::query(
                r#"
                INSERT INTO contributions
                    (id, group_id, user_id, cycle_number, amount, due_date, status, paid_date)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(obligation.id)
            .bind(obligation.group_id)
            .bind(obligation.user_id)
            .bind(to_i32(obligation.cycle_number)?)
            .bind(obligation.amount)
            .bind(obligation.due_date)
            .bind(obligation.state.as_str())
            .bind(obligation.paid_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn transition_status(
        &self,
        group_id: Uuid,
        from: GroupStatus,
        to: GroupStatus,
    ) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(RotationError::Validation(format!(
                "cannot move a group from {} to {}",
                from.as_str(),
                to.as_str()
            )));
        }

        let updated = sqlx::query(
            "UPDATE thrift_groups SET status = $3, updated_at = now() WHERE id = $1 AND status = $2",
        )
        .bind(group_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if updated.rows_affected() == 0 {
            return Err(self.group_guard_error(group_id).await);
        }
        Ok(())
    }

    async fn fetch_obligations(
        &self,
        group_id: Uuid,
        cycle: Option<u32>,
    ) -> Result<Vec<ContributionObligation>> {
        let cycle = cycle.map(to_i32).transpose()?;
        let rows = sqlx::query(
            r#"
            SELECT id, group_id, user_id, cycle_number, amount, due_date, status, paid_date
            FROM contributions
            WHERE group_id = $1 AND ($2::INTEGER IS NULL OR cycle_number = $2)
            ORDER BY cycle_number ASC, id ASC
            "#,
        )
        .bind(group_id)
        .bind(cycle)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(obligation_from_row).collect()
    }

    async fn fetch_payouts(&self, group_id: Uuid) -> Result<Vec<Payout>> {
        let rows = sqlx::query(
            r#"
            SELECT id, group_id, cycle_number, recipient_user_id, amount, status, created_at
            FROM payouts
            WHERE group_id = $1
            ORDER BY cycle_number ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(payout_from_row).collect()
    }

    async fn insert_payout(
        &self,
        group_id: Uuid,
        cycle: u32,
        recipient_user_id: Uuid,
        amount: Decimal,
    ) -> Result<Payout> {
        let row = sqlx::query(
            r#"
            INSERT INTO payouts (id, group_id, cycle_number, recipient_user_id, amount, status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'completed', $6)
            ON CONFLICT (group_id, cycle_number) DO UPDATE
            SET recipient_user_id = EXCLUDED.recipient_user_id,
                amount = EXCLUDED.amount,
                status = 'completed'
            WHERE payouts.status <> 'completed'
            RETURNING id, group_id, cycle_number, recipient_user_id, amount, status, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(group_id)
        .bind(to_i32(cycle)?)
        .bind(recipient_user_id)
        .bind(amount)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| match db_error(err) {
            RotationError::Conflict(_) => RotationError::Conflict("already paid".to_string()),
            RotationError::NotFound { .. } => RotationError::not_found("group", group_id),
            other => other,
        })?;

        match row {
            Some(row) => payout_from_row(&row),
            None => Err(RotationError::Conflict("already paid".to_string())),
        }
    }
}

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, stream_id: Uuid, event: DomainEvent) -> Result<EventEnvelope> {
        let kind = serde_json::to_value(event.kind)
            .map_err(RotationError::store)?
            .as_str()
            .map(str::to_string)
            .unwrap_or_default();

        let row = sqlx::query(
            r#"
            INSERT INTO rotation_events (id, stream_id, kind, occurred_at, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING sequence, stored_at
            "#,
        )
        .bind(event.id)
        .bind(stream_id)
        .bind(kind)
        .bind(event.occurred_at)
        .bind(&event.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(EventEnvelope {
            sequence: row.try_get("sequence").map_err(RotationError::store)?,
            stream_id,
            event,
            stored_at: row.try_get("stored_at").map_err(RotationError::store)?,
        })
    }

    async fn stream(&self, stream_id: Uuid) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, id, stream_id, kind, occurred_at, payload, stored_at
            FROM rotation_events
            WHERE stream_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("kind").map_err(RotationError::store)?;
                let kind: DomainEventKind = serde_json::from_value(serde_json::Value::String(kind))
                    .map_err(RotationError::store)?;
                Ok(EventEnvelope {
                    sequence: row.try_get("sequence").map_err(RotationError::store)?,
                    stream_id,
                    event: DomainEvent {
                        id: row.try_get("id").map_err(RotationError::store)?,
                        aggregate_id: row.try_get("stream_id").map_err(RotationError::store)?,
                        kind,
                        occurred_at: row.try_get("occurred_at").map_err(RotationError::store)?,
                        payload: row.try_get("payload").map_err(RotationError::store)?,
                    },
                    stored_at: row.try_get("stored_at").map_err(RotationError::store)?,
                })
            })
            .collect()
    }
}

fn db_error(err: sqlx::Error) -> RotationError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());

    match code.as_deref() {
        Some(UNIQUE_VIOLATION) => RotationError::Conflict(err.to_string()),
        Some(FOREIGN_KEY_VIOLATION) => RotationError::NotFound {
            entity: "referenced row",
            id: err.to_string(),
        },
        _ => RotationError::store(err),
    }
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| RotationError::Validation(format!("{value} is out of range")))
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| RotationError::Store(format!("{column} is negative: {value}")))
}

fn group_from_row(row: &PgRow) -> Result<GroupConfig> {
    let frequency: String = row.try_get("frequency").map_err(RotationError::store)?;
    let status: String = row.try_get("status").map_err(RotationError::store)?;
    let max_participants: i32 = row.try_get("max_participants").map_err(RotationError::store)?;

    Ok(GroupConfig {
        id: row.try_get("id").map_err(RotationError::store)?,
        creator_id: row.try_get("creator_id").map_err(RotationError::store)?,
        name: row.try_get("name").map_err(RotationError::store)?,
        contribution_amount: row
            .try_get("contribution_amount")
            .map_err(RotationError::store)?,
        frequency: Frequency::parse(&frequency)
            .map_err(|_| RotationError::Store(format!("unknown frequency {frequency}")))?,
        max_participants: to_u32(max_participants, "max_participants")?,
        start_date: row.try_get("start_date").map_err(RotationError::store)?,
        end_date: row.try_get("end_date").map_err(RotationError::store)?,
        payout_order_finalized: row
            .try_get("payout_order_finalized")
            .map_err(RotationError::store)?,
        status: GroupStatus::parse(&status)?,
        created_at: row.try_get("created_at").map_err(RotationError::store)?,
    })
}

fn member_from_row(row: &PgRow) -> Result<Member> {
    let payout_position: Option<i32> = row.try_get("payout_position").map_err(RotationError::store)?;

    Ok(Member {
        id: row.try_get("id").map_err(RotationError::store)?,
        group_id: row.try_get("group_id").map_err(RotationError::store)?,
        user_id: row.try_get("user_id").map_err(RotationError::store)?,
        joined_at: row.try_get("joined_at").map_err(RotationError::store)?,
        payout_position: payout_position
            .map(|position| to_u32(position, "payout_position"))
            .transpose()?,
    })
}

fn obligation_from_row(row: &PgRow) -> Result<ContributionObligation> {
    let cycle_number: i32 = row.try_get("cycle_number").map_err(RotationError::store)?;
    let status: String = row.try_get("status").map_err(RotationError::store)?;
    let paid_at: Option<DateTime<Utc>> = row.try_get("paid_date").map_err(RotationError::store)?;

    Ok(ContributionObligation {
        id: row.try_get("id").map_err(RotationError::store)?,
        group_id: row.try_get("group_id").map_err(RotationError::store)?,
        user_id: row.try_get("user_id").map_err(RotationError::store)?,
        cycle_number: to_u32(cycle_number, "cycle_number")?,
        amount: row.try_get("amount").map_err(RotationError::store)?,
        due_date: row.try_get("due_date").map_err(RotationError::store)?,
        state: SettlementState::parse(&status)?,
        paid_at,
    })
}

fn payout_from_row(row: &PgRow) -> Result<Payout> {
    let cycle_number: i32 = row.try_get("cycle_number").map_err(RotationError::store)?;
    let status: String = row.try_get("status").map_err(RotationError::store)?;

    Ok(Payout {
        id: row.try_get("id").map_err(RotationError::store)?,
        group_id: row.try_get("group_id").map_err(RotationError::store)?,
        cycle_number: to_u32(cycle_number, "cycle_number")?,
        recipient_user_id: row
            .try_get("recipient_user_id")
            .map_err(RotationError::store)?,
        amount: row.try_get("amount").map_err(RotationError::store)?,
        status: PayoutStatus::parse(&status)?,
        created_at: row.try_get("created_at").map_err(RotationError::store)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_numbers_fit_integer_columns() {
        assert_eq!(to_i32(50).unwrap(), 50);
        assert!(to_i32(u32::MAX).is_err());
        assert_eq!(to_u32(3, "cycle_number").unwrap(), 3);
        assert!(matches!(
            to_u32(-1, "cycle_number"),
            Err(RotationError::Store(_))
        ));
    }

    #[test]
    fn test_non_database_errors_are_store_errors() {
        let err = db_error(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), "store");
    }
}
