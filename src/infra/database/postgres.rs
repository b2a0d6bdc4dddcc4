//! PostgreSQL job queue and wallet store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::domain::{
    Address, AppError, BONUS_RESERVED, Community, DatabaseError, Fork, Job, JobError, JobName,
    JobRepository, JobStatus, NewJob, PaginatedResponse, UserWallet, UserWalletFilter, ValidationError, WalletModules,
    WalletRepository,
};

const JOB_COLUMNS: &str = "id, name, data, status, idempotency_key, parent_id, attempts, \
     max_attempts, last_error, result, next_run_at, locked_until, created_at, updated_at";

const WALLET_COLUMNS: &str = "id, account_address, wallet_address, phone_number, salt, networks, \
     wallet_modules, is_contract_deployed, wallet_owner_original_address, \
     wallet_factory_original_address, wallet_modules_original";

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

fn corrupt_row(column: &str, err: impl std::fmt::Display) -> AppError {
    AppError::Database(DatabaseError::Query(format!(
        "invalid value in column '{column}': {err}"
    )))
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| corrupt_row(column, e))
}

fn parse_optional_column<T>(row: &PgRow, column: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| value.parse().map_err(|e| corrupt_row(column, e)))
        .transpose()
}

fn modules_column(row: &PgRow, column: &str) -> Result<Option<WalletModules>, AppError> {
    let raw: Option<serde_json::Value> = row.try_get(column)?;
    raw.map(|value| serde_json::from_value(value).map_err(|e| corrupt_row(column, e)))
        .transpose()
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_job(row: &PgRow) -> Result<Job, AppError> {
        Ok(Job {
            id: row.try_get("id")?,
            name: parse_column::<JobName>(row, "name")?,
            data: row.try_get("data")?,
            status: parse_column::<JobStatus>(row, "status")?,
            idempotency_key: row.try_get("idempotency_key")?,
            parent_id: row.try_get("parent_id")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            last_error: row.try_get("last_error")?,
            result: row.try_get("result")?,
            next_run_at: row.try_get("next_run_at")?,
            locked_until: row.try_get("locked_until")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_wallet(row: &PgRow) -> Result<UserWallet, AppError> {
        Ok(UserWallet {
            id: row.try_get("id")?,
            account_address: parse_column(row, "account_address")?,
            wallet_address: parse_optional_column(row, "wallet_address")?,
            phone_number: row.try_get("phone_number")?,
            salt: row.try_get("salt")?,
            networks: row.try_get("networks")?,
            wallet_modules: modules_column(row, "wallet_modules")?.unwrap_or_default(),
            is_contract_deployed: row.try_get("is_contract_deployed")?,
            wallet_owner_original_address: parse_optional_column(
                row,
                "wallet_owner_original_address",
            )?,
            wallet_factory_original_address: parse_optional_column(
                row,
                "wallet_factory_original_address",
            )?,
            wallet_modules_original: modules_column(row, "wallet_modules_original")?,
        })
    }

    async fn job_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }
}

#[async_trait]
impl JobRepository for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_name = %job.name))]
    async fn enqueue(&self, job: &NewJob) -> Result<Job, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (id, name, data, status, idempotency_key, parent_id, max_attempts)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(job.name.as_str())
        .bind(&job.data)
        .bind(&job.idempotency_key)
        .bind(&job.parent_id)
        .bind(job.max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_job(&row);
        }

        // Only a conflicting idempotency key makes the insert a no-op
        let key = job.idempotency_key.as_deref().unwrap_or_default();
        debug!(idempotency_key = %key, "Job already enqueued");
        self.job_by_idempotency_key(key).await?.ok_or_else(|| {
            AppError::Database(DatabaseError::Duplicate(format!(
                "idempotency key '{key}' conflicts with a vanished job"
            )))
        })
    }

    #[instrument(skip(self))]
    async fn get_job(&self, id: &str) -> Result<Option<Job>, AppError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self))]
    async fn list_jobs(
        &self,
        limit: i64,
        cursor: Option<&str>,
        status: Option<JobStatus>,
    ) -> Result<PaginatedResponse<Job>, AppError> {
        // Clamp limit to valid range
        let limit = limit.clamp(1, 100);
        // Fetch one extra to determine if there are more jobs
        let fetch_limit = limit + 1;
        let status = status.map(|s| s.as_str());

        let rows = match cursor {
            Some(cursor_id) => {
                let cursor_row = sqlx::query("SELECT created_at FROM jobs WHERE id = $1")
                    .bind(cursor_id)
                    .fetch_optional(&self.pool)
                    .await?;

                let cursor_created_at: DateTime<Utc> = match cursor_row {
                    Some(row) => row.try_get("created_at")?,
                    None => {
                        return Err(AppError::Validation(ValidationError::InvalidField {
                            field: "cursor".to_string(),
                            message: "Invalid cursor".to_string(),
                        }));
                    }
                };

                sqlx::query(&format!(
                    r#"
                    SELECT {JOB_COLUMNS}
                    FROM jobs
                    WHERE (created_at, id) < ($1, $2)
                      AND ($3::text IS NULL OR status = $3)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $4
                    "#
                ))
                .bind(cursor_created_at)
                .bind(cursor_id)
                .bind(status)
                .bind(fetch_limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    r#"
                    SELECT {JOB_COLUMNS}
                    FROM jobs
                    WHERE ($1::text IS NULL OR status = $1)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#
                ))
                .bind(status)
                .bind(fetch_limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let has_more = rows.len() > limit as usize;
        let jobs: Vec<Job> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_job)
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if has_more {
            jobs.last().map(|job| job.id.clone())
        } else {
            None
        };

        Ok(PaginatedResponse::new(jobs, next_cursor, has_more))
    }

    #[instrument(skip(self))]
    async fn claim_due_jobs(&self, limit: i64, lease: Duration) -> Result<Vec<Job>, AppError> {
        let lease = chrono::Duration::from_std(lease).map_err(|e| {
            AppError::Internal(format!("lease duration out of range: {e}"))
        })?;
        let now = Utc::now();

        let rows = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'running',
                attempts = attempts + 1,
                locked_until = $1,
                updated_at = $2
            WHERE id IN (
                SELECT id FROM jobs
                WHERE (status = 'pending' AND next_run_at <= $2)
                   OR (status = 'running' AND locked_until < $2)
                ORDER BY next_run_at ASC, created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now + lease)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self, data))]
    async fn save_data(
        &self,
        id: &str,
        attempts: i32,
        data: &serde_json::Value,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE jobs SET data = $1, updated_at = NOW() WHERE id = $2 AND attempts = $3",
        )
        .bind(data)
        .bind(id)
        .bind(attempts)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Job(JobError::LeaseLost(format!(
                "job {id} is no longer held at attempt {attempts}"
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self, result))]
    async fn complete_job(
        &self,
        id: &str,
        attempts: i32,
        result: Option<&serde_json::Value>,
    ) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                result = $1,
                last_error = NULL,
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $2 AND status = 'running' AND attempts = $3
            "#,
        )
        .bind(result)
        .bind(id)
        .bind(attempts)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn schedule_retry(
        &self,
        id: &str,
        attempts: i32,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                last_error = $1,
                next_run_at = $2,
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $3 AND status = 'running' AND attempts = $4
            "#,
        )
        .bind(error)
        .bind(next_run_at)
        .bind(id)
        .bind(attempts)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn fail_job(&self, id: &str, attempts: i32, error: &str) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                last_error = $1,
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $2 AND status = 'running' AND attempts = $3
            "#,
        )
        .bind(error)
        .bind(id)
        .bind(attempts)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    #[instrument(skip(self, data))]
    async fn reset_job(
        &self,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<Option<Job>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'pending',
                data = $2,
                attempts = 0,
                next_run_at = NOW(),
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(data)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self))]
    async fn reserve_bonus(
        &self,
        job_id: &str,
        identifier: &str,
        bonus_type: &str,
        community: &Address,
        limit: i64,
    ) -> Result<bool, AppError> {
        let community = community.to_string();
        let mut tx = self.pool.begin().await?;

        // Serializes reservations for one bonus key across workers.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{identifier}:{bonus_type}:{community}"))
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS held
            FROM jobs
            WHERE name = 'fundToken'
              AND id <> $1
              AND status <> 'failed'
              AND data -> $2::text IS NOT NULL
              AND data ->> 'identifier' = $3
              AND data ->> 'bonusType' = $4
              AND lower(data ->> 'communityAddress') = $5
            "#,
        )
        .bind(job_id)
        .bind(BONUS_RESERVED)
        .bind(identifier)
        .bind(bonus_type)
        .bind(&community)
        .fetch_one(&mut *tx)
        .await?;
        let held: i64 = row.try_get("held")?;
        let granted = held < limit;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET data = CASE WHEN $3 THEN data || jsonb_build_object($2::text, true)
                            ELSE data - $2::text END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(BONUS_RESERVED)
        .bind(granted)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(job_id.to_string())));
        }

        tx.commit().await?;
        debug!(job_id, held, limit, granted, "Bonus reservation");
        Ok(granted)
    }
}

#[async_trait]
impl WalletRepository for PostgresClient {
    async fn health_check(&self) -> Result<(), AppError> {
        JobRepository::health_check(self).await
    }

    #[instrument(skip(self))]
    async fn find_user_wallet(
        &self,
        filter: &UserWalletFilter,
    ) -> Result<Option<UserWallet>, AppError> {
        let row = match filter {
            UserWalletFilter::ById(id) => {
                sqlx::query(&format!(
                    "SELECT {WALLET_COLUMNS} FROM user_wallets WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            }
            UserWalletFilter::ByPhoneAndOwner {
                phone_number,
                owner,
            } => {
                sqlx::query(&format!(
                    r#"
                    SELECT {WALLET_COLUMNS} FROM user_wallets
                    WHERE phone_number = $1 AND account_address = $2
                    ORDER BY created_at DESC
                    LIMIT 1
                    "#
                ))
                .bind(phone_number)
                .bind(owner.to_string())
                .fetch_optional(&self.pool)
                .await?
            }
            UserWalletFilter::ByOwner(owner) => {
                sqlx::query(&format!(
                    r#"
                    SELECT {WALLET_COLUMNS} FROM user_wallets
                    WHERE account_address = $1
                    ORDER BY created_at DESC
                    LIMIT 1
                    "#
                ))
                .bind(owner.to_string())
                .fetch_optional(&self.pool)
                .await?
            }
        };
        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_wallet_address(
        &self,
        wallet: &Address,
    ) -> Result<Option<UserWallet>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM user_wallets WHERE wallet_address = $1"
        ))
        .bind(wallet.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    #[instrument(skip(self))]
    async fn set_wallet_address(
        &self,
        filter: &UserWalletFilter,
        wallet: &Address,
        salt: &str,
    ) -> Result<Option<UserWallet>, AppError> {
        let Some(existing) = self.find_user_wallet(filter).await? else {
            return Ok(None);
        };
        let row = sqlx::query(&format!(
            r#"
            UPDATE user_wallets
            SET wallet_address = $1, salt = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(wallet.to_string())
        .bind(salt)
        .bind(&existing.id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    #[instrument(skip(self))]
    async fn set_account_address(&self, wallet: &Address, owner: &Address) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE user_wallets SET account_address = $1, updated_at = NOW() WHERE wallet_address = $2",
        )
        .bind(owner.to_string())
        .bind(wallet.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_contract_deployed(
        &self,
        wallet: &Address,
        networks: &[String],
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE user_wallets
            SET networks = $1, is_contract_deployed = TRUE, updated_at = NOW()
            WHERE wallet_address = $2
            "#,
        )
        .bind(networks)
        .bind(wallet.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_contacts_wallet(
        &self,
        phone_number: &str,
        wallet: &Address,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE contacts
            SET wallet_address = $1, state = 'NEW', updated_at = NOW()
            WHERE phone_number = $2
            "#,
        )
        .bind(wallet.to_string())
        .bind(phone_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn find_community(&self, community: &Address) -> Result<Option<Community>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT community_address, home_token_address, plugins, invite_max_times
            FROM communities
            WHERE community_address = $1
            "#,
        )
        .bind(community.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Community, AppError> {
            Ok(Community {
                community_address: parse_column(&row, "community_address")?,
                home_token_address: parse_column(&row, "home_token_address")?,
                plugins: row.try_get("plugins")?,
                invite_max_times: row.try_get("invite_max_times")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn find_fork(&self, app_name: &str) -> Result<Option<Fork>, AppError> {
        let row = sqlx::query("SELECT app_name, deep_link_url FROM forks WHERE app_name = $1")
            .bind(app_name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<Fork, AppError> {
            Ok(Fork {
                app_name: row.try_get("app_name")?,
                deep_link_url: row.try_get("deep_link_url")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn set_invitee_wallet(
        &self,
        inviter: &Address,
        invitee_phone_number: &str,
        wallet: &Address,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE invites
            SET invitee_wallet_address = $1
            WHERE id = (
                SELECT id FROM invites
                WHERE inviter_wallet_address = $2 AND invitee_phone_number = $3
                ORDER BY created_at DESC
                LIMIT 1
            )
            "#,
        )
        .bind(wallet.to_string())
        .bind(inviter.to_string())
        .bind(invitee_phone_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
