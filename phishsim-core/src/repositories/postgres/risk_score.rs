// src/repositories/postgres/risk_score.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use phishsim_common::models::risk::RiskScore;
use phishsim_common::traits::repository_traits::RiskScoreRepository;
use crate::Error;

#[derive(Clone)]
pub struct PostgresRiskScoreRepository {
    pool: Pool<Postgres>,
}

impl PostgresRiskScoreRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RiskScoreRepository for PostgresRiskScoreRepository {
    async fn upsert_score(&self, score: &RiskScore) -> Result<(), Error> {
        // Last-writer-wins is safe because every writer recomputes from the
        // full result history; the version column only tracks churn.
        sqlx::query(
            r#"
            INSERT INTO risk_scores (
                user_id, score,
                phishing_component, training_component,
                recency_component, role_component,
                version, computed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 1, $7)
            ON CONFLICT (user_id) DO UPDATE
            SET score = EXCLUDED.score,
                phishing_component = EXCLUDED.phishing_component,
                training_component = EXCLUDED.training_component,
                recency_component = EXCLUDED.recency_component,
                role_component = EXCLUDED.role_component,
                version = risk_scores.version + 1,
                computed_at = EXCLUDED.computed_at
            "#,
        )
            .bind(score.user_id)
            .bind(score.score)
            .bind(score.phishing_component)
            .bind(score.training_component)
            .bind(score.recency_component)
            .bind(score.role_component)
            .bind(score.computed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_score(&self, user_id: Uuid) -> Result<Option<RiskScore>, Error> {
        let row = sqlx::query(
            r#"
            SELECT user_id, score,
                   phishing_component, training_component,
                   recency_component, role_component,
                   version, computed_at
            FROM risk_scores
            WHERE user_id = $1
            "#,
        )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(r) = row {
            Ok(Some(RiskScore {
                user_id: r.try_get("user_id")?,
                score: r.try_get("score")?,
                phishing_component: r.try_get("phishing_component")?,
                training_component: r.try_get("training_component")?,
                recency_component: r.try_get("recency_component")?,
                role_component: r.try_get("role_component")?,
                version: r.try_get("version")?,
                computed_at: r.try_get::<DateTime<Utc>, _>("computed_at")?,
            }))
        } else {
            Ok(None)
        }
    }

    async fn scored_user_ids(&self) -> Result<Vec<Uuid>, Error> {
        let rows = sqlx::query("SELECT user_id FROM risk_scores")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| r.try_get("user_id").map_err(Error::from))
            .collect()
    }
}
