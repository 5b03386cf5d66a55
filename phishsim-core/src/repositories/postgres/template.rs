// src/repositories/postgres/template.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use phishsim_common::models::template::{Difficulty, PhishingTemplate, TemplateCategory};
use phishsim_common::traits::repository_traits::TemplateRepository;
use crate::Error;

#[derive(Clone)]
pub struct PostgresTemplateRepository {
    pool: Pool<Postgres>,
}

impl PostgresTemplateRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn map_template_row(r: &PgRow) -> Result<PhishingTemplate, Error> {
    let category: String = r.try_get("category")?;
    let difficulty: String = r.try_get("difficulty")?;
    Ok(PhishingTemplate {
        template_id: r.try_get("template_id")?,
        company_id: r.try_get("company_id")?,
        name: r.try_get("name")?,
        category: TemplateCategory::from_str(&category)
            .ok_or_else(|| Error::Parse(format!("unknown template category '{category}'")))?,
        difficulty: Difficulty::from_str(&difficulty)
            .ok_or_else(|| Error::Parse(format!("unknown difficulty '{difficulty}'")))?,
        subject: r.try_get("subject")?,
        body_html: r.try_get("body_html")?,
        red_flags: serde_json::from_value(r.try_get::<serde_json::Value, _>("red_flags")?)?,
        created_at: r.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: r.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl TemplateRepository for PostgresTemplateRepository {
    async fn create_template(&self, template: &PhishingTemplate) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO phishing_templates (
                template_id,
                company_id,
                name,
                category,
                difficulty,
                subject,
                body_html,
                red_flags,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
            .bind(template.template_id)
            .bind(template.company_id)
            .bind(&template.name)
            .bind(template.category.as_str())
            .bind(template.difficulty.as_str())
            .bind(&template.subject)
            .bind(&template.body_html)
            .bind(serde_json::to_value(&template.red_flags)?)
            .bind(template.created_at)
            .bind(template.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_template(&self, template_id: Uuid) -> Result<Option<PhishingTemplate>, Error> {
        let row = sqlx::query(
            r#"
            SELECT template_id, company_id, name, category, difficulty,
                   subject, body_html, red_flags, created_at, updated_at
            FROM phishing_templates
            WHERE template_id = $1
            "#,
        )
            .bind(template_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_template_row).transpose()
    }

    async fn list_templates(&self, company_id: Uuid) -> Result<Vec<PhishingTemplate>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT template_id, company_id, name, category, difficulty,
                   subject, body_html, red_flags, created_at, updated_at
            FROM phishing_templates
            WHERE company_id = $1
            ORDER BY created_at DESC
            "#,
        )
            .bind(company_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(map_template_row).collect()
    }
}
