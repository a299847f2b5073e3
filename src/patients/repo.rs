use async_trait::async_trait;
use uuid::Uuid;

use crate::{auth::repo_types::User, db::PgStore, error::AppResult};

/// Doctor to patient linkage edges.
#[async_trait]
pub trait PatientRepo: Send + Sync {
    /// Idempotent; linking an existing pair is a no-op.
    async fn link(&self, doctor_id: Uuid, patient_id: Uuid) -> AppResult<()>;
    /// Linked patients with the number of plans each is subject of, by name.
    async fn list_linked(&self, doctor_id: Uuid) -> AppResult<Vec<(User, i64)>>;
    /// The patient, only when linked to the doctor.
    async fn find_linked(&self, doctor_id: Uuid, patient_id: Uuid) -> AppResult<Option<User>>;
    async fn count_for_doctor(&self, doctor_id: Uuid) -> AppResult<i64>;
}

#[derive(sqlx::FromRow)]
struct PatientRow {
    #[sqlx(flatten)]
    user: User,
    plans_count: i64,
}

#[async_trait]
impl PatientRepo for PgStore {
    async fn link(&self, doctor_id: Uuid, patient_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO doctor_patients (doctor_id, patient_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(doctor_id)
        .bind(patient_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn list_linked(&self, doctor_id: Uuid) -> AppResult<Vec<(User, i64)>> {
        let rows = sqlx::query_as::<_, PatientRow>(
            r#"
            SELECT u.id, u.email, u.password_hash, u.name, u.role, u.phone, u.avatar,
                   u.created_at, u.updated_at,
                   (SELECT COUNT(*) FROM meal_plans mp WHERE mp.patient_id = u.id) AS plans_count
            FROM doctor_patients dp
            JOIN users u ON u.id = dp.patient_id
            WHERE dp.doctor_id = $1
            ORDER BY u.name, u.email
            "#,
        )
        .bind(doctor_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|r| (r.user, r.plans_count)).collect())
    }

    async fn find_linked(&self, doctor_id: Uuid, patient_id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.email, u.password_hash, u.name, u.role, u.phone, u.avatar,
                   u.created_at, u.updated_at
            FROM doctor_patients dp
            JOIN users u ON u.id = dp.patient_id
            WHERE dp.doctor_id = $1 AND dp.patient_id = $2
            "#,
        )
        .bind(doctor_id)
        .bind(patient_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn count_for_doctor(&self, doctor_id: Uuid) -> AppResult<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM doctor_patients WHERE doctor_id = $1",
        )
        .bind(doctor_id)
        .fetch_one(&self.db)
        .await?;
        Ok(n)
    }
}
