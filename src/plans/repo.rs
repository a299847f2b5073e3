use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    db::PgStore,
    error::{AppError, AppResult},
    plans::{
        dto::{DailyMealInput, FoodInput, MealInput, RecommendationInput},
        repo_types::{
            DailyMeal, Food, Meal, MealChanges, MealPlan, NewPlan, PlanChanges, PlanTree,
            Recommendation,
        },
    },
};

/// Storage for the plan aggregate. Every method that writes more than one
/// row is atomic.
#[async_trait]
pub trait PlanRepo: Send + Sync {
    /// Inserts the plan with all days, meals, foods and recommendations.
    async fn create_tree(
        &self,
        plan: NewPlan,
        days: &[DailyMealInput],
        recommendations: &[RecommendationInput],
    ) -> AppResult<Uuid>;

    async fn find(&self, plan_id: Uuid) -> AppResult<Option<MealPlan>>;
    async fn load_tree(&self, plan_id: Uuid) -> AppResult<Option<PlanTree>>;
    /// Newest first.
    async fn list_for_doctor(&self, doctor_id: Uuid) -> AppResult<Vec<MealPlan>>;
    /// Newest first.
    async fn list_for_patient(&self, patient_id: Uuid) -> AppResult<Vec<MealPlan>>;

    /// Applies scalar changes; a present `days` or `recommendations` slice
    /// replaces that whole child collection.
    async fn update(
        &self,
        plan_id: Uuid,
        changes: PlanChanges,
        days: Option<&[DailyMealInput]>,
        recommendations: Option<&[RecommendationInput]>,
    ) -> AppResult<()>;

    async fn delete(&self, plan_id: Uuid) -> AppResult<()>;

    async fn find_day(&self, day_id: Uuid) -> AppResult<Option<DailyMeal>>;
    /// Id of the plan a meal belongs to.
    async fn plan_of_meal(&self, meal_id: Uuid) -> AppResult<Option<Uuid>>;
    async fn add_meal(&self, day_id: Uuid, meal: &MealInput) -> AppResult<Uuid>;
    /// A present `foods` slice replaces the meal's food list.
    async fn update_meal(
        &self,
        meal_id: Uuid,
        changes: MealChanges,
        foods: Option<&[FoodInput]>,
    ) -> AppResult<()>;
    async fn delete_meal(&self, meal_id: Uuid) -> AppResult<()>;

    /// `(all plans, active plans)` owned by the doctor.
    async fn counts_for_doctor(&self, doctor_id: Uuid) -> AppResult<(i64, i64)>;
    /// `(all plans, active plans)` the patient is subject of.
    async fn counts_for_patient(&self, patient_id: Uuid) -> AppResult<(i64, i64)>;
    /// Active plan whose range contains `now`, latest start first.
    async fn current_for_patient(
        &self,
        patient_id: Uuid,
        now: OffsetDateTime,
    ) -> AppResult<Option<MealPlan>>;
}

async fn insert_foods(
    tx: &mut Transaction<'_, Postgres>,
    meal_id: Uuid,
    foods: &[FoodInput],
) -> AppResult<()> {
    for (i, food) in foods.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO foods (meal_id, name, quantity, calories, notes, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(meal_id)
        .bind(&food.name)
        .bind(&food.quantity)
        .bind(food.calories)
        .bind(&food.notes)
        .bind(i as i32)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Appends a meal after the day's existing ones.
async fn insert_meal(
    tx: &mut Transaction<'_, Postgres>,
    day_id: Uuid,
    meal: &MealInput,
) -> AppResult<Uuid> {
    let meal_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO meals (daily_meal_id, meal_type, name, description, calories,
                           protein, carbs, fat, portion, meal_time, sort_order)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM meals WHERE daily_meal_id = $1))
        RETURNING id
        "#,
    )
    .bind(day_id)
    .bind(meal.meal_type)
    .bind(&meal.name)
    .bind(&meal.description)
    .bind(meal.calories)
    .bind(meal.protein)
    .bind(meal.carbs)
    .bind(meal.fat)
    .bind(&meal.portion)
    .bind(&meal.time)
    .fetch_one(&mut **tx)
    .await?;

    if let Some(foods) = &meal.foods {
        insert_foods(tx, meal_id, foods).await?;
    }
    Ok(meal_id)
}

async fn insert_days(
    tx: &mut Transaction<'_, Postgres>,
    plan_id: Uuid,
    days: &[DailyMealInput],
) -> AppResult<()> {
    for day in days {
        let day_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO daily_meals (meal_plan_id, day_number, day_name)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(plan_id)
        .bind(day.day_number)
        .bind(&day.day_name)
        .fetch_one(&mut **tx)
        .await?;

        for meal in &day.meals {
            insert_meal(tx, day_id, meal).await?;
        }
    }
    Ok(())
}

async fn insert_recommendations(
    tx: &mut Transaction<'_, Postgres>,
    plan_id: Uuid,
    recommendations: &[RecommendationInput],
) -> AppResult<()> {
    for (i, rec) in recommendations.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO recommendations (meal_plan_id, title, description, priority, category, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(plan_id)
        .bind(&rec.title)
        .bind(&rec.description)
        .bind(rec.priority.unwrap_or_default())
        .bind(&rec.category)
        .bind(i as i32)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl PlanRepo for PgStore {
    async fn create_tree(
        &self,
        plan: NewPlan,
        days: &[DailyMealInput],
        recommendations: &[RecommendationInput],
    ) -> AppResult<Uuid> {
        let mut tx = self.db.begin().await?;
        let plan_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO meal_plans (title, description, start_date, end_date, doctor_id, patient_id)
            VALUES ($1, $2, COALESCE($3, now()), $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&plan.title)
        .bind(&plan.description)
        .bind(plan.start_date)
        .bind(plan.end_date)
        .bind(plan.doctor_id)
        .bind(plan.patient_id)
        .fetch_one(&mut *tx)
        .await?;

        insert_days(&mut tx, plan_id, days).await?;
        insert_recommendations(&mut tx, plan_id, recommendations).await?;
        tx.commit().await?;
        Ok(plan_id)
    }

    async fn find(&self, plan_id: Uuid) -> AppResult<Option<MealPlan>> {
        let plan = sqlx::query_as::<_, MealPlan>(
            r#"
            SELECT id, title, description, start_date, end_date, doctor_id, patient_id,
                   is_active, created_at, updated_at
            FROM meal_plans
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(plan)
    }

    async fn load_tree(&self, plan_id: Uuid) -> AppResult<Option<PlanTree>> {
        // One snapshot for all five reads.
        let mut tx = self.db.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let Some(plan) = sqlx::query_as::<_, MealPlan>(
            r#"
            SELECT id, title, description, start_date, end_date, doctor_id, patient_id,
                   is_active, created_at, updated_at
            FROM meal_plans
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let days = sqlx::query_as::<_, DailyMeal>(
            r#"
            SELECT id, meal_plan_id, day_number, day_name
            FROM daily_meals
            WHERE meal_plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_all(&mut *tx)
        .await?;

        let meals = sqlx::query_as::<_, Meal>(
            r#"
            SELECT m.id, m.daily_meal_id, m.meal_type, m.name, m.description, m.calories,
                   m.protein, m.carbs, m.fat, m.portion, m.meal_time, m.sort_order
            FROM meals m
            JOIN daily_meals d ON d.id = m.daily_meal_id
            WHERE d.meal_plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_all(&mut *tx)
        .await?;

        let foods = sqlx::query_as::<_, Food>(
            r#"
            SELECT f.id, f.meal_id, f.name, f.quantity, f.calories, f.notes, f.sort_order
            FROM foods f
            JOIN meals m ON m.id = f.meal_id
            JOIN daily_meals d ON d.id = m.daily_meal_id
            WHERE d.meal_plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_all(&mut *tx)
        .await?;

        let recommendations = sqlx::query_as::<_, Recommendation>(
            r#"
            SELECT id, meal_plan_id, title, description, priority, category, sort_order
            FROM recommendations
            WHERE meal_plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(PlanTree::assemble(plan, days, meals, foods, recommendations)))
    }

    async fn list_for_doctor(&self, doctor_id: Uuid) -> AppResult<Vec<MealPlan>> {
        let rows = sqlx::query_as::<_, MealPlan>(
            r#"
            SELECT id, title, description, start_date, end_date, doctor_id, patient_id,
                   is_active, created_at, updated_at
            FROM meal_plans
            WHERE doctor_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(doctor_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn list_for_patient(&self, patient_id: Uuid) -> AppResult<Vec<MealPlan>> {
        let rows = sqlx::query_as::<_, MealPlan>(
            r#"
            SELECT id, title, description, start_date, end_date, doctor_id, patient_id,
                   is_active, created_at, updated_at
            FROM meal_plans
            WHERE patient_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(patient_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn update(
        &self,
        plan_id: Uuid,
        changes: PlanChanges,
        days: Option<&[DailyMealInput]>,
        recommendations: Option<&[RecommendationInput]>,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE meal_plans SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                start_date = COALESCE($4, start_date),
                end_date = COALESCE($5, end_date),
                is_active = COALESCE($6, is_active),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .bind(changes.title)
        .bind(changes.description)
        .bind(changes.start_date)
        .bind(changes.end_date)
        .bind(changes.is_active)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(AppError::not_found("Plan not found"));
        }

        if let Some(days) = days {
            // meals and foods go with their day via ON DELETE CASCADE
            sqlx::query("DELETE FROM daily_meals WHERE meal_plan_id = $1")
                .bind(plan_id)
                .execute(&mut *tx)
                .await?;
            insert_days(&mut tx, plan_id, days).await?;
        }

        if let Some(recommendations) = recommendations {
            sqlx::query("DELETE FROM recommendations WHERE meal_plan_id = $1")
                .bind(plan_id)
                .execute(&mut *tx)
                .await?;
            insert_recommendations(&mut tx, plan_id, recommendations).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, plan_id: Uuid) -> AppResult<()> {
        let n = sqlx::query("DELETE FROM meal_plans WHERE id = $1")
            .bind(plan_id)
            .execute(&self.db)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(AppError::not_found("Plan not found"));
        }
        Ok(())
    }

    async fn find_day(&self, day_id: Uuid) -> AppResult<Option<DailyMeal>> {
        let day = sqlx::query_as::<_, DailyMeal>(
            "SELECT id, meal_plan_id, day_number, day_name FROM daily_meals WHERE id = $1",
        )
        .bind(day_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(day)
    }

    async fn plan_of_meal(&self, meal_id: Uuid) -> AppResult<Option<Uuid>> {
        let plan_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT d.meal_plan_id
            FROM meals m
            JOIN daily_meals d ON d.id = m.daily_meal_id
            WHERE m.id = $1
            "#,
        )
        .bind(meal_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(plan_id)
    }

    async fn add_meal(&self, day_id: Uuid, meal: &MealInput) -> AppResult<Uuid> {
        let mut tx = self.db.begin().await?;
        let meal_id = insert_meal(&mut tx, day_id, meal).await?;
        tx.commit().await?;
        Ok(meal_id)
    }

    async fn update_meal(
        &self,
        meal_id: Uuid,
        changes: MealChanges,
        foods: Option<&[FoodInput]>,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE meals SET
                meal_type = COALESCE($2, meal_type),
                name = COALESCE($3, name),
                description = COALESCE($4, description),
                calories = COALESCE($5, calories),
                protein = COALESCE($6, protein),
                carbs = COALESCE($7, carbs),
                fat = COALESCE($8, fat),
                portion = COALESCE($9, portion),
                meal_time = COALESCE($10, meal_time)
            WHERE id = $1
            "#,
        )
        .bind(meal_id)
        .bind(changes.meal_type)
        .bind(changes.name)
        .bind(changes.description)
        .bind(changes.calories)
        .bind(changes.protein)
        .bind(changes.carbs)
        .bind(changes.fat)
        .bind(changes.portion)
        .bind(changes.time)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(AppError::not_found("Meal not found"));
        }

        if let Some(foods) = foods {
            sqlx::query("DELETE FROM foods WHERE meal_id = $1")
                .bind(meal_id)
                .execute(&mut *tx)
                .await?;
            insert_foods(&mut tx, meal_id, foods).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_meal(&self, meal_id: Uuid) -> AppResult<()> {
        let n = sqlx::query("DELETE FROM meals WHERE id = $1")
            .bind(meal_id)
            .execute(&self.db)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(AppError::not_found("Meal not found"));
        }
        Ok(())
    }

    async fn counts_for_doctor(&self, doctor_id: Uuid) -> AppResult<(i64, i64)> {
        let counts = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE is_active)
            FROM meal_plans
            WHERE doctor_id = $1
            "#,
        )
        .bind(doctor_id)
        .fetch_one(&self.db)
        .await?;
        Ok(counts)
    }

    async fn counts_for_patient(&self, patient_id: Uuid) -> AppResult<(i64, i64)> {
        let counts = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE is_active)
            FROM meal_plans
            WHERE patient_id = $1
            "#,
        )
        .bind(patient_id)
        .fetch_one(&self.db)
        .await?;
        Ok(counts)
    }

    async fn current_for_patient(
        &self,
        patient_id: Uuid,
        now: OffsetDateTime,
    ) -> AppResult<Option<MealPlan>> {
        let plan = sqlx::query_as::<_, MealPlan>(
            r#"
            SELECT id, title, description, start_date, end_date, doctor_id, patient_id,
                   is_active, created_at, updated_at
            FROM meal_plans
            WHERE patient_id = $1
              AND is_active
              AND start_date <= $2
              AND end_date >= $2
            ORDER BY start_date DESC
            LIMIT 1
            "#,
        )
        .bind(patient_id)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(plan)
    }
}
