use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Declaration order is the order meals are shown within a day.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "meal_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MealType {
    Breakfast,
    MorningSnack,
    Lunch,
    AfternoonSnack,
    Dinner,
    EveningSnack,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "recommendation_priority", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MealPlan {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyMeal {
    pub id: Uuid,
    pub meal_plan_id: Uuid,
    pub day_number: i32,
    pub day_name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Meal {
    pub id: Uuid,
    pub daily_meal_id: Uuid,
    #[serde(rename = "type")]
    pub meal_type: MealType,
    pub name: String,
    pub description: Option<String>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub portion: Option<String>,
    #[sqlx(rename = "meal_time")]
    pub time: Option<String>,
    #[serde(skip)]
    #[sqlx(rename = "sort_order")]
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Food {
    pub id: Uuid,
    pub meal_id: Uuid,
    pub name: String,
    pub quantity: String,
    pub calories: Option<f64>,
    pub notes: Option<String>,
    #[serde(skip)]
    #[sqlx(rename = "sort_order")]
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: Uuid,
    pub meal_plan_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub category: String,
    #[serde(skip)]
    #[sqlx(rename = "sort_order")]
    pub position: i32,
}

/// Insert payload for the plan row itself; children travel separately.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<OffsetDateTime>,
    pub end_date: Option<OffsetDateTime>,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
}

/// Scalar plan fields; `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct PlanChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<OffsetDateTime>,
    pub end_date: Option<OffsetDateTime>,
    pub is_active: Option<bool>,
}

/// Scalar meal fields; `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct MealChanges {
    pub meal_type: Option<MealType>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub portion: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealNode {
    #[serde(flatten)]
    pub meal: Meal,
    pub foods: Vec<Food>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyMealNode {
    #[serde(flatten)]
    pub day: DailyMeal,
    pub meals: Vec<MealNode>,
}

/// A plan with its whole owned subtree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTree {
    #[serde(flatten)]
    pub plan: MealPlan,
    pub daily_meals: Vec<DailyMealNode>,
    pub recommendations: Vec<Recommendation>,
}

impl PlanTree {
    /// Builds the tree from flat rows, whatever order they arrived in.
    /// Days sort by `day_number`, meals by type then position, foods and
    /// recommendations by position.
    pub fn assemble(
        plan: MealPlan,
        mut days: Vec<DailyMeal>,
        mut meals: Vec<Meal>,
        mut foods: Vec<Food>,
        mut recommendations: Vec<Recommendation>,
    ) -> Self {
        days.sort_by_key(|d| d.day_number);
        meals.sort_by_key(|m| (m.meal_type, m.position));
        foods.sort_by_key(|f| f.position);
        recommendations.sort_by_key(|r| r.position);

        let mut foods_by_meal: HashMap<Uuid, Vec<Food>> = HashMap::new();
        for food in foods {
            foods_by_meal.entry(food.meal_id).or_default().push(food);
        }
        let mut meals_by_day: HashMap<Uuid, Vec<MealNode>> = HashMap::new();
        for meal in meals {
            let foods = foods_by_meal.remove(&meal.id).unwrap_or_default();
            meals_by_day
                .entry(meal.daily_meal_id)
                .or_default()
                .push(MealNode { meal, foods });
        }
        let daily_meals = days
            .into_iter()
            .map(|day| {
                let meals = meals_by_day.remove(&day.id).unwrap_or_default();
                DailyMealNode { day, meals }
            })
            .collect();

        Self {
            plan,
            daily_meals,
            recommendations,
        }
    }

    pub fn meal_count(&self) -> usize {
        self.daily_meals.iter().map(|d| d.meals.len()).sum()
    }

    #[cfg(test)]
    pub fn find_meal(&self, meal_id: Uuid) -> Option<&MealNode> {
        self.daily_meals
            .iter()
            .flat_map(|d| d.meals.iter())
            .find(|m| m.meal.id == meal_id)
    }
}
