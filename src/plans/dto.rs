use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{dto::finish, repo_types::UserSummary},
    error::{AppError, FieldError},
    plans::repo_types::{MealChanges, MealPlan, MealType, PlanChanges, PlanTree, Priority},
};

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC);
/// `null` and blank strings mean "not given".
mod flexible_date {
    use serde::{Deserialize, Deserializer};
    use time::{format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime};

    pub fn parse(s: &str) -> Option<OffsetDateTime> {
        let s = s.trim();
        if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
            return Some(ts);
        }
        Date::parse(s, format_description!("[year]-[month]-[day]"))
            .ok()
            .map(|d| d.midnight().assume_utc())
    }

    pub fn deserialize<'de, D>(de: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(de)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => parse(s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodInput {
    pub name: String,
    pub quantity: String,
    pub calories: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealInput {
    #[serde(rename = "type")]
    pub meal_type: MealType,
    pub name: String,
    pub description: Option<String>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    #[serde(alias = "porcion")]
    pub portion: Option<String>,
    pub time: Option<String>,
    pub foods: Option<Vec<FoodInput>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMealInput {
    pub day_number: i32,
    pub day_name: String,
    #[serde(default)]
    pub meals: Vec<MealInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationInput {
    pub title: String,
    pub description: String,
    pub priority: Option<Priority>,
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    pub title: String,
    pub description: Option<String>,
    pub patient_id: Uuid,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub end_date: Option<OffsetDateTime>,
    pub daily_meals: Option<Vec<DailyMealInput>>,
    pub recommendations: Option<Vec<RecommendationInput>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub end_date: Option<OffsetDateTime>,
    pub is_active: Option<bool>,
    pub daily_meals: Option<Vec<DailyMealInput>>,
    pub recommendations: Option<Vec<RecommendationInput>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMealRequest {
    pub daily_meal_id: Uuid,
    #[serde(flatten)]
    pub meal: MealInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMealRequest {
    #[serde(rename = "type")]
    pub meal_type: Option<MealType>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    #[serde(alias = "porcion")]
    pub portion: Option<String>,
    pub time: Option<String>,
    pub foods: Option<Vec<FoodInput>>,
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn check_foods(path: &str, foods: &[FoodInput], errors: &mut Vec<FieldError>) {
    for (i, f) in foods.iter().enumerate() {
        if blank(&f.name) {
            errors.push(FieldError::new(format!("{path}.{i}.name"), "Food name is required"));
        }
        if blank(&f.quantity) {
            errors.push(FieldError::new(format!("{path}.{i}.quantity"), "Quantity is required"));
        }
    }
}

fn check_meal(path: &str, meal: &MealInput, errors: &mut Vec<FieldError>) {
    if blank(&meal.name) {
        errors.push(FieldError::new(format!("{path}name"), "Meal name is required"));
    }
    if let Some(foods) = &meal.foods {
        check_foods(&format!("{path}foods"), foods, errors);
    }
}

fn check_days(days: &[DailyMealInput], errors: &mut Vec<FieldError>) {
    for (i, d) in days.iter().enumerate() {
        if d.day_number < 1 {
            errors.push(FieldError::new(
                format!("dailyMeals.{i}.dayNumber"),
                "Day number must be at least 1",
            ));
        }
        if blank(&d.day_name) {
            errors.push(FieldError::new(format!("dailyMeals.{i}.dayName"), "Day name is required"));
        }
        for (j, m) in d.meals.iter().enumerate() {
            check_meal(&format!("dailyMeals.{i}.meals.{j}."), m, errors);
        }
    }
}

fn check_recommendations(recs: &[RecommendationInput], errors: &mut Vec<FieldError>) {
    for (i, r) in recs.iter().enumerate() {
        if blank(&r.title) {
            errors.push(FieldError::new(format!("recommendations.{i}.title"), "Title is required"));
        }
        if blank(&r.description) {
            errors.push(FieldError::new(
                format!("recommendations.{i}.description"),
                "Description is required",
            ));
        }
        if blank(&r.category) {
            errors.push(FieldError::new(
                format!("recommendations.{i}.category"),
                "Category is required",
            ));
        }
    }
}

fn check_range(
    start: Option<OffsetDateTime>,
    end: Option<OffsetDateTime>,
    errors: &mut Vec<FieldError>,
) {
    if let (Some(s), Some(e)) = (start, end) {
        if e < s {
            errors.push(FieldError::new("endDate", "End date must not precede start date"));
        }
    }
}

impl CreatePlanRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        if blank(&self.title) {
            errors.push(FieldError::new("title", "Title is required"));
        }
        check_range(self.start_date, self.end_date, &mut errors);
        if let Some(days) = &self.daily_meals {
            check_days(days, &mut errors);
        }
        if let Some(recs) = &self.recommendations {
            check_recommendations(recs, &mut errors);
        }
        finish(errors)
    }
}

impl UpdatePlanRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        if self.title.as_deref().is_some_and(blank) {
            errors.push(FieldError::new("title", "Title must not be empty"));
        }
        check_range(self.start_date, self.end_date, &mut errors);
        if let Some(days) = &self.daily_meals {
            check_days(days, &mut errors);
        }
        if let Some(recs) = &self.recommendations {
            check_recommendations(recs, &mut errors);
        }
        finish(errors)
    }

    /// Scalar part of the update; child collections are handled separately.
    pub fn changes(&self) -> PlanChanges {
        PlanChanges {
            title: self.title.clone(),
            description: self.description.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            is_active: self.is_active,
        }
    }
}

impl AddMealRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        check_meal("", &self.meal, &mut errors);
        finish(errors)
    }
}

impl UpdateMealRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        if self.name.as_deref().is_some_and(blank) {
            errors.push(FieldError::new("name", "Meal name is required"));
        }
        if let Some(foods) = &self.foods {
            check_foods("foods", foods, &mut errors);
        }
        finish(errors)
    }

    pub fn changes(&self) -> MealChanges {
        MealChanges {
            meal_type: self.meal_type,
            name: self.name.clone(),
            description: self.description.clone(),
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            portion: self.portion.clone(),
            time: self.time.clone(),
        }
    }
}

/// Full plan as returned by every plan endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PlanDetails {
    #[serde(flatten)]
    pub tree: PlanTree,
    pub patient: UserSummary,
    pub doctor: UserSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorStats {
    pub patients_count: i64,
    pub plans_count: i64,
    pub active_plans_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentPlan {
    #[serde(flatten)]
    pub plan: MealPlan,
    pub doctor: UserSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientStats {
    pub plans_count: i64,
    pub active_plans_count: i64,
    pub current_plan: Option<CurrentPlan>,
}
