//! In-process store implementing every repository trait.
//!
//! Backs `AppState::fake()` and the service tests. It enforces the same
//! uniqueness and foreign-key rules as the Postgres schema, including the
//! cascades, so services behave identically on both stores.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    auth::{
        repo::{TokenRepo, UserRepo},
        repo_types::{NewUser, RefreshToken, User, UserChanges},
    },
    error::{AppError, AppResult},
    patients::repo::PatientRepo,
    plans::{
        dto::{DailyMealInput, FoodInput, MealInput, RecommendationInput},
        repo::PlanRepo,
        repo_types::{
            DailyMeal, Food, Meal, MealChanges, MealPlan, NewPlan, PlanChanges, PlanTree,
            Recommendation,
        },
    },
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    // (doctor_id, patient_id)
    links: HashSet<(Uuid, Uuid)>,
    tokens: HashMap<String, RefreshToken>,
    plans: HashMap<Uuid, MealPlan>,
    days: HashMap<Uuid, DailyMeal>,
    meals: HashMap<Uuid, Meal>,
    foods: HashMap<Uuid, Food>,
    recommendations: HashMap<Uuid, Recommendation>,
    last_ts: Option<OffsetDateTime>,
}

impl Inner {
    /// Strictly increasing clock so "newest first" never ties.
    fn now(&mut self) -> OffsetDateTime {
        let mut ts = OffsetDateTime::now_utc();
        if let Some(last) = self.last_ts {
            if ts <= last {
                ts = last + Duration::microseconds(1);
            }
        }
        self.last_ts = Some(ts);
        ts
    }

    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn remove_meal(&mut self, meal_id: Uuid) -> bool {
        self.foods.retain(|_, f| f.meal_id != meal_id);
        self.meals.remove(&meal_id).is_some()
    }

    fn remove_days_of(&mut self, plan_id: Uuid) {
        let day_ids: HashSet<Uuid> = self
            .days
            .values()
            .filter(|d| d.meal_plan_id == plan_id)
            .map(|d| d.id)
            .collect();
        let meal_ids: Vec<Uuid> = self
            .meals
            .values()
            .filter(|m| day_ids.contains(&m.daily_meal_id))
            .map(|m| m.id)
            .collect();
        for id in meal_ids {
            self.remove_meal(id);
        }
        self.days.retain(|id, _| !day_ids.contains(id));
    }

    fn remove_plan(&mut self, plan_id: Uuid) -> bool {
        self.remove_days_of(plan_id);
        self.recommendations.retain(|_, r| r.meal_plan_id != plan_id);
        self.plans.remove(&plan_id).is_some()
    }

    fn insert_foods(&mut self, meal_id: Uuid, foods: &[FoodInput]) {
        for (i, f) in foods.iter().enumerate() {
            let food = Food {
                id: Uuid::new_v4(),
                meal_id,
                name: f.name.clone(),
                quantity: f.quantity.clone(),
                calories: f.calories,
                notes: f.notes.clone(),
                position: i as i32,
            };
            self.foods.insert(food.id, food);
        }
    }

    fn insert_meal(&mut self, day_id: Uuid, input: &MealInput) -> Uuid {
        let position = self
            .meals
            .values()
            .filter(|m| m.daily_meal_id == day_id)
            .map(|m| m.position + 1)
            .max()
            .unwrap_or(0);
        let meal = Meal {
            id: Uuid::new_v4(),
            daily_meal_id: day_id,
            meal_type: input.meal_type,
            name: input.name.clone(),
            description: input.description.clone(),
            calories: input.calories,
            protein: input.protein,
            carbs: input.carbs,
            fat: input.fat,
            portion: input.portion.clone(),
            time: input.time.clone(),
            position,
        };
        let id = meal.id;
        self.meals.insert(id, meal);
        if let Some(foods) = &input.foods {
            self.insert_foods(id, foods);
        }
        id
    }

    fn insert_days(&mut self, plan_id: Uuid, days: &[DailyMealInput]) {
        for d in days {
            let day = DailyMeal {
                id: Uuid::new_v4(),
                meal_plan_id: plan_id,
                day_number: d.day_number,
                day_name: d.day_name.clone(),
            };
            let day_id = day.id;
            self.days.insert(day_id, day);
            for m in &d.meals {
                self.insert_meal(day_id, m);
            }
        }
    }

    fn insert_recommendations(&mut self, plan_id: Uuid, recs: &[RecommendationInput]) {
        for (i, r) in recs.iter().enumerate() {
            let rec = Recommendation {
                id: Uuid::new_v4(),
                meal_plan_id: plan_id,
                title: r.title.clone(),
                description: r.description.clone(),
                priority: r.priority.unwrap_or_default(),
                category: r.category.clone(),
                position: i as i32,
            };
            self.recommendations.insert(rec.id, rec);
        }
    }

    fn tree(&self, plan: MealPlan) -> PlanTree {
        let days: Vec<DailyMeal> = self
            .days
            .values()
            .filter(|d| d.meal_plan_id == plan.id)
            .cloned()
            .collect();
        let day_ids: HashSet<Uuid> = days.iter().map(|d| d.id).collect();
        let meals: Vec<Meal> = self
            .meals
            .values()
            .filter(|m| day_ids.contains(&m.daily_meal_id))
            .cloned()
            .collect();
        let meal_ids: HashSet<Uuid> = meals.iter().map(|m| m.id).collect();
        let foods = self
            .foods
            .values()
            .filter(|f| meal_ids.contains(&f.meal_id))
            .cloned()
            .collect();
        let recs = self
            .recommendations
            .values()
            .filter(|r| r.meal_plan_id == plan.id)
            .cloned()
            .collect();
        PlanTree::assemble(plan, days, meals, foods, recs)
    }

    fn plans_where(&self, pred: impl Fn(&MealPlan) -> bool) -> Vec<MealPlan> {
        let mut plans: Vec<MealPlan> = self.plans.values().filter(|p| pred(p)).cloned().collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        plans
    }

    fn counts_where(&self, pred: impl Fn(&MealPlan) -> bool) -> (i64, i64) {
        let mut total = 0;
        let mut active = 0;
        for p in self.plans.values().filter(|p| pred(p)) {
            total += 1;
            if p.is_active {
                active += 1;
            }
        }
        (total, active)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_refresh_token(&self, token: &str) -> bool {
        self.lock().tokens.contains_key(token)
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn link_count(&self) -> usize {
        self.lock().links.len()
    }

    /// `(days, meals, foods, recommendations)` across all plans.
    pub fn row_counts(&self) -> (usize, usize, usize, usize) {
        let g = self.lock();
        (
            g.days.len(),
            g.meals.len(),
            g.foods.len(),
            g.recommendations.len(),
        )
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        Ok(self.lock().users.values().find(|u| u.email == email).cloned())
    }

    async fn create(&self, new: NewUser) -> AppResult<User> {
        let mut g = self.lock();
        if g.email_taken(&new.email, None) {
            return Err(AppError::conflict("Record already exists"));
        }
        if let Some(doctor_id) = new.doctor_id {
            if !g.users.contains_key(&doctor_id) {
                return Err(AppError::not_found("Related record not found"));
            }
        }
        let now = g.now();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            name: new.name,
            role: new.role,
            phone: new.phone,
            avatar: None,
            created_at: now,
            updated_at: now,
        };
        if let Some(doctor_id) = new.doctor_id {
            g.links.insert((doctor_id, user.id));
        }
        g.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> AppResult<User> {
        let mut g = self.lock();
        if let Some(email) = &changes.email {
            if g.email_taken(email, Some(id)) {
                return Err(AppError::conflict("Record already exists"));
            }
        }
        let now = g.now();
        let user = g
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("User not found"))?;
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(phone) = changes.phone {
            user.phone = phone;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        if let Some(avatar) = changes.avatar {
            user.avatar = avatar;
        }
        user.updated_at = now;
        Ok(user.clone())
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        let mut g = self.lock();
        if g.users.remove(&id).is_none() {
            return Err(AppError::not_found("User not found"));
        }
        g.links.retain(|(d, p)| *d != id && *p != id);
        g.tokens.retain(|_, t| t.user_id != id);
        let owned: Vec<Uuid> = g
            .plans
            .values()
            .filter(|p| p.doctor_id == id || p.patient_id == id)
            .map(|p| p.id)
            .collect();
        for plan_id in owned {
            g.remove_plan(plan_id);
        }
        Ok(())
    }
}

#[async_trait]
impl TokenRepo for MemoryStore {
    async fn insert(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> AppResult<RefreshToken> {
        let mut g = self.lock();
        if g.tokens.contains_key(token) {
            return Err(AppError::conflict("Record already exists"));
        }
        if !g.users.contains_key(&user_id) {
            return Err(AppError::not_found("Related record not found"));
        }
        let row = RefreshToken {
            id: Uuid::new_v4(),
            token: token.to_string(),
            user_id,
            expires_at,
            created_at: g.now(),
        };
        g.tokens.insert(row.token.clone(), row.clone());
        Ok(row)
    }

    async fn rotate(
        &self,
        old: &str,
        user_id: Uuid,
        new: &str,
        expires_at: OffsetDateTime,
    ) -> AppResult<bool> {
        let mut g = self.lock();
        let now = g.now();
        let consumable = g
            .tokens
            .get(old)
            .is_some_and(|t| t.user_id == user_id && t.expires_at > now);
        if !consumable {
            return Ok(false);
        }
        g.tokens.remove(old);
        let row = RefreshToken {
            id: Uuid::new_v4(),
            token: new.to_string(),
            user_id,
            expires_at,
            created_at: now,
        };
        g.tokens.insert(row.token.clone(), row);
        Ok(true)
    }

    async fn revoke(&self, token: &str) -> AppResult<u64> {
        Ok(u64::from(self.lock().tokens.remove(token).is_some()))
    }

    async fn purge_expired(&self, user_id: Uuid) -> AppResult<u64> {
        let mut g = self.lock();
        let now = g.now();
        let before = g.tokens.len();
        g.tokens
            .retain(|_, t| !(t.user_id == user_id && t.expires_at < now));
        Ok((before - g.tokens.len()) as u64)
    }
}

#[async_trait]
impl PatientRepo for MemoryStore {
    async fn link(&self, doctor_id: Uuid, patient_id: Uuid) -> AppResult<()> {
        let mut g = self.lock();
        if !g.users.contains_key(&doctor_id) || !g.users.contains_key(&patient_id) {
            return Err(AppError::not_found("Related record not found"));
        }
        g.links.insert((doctor_id, patient_id));
        Ok(())
    }

    async fn list_linked(&self, doctor_id: Uuid) -> AppResult<Vec<(User, i64)>> {
        let g = self.lock();
        let mut rows: Vec<(User, i64)> = g
            .links
            .iter()
            .filter(|(d, _)| *d == doctor_id)
            .filter_map(|(_, p)| g.users.get(p))
            .map(|u| {
                let plans = g.plans.values().filter(|p| p.patient_id == u.id).count();
                (u.clone(), plans as i64)
            })
            .collect();
        rows.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name).then_with(|| a.email.cmp(&b.email)));
        Ok(rows)
    }

    async fn find_linked(&self, doctor_id: Uuid, patient_id: Uuid) -> AppResult<Option<User>> {
        let g = self.lock();
        if !g.links.contains(&(doctor_id, patient_id)) {
            return Ok(None);
        }
        Ok(g.users.get(&patient_id).cloned())
    }

    async fn count_for_doctor(&self, doctor_id: Uuid) -> AppResult<i64> {
        Ok(self.lock().links.iter().filter(|(d, _)| *d == doctor_id).count() as i64)
    }
}

#[async_trait]
impl PlanRepo for MemoryStore {
    async fn create_tree(
        &self,
        plan: NewPlan,
        days: &[DailyMealInput],
        recommendations: &[RecommendationInput],
    ) -> AppResult<Uuid> {
        let mut g = self.lock();
        if !g.users.contains_key(&plan.doctor_id) || !g.users.contains_key(&plan.patient_id) {
            return Err(AppError::not_found("Related record not found"));
        }
        let now = g.now();
        let row = MealPlan {
            id: Uuid::new_v4(),
            title: plan.title,
            description: plan.description,
            start_date: plan.start_date.unwrap_or(now),
            end_date: plan.end_date,
            doctor_id: plan.doctor_id,
            patient_id: plan.patient_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let id = row.id;
        g.plans.insert(id, row);
        g.insert_days(id, days);
        g.insert_recommendations(id, recommendations);
        Ok(id)
    }

    async fn find(&self, plan_id: Uuid) -> AppResult<Option<MealPlan>> {
        Ok(self.lock().plans.get(&plan_id).cloned())
    }

    async fn load_tree(&self, plan_id: Uuid) -> AppResult<Option<PlanTree>> {
        let g = self.lock();
        Ok(g.plans.get(&plan_id).cloned().map(|p| g.tree(p)))
    }

    async fn list_for_doctor(&self, doctor_id: Uuid) -> AppResult<Vec<MealPlan>> {
        Ok(self.lock().plans_where(|p| p.doctor_id == doctor_id))
    }

    async fn list_for_patient(&self, patient_id: Uuid) -> AppResult<Vec<MealPlan>> {
        Ok(self.lock().plans_where(|p| p.patient_id == patient_id))
    }

    async fn update(
        &self,
        plan_id: Uuid,
        changes: PlanChanges,
        days: Option<&[DailyMealInput]>,
        recommendations: Option<&[RecommendationInput]>,
    ) -> AppResult<()> {
        let mut g = self.lock();
        let now = g.now();
        let plan = g
            .plans
            .get_mut(&plan_id)
            .ok_or_else(|| AppError::not_found("Plan not found"))?;
        if let Some(title) = changes.title {
            plan.title = title;
        }
        if let Some(description) = changes.description {
            plan.description = Some(description);
        }
        if let Some(start) = changes.start_date {
            plan.start_date = start;
        }
        if let Some(end) = changes.end_date {
            plan.end_date = Some(end);
        }
        if let Some(active) = changes.is_active {
            plan.is_active = active;
        }
        plan.updated_at = now;

        if let Some(days) = days {
            g.remove_days_of(plan_id);
            g.insert_days(plan_id, days);
        }
        if let Some(recs) = recommendations {
            g.recommendations.retain(|_, r| r.meal_plan_id != plan_id);
            g.insert_recommendations(plan_id, recs);
        }
        Ok(())
    }

    async fn delete(&self, plan_id: Uuid) -> AppResult<()> {
        if self.lock().remove_plan(plan_id) {
            Ok(())
        } else {
            Err(AppError::not_found("Plan not found"))
        }
    }

    async fn find_day(&self, day_id: Uuid) -> AppResult<Option<DailyMeal>> {
        Ok(self.lock().days.get(&day_id).cloned())
    }

    async fn plan_of_meal(&self, meal_id: Uuid) -> AppResult<Option<Uuid>> {
        let g = self.lock();
        Ok(g.meals
            .get(&meal_id)
            .and_then(|m| g.days.get(&m.daily_meal_id))
            .map(|d| d.meal_plan_id))
    }

    async fn add_meal(&self, day_id: Uuid, meal: &MealInput) -> AppResult<Uuid> {
        let mut g = self.lock();
        if !g.days.contains_key(&day_id) {
            return Err(AppError::not_found("Related record not found"));
        }
        Ok(g.insert_meal(day_id, meal))
    }

    async fn update_meal(
        &self,
        meal_id: Uuid,
        changes: MealChanges,
        foods: Option<&[FoodInput]>,
    ) -> AppResult<()> {
        let mut g = self.lock();
        let meal = g
            .meals
            .get_mut(&meal_id)
            .ok_or_else(|| AppError::not_found("Meal not found"))?;
        if let Some(t) = changes.meal_type {
            meal.meal_type = t;
        }
        if let Some(name) = changes.name {
            meal.name = name;
        }
        if changes.description.is_some() {
            meal.description = changes.description;
        }
        if changes.calories.is_some() {
            meal.calories = changes.calories;
        }
        if changes.protein.is_some() {
            meal.protein = changes.protein;
        }
        if changes.carbs.is_some() {
            meal.carbs = changes.carbs;
        }
        if changes.fat.is_some() {
            meal.fat = changes.fat;
        }
        if changes.portion.is_some() {
            meal.portion = changes.portion;
        }
        if changes.time.is_some() {
            meal.time = changes.time;
        }

        if let Some(foods) = foods {
            g.foods.retain(|_, f| f.meal_id != meal_id);
            g.insert_foods(meal_id, foods);
        }
        Ok(())
    }

    async fn delete_meal(&self, meal_id: Uuid) -> AppResult<()> {
        if self.lock().remove_meal(meal_id) {
            Ok(())
        } else {
            Err(AppError::not_found("Meal not found"))
        }
    }

    async fn counts_for_doctor(&self, doctor_id: Uuid) -> AppResult<(i64, i64)> {
        Ok(self.lock().counts_where(|p| p.doctor_id == doctor_id))
    }

    async fn counts_for_patient(&self, patient_id: Uuid) -> AppResult<(i64, i64)> {
        Ok(self.lock().counts_where(|p| p.patient_id == patient_id))
    }

    async fn current_for_patient(
        &self,
        patient_id: Uuid,
        now: OffsetDateTime,
    ) -> AppResult<Option<MealPlan>> {
        let g = self.lock();
        Ok(g.plans
            .values()
            .filter(|p| p.patient_id == patient_id && p.is_active && p.start_date <= now)
            .filter(|p| p.end_date.is_some_and(|end| end >= now))
            .max_by_key(|p| p.start_date)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::Role;

    fn new_user(email: &str, role: Role, doctor_id: Option<Uuid>) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "hash".into(),
            name: "Someone".into(),
            role,
            phone: None,
            doctor_id,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = MemoryStore::default();
        store.create(new_user("a@x.com", Role::Doctor, None)).await.unwrap();
        let err = store
            .create(new_user("a@x.com", Role::Patient, None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn deleting_a_user_cascades() {
        let store = MemoryStore::default();
        let d = store.create(new_user("d@x.com", Role::Doctor, None)).await.unwrap();
        let p = store
            .create(new_user("p@x.com", Role::Patient, Some(d.id)))
            .await
            .unwrap();
        TokenRepo::insert(&store, p.id, "t", OffsetDateTime::now_utc() + Duration::days(1))
            .await
            .unwrap();
        let day: DailyMealInput =
            serde_json::from_str(r#"{"dayNumber":1,"dayName":"Mon","meals":[{"type":"LUNCH","name":"Rice","foods":[{"name":"Rice","quantity":"1 cup"}]}]}"#)
                .unwrap();
        store
            .create_tree(
                NewPlan {
                    title: "Week 1".into(),
                    description: None,
                    start_date: None,
                    end_date: None,
                    doctor_id: d.id,
                    patient_id: p.id,
                },
                &[day],
                &[],
            )
            .await
            .unwrap();
        assert_eq!(store.row_counts(), (1, 1, 1, 0));

        UserRepo::delete(&store, p.id).await.unwrap();
        assert_eq!(store.link_count(), 0);
        assert!(!store.has_refresh_token("t"));
        assert_eq!(store.row_counts(), (0, 0, 0, 0));
        assert!(store.list_linked(d.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rotation_consumes_exactly_once() {
        let store = MemoryStore::default();
        let u = store.create(new_user("u@x.com", Role::Doctor, None)).await.unwrap();
        let exp = OffsetDateTime::now_utc() + Duration::days(1);
        TokenRepo::insert(&store, u.id, "a", exp).await.unwrap();

        assert!(!store.rotate("a", Uuid::new_v4(), "b", exp).await.unwrap());
        assert!(store.rotate("a", u.id, "b", exp).await.unwrap());
        assert!(!store.rotate("a", u.id, "c", exp).await.unwrap());
        assert!(store.has_refresh_token("b"));
        assert!(!store.has_refresh_token("c"));
    }
}
