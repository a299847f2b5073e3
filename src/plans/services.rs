use std::{collections::HashMap, sync::Arc};

use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        repo::UserRepo,
        repo_types::{Identity, Role, UserSummary},
    },
    error::{AppError, AppResult},
    patients::repo::PatientRepo,
    plans::{
        dto::{
            AddMealRequest, CreatePlanRequest, CurrentPlan, DoctorStats, PatientStats,
            PlanDetails, UpdateMealRequest, UpdatePlanRequest,
        },
        repo::PlanRepo,
        repo_types::{MealPlan, NewPlan, PlanTree},
    },
    policy,
};

const PLAN_NOT_FOUND: &str = "Plan not found";

/// Meal plan aggregate operations. Every mutation checks ownership first.
#[derive(Clone)]
pub struct PlansService {
    plans: Arc<dyn PlanRepo>,
    users: Arc<dyn UserRepo>,
    links: Arc<dyn PatientRepo>,
}

impl PlansService {
    pub fn new(
        plans: Arc<dyn PlanRepo>,
        users: Arc<dyn UserRepo>,
        links: Arc<dyn PatientRepo>,
    ) -> Self {
        Self {
            plans,
            users,
            links,
        }
    }

    async fn summary(
        &self,
        cache: &mut HashMap<Uuid, UserSummary>,
        user_id: Uuid,
    ) -> AppResult<UserSummary> {
        if let Some(s) = cache.get(&user_id) {
            return Ok(s.clone());
        }
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        let s = UserSummary::from(&user);
        cache.insert(user_id, s.clone());
        Ok(s)
    }

    async fn details_cached(
        &self,
        tree: PlanTree,
        cache: &mut HashMap<Uuid, UserSummary>,
    ) -> AppResult<PlanDetails> {
        let patient = self.summary(cache, tree.plan.patient_id).await?;
        let doctor = self.summary(cache, tree.plan.doctor_id).await?;
        Ok(PlanDetails {
            tree,
            patient,
            doctor,
        })
    }

    /// Reloads the whole plan with its embedded user summaries.
    async fn details(&self, plan_id: Uuid) -> AppResult<PlanDetails> {
        let tree = self
            .plans
            .load_tree(plan_id)
            .await?
            .ok_or_else(|| AppError::not_found(PLAN_NOT_FOUND))?;
        self.details_cached(tree, &mut HashMap::new()).await
    }

    async fn find(&self, plan_id: Uuid) -> AppResult<MealPlan> {
        self.plans
            .find(plan_id)
            .await?
            .ok_or_else(|| AppError::not_found(PLAN_NOT_FOUND))
    }

    async fn owned(&self, plan_id: Uuid, doctor_id: Uuid) -> AppResult<MealPlan> {
        let plan = self.find(plan_id).await?;
        policy::ensure_owner(&plan, doctor_id)?;
        Ok(plan)
    }

    /// Creates a plan with its whole tree for one of the doctor's patients.
    #[instrument(skip(self, req), fields(patient_id = %req.patient_id))]
    pub async fn create_plan(
        &self,
        doctor_id: Uuid,
        req: CreatePlanRequest,
    ) -> AppResult<PlanDetails> {
        req.validate()?;
        if self
            .links
            .find_linked(doctor_id, req.patient_id)
            .await?
            .is_none()
        {
            warn!(%doctor_id, "plan for unlinked patient");
            return Err(AppError::not_found(
                "Patient not found or not assigned to this doctor",
            ));
        }

        let new = NewPlan {
            title: req.title.trim().to_string(),
            description: req.description,
            start_date: req.start_date,
            end_date: req.end_date,
            doctor_id,
            patient_id: req.patient_id,
        };
        let plan_id = self
            .plans
            .create_tree(
                new,
                req.daily_meals.as_deref().unwrap_or_default(),
                req.recommendations.as_deref().unwrap_or_default(),
            )
            .await?;
        let details = self.details(plan_id).await?;
        info!(
            %plan_id,
            days = details.tree.daily_meals.len(),
            meals = details.tree.meal_count(),
            "plan created"
        );
        Ok(details)
    }

    /// Doctors get the plans they own, patients the plans about them.
    #[instrument(skip(self, requester), fields(user_id = %requester.id))]
    pub async fn list_plans(&self, requester: &Identity) -> AppResult<Vec<PlanDetails>> {
        let plans = match requester.role {
            Role::Doctor => self.plans.list_for_doctor(requester.id).await?,
            Role::Patient => self.plans.list_for_patient(requester.id).await?,
        };
        let mut cache = HashMap::new();
        let mut out = Vec::with_capacity(plans.len());
        for plan in plans {
            // a plan deleted between the list and the load is skipped
            if let Some(tree) = self.plans.load_tree(plan.id).await? {
                out.push(self.details_cached(tree, &mut cache).await?);
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, requester), fields(user_id = %requester.id))]
    pub async fn get_plan(&self, plan_id: Uuid, requester: &Identity) -> AppResult<PlanDetails> {
        let plan = self.find(plan_id).await?;
        policy::ensure_can_view(&plan, requester.id, requester.role)?;
        self.details(plan_id).await
    }

    /// Present `dailyMeals` or `recommendations` replace those collections
    /// wholesale.
    #[instrument(skip(self, req))]
    pub async fn update_plan(
        &self,
        plan_id: Uuid,
        doctor_id: Uuid,
        req: UpdatePlanRequest,
    ) -> AppResult<PlanDetails> {
        req.validate()?;
        let current = self.owned(plan_id, doctor_id).await?;

        let start = req.start_date.unwrap_or(current.start_date);
        if let Some(end) = req.end_date.or(current.end_date) {
            if end < start {
                return Err(AppError::bad_request("End date must not precede start date"));
            }
        }

        let mut changes = req.changes();
        changes.title = changes.title.map(|t| t.trim().to_string());
        self.plans
            .update(
                plan_id,
                changes,
                req.daily_meals.as_deref(),
                req.recommendations.as_deref(),
            )
            .await?;
        info!(
            %plan_id,
            replaced_days = req.daily_meals.is_some(),
            replaced_recommendations = req.recommendations.is_some(),
            "plan updated"
        );
        self.details(plan_id).await
    }

    #[instrument(skip(self, req), fields(day_id = %req.daily_meal_id))]
    pub async fn add_meal(
        &self,
        plan_id: Uuid,
        doctor_id: Uuid,
        req: AddMealRequest,
    ) -> AppResult<PlanDetails> {
        req.validate()?;
        self.owned(plan_id, doctor_id).await?;

        match self.plans.find_day(req.daily_meal_id).await? {
            Some(day) if day.meal_plan_id == plan_id => {}
            _ => return Err(AppError::not_found("Day not found in this plan")),
        }

        let meal_id = self.plans.add_meal(req.daily_meal_id, &req.meal).await?;
        info!(%plan_id, %meal_id, "meal added");
        self.details(plan_id).await
    }

    async fn ensure_meal_in_plan(&self, plan_id: Uuid, meal_id: Uuid) -> AppResult<()> {
        if self.plans.plan_of_meal(meal_id).await? != Some(plan_id) {
            return Err(AppError::not_found("Meal not found in this plan"));
        }
        Ok(())
    }

    /// A present `foods` list replaces the meal's foods.
    #[instrument(skip(self, req))]
    pub async fn update_meal(
        &self,
        plan_id: Uuid,
        meal_id: Uuid,
        doctor_id: Uuid,
        req: UpdateMealRequest,
    ) -> AppResult<PlanDetails> {
        req.validate()?;
        self.owned(plan_id, doctor_id).await?;
        self.ensure_meal_in_plan(plan_id, meal_id).await?;

        let mut changes = req.changes();
        changes.name = changes.name.map(|n| n.trim().to_string());
        self.plans
            .update_meal(meal_id, changes, req.foods.as_deref())
            .await?;
        info!(%plan_id, %meal_id, "meal updated");
        self.details(plan_id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_meal(
        &self,
        plan_id: Uuid,
        meal_id: Uuid,
        doctor_id: Uuid,
    ) -> AppResult<PlanDetails> {
        self.owned(plan_id, doctor_id).await?;
        self.ensure_meal_in_plan(plan_id, meal_id).await?;
        self.plans.delete_meal(meal_id).await?;
        info!(%plan_id, %meal_id, "meal deleted");
        self.details(plan_id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_plan(&self, plan_id: Uuid, doctor_id: Uuid) -> AppResult<()> {
        self.owned(plan_id, doctor_id).await?;
        self.plans.delete(plan_id).await?;
        info!(%plan_id, "plan deleted");
        Ok(())
    }

    pub async fn doctor_stats(&self, doctor_id: Uuid) -> AppResult<DoctorStats> {
        let patients_count = self.links.count_for_doctor(doctor_id).await?;
        let (plans_count, active_plans_count) = self.plans.counts_for_doctor(doctor_id).await?;
        Ok(DoctorStats {
            patients_count,
            plans_count,
            active_plans_count,
        })
    }

    /// Counts plus the plan in effect right now, if any.
    pub async fn patient_stats(&self, patient_id: Uuid) -> AppResult<PatientStats> {
        self.patient_stats_at(patient_id, OffsetDateTime::now_utc())
            .await
    }

    pub(crate) async fn patient_stats_at(
        &self,
        patient_id: Uuid,
        now: OffsetDateTime,
    ) -> AppResult<PatientStats> {
        let (plans_count, active_plans_count) = self.plans.counts_for_patient(patient_id).await?;
        let current_plan = match self.plans.current_for_patient(patient_id, now).await? {
            Some(plan) => {
                let doctor = self.summary(&mut HashMap::new(), plan.doctor_id).await?;
                Some(CurrentPlan { plan, doctor })
            }
            None => None,
        };
        Ok(PatientStats {
            plans_count,
            active_plans_count,
            current_plan,
        })
    }
}
