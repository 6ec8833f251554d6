//! Plan catalog: read-only lookups for accrual, validated edits for admins

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    constants::MAX_ROI_PERCENT,
    typed_errors::{AppError, ErrorContext, Result},
    types::{new_id, InvestmentPlan, NewPlan},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanCatalog {
    plans: Vec<InvestmentPlan>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<InvestmentPlan>) -> Self {
        Self { plans }
    }

    pub fn get(&self, plan_id: &str) -> Option<&InvestmentPlan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    pub fn all(&self) -> &[InvestmentPlan] {
        &self.plans
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Add a plan under a freshly generated id
    pub fn create(&mut self, plan: NewPlan) -> Result<InvestmentPlan> {
        let context = ErrorContext::new("plan_catalog", "create");
        validate_terms(
            plan.min_amount,
            plan.max_amount,
            plan.daily_roi_percent,
            plan.duration_cycles,
            context,
        )?;

        let plan = InvestmentPlan {
            id: new_id("plan"),
            name: plan.name,
            min_amount: plan.min_amount,
            max_amount: plan.max_amount,
            daily_roi_percent: plan.daily_roi_percent,
            duration_cycles: plan.duration_cycles,
        };
        self.plans.push(plan.clone());
        Ok(plan)
    }

    /// Replace the plan with the same id
    pub fn update(&mut self, plan: InvestmentPlan) -> Result<()> {
        let context = ErrorContext::new("plan_catalog", "update")
            .with_metadata("plan_id", serde_json::json!(plan.id));
        validate_terms(
            plan.min_amount,
            plan.max_amount,
            plan.daily_roi_percent,
            plan.duration_cycles,
            context.clone(),
        )?;

        match self.plans.iter_mut().find(|p| p.id == plan.id) {
            Some(existing) => {
                *existing = plan;
                Ok(())
            }
            None => Err(AppError::not_found("Plan", &plan.id, context)),
        }
    }

    pub fn remove(&mut self, plan_id: &str) -> Result<InvestmentPlan> {
        match self.plans.iter().position(|p| p.id == plan_id) {
            Some(index) => Ok(self.plans.remove(index)),
            None => Err(AppError::not_found(
                "Plan",
                plan_id,
                ErrorContext::new("plan_catalog", "remove"),
            )),
        }
    }
}

fn validate_terms(
    min_amount: Decimal,
    max_amount: Decimal,
    roi: Decimal,
    duration_cycles: u32,
    context: ErrorContext,
) -> Result<()> {
    if min_amount <= Decimal::ZERO {
        return Err(AppError::invalid_parameters("min_amount must be positive", context));
    }
    if min_amount > max_amount {
        return Err(AppError::invalid_parameters(
            format!("min_amount {} exceeds max_amount {}", min_amount, max_amount),
            context,
        ));
    }
    if roi <= Decimal::ZERO {
        return Err(AppError::invalid_parameters("roi must be positive", context));
    }
    if roi > MAX_ROI_PERCENT {
        return Err(AppError::invalid_parameters(
            format!("roi {} exceeds {}%", roi, MAX_ROI_PERCENT),
            context,
        ));
    }
    if duration_cycles == 0 {
        return Err(AppError::invalid_parameters("duration must be at least one cycle", context));
    }
    Ok(())
}
