//! Domain records shared by the ledger, the accrual pass and the service

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = String;
pub type PlanId = String;
pub type InvestmentId = String;
pub type TransactionId = String;

/// Generate a prefixed random identifier (`inv_…`, `tx_…`, `usr_…`)
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    User,
    Admin,
}

/// Platform account holding a spendable balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub balance: Decimal,
    pub total_invested: Decimal,
    pub total_withdrawn: Decimal,
    pub referral_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_blocked: bool,
}

/// Yield plan definition looked up by `Investment::plan_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentPlan {
    pub id: PlanId,
    pub name: String,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    /// Percentage of the staked amount paid once per cycle
    pub daily_roi_percent: Decimal,
    pub duration_cycles: u32,
}

impl InvestmentPlan {
    /// Profit produced by a single cycle for `amount`, `None` on overflow
    pub fn profit_per_cycle(&self, amount: Decimal) -> Option<Decimal> {
        amount
            .checked_mul(self.daily_roi_percent)?
            .checked_div(Decimal::ONE_HUNDRED)
    }

    pub fn accepts(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && amount <= self.max_amount
    }
}

/// Plan fields supplied by an administrator; the id is assigned by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlan {
    pub name: String,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub daily_roi_percent: Decimal,
    pub duration_cycles: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvestmentStatus {
    Active,
    Completed,
}

/// A stake in a plan, advanced only by the accrual pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub amount: Decimal,
    pub earned_so_far: Decimal,
    pub start_date: DateTime<Utc>,
    pub next_payout_time: DateTime<Utc>,
    pub payouts_completed: u32,
    pub status: InvestmentStatus,
}

impl Investment {
    pub fn is_active(&self) -> bool {
        self.status == InvestmentStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Profit,
    Referral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Rejected,
}

/// Append-only ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investment_id: Option<InvestmentId>,
}

impl Transaction {
    /// Completed entry of the given kind
    pub fn completed(
        user_id: &str,
        amount: Decimal,
        kind: TransactionKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id("tx"),
            user_id: user_id.to_string(),
            amount,
            kind,
            status: TransactionStatus::Completed,
            timestamp,
            method: None,
            note: None,
            investment_id: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn for_investment(mut self, investment_id: &str) -> Self {
        self.investment_id = Some(investment_id.to_string());
        self
    }

    pub fn is_pending_withdrawal(&self) -> bool {
        self.kind == TransactionKind::Withdrawal && self.status == TransactionStatus::Pending
    }
}

/// Aggregate figures shown on the admin overview
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformStats {
    pub total_users: usize,
    pub total_deposits: Decimal,
    pub total_withdrawals: Decimal,
    pub total_invested: Decimal,
    pub pending_withdrawals: usize,
    pub platform_balance: Decimal,
}

/// Outcome of one accrual tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Number of payout cycles paid in this tick
    pub payouts: usize,
    pub total_credited: Decimal,
    /// Investments that reached their final cycle in this tick
    pub completed: usize,
    /// Investments skipped because their plan or owner is missing
    pub skipped: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.payouts == 0 && self.completed == 0
    }
}
