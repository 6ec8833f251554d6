//! Seed data and default rates

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::{InvestmentPlan, User, UserRole};

/// Length of one simulated "day" between payouts
pub const SIMULATED_DAY: Duration = Duration::from_secs(60);

/// How often the runner checks for due payouts
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Share of a referred user's stake credited to the referrer (5%)
pub const DEFAULT_REFERRAL_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Starting balance granted on registration
pub const DEFAULT_SIGNUP_BONUS: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Highest per-cycle return a plan may promise, in percent
pub const MAX_ROI_PERCENT: Decimal = Decimal::ONE_HUNDRED;

pub const DEFAULT_STORE_PATH: &str = "data/ledger.json";

pub fn initial_plans() -> Vec<InvestmentPlan> {
    vec![
        InvestmentPlan {
            id: "plan_1".to_string(),
            name: "Standard Alpha".to_string(),
            min_amount: Decimal::from(10),
            max_amount: Decimal::from(100),
            daily_roi_percent: Decimal::new(15, 1),
            duration_cycles: 30,
        },
        InvestmentPlan {
            id: "plan_2".to_string(),
            name: "Ethereum Plus".to_string(),
            min_amount: Decimal::from(101),
            max_amount: Decimal::from(500),
            daily_roi_percent: Decimal::new(25, 1),
            duration_cycles: 45,
        },
        InvestmentPlan {
            id: "plan_3".to_string(),
            name: "Bitcoin Pro".to_string(),
            min_amount: Decimal::from(501),
            max_amount: Decimal::from(1000),
            daily_roi_percent: Decimal::new(40, 1),
            duration_cycles: 60,
        },
    ]
}

/// Administrator and demo account present on a fresh ledger
pub fn seed_users(now: DateTime<Utc>) -> Vec<User> {
    vec![
        User {
            id: "admin_1".to_string(),
            email: "admin@hyip.com".to_string(),
            name: "Platform Administrator".to_string(),
            role: UserRole::Admin,
            balance: Decimal::ZERO,
            total_invested: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            referral_code: "ADMIN_PLATINUM".to_string(),
            referred_by: None,
            created_at: now - chrono::Duration::days(30),
            is_blocked: false,
        },
        User {
            id: "user_1".to_string(),
            email: "demo@user.com".to_string(),
            name: "John Doe".to_string(),
            role: UserRole::User,
            balance: Decimal::from(5),
            total_invested: Decimal::from(1200),
            total_withdrawn: Decimal::from(450),
            referral_code: "JOHNDOE77".to_string(),
            referred_by: None,
            created_at: now - chrono::Duration::days(15),
            is_blocked: false,
        },
    ]
}
