//! Ledger state: users, plans, investments and the transaction log
//!
//! `LedgerState` is a plain value. The service clones it into a draft,
//! mutates the draft and swaps it in once persisted, so every method here
//! is synchronous and free of locking.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::PlanCatalog,
    constants::{initial_plans, seed_users},
    typed_errors::{AppError, ErrorContext, Result},
    types::{
        Investment, PlatformStats, Transaction, TransactionKind, TransactionStatus, User, UserId,
    },
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Bumped on every committed mutation
    pub version: u64,
    pub users: BTreeMap<UserId, User>,
    pub plans: PlanCatalog,
    pub investments: Vec<Investment>,
    pub transactions: Vec<Transaction>,
}

impl LedgerState {
    /// Fresh ledger with the default plans and demo accounts
    pub fn seeded(now: DateTime<Utc>) -> Self {
        Self {
            version: 0,
            users: seed_users(now)
                .into_iter()
                .map(|u| (u.id.clone(), u))
                .collect(),
            plans: PlanCatalog::new(initial_plans()),
            investments: Vec::new(),
            transactions: Vec::new(),
        }
    }

    pub fn user(&self, user_id: &str) -> Option<&User> {
        self.users.get(user_id)
    }

    pub fn require_user(&self, user_id: &str, context: ErrorContext) -> Result<&User> {
        self.users
            .get(user_id)
            .ok_or_else(|| AppError::not_found("User", user_id, context))
    }

    pub fn user_mut(&mut self, user_id: &str, context: ErrorContext) -> Result<&mut User> {
        self.users
            .get_mut(user_id)
            .ok_or_else(|| AppError::not_found("User", user_id, context))
    }

    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users.values().find(|u| u.email.eq_ignore_ascii_case(email))
    }

    pub fn user_by_referral_code(&self, code: &str) -> Option<&User> {
        self.users.values().find(|u| u.referral_code == code)
    }

    pub fn insert_user(&mut self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// Add `amount` to a balance, returning the new balance
    pub fn credit(&mut self, user_id: &str, amount: Decimal) -> Result<Decimal> {
        let context = ErrorContext::new("ledger", "credit").with_user(user_id);
        let user = self.user_mut(user_id, context.clone())?;
        user.balance = checked_sum(user.balance, amount, "balance", context)?;
        Ok(user.balance)
    }

    /// Remove `amount` from a balance; never lets it go negative
    pub fn debit(&mut self, user_id: &str, amount: Decimal) -> Result<Decimal> {
        let context = ErrorContext::new("ledger", "debit").with_user(user_id);
        let user = self.user_mut(user_id, context.clone())?;
        if user.balance < amount {
            return Err(AppError::insufficient_balance(amount, user.balance, context));
        }
        user.balance -= amount;
        Ok(user.balance)
    }

    pub fn append(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    pub fn append_batch(&mut self, transactions: impl IntoIterator<Item = Transaction>) {
        self.transactions.extend(transactions);
    }

    pub fn transaction(&self, tx_id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == tx_id)
    }

    pub fn transaction_mut(&mut self, tx_id: &str) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| t.id == tx_id)
    }

    pub fn investment(&self, investment_id: &str) -> Option<&Investment> {
        self.investments.iter().find(|i| i.id == investment_id)
    }

    /// A user's investments, newest first
    pub fn investments_for(&self, user_id: &str) -> Vec<Investment> {
        self.investments
            .iter()
            .rev()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect()
    }

    /// A user's ledger entries, newest first
    pub fn transactions_for(&self, user_id: &str) -> Vec<Transaction> {
        self.transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn pending_withdrawals(&self) -> Vec<Transaction> {
        self.transactions
            .iter()
            .filter(|t| t.is_pending_withdrawal())
            .cloned()
            .collect()
    }

    /// Sum of profit entries recorded against an investment
    pub fn profit_recorded_for(&self, investment_id: &str) -> Decimal {
        self.transactions
            .iter()
            .filter(|t| {
                t.kind == TransactionKind::Profit
                    && t.investment_id.as_deref() == Some(investment_id)
            })
            .map(|t| t.amount)
            .sum()
    }

    /// Platform-wide aggregates; totals saturate rather than overflow
    pub fn stats(&self) -> PlatformStats {
        let completed_total = |kind: TransactionKind| -> Decimal {
            saturating_total(
                self.transactions
                    .iter()
                    .filter(|t| t.kind == kind && t.status == TransactionStatus::Completed)
                    .map(|t| t.amount),
            )
        };

        PlatformStats {
            total_users: self.users.len(),
            total_deposits: completed_total(TransactionKind::Deposit),
            total_withdrawals: completed_total(TransactionKind::Withdrawal),
            total_invested: saturating_total(self.investments.iter().map(|i| i.amount)),
            pending_withdrawals: self
                .transactions
                .iter()
                .filter(|t| t.is_pending_withdrawal())
                .count(),
            platform_balance: saturating_total(self.users.values().map(|u| u.balance)),
        }
    }
}

/// Add `amount` to a running money total, rejecting results Decimal cannot hold
pub fn checked_sum(
    current: Decimal,
    amount: Decimal,
    field: &str,
    context: ErrorContext,
) -> Result<Decimal> {
    current.checked_add(amount).ok_or_else(|| {
        AppError::invalid_parameters(
            format!("{} would overflow adding {} to {}", field, amount, current),
            context,
        )
        .with_metadata("field", serde_json::json!(field))
    })
}

fn saturating_total(amounts: impl Iterator<Item = Decimal>) -> Decimal {
    amounts.fold(Decimal::ZERO, |total, amount| total.saturating_add(amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed_errors::ErrorKind;

    #[test]
    fn test_seeded_ledger() {
        let ledger = LedgerState::seeded(Utc::now());
        assert_eq!(ledger.users.len(), 2);
        assert_eq!(ledger.plans.len(), 3);
        assert_eq!(ledger.user_by_email("DEMO@user.com").unwrap().id, "user_1");
        assert_eq!(ledger.user_by_referral_code("JOHNDOE77").unwrap().id, "user_1");
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let mut ledger = LedgerState::seeded(Utc::now());
        let err = ledger.debit("user_1", Decimal::from(6)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InsufficientBalance);
        assert_eq!(ledger.user("user_1").unwrap().balance, Decimal::from(5));

        assert_eq!(ledger.debit("user_1", Decimal::from(5)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_credit_overflow_leaves_balance() {
        let mut ledger = LedgerState::seeded(Utc::now());
        let err = ledger.credit("user_1", Decimal::MAX).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParameters);
        assert_eq!(ledger.user("user_1").unwrap().balance, Decimal::from(5));
    }

    #[test]
    fn test_stats_saturate_on_huge_balances() {
        let mut ledger = LedgerState::seeded(Utc::now());
        ledger.users.get_mut("admin_1").unwrap().balance = Decimal::MAX;
        assert_eq!(ledger.stats().platform_balance, Decimal::MAX);
    }

    #[test]
    fn test_credit_unknown_user() {
        let mut ledger = LedgerState::seeded(Utc::now());
        let err = ledger.credit("ghost", Decimal::ONE).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_stats_count_completed_and_pending() {
        let now = Utc::now();
        let mut ledger = LedgerState::seeded(now);
        ledger.append(Transaction::completed("user_1", Decimal::from(40), TransactionKind::Deposit, now));
        ledger.append(Transaction::completed("user_1", Decimal::from(15), TransactionKind::Withdrawal, now));
        let mut pending =
            Transaction::completed("user_1", Decimal::from(3), TransactionKind::Withdrawal, now);
        pending.status = TransactionStatus::Pending;
        ledger.append(pending);

        let stats = ledger.stats();
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.total_deposits, Decimal::from(40));
        assert_eq!(stats.total_withdrawals, Decimal::from(15));
        assert_eq!(stats.pending_withdrawals, 1);
        assert_eq!(stats.platform_balance, Decimal::from(5));
        assert_eq!(ledger.pending_withdrawals().len(), 1);
    }

    #[test]
    fn test_transactions_for_newest_first() {
        let now = Utc::now();
        let mut ledger = LedgerState::seeded(now);
        let first = Transaction::completed("user_1", Decimal::ONE, TransactionKind::Deposit, now);
        let second = Transaction::completed("user_1", Decimal::TWO, TransactionKind::Deposit, now);
        let second_id = second.id.clone();
        ledger.append_batch(vec![first, second]);

        let history = ledger.transactions_for("user_1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second_id);
        assert!(ledger.transactions_for("admin_1").is_empty());
    }
}
