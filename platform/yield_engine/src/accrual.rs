//! Payout accrual pass
//!
//! Walks active investments, pays every cycle that has come due since the
//! last pass (catching up missed cycles) and collects the resulting ledger
//! entries and per-user balance deltas into one batch.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error};

use crate::{
    ledger::LedgerState,
    types::{InvestmentStatus, Transaction, TransactionKind, TickReport, UserId},
};

/// Everything one pass produced, not yet applied to balances or the log
#[derive(Debug, Clone, Default)]
pub struct AccrualBatch {
    pub transactions: Vec<Transaction>,
    pub credits: BTreeMap<UserId, Decimal>,
    pub report: TickReport,
}

impl AccrualBatch {
    pub fn credited_to(&self, user_id: &str) -> Option<Decimal> {
        self.credits.get(user_id).copied()
    }
}

impl LedgerState {
    /// Advance all due investments to `now`
    ///
    /// Investment records are updated in place; balances and the
    /// transaction log are left to [`LedgerState::apply_batch`].
    pub fn accrue(&mut self, now: DateTime<Utc>, cycle: Duration) -> AccrualBatch {
        let mut batch = AccrualBatch::default();

        if cycle <= Duration::zero() {
            error!(cycle_ms = cycle.num_milliseconds(), "Refusing to accrue with a non-positive cycle");
            return batch;
        }

        let LedgerState {
            users,
            plans,
            investments,
            ..
        } = self;

        for investment in investments.iter_mut().filter(|i| i.is_active()) {
            let Some(plan) = plans.get(&investment.plan_id) else {
                error!(
                    investment_id = %investment.id,
                    plan_id = %investment.plan_id,
                    "Plan missing for active investment, skipping"
                );
                batch.report.skipped += 1;
                continue;
            };

            let Some(owner_balance) = users.get(&investment.user_id).map(|u| u.balance) else {
                error!(
                    investment_id = %investment.id,
                    user_id = %investment.user_id,
                    "Owner missing for active investment, skipping"
                );
                batch.report.skipped += 1;
                continue;
            };

            while investment.next_payout_time <= now
                && investment.payouts_completed < plan.duration_cycles
            {
                let owed = batch
                    .credits
                    .get(&investment.user_id)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                // Every total this payout touches must stay representable
                let step = plan.profit_per_cycle(investment.amount).and_then(|profit| {
                    let earned = investment.earned_so_far.checked_add(profit)?;
                    let owed = owed.checked_add(profit)?;
                    owner_balance.checked_add(owed)?;
                    let credited = batch.report.total_credited.checked_add(profit)?;
                    Some((profit, earned, owed, credited))
                });
                let Some((profit, earned, owed, credited)) = step else {
                    error!(
                        investment_id = %investment.id,
                        plan_id = %plan.id,
                        amount = %investment.amount,
                        roi = %plan.daily_roi_percent,
                        "Payout overflows, skipping investment"
                    );
                    batch.report.skipped += 1;
                    break;
                };

                investment.payouts_completed += 1;
                investment.earned_so_far = earned;
                investment.next_payout_time = investment.next_payout_time + cycle;

                batch.transactions.push(
                    Transaction::completed(&investment.user_id, profit, TransactionKind::Profit, now)
                        .with_note(format!(
                            "Yield payout from {} ({}/{})",
                            plan.name, investment.payouts_completed, plan.duration_cycles
                        ))
                        .for_investment(&investment.id),
                );
                batch.credits.insert(investment.user_id.clone(), owed);

                batch.report.payouts += 1;
                batch.report.total_credited = credited;
            }

            // Also closes investments whose plan was shortened below the cycles already paid
            if investment.payouts_completed >= plan.duration_cycles {
                investment.status = InvestmentStatus::Completed;
                batch.report.completed += 1;
                debug!(
                    investment_id = %investment.id,
                    user_id = %investment.user_id,
                    earned = %investment.earned_so_far,
                    "Investment completed"
                );
            }
        }

        batch
    }

    /// Credit accumulated deltas and append the batch's entries
    pub fn apply_batch(&mut self, batch: &AccrualBatch) {
        for (user_id, delta) in &batch.credits {
            // Owners were checked during accrual, so a miss here means the batch is stale
            if let Err(e) = self.credit(user_id, *delta) {
                error!(user_id = %user_id, error = %e, "Dropping payout credit");
            }
        }
        self.append_batch(batch.transactions.iter().cloned());
    }
}
