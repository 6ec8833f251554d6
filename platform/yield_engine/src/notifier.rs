//! Payout notifications and ledger change events

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{InvestmentId, TransactionId, UserId};

/// Summary of what the session user earned in one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutNotice {
    pub user_id: UserId,
    pub amount: Decimal,
    pub payouts: usize,
    pub at: DateTime<Utc>,
}

/// Receives payout notices for the active session user
pub trait PayoutNotifier: Send + Sync {
    fn notify_payout(&self, notice: &PayoutNotice);
}

/// Default notifier: writes the notice to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl PayoutNotifier for TracingNotifier {
    fn notify_payout(&self, notice: &PayoutNotice) {
        info!(
            user_id = %notice.user_id,
            amount = %notice.amount,
            payouts = notice.payouts,
            "Yield credited"
        );
    }
}

/// Committed ledger change, published to subscribers after persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    UserRegistered {
        user_id: UserId,
        referred_by: Option<UserId>,
    },
    Deposited {
        user_id: UserId,
        amount: Decimal,
    },
    Staked {
        user_id: UserId,
        investment_id: InvestmentId,
        amount: Decimal,
    },
    ReferralPaid {
        referrer_id: UserId,
        referee_id: UserId,
        amount: Decimal,
    },
    ProfitAccrued {
        user_id: UserId,
        amount: Decimal,
    },
    WithdrawalRequested {
        user_id: UserId,
        transaction_id: TransactionId,
        amount: Decimal,
    },
    WithdrawalApproved {
        transaction_id: TransactionId,
    },
    WithdrawalRejected {
        transaction_id: TransactionId,
        refunded: Decimal,
    },
}
