//! Investment service
//!
//! Owns the ledger and serializes every mutation behind one async mutex.
//! Each operation works on a draft copy of the state, persists the draft
//! through the injected repository and only then makes it current, so a
//! failed save leaves nothing half-applied.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    config::EngineConfig,
    ledger::{checked_sum, LedgerState},
    notifier::{LedgerEvent, PayoutNotice, PayoutNotifier},
    persistence::StateRepository,
    typed_errors::{AppError, ErrorContext, ErrorKind, Result},
    types::{
        new_id, Investment, InvestmentPlan, InvestmentStatus, NewPlan, PlatformStats, TickReport,
        Transaction, TransactionKind, TransactionStatus, User, UserId, UserRole,
    },
};

const SERVICE: &str = "investment_service";

/// Accrual parameters resolved from configuration
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub cycle_period: chrono::Duration,
    pub referral_rate: Decimal,
    pub signup_bonus: Decimal,
}

impl From<&EngineConfig> for ServiceSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            cycle_period: config.cycle_period(),
            referral_rate: config.accrual.referral_rate,
            signup_bonus: config.accrual.signup_bonus,
        }
    }
}

pub struct InvestmentService {
    state: Mutex<LedgerState>,
    session: RwLock<Option<UserId>>,
    repository: Arc<dyn StateRepository>,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<dyn PayoutNotifier>>,
    events: broadcast::Sender<LedgerEvent>,
    settings: ServiceSettings,
}

impl InvestmentService {
    /// Create a service over an existing state without touching storage
    pub fn new(
        state: LedgerState,
        settings: ServiceSettings,
        repository: Arc<dyn StateRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(state),
            session: RwLock::new(None),
            repository,
            clock,
            notifier: None,
            events,
            settings,
        }
    }

    /// Resume from the repository, seeding and saving a fresh ledger when it is empty
    pub async fn open(
        settings: ServiceSettings,
        repository: Arc<dyn StateRepository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let state = match repository.load().await? {
            Some(state) => {
                info!(
                    backend = repository.name(),
                    version = state.version,
                    users = state.users.len(),
                    investments = state.investments.len(),
                    "Resuming ledger"
                );
                state
            }
            None => {
                let state = LedgerState::seeded(clock.now());
                repository.save(&state).await?;
                info!(backend = repository.name(), "Seeded new ledger");
                state
            }
        };

        Ok(Self::new(state, settings, repository, clock))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn PayoutNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> ServiceSettings {
        self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Apply `mutate` to a draft, persist it, then make it current
    async fn commit<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerState) -> Result<(T, Vec<LedgerEvent>)>,
    {
        let mut state = self.state.lock().await;
        let mut draft = state.clone();

        let (value, events) = mutate(&mut draft)?;
        draft.version += 1;

        self.repository.save(&draft).await?;
        *state = draft;
        drop(state);

        for event in events {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
        Ok(value)
    }

    // ── Session ────────────────────────────────────────────────

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        referral_code: &str,
        referrer_code: Option<&str>,
    ) -> Result<User> {
        let context = ErrorContext::new(SERVICE, "register");
        let code = referral_code.trim().to_uppercase();
        let email = email.trim().to_string();

        if name.trim().is_empty() || email.is_empty() || code.is_empty() {
            return Err(AppError::invalid_parameters(
                "name, email and referral code are required",
                context,
            ));
        }

        let now = self.clock.now();
        let bonus = self.settings.signup_bonus;

        let user = self
            .commit(|state| {
                if state.user_by_email(&email).is_some() || state.user_by_referral_code(&code).is_some() {
                    return Err(AppError::new(
                        ErrorKind::Conflict,
                        "email or referral code already registered",
                        context.with_metadata("email", serde_json::json!(email)),
                    ));
                }

                let referred_by = referrer_code
                    .map(|c| c.trim().to_uppercase())
                    .filter(|c| !c.is_empty())
                    .and_then(|c| state.user_by_referral_code(&c).map(|u| u.id.clone()));

                let user = User {
                    id: new_id("usr"),
                    email: email.clone(),
                    name: name.trim().to_string(),
                    role: UserRole::User,
                    balance: bonus,
                    total_invested: Decimal::ZERO,
                    total_withdrawn: Decimal::ZERO,
                    referral_code: code.clone(),
                    referred_by: referred_by.clone(),
                    created_at: now,
                    is_blocked: false,
                };
                state.insert_user(user.clone());

                let event = LedgerEvent::UserRegistered {
                    user_id: user.id.clone(),
                    referred_by,
                };
                Ok((user, vec![event]))
            })
            .await?;

        *self.session.write().await = Some(user.id.clone());
        info!(user_id = %user.id, referred_by = ?user.referred_by, "User registered");
        Ok(user)
    }

    /// Select the session user by email; there are no credentials to check
    pub async fn login(&self, email: &str) -> Result<User> {
        let context = ErrorContext::new(SERVICE, "login");
        let user = {
            let state = self.state.lock().await;
            state
                .user_by_email(email.trim())
                .cloned()
                .ok_or_else(|| AppError::not_found("User", email, context.clone()))?
        };

        if user.is_blocked {
            return Err(AppError::new(
                ErrorKind::Forbidden,
                format!("user {} is blocked", user.id),
                context.with_user(&user.id),
            ));
        }

        *self.session.write().await = Some(user.id.clone());
        info!(user_id = %user.id, "Session started");
        Ok(user)
    }

    pub async fn logout(&self) {
        if let Some(user_id) = self.session.write().await.take() {
            info!(user_id = %user_id, "Session ended");
        }
    }

    pub async fn active_user(&self) -> Option<UserId> {
        self.session.read().await.clone()
    }

    // ── Balance operations ─────────────────────────────────────

    /// Credit funds directly to a balance
    pub async fn deposit(&self, user_id: &str, amount: Decimal, method: &str) -> Result<Transaction> {
        let context = ErrorContext::new(SERVICE, "deposit").with_user(user_id);
        ensure_positive(amount, context.clone())?;
        let now = self.clock.now();

        let tx = self
            .commit(|state| {
                state.require_user(user_id, context)?;
                state.credit(user_id, amount)?;

                let tx = Transaction::completed(user_id, amount, TransactionKind::Deposit, now)
                    .with_method(method);
                state.append(tx.clone());

                let event = LedgerEvent::Deposited {
                    user_id: user_id.to_string(),
                    amount,
                };
                Ok((tx, vec![event]))
            })
            .await?;

        info!(user_id = %user_id, amount = %amount, method = %method, "Deposit credited");
        Ok(tx)
    }

    /// Move `amount` from a balance into a new investment in `plan_id`
    pub async fn stake(&self, user_id: &str, plan_id: &str, amount: Decimal) -> Result<Investment> {
        let context = ErrorContext::new(SERVICE, "stake")
            .with_user(user_id)
            .with_metadata("plan_id", serde_json::json!(plan_id));
        let now = self.clock.now();
        let settings = self.settings;

        let investment = self
            .commit(|state| {
                let plan = state.plans.get(plan_id).cloned().ok_or_else(|| {
                    AppError::invalid_parameters(format!("unknown plan {}", plan_id), context.clone())
                })?;
                if !plan.accepts(amount) {
                    return Err(AppError::invalid_parameters(
                        format!(
                            "amount {} outside plan bounds [{}, {}]",
                            amount, plan.min_amount, plan.max_amount
                        ),
                        context,
                    ));
                }

                let user = state.require_user(user_id, context.clone())?;
                ensure_not_blocked(user, context.clone())?;
                let referrer = user.referred_by.clone();

                state.debit(user_id, amount)?;
                let staker = state.user_mut(user_id, context.clone())?;
                staker.total_invested =
                    checked_sum(staker.total_invested, amount, "total_invested", context.clone())?;

                let investment = Investment {
                    id: new_id("inv"),
                    user_id: user_id.to_string(),
                    plan_id: plan.id.clone(),
                    amount,
                    earned_so_far: Decimal::ZERO,
                    start_date: now,
                    next_payout_time: now + settings.cycle_period,
                    payouts_completed: 0,
                    status: InvestmentStatus::Active,
                };
                state.investments.push(investment.clone());
                state.append(
                    Transaction::completed(user_id, amount, TransactionKind::Deposit, now)
                        .with_note(format!("Allocated to {}", plan.name))
                        .for_investment(&investment.id),
                );

                let mut events = vec![LedgerEvent::Staked {
                    user_id: user_id.to_string(),
                    investment_id: investment.id.clone(),
                    amount,
                }];

                if let Some(referrer_id) = referrer {
                    let commission = amount.checked_mul(settings.referral_rate).ok_or_else(|| {
                        AppError::invalid_parameters(
                            format!("referral commission on {} overflows", amount),
                            context.clone(),
                        )
                    })?;
                    if commission > Decimal::ZERO {
                        if state.user(&referrer_id).is_some() {
                            state.credit(&referrer_id, commission)?;
                            state.append(
                                Transaction::completed(
                                    &referrer_id,
                                    commission,
                                    TransactionKind::Referral,
                                    now,
                                )
                                .with_note("Referral commission")
                                .for_investment(&investment.id),
                            );
                            events.push(LedgerEvent::ReferralPaid {
                                referrer_id,
                                referee_id: user_id.to_string(),
                                amount: commission,
                            });
                        } else {
                            warn!(
                                user_id = %user_id,
                                referrer_id = %referrer_id,
                                "Referrer no longer exists, commission not paid"
                            );
                        }
                    }
                }

                Ok((investment, events))
            })
            .await?;

        info!(
            user_id = %user_id,
            plan_id = %plan_id,
            investment_id = %investment.id,
            amount = %amount,
            "Investment created"
        );
        Ok(investment)
    }

    /// Debit immediately and queue a withdrawal for admin review
    pub async fn request_withdrawal(
        &self,
        user_id: &str,
        amount: Decimal,
        destination: &str,
    ) -> Result<Transaction> {
        let context = ErrorContext::new(SERVICE, "request_withdrawal").with_user(user_id);
        ensure_positive(amount, context.clone())?;
        let now = self.clock.now();

        let tx = self
            .commit(|state| {
                let user = state.require_user(user_id, context.clone())?;
                ensure_not_blocked(user, context)?;
                state.debit(user_id, amount)?;

                let mut tx = Transaction::completed(user_id, amount, TransactionKind::Withdrawal, now)
                    .with_method(destination);
                tx.status = TransactionStatus::Pending;
                state.append(tx.clone());

                let event = LedgerEvent::WithdrawalRequested {
                    user_id: user_id.to_string(),
                    transaction_id: tx.id.clone(),
                    amount,
                };
                Ok((tx, vec![event]))
            })
            .await?;

        info!(
            user_id = %user_id,
            transaction_id = %tx.id,
            amount = %amount,
            "Withdrawal requested"
        );
        Ok(tx)
    }

    pub async fn approve_withdrawal(&self, tx_id: &str) -> Result<Transaction> {
        let context = ErrorContext::new(SERVICE, "approve_withdrawal")
            .with_metadata("transaction_id", serde_json::json!(tx_id));

        let tx = self
            .commit(|state| {
                let tx = pending_withdrawal(state, tx_id, context.clone())?;
                let owner = state.user_mut(&tx.user_id, context.clone())?;
                owner.total_withdrawn =
                    checked_sum(owner.total_withdrawn, tx.amount, "total_withdrawn", context.clone())?;

                let entry = state
                    .transaction_mut(tx_id)
                    .ok_or_else(|| AppError::not_found("Transaction", tx_id, context))?;
                entry.status = TransactionStatus::Completed;
                let approved = entry.clone();

                let event = LedgerEvent::WithdrawalApproved {
                    transaction_id: tx_id.to_string(),
                };
                Ok((approved, vec![event]))
            })
            .await?;

        info!(transaction_id = %tx_id, user_id = %tx.user_id, amount = %tx.amount, "Withdrawal approved");
        Ok(tx)
    }

    /// Reject a pending withdrawal and refund the exact debited amount
    pub async fn reject_withdrawal(&self, tx_id: &str) -> Result<Transaction> {
        let context = ErrorContext::new(SERVICE, "reject_withdrawal")
            .with_metadata("transaction_id", serde_json::json!(tx_id));

        let tx = self
            .commit(|state| {
                let tx = pending_withdrawal(state, tx_id, context.clone())?;
                state.credit(&tx.user_id, tx.amount)?;

                let entry = state
                    .transaction_mut(tx_id)
                    .ok_or_else(|| AppError::not_found("Transaction", tx_id, context))?;
                entry.status = TransactionStatus::Rejected;
                let rejected = entry.clone();

                let event = LedgerEvent::WithdrawalRejected {
                    transaction_id: tx_id.to_string(),
                    refunded: rejected.amount,
                };
                Ok((rejected, vec![event]))
            })
            .await?;

        info!(transaction_id = %tx_id, user_id = %tx.user_id, refunded = %tx.amount, "Withdrawal rejected");
        Ok(tx)
    }

    // ── Accrual ────────────────────────────────────────────────

    /// Pay every cycle that has come due as of the service clock
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        self.run_accrual(now, false).await
    }

    /// Pay every cycle that has come due as of `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        self.run_accrual(now, false).await
    }

    /// Make one payout due on every active investment and accrue immediately
    pub async fn force_payouts_due(&self) -> Result<TickReport> {
        let now = self.clock.now();
        warn!("Forcing payouts due on all active investments");
        self.run_accrual(now, true).await
    }

    async fn run_accrual(&self, now: DateTime<Utc>, force_due: bool) -> Result<TickReport> {
        let mut state = self.state.lock().await;
        let mut draft = state.clone();

        if force_due {
            for investment in draft.investments.iter_mut().filter(|i| i.is_active()) {
                if investment.next_payout_time > now {
                    investment.next_payout_time = now;
                }
            }
        }

        let batch = draft.accrue(now, self.settings.cycle_period);
        if batch.report.is_empty() && !force_due {
            return Ok(batch.report);
        }

        draft.apply_batch(&batch);
        draft.version += 1;
        self.repository.save(&draft).await?;
        *state = draft;
        drop(state);

        for (user_id, amount) in &batch.credits {
            let _ = self.events.send(LedgerEvent::ProfitAccrued {
                user_id: user_id.clone(),
                amount: *amount,
            });
        }

        if let (Some(notifier), Some(active)) = (&self.notifier, self.active_user().await) {
            if let Some(amount) = batch.credited_to(&active) {
                let payouts = batch
                    .transactions
                    .iter()
                    .filter(|t| t.user_id == active)
                    .count();
                notifier.notify_payout(&PayoutNotice {
                    user_id: active,
                    amount,
                    payouts,
                    at: now,
                });
            }
        }

        if batch.report.payouts > 0 {
            info!(
                payouts = batch.report.payouts,
                credited = %batch.report.total_credited,
                completed = batch.report.completed,
                skipped = batch.report.skipped,
                "Accrual tick applied"
            );
        } else {
            debug!(completed = batch.report.completed, "Accrual tick closed investments");
        }
        Ok(batch.report)
    }

    // ── Administration ─────────────────────────────────────────

    pub async fn create_plan(&self, plan: NewPlan) -> Result<InvestmentPlan> {
        let plan = self
            .commit(|state| Ok((state.plans.create(plan)?, Vec::new())))
            .await?;
        info!(plan_id = %plan.id, name = %plan.name, "Plan created");
        Ok(plan)
    }

    pub async fn update_plan(&self, plan: InvestmentPlan) -> Result<()> {
        let plan_id = plan.id.clone();
        self.commit(|state| Ok((state.plans.update(plan)?, Vec::new())))
            .await?;
        info!(plan_id = %plan_id, "Plan updated");
        Ok(())
    }

    /// Remove a plan; active investments still pointing at it stop accruing
    pub async fn delete_plan(&self, plan_id: &str) -> Result<InvestmentPlan> {
        let (plan, stranded) = self
            .commit(|state| {
                let plan = state.plans.remove(plan_id)?;
                let stranded = state
                    .investments
                    .iter()
                    .filter(|i| i.is_active() && i.plan_id == plan_id)
                    .count();
                Ok(((plan, stranded), Vec::new()))
            })
            .await?;

        if stranded > 0 {
            warn!(plan_id = %plan_id, stranded, "Deleted plan still referenced by active investments");
        }
        info!(plan_id = %plan_id, "Plan deleted");
        Ok(plan)
    }

    pub async fn set_user_blocked(&self, user_id: &str, blocked: bool) -> Result<User> {
        let context = ErrorContext::new(SERVICE, "set_user_blocked").with_user(user_id);
        let user = self
            .commit(|state| {
                let user = state.user_mut(user_id, context)?;
                user.is_blocked = blocked;
                Ok((user.clone(), Vec::new()))
            })
            .await?;

        if blocked {
            let mut session = self.session.write().await;
            if session.as_deref() == Some(user_id) {
                *session = None;
            }
        }
        info!(user_id = %user_id, blocked, "User block flag changed");
        Ok(user)
    }

    // ── Reads ──────────────────────────────────────────────────

    pub async fn user(&self, user_id: &str) -> Option<User> {
        self.state.lock().await.user(user_id).cloned()
    }

    pub async fn users(&self) -> Vec<User> {
        self.state.lock().await.users.values().cloned().collect()
    }

    pub async fn plans(&self) -> Vec<InvestmentPlan> {
        self.state.lock().await.plans.all().to_vec()
    }

    pub async fn investment(&self, investment_id: &str) -> Option<Investment> {
        self.state.lock().await.investment(investment_id).cloned()
    }

    pub async fn investments_for(&self, user_id: &str) -> Vec<Investment> {
        self.state.lock().await.investments_for(user_id)
    }

    pub async fn transactions_for(&self, user_id: &str) -> Vec<Transaction> {
        self.state.lock().await.transactions_for(user_id)
    }

    pub async fn pending_withdrawals(&self) -> Vec<Transaction> {
        self.state.lock().await.pending_withdrawals()
    }

    pub async fn platform_stats(&self) -> PlatformStats {
        self.state.lock().await.stats()
    }

    pub async fn snapshot(&self) -> LedgerState {
        self.state.lock().await.clone()
    }
}

fn ensure_positive(amount: Decimal, context: ErrorContext) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::invalid_parameters(
            format!("amount must be positive, got {}", amount),
            context,
        ));
    }
    Ok(())
}

fn ensure_not_blocked(user: &User, context: ErrorContext) -> Result<()> {
    if user.is_blocked {
        return Err(AppError::new(
            ErrorKind::Forbidden,
            format!("user {} is blocked", user.id),
            context,
        ));
    }
    Ok(())
}

fn pending_withdrawal(state: &LedgerState, tx_id: &str, context: ErrorContext) -> Result<Transaction> {
    let tx = state
        .transaction(tx_id)
        .cloned()
        .ok_or_else(|| AppError::not_found("Transaction", tx_id, context.clone()))?;

    if !tx.is_pending_withdrawal() {
        return Err(AppError::new(
            ErrorKind::InvalidState,
            format!("transaction {} is a {:?} entry in status {:?}", tx_id, tx.kind, tx.status),
            context,
        ));
    }
    Ok(tx)
}
