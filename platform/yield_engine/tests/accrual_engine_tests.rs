//! End-to-end behaviour of the investment service under a manual clock

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use yield_engine::{
    typed_errors::{ErrorContext, Result as EngineResult},
    AppError, Clock, ErrorKind, InMemoryRepository, InvestmentService, InvestmentStatus,
    JsonFileRepository, LedgerState, ManualClock, PayoutNotice, PayoutNotifier,
    ServiceSettings, StateRepository, TransactionKind, TransactionStatus,
};

const CYCLE: Duration = Duration::from_secs(60);

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn settings() -> ServiceSettings {
    ServiceSettings {
        cycle_period: chrono::Duration::from_std(CYCLE).unwrap(),
        referral_rate: dec("0.05"),
        signup_bonus: Decimal::from(5),
    }
}

struct Harness {
    service: InvestmentService,
    clock: Arc<ManualClock>,
    repo: Arc<InMemoryRepository>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let repo = Arc::new(InMemoryRepository::new());
    let service = InvestmentService::new(
        LedgerState::seeded(clock.now()),
        settings(),
        repo.clone(),
        clock.clone(),
    );
    Harness { service, clock, repo }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<PayoutNotice>>,
}

impl PayoutNotifier for RecordingNotifier {
    fn notify_payout(&self, notice: &PayoutNotice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

/// Repository whose saves always fail
struct BrokenRepository;

#[async_trait]
impl StateRepository for BrokenRepository {
    async fn save(&self, _state: &LedgerState) -> EngineResult<()> {
        Err(AppError::new(
            ErrorKind::Persistence,
            "disk full",
            ErrorContext::new("broken_repository", "save"),
        ))
    }

    async fn load(&self) -> EngineResult<Option<LedgerState>> {
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

#[tokio::test]
async fn test_stake_then_three_cycles_pays_three_times() {
    let h = harness();
    h.service.deposit("user_1", Decimal::from(95), "card").await.unwrap();
    assert_eq!(h.service.user("user_1").await.unwrap().balance, Decimal::from(100));

    let investment = h.service.stake("user_1", "plan_1", Decimal::from(100)).await.unwrap();
    assert_eq!(investment.payouts_completed, 0);
    assert_eq!(investment.status, InvestmentStatus::Active);
    assert_eq!(h.service.user("user_1").await.unwrap().balance, Decimal::ZERO);

    h.clock.advance(CYCLE * 3);
    let report = h.service.tick().await.unwrap();
    assert_eq!(report.payouts, 3);
    assert_eq!(report.total_credited, dec("4.5"));

    let investment = h.service.investment(&investment.id).await.unwrap();
    assert_eq!(investment.payouts_completed, 3);
    assert_eq!(investment.earned_so_far, dec("4.5"));
    assert_eq!(h.service.user("user_1").await.unwrap().balance, dec("4.5"));

    let profits: Vec<_> = h
        .service
        .transactions_for("user_1")
        .await
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Profit)
        .collect();
    assert_eq!(profits.len(), 3);
    assert!(profits.iter().all(|t| t.amount == dec("1.5")));
}

#[tokio::test]
async fn test_payouts_track_tick_count_until_duration() {
    let h = harness();
    h.service.deposit("user_1", Decimal::from(200), "card").await.unwrap();
    h.service
        .update_plan({
            let mut plan = h.service.plans().await.into_iter().find(|p| p.id == "plan_1").unwrap();
            plan.duration_cycles = 4;
            plan
        })
        .await
        .unwrap();
    let investment = h.service.stake("user_1", "plan_1", Decimal::from(80)).await.unwrap();

    for n in 1..=6u32 {
        h.clock.advance(CYCLE);
        h.service.tick().await.unwrap();

        let current = h.service.investment(&investment.id).await.unwrap();
        assert_eq!(current.payouts_completed, n.min(4));
        assert_eq!(
            current.earned_so_far,
            Decimal::from(current.payouts_completed) * Decimal::from(80) * dec("1.5") / Decimal::from(100)
        );
    }

    let done = h.service.investment(&investment.id).await.unwrap();
    assert_eq!(done.status, InvestmentStatus::Completed);

    let snapshot = h.service.snapshot().await;
    assert_eq!(snapshot.profit_recorded_for(&investment.id), done.earned_so_far);
}

#[tokio::test]
async fn test_second_immediate_tick_is_a_no_op() {
    let h = harness();
    h.service.deposit("user_1", Decimal::from(95), "card").await.unwrap();
    h.service.stake("user_1", "plan_1", Decimal::from(100)).await.unwrap();
    h.clock.advance(CYCLE * 2);

    let now = h.service.now();
    let first = h.service.tick_at(now).await.unwrap();
    let saves = h.repo.save_count();
    let second = h.service.tick_at(now).await.unwrap();

    assert_eq!(first.payouts, 2);
    assert!(second.is_empty());
    assert_eq!(h.repo.save_count(), saves);
}

#[tokio::test]
async fn test_stake_outside_bounds_changes_nothing() {
    let h = harness();
    h.service.deposit("user_1", Decimal::from(995), "card").await.unwrap();
    let before = h.service.snapshot().await;

    for amount in [dec("9.99"), Decimal::from(101)] {
        let err = h.service.stake("user_1", "plan_1", amount).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParameters);
    }
    assert_eq!(h.service.snapshot().await, before);
}

#[tokio::test]
async fn test_stake_above_balance_changes_nothing() {
    let h = harness();
    let before = h.service.snapshot().await;

    let err = h.service.stake("user_1", "plan_1", Decimal::from(50)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InsufficientBalance);
    assert_eq!(h.service.snapshot().await, before);
    assert_eq!(h.repo.save_count(), 0);
}

#[tokio::test]
async fn test_referral_commission_is_paid_instantly() {
    let h = harness();
    let referrer = h.service.register("Alice", "alice@example.com", "ALICE", None).await.unwrap();
    let referee = h
        .service
        .register("Bob", "bob@example.com", "BOB", Some("alice"))
        .await
        .unwrap();
    h.service.deposit(&referee.id, Decimal::from(195), "card").await.unwrap();

    h.service.stake(&referee.id, "plan_2", Decimal::from(200)).await.unwrap();

    let alice = h.service.user(&referrer.id).await.unwrap();
    assert_eq!(alice.balance, Decimal::from(15));
    let alice_history = h.service.transactions_for(&referrer.id).await;
    assert_eq!(alice_history.len(), 1);
    assert_eq!(alice_history[0].kind, TransactionKind::Referral);
    assert_eq!(alice_history[0].amount, Decimal::from(10));

    let bob = h.service.user(&referee.id).await.unwrap();
    assert_eq!(bob.balance, Decimal::ZERO);
    assert_eq!(bob.total_invested, Decimal::from(200));
    let stake_entries: Vec<_> = h
        .service
        .transactions_for(&referee.id)
        .await
        .into_iter()
        .filter(|t| t.note.as_deref() == Some("Allocated to Ethereum Plus"))
        .collect();
    assert_eq!(stake_entries.len(), 1);
    assert_eq!(stake_entries[0].kind, TransactionKind::Deposit);
}

#[tokio::test]
async fn test_rejected_withdrawal_restores_exact_amount() {
    let h = harness();
    h.service.deposit("user_1", dec("20.25"), "card").await.unwrap();

    let tx = h
        .service
        .request_withdrawal("user_1", dec("12.75"), "USDT:TXYZ")
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.method.as_deref(), Some("USDT:TXYZ"));
    assert_eq!(h.service.user("user_1").await.unwrap().balance, dec("12.5"));
    assert_eq!(h.service.pending_withdrawals().await.len(), 1);

    let rejected = h.service.reject_withdrawal(&tx.id).await.unwrap();
    assert_eq!(rejected.status, TransactionStatus::Rejected);
    assert_eq!(h.service.user("user_1").await.unwrap().balance, dec("25.25"));
    assert!(h.service.pending_withdrawals().await.is_empty());
}

#[tokio::test]
async fn test_withdrawal_above_balance_fails() {
    let h = harness();
    let err = h
        .service
        .request_withdrawal("user_1", Decimal::from(6), "BTC")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InsufficientBalance);
    assert_eq!(h.service.user("user_1").await.unwrap().balance, Decimal::from(5));
}

#[tokio::test]
async fn test_notifier_only_hears_about_the_session_user() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let notifier = Arc::new(RecordingNotifier::default());
    let service = InvestmentService::new(
        LedgerState::seeded(clock.now()),
        settings(),
        Arc::new(InMemoryRepository::new()),
        clock.clone(),
    )
    .with_notifier(notifier.clone());

    let other = service.register("Carol", "carol@example.com", "CAROL", None).await.unwrap();
    service.deposit(&other.id, Decimal::from(45), "card").await.unwrap();
    service.stake(&other.id, "plan_1", Decimal::from(50)).await.unwrap();
    service.deposit("user_1", Decimal::from(45), "card").await.unwrap();
    service.stake("user_1", "plan_1", Decimal::from(50)).await.unwrap();

    service.login("demo@user.com").await.unwrap();
    clock.advance(CYCLE * 2);
    service.tick().await.unwrap();

    let notices = notifier.notices.lock().unwrap().clone();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].user_id, "user_1");
    assert_eq!(notices[0].amount, dec("1.5"));
    assert_eq!(notices[0].payouts, 2);

    service.logout().await;
    clock.advance(CYCLE);
    service.tick().await.unwrap();
    assert_eq!(notifier.notices.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_save_leaves_state_untouched() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = InvestmentService::new(
        LedgerState::seeded(clock.now()),
        settings(),
        Arc::new(BrokenRepository),
        clock,
    );
    let before = service.snapshot().await;

    let err = service.deposit("user_1", Decimal::from(10), "card").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Persistence);
    assert_eq!(service.snapshot().await, before);
}

#[tokio::test]
async fn test_restart_resumes_and_catches_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let clock = Arc::new(ManualClock::new(Utc::now()));

    let investment_id = {
        let service = InvestmentService::open(
            settings(),
            Arc::new(JsonFileRepository::new(&path)),
            clock.clone(),
        )
        .await
        .unwrap();
        service.deposit("user_1", Decimal::from(95), "card").await.unwrap();
        service.stake("user_1", "plan_1", Decimal::from(100)).await.unwrap().id
    };

    clock.advance(CYCLE * 5);
    let service = InvestmentService::open(settings(), Arc::new(JsonFileRepository::new(&path)), clock)
        .await
        .unwrap();
    let report = service.tick().await.unwrap();

    assert_eq!(report.payouts, 5);
    let investment = service.investment(&investment_id).await.unwrap();
    assert_eq!(investment.earned_so_far, dec("7.5"));
    assert_eq!(service.platform_stats().await.total_invested, Decimal::from(100));
}

#[tokio::test]
async fn test_runaway_plan_does_not_block_other_payouts() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    // A snapshot written before plan terms were bounded
    let mut raw = serde_json::to_value(LedgerState::seeded(clock.now())).unwrap();
    raw["plans"][0]["daily_roi_percent"] = serde_json::to_value(Decimal::MAX).unwrap();
    let state: LedgerState = serde_json::from_value(raw).unwrap();
    let service = InvestmentService::new(
        state,
        settings(),
        Arc::new(InMemoryRepository::new()),
        clock.clone(),
    );

    service.deposit("user_1", Decimal::from(295), "card").await.unwrap();
    let runaway = service.stake("user_1", "plan_1", Decimal::from(100)).await.unwrap();
    let healthy = service.stake("user_1", "plan_2", Decimal::from(200)).await.unwrap();

    clock.advance(CYCLE);
    let report = service.tick().await.unwrap();
    assert_eq!(report.payouts, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(service.investment(&runaway.id).await.unwrap().payouts_completed, 0);
    assert_eq!(service.investment(&healthy.id).await.unwrap().payouts_completed, 1);
    assert_eq!(service.user("user_1").await.unwrap().balance, Decimal::from(5));
}

#[tokio::test]
async fn test_overflowing_deposit_is_rejected() {
    let h = harness();
    let before = h.service.snapshot().await;

    let err = h.service.deposit("user_1", Decimal::MAX, "card").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParameters);
    assert_eq!(h.service.snapshot().await, before);
    assert_eq!(h.repo.save_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stakes_never_overdraw() {
    let h = harness();
    h.service.deposit("user_1", Decimal::from(95), "card").await.unwrap();
    let service = Arc::new(h.service);

    let mut stakes = Vec::new();
    for _ in 0..20 {
        let service = service.clone();
        stakes.push(tokio::spawn(async move {
            service.stake("user_1", "plan_1", Decimal::from(30)).await
        }));
    }
    let ticker = {
        let service = service.clone();
        tokio::spawn(async move { service.tick().await })
    };

    let mut succeeded = 0;
    for stake in stakes {
        match stake.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert_eq!(e.kind, ErrorKind::InsufficientBalance),
        }
    }
    ticker.await.unwrap().unwrap();

    assert_eq!(succeeded, 3);
    let user = service.user("user_1").await.unwrap();
    assert_eq!(user.balance, Decimal::from(10));
    assert_eq!(user.total_invested, Decimal::from(1290));
    assert_eq!(service.investments_for("user_1").await.len(), succeeded);

    let allocated: Decimal = service
        .transactions_for("user_1")
        .await
        .iter()
        .filter(|t| t.kind == TransactionKind::Deposit && t.investment_id.is_some())
        .map(|t| t.amount)
        .sum();
    assert_eq!(allocated, Decimal::from(90));
}
