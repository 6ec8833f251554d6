//! Yield Engine Library
//!
//! In-memory investment ledger with periodic yield accrual, referral
//! commissions and an admin-reviewed withdrawal queue.

pub mod accrual;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod constants;
pub mod ledger;
pub mod notifier;
pub mod persistence;
pub mod runner;
pub mod service;
pub mod tracing_logger;
pub mod typed_errors;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, StoreBackend};
pub use ledger::LedgerState;
pub use notifier::{LedgerEvent, PayoutNotice, PayoutNotifier, TracingNotifier};
pub use persistence::{InMemoryRepository, JsonFileRepository, StateRepository};
pub use runner::{AccrualRunner, RunnerHandle};
pub use service::{InvestmentService, ServiceSettings};
pub use typed_errors::{AppError, ErrorKind};
pub use types::*;
