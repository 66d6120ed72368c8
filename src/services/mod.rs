pub mod blacklist;
pub mod fraud_gate;
pub mod ledger;
pub mod orchestrator;
pub mod payment_sessions;
pub mod rate_limiter;
pub mod review;
pub mod session_sweeper;

pub use blacklist::NewBlacklistEntry;
pub use fraud_gate::{normalize_domain, DomainCheck, FraudGate};
pub use orchestrator::{
    BankingService, DepositRequest, MovementReceipt, ServiceSettings, TransferReceipt,
    TransferRequest, WithdrawRequest,
};
pub use payment_sessions::{CreateSessionRequest, SessionHandle, SettleRequest, Settlement};
pub use rate_limiter::{
    RateLimitConfig, RateLimitDecision, RateLimitDenial, RateLimitStatus, RateLimiter,
};
pub use session_sweeper::run_session_sweeper;
