pub mod exchange;
pub mod notify;
pub mod persistence;

pub use persistence::memory::{
    InMemoryAuditLogRepository, InMemoryDailyStatsRepository, InMemoryPendingOrderRepository,
    InMemoryPositionRepository, InMemoryRecoveryTaskRepository, InMemoryTradeRepository,
};
