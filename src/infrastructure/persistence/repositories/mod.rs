mod pending_order_repository;
mod position_repository;
mod recovery_task_repository;
mod stats_repository;
mod trade_repository;

pub use pending_order_repository::SqlitePendingOrderRepository;
pub use position_repository::SqlitePositionRepository;
pub use recovery_task_repository::SqliteRecoveryTaskRepository;
pub use stats_repository::{SqliteAuditLogRepository, SqliteDailyStatsRepository};
pub use trade_repository::SqliteTradeRepository;
