//! Services module for clinic-billing-service.

pub mod allocator;
pub mod database;
pub mod ledger;
pub mod metrics;
pub mod reports;
pub mod store;
pub mod sufficiency;
pub mod waterfall;

pub use allocator::{AllocationLine, AllocationPlan, AllocationRequest, AutoAllocation, PaymentAllocator};
pub use database::Database;
pub use ledger::{LedgerCalculator, AMOUNT_EPSILON};
pub use metrics::{get_metrics, init_metrics};
pub use store::{BillingStore, InMemoryStore};
pub use sufficiency::SufficiencyMonitor;
pub use waterfall::{
    replay_visit, split_payment, AppliedCommission, CommissionResolver, PaymentSplit,
    VisitWaterfall, WaterfallInput, WaterfallRow,
};
