//! Services for rent-billing-service.

pub mod allocator;
pub mod billing;
pub mod generator;
pub mod ledger;
pub mod locks;
pub mod memory;
pub mod metrics;
pub mod ports;
pub mod postgres;
pub mod voider;

pub use billing::{AllocationOutcome, BillingService, GenerationOutcome};
pub use locks::KeyedLocks;
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use ports::{
    AuditSink, BillingStore, Clock, IdGenerator, InsertOutcome, InvoiceBalance, RoleDirectory,
    SystemClock, UuidV4Generator,
};
pub use postgres::PgBillingStore;
