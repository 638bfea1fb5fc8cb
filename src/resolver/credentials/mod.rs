// Credential pool manager and its persistence backends

pub mod pool;
pub mod store;

pub use pool::{
    Clock, Credential, CredentialLease, CredentialPool, HealthState, ManualClock, PoolStats, SystemClock,
};
pub use store::{JsonFilePoolStore, MemoryPoolStore, PoolStore};
