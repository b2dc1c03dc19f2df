//! The task runtime: a durable Postgres-backed queue and a pool of
//! workers that drain it.

pub mod model;
pub mod queue;
pub mod worker;

pub use model::{ClusterJob, EngineJob, SeverityJob};
pub use queue::{ClaimedJob, JobQueue, JobStore, PgJobQueue};
pub use worker::{spawn_worker_pool, WorkerContext};
