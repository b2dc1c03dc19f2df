// Kernel - core infrastructure with dependency injection
//
// The EngineKernel holds all process-wide dependencies (database pool,
// embedding/LLM clients) and exposes them as trait objects so the use cases
// in `domains::incidents` are generic over capability interfaces rather than
// concrete clients.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only, not business logic.
// Business logic belongs in `domains`.

pub mod embedding_client;
pub mod engine_kernel;
pub mod incident_store_pg;
pub mod llm_arbiter;
pub mod scheduler;
pub mod test_dependencies;
pub mod traits;
pub mod vector_store_pg;

pub use engine_kernel::EngineKernel;
pub use traits::*;
