pub mod arm;
pub mod auth;
pub mod driver;
pub mod engine;
pub mod error;
pub mod keyvault;
pub mod local;
pub mod memory;
pub mod registry;
pub mod storage;
pub mod terraform;

pub use arm::ArmClient;
pub use auth::{AzureCredentials, Scope, StaticToken, TokenProvider};
pub use driver::{resolve, DeleteOutcome, Purpose, Resolution, ResourceDriver, Verdict};
pub use engine::{ApplyEngine, EngineFactory, PlanSummary};
pub use error::{ApplyError, LookupError};
pub use keyvault::KeyVaultSecretDriver;
pub use local::{requires_import_message, LocalEngine, LocalEngineFactory};
pub use memory::{InMemoryRecords, MemoryDriver, ParentAttr, Record};
pub use registry::DriverRegistry;
pub use storage::{FileShareClient, StorageShareDriver};
pub use terraform::{TerraformEngine, TerraformEngineFactory};
