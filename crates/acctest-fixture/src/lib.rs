pub mod data;
pub mod error;
pub mod hcl;
pub mod key_vault_secret;
pub mod storage_share;
pub mod template;

pub use data::{Locations, TestData};
pub use error::FixtureError;
pub use hcl::{Block, BodyItem, Document, Expr, Traversal};
pub use template::{generate, Fixture, TemplateId};
