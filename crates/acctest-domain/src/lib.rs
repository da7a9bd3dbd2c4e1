pub mod error;
pub mod flatmap;
pub mod types;

#[cfg(test)]
mod tests;

pub use error::DomainError;
pub use types::*;
