use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("unknown template '{0}' (expected <family>/<variant>, e.g. storage_share/basic)")]
    UnknownTemplate(String),
}
