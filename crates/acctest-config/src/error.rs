use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml parse error in {path}: {source}")]
    YamlParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("conversion error in {path}: {message}")]
    Conversion { path: String, message: String },

    #[error("missing required settings for the {engine} engine: {}", settings.join(", "))]
    MissingSettings {
        engine: String,
        settings: Vec<String>,
    },

    #[error("acceptance runs against {engine} need TF_ACC to be set")]
    AcceptanceDisabled { engine: String },
}
