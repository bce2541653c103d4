use thiserror::Error;

/// Server-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] marketmux_core::ConfigError),

    #[error("no usable providers configured")]
    NoUsableProviders,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::NoUsableProviders => 3,
            Self::Io(_) => 10,
        }
    }
}
