use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot choose from an empty action set")]
    EmptyActionSet,

    #[error("invalid {name} `{value}`: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("failed to render plot: {0}")]
    Plot(String),
}

pub type Result<T> = std::result::Result<T, Error>;
