//! Error types for the shared foundation.

/// The result type used throughout vetes-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling core vocabulary types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A task state string was not one of the known lifecycle states.
    #[error("unknown task state: {value}")]
    UnknownState {
        /// The rejected value.
        value: String,
    },

    /// A task view string was not one of the known views.
    #[error("unknown task view: {value}")]
    UnknownView {
        /// The rejected value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_state_display() {
        let err = Error::UnknownState {
            value: "SLEEPING".into(),
        };
        assert!(err.to_string().contains("SLEEPING"));
    }
}
