use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{}: store is locked by another ingest run ({})", IngestErrorCode::E001Locked.as_str(), .0.display())]
    StoreLocked(PathBuf),
    #[error("{}: input folder does not exist: {}", IngestErrorCode::E002InputMissing.as_str(), .0.display())]
    InputMissing(PathBuf),
    #[error("{}: config file invalid or unreadable: {}", IngestErrorCode::E003ConfigInvalid.as_str(), .0)]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestErrorCode {
    E001Locked,
    E002InputMissing,
    E003ConfigInvalid,
}

impl IngestErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002InputMissing => "E002_INPUT_MISSING",
            Self::E003ConfigInvalid => "E003_CONFIG_INVALID",
        }
    }
}

impl IngestError {
    pub fn code(&self) -> IngestErrorCode {
        match self {
            Self::StoreLocked(_) => IngestErrorCode::E001Locked,
            Self::InputMissing(_) => IngestErrorCode::E002InputMissing,
            Self::InvalidConfig(_) => IngestErrorCode::E003ConfigInvalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_stable_code() {
        let err = IngestError::InputMissing(PathBuf::from("/nowhere"));
        assert_eq!(err.code(), IngestErrorCode::E002InputMissing);
        assert!(err.to_string().starts_with("E002_INPUT_MISSING"));
        assert!(err.to_string().contains("/nowhere"));
    }
}
