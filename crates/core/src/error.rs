#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("data error: {0}")]
    Data(String),
    #[error("configuration error: {0}")]
    Config(String),

    #[error("remote returned HTTP {status} for {url}: {body}")]
    RemoteStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("remote transport error: {0}")]
    RemoteTransport(String),
    #[error("remote request timed out after {seconds}s")]
    RemoteTimeout { seconds: u64 },

    #[error("subject {subject} already has a current blood pressure goal")]
    GoalConflict { subject: String },
    #[error("goal not found: {0}")]
    GoalNotFound(String),

    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to read store file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write store file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to serialize YAML: {0}")]
    YamlSerialization(serde_yaml::Error),
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(serde_yaml::Error),

    #[error("FHIR error: {0}")]
    Fhir(#[from] fhir::FhirError),
}

impl CoachError {
    /// A malformed or unreconcilable wire resource. Rejects that resource only.
    pub fn is_data_error(&self) -> bool {
        matches!(self, CoachError::Data(_))
    }

    /// The remote record system could not be read (status, transport or timeout).
    pub fn is_remote_read_failure(&self) -> bool {
        matches!(
            self,
            CoachError::RemoteStatus { .. }
                | CoachError::RemoteTransport(_)
                | CoachError::RemoteTimeout { .. }
        )
    }
}

impl From<reqwest::Error> for CoachError {
    fn from(err: reqwest::Error) -> Self {
        CoachError::RemoteTransport(err.to_string())
    }
}

pub type CoachResult<T> = std::result::Result<T, CoachError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_remote_failures() {
        assert!(CoachError::RemoteTimeout { seconds: 5 }.is_remote_read_failure());
        assert!(CoachError::RemoteStatus {
            status: 503,
            url: "http://x".into(),
            body: String::new(),
        }
        .is_remote_read_failure());
        assert!(!CoachError::Data("bad".into()).is_remote_read_failure());
        assert!(CoachError::Data("bad".into()).is_data_error());
        assert!(!CoachError::Config("bad".into()).is_data_error());
    }
}
