use thiserror::Error;

/// Why a job ended in `Failed`. `Display` is the short cause exposed by the
/// status boundary, so no variant carries a local path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("too few clips sourced: {sourced}/{required}")]
    SourcingShortfall { sourced: usize, required: usize },

    #[error("no clip survived normalization")]
    NormalizationShortfall,

    #[error("encoding failed during {stage}")]
    Encoding { stage: &'static str },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("internal error")]
    Internal,
}

impl JobError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn encoding(stage: &'static str) -> Self {
        Self::Encoding { stage }
    }

    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    pub fn is_shortfall(&self) -> bool {
        matches!(
            self,
            JobError::SourcingShortfall { .. } | JobError::NormalizationShortfall
        )
    }
}
