/// Error type for the structured-form reconstruction pass.
///
/// All variants are fatal for the function being analyzed: the driver logs
/// a warning and leaves the function without a form tree. Recoverable
/// pattern mismatches (a recognizer that simply doesn't apply) are
/// expressed as `None` returns, not errors.
#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    #[error("form has no trailing branch")]
    MissingTrailingBranch,

    #[error("unexpected branch shape: {0}")]
    BadBranch(String),

    #[error("malformed conditional: {0}")]
    BadCond(String),

    #[error("weird short circuit form")]
    WeirdShortCircuit,

    #[error("short circuit is neither and, or, nor splittable")]
    UnclassifiedShortCircuit,

    #[error("while loop has no preceding unconditional branch")]
    MissingWhileIntro,

    #[error("not yet implemented IR conversion: {0}")]
    UnsupportedVertex(&'static str),
}
