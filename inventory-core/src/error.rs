/// Input rejected before it reaches any store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown attribute scope: {0}")]
    UnknownScope(String),
    #[error("attribute name must be between 1 and 1024 characters")]
    AttributeName,
    #[error("value of attribute '{0}' exceeds 4096 characters")]
    AttributeValueTooLong(String),
    #[error("numeric attribute values must not be NaN")]
    NotANumber,
    #[error("device id must be between 1 and 1024 characters")]
    DeviceId,
    #[error("group name can only contain: upper/lowercase alphanum, -(dash), _(underscore)")]
    GroupName,
    #[error("source name must be between 1 and 1024 characters")]
    SourceName,
    #[error("unrecognized status: {0}")]
    UnrecognizedStatus(String),
}
