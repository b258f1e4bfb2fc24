use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/* ===== errors ===== */

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchemaError {
    AttributeNotFound(String),
    ClassNotFound(String),
    MatchingRuleNotFound(String),
    DuplicateOid(String),
    InvalidClass(Vec<String>),
    MissingMustAttribute(Vec<String>),
    InvalidAttributeSyntax(String),
    AttributeNotValidForClass(String),
    OperationalAttributeWrite(String),
    NoStructuralClass,
    RdnNotPresent(String),
    EmptyFilter,
    Corrupted,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyError {
    Unknown,
    // Class, attribute.
    SchemaClassMissingAttribute(String, String),
    // Class, superclass.
    SchemaClassMissingClass(String, String),
    SchemaOidNotUnique(String),
    EntryDnInvalid(String),
    EntrySchemaViolation(String),
    RequiredEntryMissing(String),
    AciCacheStale(Uuid),
    NexusSearchFailure,
}

/// The closed error taxonomy every operation resolves to. Protocol-visible
/// variants map one-to-one onto a stable [`ResultCode`]; internal variants
/// are translated at the chain boundary and never leak detail beyond a
/// generic diagnostic.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "lowercase")]
pub enum OperationError {
    // Protocol-visible outcomes.
    NamingViolation(String),
    SchemaViolation(SchemaError),
    AuthenticationFailure,
    AuthorizationDenied,
    NoSuchObject,
    AlreadyExists,
    NoSuchNamingContext,
    NotAllowedOnNonLeaf,
    SystemProtectedObject,
    // A multi-partition operation stopped part way through. The message
    // names the phase that failed.
    PartialFailure(String),
    SizeLimitExceeded,
    TimeLimitExceeded,
    Unavailable,
    Abandoned,

    // Internal faults. The exception stage maps these to OperationsError
    // before they become visible.
    OperationsError,
    InvalidState,
    Backend,
    EmptyRequest,
    ConsistencyError(Vec<ConsistencyError>),
}

impl PartialEq for OperationError {
    fn eq(&self, other: &Self) -> bool {
        // Payloads are diagnostic text, not identity. Comparing by
        // discriminant keeps assertions stable when messages change.
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for OperationError {}

impl Display for OperationError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let mut output = format!("{:?}", self)
            .split("::")
            .last()
            .unwrap_or("")
            .to_string();

        if let Some(msg) = self.message() {
            output += &format!(" - {}", msg);
        };
        f.write_str(&output)
    }
}

impl OperationError {
    /// Return the message associated with the error if there is one.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::NamingViolation(dn) => Some(format!("Invalid distinguished name: {}", dn)),
            Self::SchemaViolation(_) => None,
            Self::AuthenticationFailure => {
                Some("Authentication failed - invalid credentials or unknown principal.".into())
            }
            Self::AuthorizationDenied => Some("Insufficient access rights.".into()),
            Self::NoSuchObject => None,
            Self::AlreadyExists => None,
            Self::NoSuchNamingContext => {
                Some("No partition is registered for any suffix of the requested name.".into())
            }
            Self::NotAllowedOnNonLeaf => {
                Some("The entry has children and cannot be removed or renamed.".into())
            }
            Self::SystemProtectedObject => {
                Some("This entry is required by the server and cannot be altered.".into())
            }
            Self::PartialFailure(phase) => {
                Some(format!("A multi-partition operation failed during: {}", phase))
            }
            Self::SizeLimitExceeded => None,
            Self::TimeLimitExceeded => None,
            Self::Unavailable => Some("The server is shutting down.".into()),
            Self::Abandoned => None,
            Self::OperationsError => Some("An internal error has occurred.".into()),
            Self::InvalidState => None,
            Self::Backend => None,
            Self::EmptyRequest => None,
            Self::ConsistencyError(_) => None,
        }
    }

    /// The stable protocol result code a front-end should emit for this
    /// error. Internal faults all collapse to `OperationsError`.
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::NamingViolation(_) => ResultCode::InvalidDnSyntax,
            Self::SchemaViolation(se) => match se {
                SchemaError::AttributeNotFound(_) => ResultCode::UndefinedAttributeType,
                SchemaError::InvalidAttributeSyntax(_) => ResultCode::InvalidAttributeSyntax,
                SchemaError::OperationalAttributeWrite(_) => ResultCode::ConstraintViolation,
                SchemaError::DuplicateOid(_) => ResultCode::AttributeOrValueExists,
                SchemaError::EmptyFilter => ResultCode::UnwillingToPerform,
                _ => ResultCode::ObjectClassViolation,
            },
            Self::AuthenticationFailure => ResultCode::InvalidCredentials,
            Self::AuthorizationDenied => ResultCode::InsufficientAccessRights,
            Self::NoSuchObject | Self::NoSuchNamingContext => ResultCode::NoSuchObject,
            Self::AlreadyExists => ResultCode::EntryAlreadyExists,
            Self::NotAllowedOnNonLeaf => ResultCode::NotAllowedOnNonLeaf,
            Self::SystemProtectedObject => ResultCode::UnwillingToPerform,
            Self::PartialFailure(_) => ResultCode::AffectsMultipleDsas,
            Self::SizeLimitExceeded => ResultCode::SizeLimitExceeded,
            Self::TimeLimitExceeded => ResultCode::TimeLimitExceeded,
            Self::Unavailable => ResultCode::Unavailable,
            Self::Abandoned => ResultCode::Canceled,
            Self::EmptyRequest => ResultCode::ProtocolError,
            Self::OperationsError
            | Self::InvalidState
            | Self::Backend
            | Self::ConsistencyError(_) => ResultCode::OperationsError,
        }
    }
}

/// Protocol result codes. The numeric values are wire-stable and must never
/// be renumbered.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u16)]
pub enum ResultCode {
    Success = 0,
    OperationsError = 1,
    ProtocolError = 2,
    TimeLimitExceeded = 3,
    SizeLimitExceeded = 4,
    CompareFalse = 5,
    CompareTrue = 6,
    UndefinedAttributeType = 17,
    ConstraintViolation = 19,
    AttributeOrValueExists = 20,
    InvalidAttributeSyntax = 21,
    NoSuchObject = 32,
    InvalidDnSyntax = 34,
    InvalidCredentials = 49,
    InsufficientAccessRights = 50,
    Busy = 51,
    Unavailable = 52,
    UnwillingToPerform = 53,
    NamingViolation = 64,
    ObjectClassViolation = 65,
    NotAllowedOnNonLeaf = 66,
    NotAllowedOnRdn = 67,
    EntryAlreadyExists = 68,
    AffectsMultipleDsas = 71,
    Other = 80,
    Canceled = 118,
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        matches!(self, ResultCode::Success | ResultCode::CompareTrue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_error_eq_by_discriminant() {
        assert_eq!(
            OperationError::NamingViolation("uid=a".to_string()),
            OperationError::NamingViolation("ou=b".to_string())
        );
        assert_ne!(
            OperationError::NoSuchObject,
            OperationError::AlreadyExists
        );
    }

    #[test]
    fn test_result_code_mapping_is_stable() {
        assert_eq!(u16::from(ResultCode::NoSuchObject), 32);
        assert_eq!(u16::from(ResultCode::InsufficientAccessRights), 50);
        assert_eq!(
            OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(
                "prescriptiveaci".to_string()
            ))
            .result_code(),
            ResultCode::InvalidAttributeSyntax
        );
        assert_eq!(
            OperationError::Backend.result_code(),
            ResultCode::OperationsError
        );
    }

    #[test]
    fn test_operation_error_serde_round_trip() {
        let err = OperationError::SchemaViolation(SchemaError::MissingMustAttribute(vec![
            "sn".to_string(),
        ]));
        let s = serde_json::to_string(&err).expect("failed to serialise");
        let back: OperationError = serde_json::from_str(&s).expect("failed to deserialise");
        assert_eq!(err, back);
    }

    #[test]
    fn test_internal_fault_message_is_generic() {
        let msg = OperationError::OperationsError
            .message()
            .expect("message must exist");
        assert_eq!(msg, "An internal error has occurred.");
    }
}
