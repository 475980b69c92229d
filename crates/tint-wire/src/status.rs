use serde::{Deserialize, Serialize};

/// Status code attached to a failed call.
///
/// `Ok` exists so the enum mirrors the full code space, but a [`Status`]
/// value is only ever constructed for failures; successful calls carry their
/// payload and no `Status` at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Code {
    Ok,
    InvalidArgument,
    Unauthenticated,
    DeadlineExceeded,
    Cancelled,
    Internal,
}

impl Code {
    pub fn as_str(self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::InvalidArgument => "invalid argument",
            Code::Unauthenticated => "unauthenticated",
            Code::DeadlineExceeded => "deadline exceeded",
            Code::Cancelled => "cancelled",
            Code::Internal => "internal",
        }
    }
}

/// Detail payload naming an invalid input field and why it is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub description: String,
}

/// Machine-readable detail attached to a [`Status`].
///
/// Closed set: adding a variant is a wire-format change for both peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusDetail {
    BadRequest { violations: Vec<FieldViolation> },
}

/// Structured failure: a code, a human-readable message, and an ordered
/// sequence of detail payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub code: Code,
    pub message: String,
    pub details: Vec<StatusDetail>,
}

impl Status {
    /// Build a status for a failure code.
    ///
    /// Panics on `Code::Ok`: an ok-coded error is a programming defect, and
    /// the process is better off dying loudly than shipping it to a peer.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        assert!(code != Code::Ok, "Status must not be constructed with Code::Ok");
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Append a detail payload, preserving attachment order.
    pub fn with_detail(mut self, detail: StatusDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// All field violations across the attached details, in order.
    pub fn field_violations(&self) -> impl Iterator<Item = &FieldViolation> {
        self.details.iter().flat_map(|d| match d {
            StatusDetail::BadRequest { violations } => violations.iter(),
        })
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_detail_order() {
        let status = Status::invalid_argument("invalid username")
            .with_detail(StatusDetail::BadRequest {
                violations: vec![
                    FieldViolation {
                        field: "message".into(),
                        description: "first".into(),
                    },
                    FieldViolation {
                        field: "name".into(),
                        description: "second".into(),
                    },
                ],
            })
            .with_detail(StatusDetail::BadRequest {
                violations: vec![FieldViolation {
                    field: "other".into(),
                    description: "third".into(),
                }],
            });

        let bytes = postcard::to_allocvec(&status).unwrap();
        let back: Status = postcard::from_bytes(&bytes).unwrap();

        assert_eq!(back, status);
        let fields: Vec<&str> = back
            .field_violations()
            .map(|v| v.field.as_str())
            .collect();
        assert_eq!(fields, ["message", "name", "other"]);
    }

    #[test]
    #[should_panic(expected = "Code::Ok")]
    fn ok_coded_status_is_a_defect() {
        let _ = Status::new(Code::Ok, "nope");
    }

    #[test]
    fn display_includes_code_and_message() {
        let status = Status::unauthenticated("invalid token");
        assert_eq!(status.to_string(), "unauthenticated: invalid token");
    }
}
