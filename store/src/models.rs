use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn success() -> Self {
        StatusResponse {
            status: "success".to_string(),
        }
    }

    pub fn deleted() -> Self {
        StatusResponse {
            status: "deleted".to_string(),
        }
    }
}

// Error body, shaped like the `{"detail": ...}` responses existing clients parse.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorDetail {
    pub detail: String,
}

impl ErrorDetail {
    pub fn new(detail: impl Into<String>) -> Self {
        ErrorDetail {
            detail: detail.into(),
        }
    }
}
