use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};

use crate::error::StoreError;
use crate::models::ErrorDetail;

pub mod processed_agent_data;
pub mod rejection;
pub mod websocket;

pub(crate) fn json_reply<T: serde::Serialize>(body: &T, status: StatusCode) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

// Only NotFound is described to the caller; backend details stay in the log.
pub(crate) fn error_reply(err: &StoreError) -> WithStatus<Json> {
    let detail = match err {
        StoreError::NotFound => err.to_string(),
        _ => "Internal Server Error".to_string(),
    };
    json_reply(&ErrorDetail::new(detail), err.status_code())
}
