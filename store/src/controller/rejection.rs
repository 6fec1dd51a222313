use log::{debug, error};
use std::convert::Infallible;
use warp::filters::body::BodyDeserializeError;
use warp::http::StatusCode;
use warp::reject::{
    InvalidHeader, InvalidQuery, LengthRequired, MethodNotAllowed, MissingHeader, PayloadTooLarge,
    UnsupportedMediaType,
};
use warp::Rejection;

use super::json_reply;
use crate::models::ErrorDetail;

/// Turns warp rejections into `{"detail": ...}` bodies with the matching status.
pub async fn handle_rejection(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    // Body errors are checked first: other routes reject the same request
    // for method or path, and those causes are less useful to the caller.
    let (status, detail) = if let Some(e) = err.find::<BodyDeserializeError>() {
        (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
    } else if err.find::<PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length header required".to_string())
    } else if err.find::<UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected an application/json body".to_string(),
        )
    } else if let Some(e) = err.find::<MissingHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<InvalidHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if err.find::<MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        )
    };

    debug!("Rejected request with {}: {}", status, detail);
    Ok(json_reply(&ErrorDetail::new(detail), status))
}
