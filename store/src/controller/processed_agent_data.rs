use log::{debug, error, info};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;

use common::{NewRecord, ProcessedAgentData, ProcessedAgentDataInDB};

use super::{error_reply, json_reply};
use crate::config::AppState;
use crate::db::run_blocking;
use crate::error::{StoreError, StoreResult};
use crate::models::StatusResponse;

fn log_failure(operation: &str, err: &StoreError) {
    match err {
        StoreError::NotFound => debug!("{}: {}", operation, err),
        _ => error!("{} failed: {}", operation, err),
    }
}

pub async fn create_processed_agent_data_wrapper(
    batch: Vec<ProcessedAgentData>,
    app_state: Arc<AppState>,
) -> Result<impl warp::Reply, Infallible> {
    match create_processed_agent_data(batch, &app_state).await {
        Ok(status) => Ok(json_reply(&status, StatusCode::OK)),
        Err(e) => {
            log_failure("create processed agent data", &e);
            Ok(error_reply(&e))
        }
    }
}

/// Persists the whole batch, then pushes every item to the live subscribers
/// of its user in batch order.
pub async fn create_processed_agent_data(
    batch: Vec<ProcessedAgentData>,
    app_state: &AppState,
) -> StoreResult<StatusResponse> {
    let records: Vec<NewRecord> = batch.iter().map(NewRecord::from).collect();
    let ids = run_blocking(&app_state.db, move |db| db.insert_batch(&records)).await?;
    info!("Stored {} processed agent data rows", ids.len());

    for data in &batch {
        let delivered = app_state
            .subscriptions
            .notify(data.agent_data.user_id, data);
        if delivered > 0 {
            debug!(
                "Pushed update for user {} to {} subscribers",
                data.agent_data.user_id, delivered
            );
        }
    }

    Ok(StatusResponse::success())
}

pub async fn read_processed_agent_data_wrapper(
    processed_agent_data_id: i64,
    app_state: Arc<AppState>,
) -> Result<impl warp::Reply, Infallible> {
    match read_processed_agent_data(processed_agent_data_id, &app_state).await {
        Ok(row) => Ok(json_reply(&row, StatusCode::OK)),
        Err(e) => {
            log_failure("read processed agent data", &e);
            Ok(error_reply(&e))
        }
    }
}

pub async fn read_processed_agent_data(
    processed_agent_data_id: i64,
    app_state: &AppState,
) -> StoreResult<ProcessedAgentDataInDB> {
    run_blocking(&app_state.db, move |db| db.get(processed_agent_data_id))
        .await?
        .ok_or(StoreError::NotFound)
}

pub async fn list_processed_agent_data_wrapper(
    app_state: Arc<AppState>,
) -> Result<impl warp::Reply, Infallible> {
    match run_blocking(&app_state.db, |db| db.list()).await {
        Ok(rows) => Ok(json_reply(&rows, StatusCode::OK)),
        Err(e) => {
            log_failure("list processed agent data", &e);
            Ok(error_reply(&e))
        }
    }
}

pub async fn update_processed_agent_data_wrapper(
    processed_agent_data_id: i64,
    data: ProcessedAgentData,
    app_state: Arc<AppState>,
) -> Result<impl warp::Reply, Infallible> {
    match update_processed_agent_data(processed_agent_data_id, data, &app_state).await {
        Ok(row) => Ok(json_reply(&row, StatusCode::OK)),
        Err(e) => {
            log_failure("update processed agent data", &e);
            Ok(error_reply(&e))
        }
    }
}

/// Replaces every column of an existing row and returns it as re-read from storage.
pub async fn update_processed_agent_data(
    processed_agent_data_id: i64,
    data: ProcessedAgentData,
    app_state: &AppState,
) -> StoreResult<ProcessedAgentDataInDB> {
    let record = NewRecord::from(&data);
    let updated = run_blocking(&app_state.db, move |db| {
        db.update(processed_agent_data_id, &record)
    })
    .await?;
    if !updated {
        return Err(StoreError::NotFound);
    }
    let row = read_processed_agent_data(processed_agent_data_id, app_state).await?;
    info!("Updated processed agent data {}", row);
    Ok(row)
}

pub async fn delete_processed_agent_data_wrapper(
    processed_agent_data_id: i64,
    app_state: Arc<AppState>,
) -> Result<impl warp::Reply, Infallible> {
    let deleted = run_blocking(&app_state.db, move |db| db.delete(processed_agent_data_id))
        .await
        .and_then(|deleted| if deleted { Ok(()) } else { Err(StoreError::NotFound) });

    match deleted {
        Ok(()) => {
            info!("Deleted processed agent data {}", processed_agent_data_id);
            Ok(json_reply(&StatusResponse::deleted(), StatusCode::OK))
        }
        Err(e) => {
            log_failure("delete processed agent data", &e);
            Ok(error_reply(&e))
        }
    }
}
