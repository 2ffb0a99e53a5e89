//! Activities and their registration.

pub mod http;
pub mod provider;
pub mod records;
pub mod status;

pub use http::{HttpGetter, ReqwestGetter};
pub use provider::IpLocator;
pub use records::{FileRecordStore, LookupRecord, MemoryRecordStore, RecordStore, RecordStoreError};
pub use status::{query_workflow_status, WorkflowStatusReport};

use iplocate_client::{ClientError, WorkflowClient};
use iplocate_worker::{activity_fn, ActivityError, Registry};
use std::sync::Arc;

pub const GET_IP: &str = "get_ip";
pub const GET_LOCATION_INFO: &str = "get_location_info";
pub const GET_TIMEZONE: &str = "get_timezone";
pub const RECORD_LOOKUP: &str = "record_lookup";
pub const COMPENSATE_LOOKUP: &str = "compensate_lookup";
pub const QUERY_WORKFLOW_STATUS: &str = "query_workflow_status";

impl From<RecordStoreError> for ActivityError {
    fn from(err: RecordStoreError) -> Self {
        ActivityError::retryable(err.to_string())
    }
}

fn client_failure(err: ClientError) -> ActivityError {
    match err {
        ClientError::Encoding(_) => ActivityError::non_retryable(err.to_string()),
        other => ActivityError::retryable(other.to_string()),
    }
}

/// Register every activity under its public name
pub fn register_activities(
    registry: &dyn Registry,
    locator: IpLocator,
    records: Arc<dyn RecordStore>,
    client: WorkflowClient,
) {
    let ip = locator.clone();
    registry.register_activity(
        GET_IP,
        activity_fn(move |_ctx, _: ()| {
            let locator = ip.clone();
            async move { Ok::<_, ActivityError>(locator.get_ip().await?) }
        }),
    );

    let location = locator.clone();
    registry.register_activity(
        GET_LOCATION_INFO,
        activity_fn(move |_ctx, ip: String| {
            let locator = location.clone();
            async move { Ok::<_, ActivityError>(locator.get_location_info(&ip).await?) }
        }),
    );

    registry.register_activity(
        GET_TIMEZONE,
        activity_fn(move |_ctx, ip: String| {
            let locator = locator.clone();
            async move { Ok::<_, ActivityError>(locator.get_timezone(&ip).await?) }
        }),
    );

    let store = records.clone();
    registry.register_activity(
        RECORD_LOOKUP,
        activity_fn(move |ctx, ip: String| {
            let store = store.clone();
            async move { record_lookup(store.as_ref(), &ctx.correlation_key(), ip).await }
        }),
    );

    registry.register_activity(
        COMPENSATE_LOOKUP,
        activity_fn(move |_ctx, token: String| {
            let store = records.clone();
            async move { compensate_lookup(store.as_ref(), &token).await }
        }),
    );

    registry.register_activity(
        QUERY_WORKFLOW_STATUS,
        activity_fn(move |_ctx, workflow_id: String| {
            let client = client.clone();
            async move {
                query_workflow_status(&client, &workflow_id)
                    .await
                    .map_err(client_failure)
            }
        }),
    );
}

/// Store a record of the lookup of `ip` under `token` and return the token
#[tracing::instrument(skip(store))]
pub async fn record_lookup(
    store: &dyn RecordStore,
    token: &str,
    ip: String,
) -> Result<String, ActivityError> {
    let record = LookupRecord {
        ip,
        recorded_at: chrono::Utc::now(),
    };
    store.put(token, record).await?;
    tracing::info!("recorded lookup");
    Ok(token.to_string())
}

/// Remove the record under `token`; a missing record is not an error
#[tracing::instrument(skip(store))]
pub async fn compensate_lookup(store: &dyn RecordStore, token: &str) -> Result<bool, ActivityError> {
    let removed = store.remove(token).await?;
    if removed {
        tracing::info!("removed lookup record");
    } else {
        tracing::debug!("no lookup record to remove");
    }
    Ok(removed)
}
