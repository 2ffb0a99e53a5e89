//! The address lookup routine and its named variants.
//!
//! All variants resolve an address (the host's own unless the request names
//! one) and its location. They differ in how the timezone step is chosen:
//!
//! | variant      | workflow type              | timezone                    |
//! |--------------|----------------------------|-----------------------------|
//! | `Versioned`  | `GetAddressFromIP`         | when the version marker ≥ 1 |
//! | `LocationV1` | `GetAddressFromIPV1`       | never                       |
//! | `TimezoneV2` | `GetAddressFromIPV2`       | always                      |
//! | `Recorded`   | `GetAddressFromIPRecorded` | as `Versioned`              |
//!
//! `Recorded` additionally records the lookup before resolving it and
//! compensates the record if resolution fails.

use crate::activities::{
    COMPENSATE_LOOKUP, GET_IP, GET_LOCATION_INFO, GET_TIMEZONE, RECORD_LOOKUP,
};
use iplocate_core::ActivityOptions;
use iplocate_workflow::{WorkflowContext, WorkflowError, DEFAULT_VERSION};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

/// Change id gating the timezone step. Never rename it: running instances
/// have it recorded in their history.
pub const CHANGE_ID: &str = "add-timezone-feature";

/// Version from which the timezone is resolved
pub const TIMEZONE_VERSION: i32 = 1;

/// Input of every lookup variant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    /// Address to locate; the host's public address when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Durable pause before the version marker is read
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pause_secs: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl LookupRequest {
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            pause_secs: 0,
        }
    }
}

/// Output of every lookup variant.
///
/// Results written before the timezone existed have no `timezone` key and
/// still decode; readers predating it ignore the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    pub location: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub timezone: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

impl fmt::Display for LookupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location)?;
        if let Some(timezone) = &self.timezone {
            write!(f, ", Timezone: {}", timezone)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupVariant {
    Versioned,
    LocationV1,
    TimezoneV2,
    Recorded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimezoneStep {
    Never,
    Versioned,
    Always,
}

impl LookupVariant {
    pub const ALL: [LookupVariant; 4] = [
        LookupVariant::Versioned,
        LookupVariant::LocationV1,
        LookupVariant::TimezoneV2,
        LookupVariant::Recorded,
    ];

    /// Name the variant is registered under
    pub fn workflow_type(self) -> &'static str {
        match self {
            LookupVariant::Versioned => "GetAddressFromIP",
            LookupVariant::LocationV1 => "GetAddressFromIPV1",
            LookupVariant::TimezoneV2 => "GetAddressFromIPV2",
            LookupVariant::Recorded => "GetAddressFromIPRecorded",
        }
    }

    pub fn from_workflow_type(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.workflow_type() == name)
    }

    fn timezone_step(self) -> TimezoneStep {
        match self {
            LookupVariant::Versioned | LookupVariant::Recorded => TimezoneStep::Versioned,
            LookupVariant::LocationV1 => TimezoneStep::Never,
            LookupVariant::TimezoneV2 => TimezoneStep::Always,
        }
    }
}

/// Run the `variant` routine for `request`
pub async fn run_lookup(
    ctx: &WorkflowContext,
    variant: LookupVariant,
    request: &LookupRequest,
    options: &ActivityOptions,
) -> Result<LookupResult, WorkflowError> {
    let logger = ctx.get_logger();

    let ip = match &request.address {
        Some(address) => address.clone(),
        None => {
            ctx.execute_typed_activity::<_, String>(GET_IP, &(), options.clone())
                .await?
        }
    };
    logger.info(format!("Resolving {} with {}", ip, variant.workflow_type()));

    if variant != LookupVariant::Recorded {
        return resolve(ctx, variant, &ip, request, options).await;
    }

    let token: String = ctx
        .execute_typed_activity(RECORD_LOOKUP, &ip, options.clone())
        .await?;

    match resolve(ctx, variant, &ip, request, options).await {
        Ok(result) => Ok(result),
        Err(err) => {
            compensate(ctx, &token, &err, options).await;
            Err(err)
        }
    }
}

async fn resolve(
    ctx: &WorkflowContext,
    variant: LookupVariant,
    ip: &str,
    request: &LookupRequest,
    options: &ActivityOptions,
) -> Result<LookupResult, WorkflowError> {
    if request.pause_secs > 0 {
        ctx.get_logger()
            .info(format!("Pausing {}s before resolving", request.pause_secs));
        ctx.sleep(Duration::from_secs(request.pause_secs)).await?;
    }

    // The marker is read where behaviour first diverges, before the location
    // step, so every replay reads it at the same point.
    let with_timezone = match variant.timezone_step() {
        TimezoneStep::Never => false,
        TimezoneStep::Always => true,
        TimezoneStep::Versioned => {
            ctx.get_version(CHANGE_ID, DEFAULT_VERSION, TIMEZONE_VERSION)? >= TIMEZONE_VERSION
        }
    };

    let location: String = ctx
        .execute_typed_activity(GET_LOCATION_INFO, ip, options.clone())
        .await?;

    let timezone = if with_timezone {
        let timezone: String = ctx
            .execute_typed_activity(GET_TIMEZONE, ip, options.clone())
            .await?;
        Some(timezone).filter(|tz| !tz.is_empty())
    } else {
        None
    };

    Ok(LookupResult { location, timezone })
}

/// Best effort removal of the lookup record after a failure
async fn compensate(
    ctx: &WorkflowContext,
    token: &str,
    cause: &WorkflowError,
    options: &ActivityOptions,
) {
    // a broken decision is retried, not compensated; a cancelled run can
    // no longer schedule activities
    if cause.is_decision_failure() || matches!(cause, WorkflowError::Cancelled) {
        return;
    }

    let outcome = ctx
        .execute_typed_activity::<_, bool>(COMPENSATE_LOOKUP, token, options.clone())
        .await;
    match outcome {
        Ok(_) => ctx
            .get_logger()
            .info(format!("Compensated lookup record {}", token)),
        Err(err) if !ctx.is_replaying() => {
            tracing::warn!(%token, error = %err, cause = %cause, "compensation failed");
        }
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_decode_across_schema_versions() {
        let old: LookupResult =
            serde_json::from_str(r#"{"location":"City: X, Region: Y, Country: Z"}"#).unwrap();
        assert_eq!(old.timezone, None);

        let empty: LookupResult =
            serde_json::from_str(r#"{"location":"City: X, Region: Y, Country: Z","timezone":""}"#)
                .unwrap();
        assert_eq!(empty, old);

        let new = LookupResult {
            location: "City: X, Region: Y, Country: Z".to_string(),
            timezone: Some("UTC".to_string()),
        };
        let json = serde_json::to_value(&new).unwrap();
        assert_eq!(json["timezone"], "UTC");
        assert_eq!(serde_json::to_value(&old).unwrap().get("timezone"), None);

        // a reader that predates the timezone ignores the key
        #[derive(Deserialize)]
        struct LocationOnly {
            location: String,
        }
        let legacy: LocationOnly = serde_json::from_value(json).unwrap();
        assert_eq!(legacy.location, new.location);
    }

    #[test]
    fn requests_omit_defaults() {
        assert_eq!(serde_json::to_string(&LookupRequest::default()).unwrap(), "{}");
        let request: LookupRequest = serde_json::from_str(r#"{"address":"8.8.8.8"}"#).unwrap();
        assert_eq!(request, LookupRequest::for_address("8.8.8.8"));
    }

    #[test]
    fn variants_have_distinct_workflow_types() {
        for variant in LookupVariant::ALL {
            assert_eq!(
                LookupVariant::from_workflow_type(variant.workflow_type()),
                Some(variant)
            );
        }
        assert_eq!(LookupVariant::from_workflow_type("GetAddressFromIPV3"), None);
    }

    #[test]
    fn display_includes_timezone_when_known() {
        let result = LookupResult {
            location: "City: X, Region: Y, Country: Z".to_string(),
            timezone: Some("UTC".to_string()),
        };
        assert_eq!(
            result.to_string(),
            "City: X, Region: Y, Country: Z, Timezone: UTC"
        );
    }
}
