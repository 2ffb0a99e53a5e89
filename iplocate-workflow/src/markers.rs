//! Serialization helpers for markers
//!
//! Version markers are stored in history as `MarkerRecorded` events whose
//! details identify the change and the version chosen for it.

use iplocate_core::EncodingError;
use serde::{Deserialize, Serialize};

/// Marker name used for version markers
pub const VERSION_MARKER_NAME: &str = "Version";

/// Version returned for instances whose history predates a change
pub const DEFAULT_VERSION: i32 = -1;

/// Data structure for version marker details
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VersionDetails {
    pub change_id: String,
    pub version: i32,
}

/// Encode version marker details for storage in history
pub fn encode_version_details(change_id: &str, version: i32) -> Result<Vec<u8>, EncodingError> {
    let details = VersionDetails {
        change_id: change_id.to_string(),
        version,
    };
    iplocate_core::encode(&details)
}

/// Decode version marker details from history
pub fn decode_version_details(data: &[u8]) -> Result<VersionDetails, EncodingError> {
    iplocate_core::decode(data)
}
