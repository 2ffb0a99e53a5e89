#![allow(dead_code)]

use async_trait::async_trait;
use iplocate::activities::{register_activities, HttpGetter, IpLocator, MemoryRecordStore};
use iplocate::config::ActivityConfig;
use iplocate::workflows::register_workflows;
use iplocate::CapabilityFailure;
use iplocate_testsuite::TestWorkflowEnvironment;
use parking_lot::Mutex;
use std::sync::Arc;

pub const PUBLIC_IP: &str = "203.0.113.5";
pub const PUBLIC_LOCATION: &str = "City: X, Region: Y, Country: Z";
/// Address the fake ip-api refuses with `status: fail`
pub const PRIVATE_IP: &str = "10.0.0.1";

const IPIFY_URL: &str = "http://ipify.test";
const IP_API_URL: &str = "http://ip-api.test";

/// Location the fake ip-api reports for addresses other than [`PUBLIC_IP`]
pub fn location_of(ip: &str) -> String {
    format!("City: Town {}, Region: R, Country: C", ip)
}

/// In-process stand-in for ipify and ip-api
#[derive(Default)]
pub struct FakeProviders {
    requests: Mutex<Vec<String>>,
}

impl FakeProviders {
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpGetter for FakeProviders {
    async fn get_text(&self, url: &str) -> Result<String, CapabilityFailure> {
        self.requests.lock().push(url.to_string());
        if url == IPIFY_URL {
            return Ok(format!("{}\n", PUBLIC_IP));
        }

        let prefix = format!("{}/json/", IP_API_URL);
        let Some(rest) = url.strip_prefix(&prefix) else {
            return Err(CapabilityFailure::http(url, "unexpected url"));
        };
        let (ip, fields) = match rest.split_once('?') {
            Some((ip, query)) => (ip, Some(query)),
            None => (rest, None),
        };

        let body = if ip == PRIVATE_IP {
            serde_json::json!({"status": "fail", "message": "private range"})
        } else if fields.is_some() {
            serde_json::json!({"status": "success", "timezone": "UTC"})
        } else if ip == PUBLIC_IP {
            serde_json::json!({"status": "success", "city": "X", "regionName": "Y", "country": "Z"})
        } else {
            serde_json::json!({
                "status": "success",
                "city": format!("Town {}", ip),
                "regionName": "R",
                "country": "C",
            })
        };
        Ok(body.to_string())
    }
}

/// Test environment with every workflow and activity registered against
/// fake providers and an in-memory record store
pub struct Harness {
    pub env: TestWorkflowEnvironment,
    pub providers: Arc<FakeProviders>,
    pub records: Arc<MemoryRecordStore>,
}

pub fn harness() -> Harness {
    iplocate::tracing_setup::init_test_tracing();

    let env = TestWorkflowEnvironment::new();
    let providers = Arc::new(FakeProviders::default());
    let records = Arc::new(MemoryRecordStore::new());

    register_activities(
        env.registry(),
        IpLocator::new(providers.clone(), IPIFY_URL, IP_API_URL),
        records.clone(),
        env.client().clone(),
    );
    register_workflows(env.registry(), &ActivityConfig::default());

    Harness {
        env,
        providers,
        records,
    }
}
