//! In-process simulated cloud.
//!
//! Every resource type gets a stable id prefix and the outputs a real cloud
//! would report for it (`arn`, `dns_name`, `repository_url`, ...). State can be
//! persisted to a JSON file so consecutive CLI runs see the same cloud, and
//! failures can be injected per resource for testing partial-failure runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ProviderError, Result, StateError};
use crate::graph::{AttrMap, ResourceId, Value};

use super::{Created, Provider};

/// Region used when none is configured.
const DEFAULT_REGION: &str = "local-1";

/// A resource living in the simulated cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedResource {
    /// Declared identity.
    pub id: ResourceId,
    /// Current attributes.
    pub attributes: AttrMap,
    /// Outputs reported to callers.
    pub outputs: AttrMap,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Cloud {
    counter: u64,
    resources: BTreeMap<String, SimulatedResource>,
}

#[derive(Debug)]
struct Fault {
    error: ProviderError,
    remaining: usize,
}

/// Simulated provider.
#[derive(Debug)]
pub struct SimulatedProvider {
    region: String,
    path: Option<PathBuf>,
    latency: Duration,
    cloud: Mutex<Cloud>,
    faults: Mutex<HashMap<ResourceId, Fault>>,
}

impl SimulatedProvider {
    /// Creates an empty in-memory cloud.
    #[must_use]
    pub fn new() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            path: None,
            latency: Duration::ZERO,
            cloud: Mutex::new(Cloud::default()),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a cloud persisted at `path`, creating it on first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cloud = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&content).map_err(|e| {
                StateError::corrupted(format!(
                    "Failed to parse simulated cloud {}: {e}",
                    path.display()
                ))
            })?
        } else {
            Cloud::default()
        };
        info!("Simulated cloud at {}", path.display());

        Ok(Self {
            path: Some(path),
            cloud: Mutex::new(cloud),
            ..Self::new()
        })
    }

    /// Sets the region embedded in generated outputs.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Adds a fixed delay to every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes the next `times` calls touching `id` fail with `error`.
    pub async fn inject_failure(&self, id: ResourceId, error: ProviderError, times: usize) {
        self.faults.lock().await.insert(
            id,
            Fault {
                error,
                remaining: times,
            },
        );
    }

    /// Returns every live resource by provider id.
    pub async fn resources(&self) -> BTreeMap<String, SimulatedResource> {
        self.cloud.lock().await.resources.clone()
    }

    /// Returns the live resource created for a declared identity.
    pub async fn find(&self, id: &ResourceId) -> Option<(String, SimulatedResource)> {
        self.cloud
            .lock()
            .await
            .resources
            .iter()
            .find(|(_, r)| &r.id == id)
            .map(|(k, r)| (k.clone(), r.clone()))
    }

    async fn before_call(&self, id: &ResourceId) -> std::result::Result<(), ProviderError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut faults = self.faults.lock().await;
        let Some(fault) = faults.get_mut(id) else {
            return Ok(());
        };
        let error = fault.error.clone();
        fault.remaining = fault.remaining.saturating_sub(1);
        if fault.remaining == 0 {
            faults.remove(id);
        }
        debug!("Injected failure for {id}: {error}");
        Err(error)
    }

    async fn persist(&self, cloud: &Cloud) -> std::result::Result<(), ProviderError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(cloud)
            .map_err(|e| ProviderError::transient(format!("Failed to serialize cloud: {e}")))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderError::transient(format!("Failed to create cloud dir: {e}")))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| ProviderError::transient(format!("Failed to write cloud: {e}")))
    }

    /// Computes the outputs a real cloud would report for a resource.
    fn outputs_for(&self, id: &ResourceId, provider_id: &str, serial: u64, attributes: &AttrMap) -> AttrMap {
        let mut outputs = AttrMap::new();
        outputs.insert(String::from("id"), Value::from(provider_id));
        outputs.insert(
            String::from("arn"),
            Value::from(format!("arn:terrace:{}:{}/{provider_id}", self.region, id.kind)),
        );

        let octet = i64::try_from(serial % 250 + 2).unwrap_or(2);
        match id.kind.as_str() {
            "network" => {
                outputs.insert(
                    String::from("default_route_table_id"),
                    Value::from(format!("rtb-{serial:08x}d")),
                );
            }
            "instance" => {
                outputs.insert(
                    String::from("private_ip"),
                    Value::from(format!("10.0.0.{octet}")),
                );
                if attributes.get("associate_public_ip_address") == Some(&Value::Bool(true)) {
                    outputs.insert(
                        String::from("public_ip"),
                        Value::from(format!("203.0.113.{octet}")),
                    );
                }
            }
            "load_balancer" => {
                outputs.insert(
                    String::from("dns_name"),
                    Value::from(format!(
                        "{}-{serial}.{}.elb.terrace.internal",
                        id.name, self.region
                    )),
                );
            }
            "container_registry" => {
                let name = attributes
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(id.name.as_str());
                outputs.insert(
                    String::from("repository_url"),
                    Value::from(format!(
                        "{serial:012}.registry.{}.terrace.internal/{name}",
                        self.region
                    )),
                );
            }
            _ => {}
        }
        outputs
    }
}

/// Id prefix of a resource type.
fn prefix(kind: &str) -> &str {
    match kind {
        "network" => "vpc",
        "subnet" => "subnet",
        "internet_gateway" => "igw",
        "route_table" | "default_route_table" => "rtb",
        "route_table_association" => "rtbassoc",
        "security_group" => "sg",
        "instance" => "i",
        "target_group" => "tg",
        "target_group_attachment" => "tga",
        "load_balancer" => "lb",
        "listener" => "lsnr",
        "container_registry" => "repo",
        other => other,
    }
}

/// Rejects attribute values no real cloud would accept.
fn check_attributes(attributes: &AttrMap) -> std::result::Result<(), ProviderError> {
    if let Some(cidr) = attributes.get("cidr_block") {
        let valid = cidr
            .as_str()
            .and_then(|s| s.split_once('/'))
            .is_some_and(|(addr, bits)| {
                addr.parse::<Ipv4Addr>().is_ok() && bits.parse::<u8>().is_ok_and(|b| b <= 32)
            });
        if !valid {
            return Err(ProviderError::invalid_input(format!(
                "invalid cidr_block {cidr}"
            )));
        }
    }
    Ok(())
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    async fn create(&self, id: &ResourceId, attributes: &AttrMap) -> std::result::Result<Created, ProviderError> {
        self.before_call(id).await?;
        check_attributes(attributes)?;

        let mut cloud = self.cloud.lock().await;
        cloud.counter += 1;
        let serial = cloud.counter;
        let provider_id = format!("{}-{serial:08x}", prefix(&id.kind));
        let outputs = self.outputs_for(id, &provider_id, serial, attributes);

        cloud.resources.insert(
            provider_id.clone(),
            SimulatedResource {
                id: id.clone(),
                attributes: attributes.clone(),
                outputs: outputs.clone(),
            },
        );
        self.persist(&cloud).await?;
        debug!("Created {id} as {provider_id}");

        Ok(Created {
            provider_id,
            outputs,
        })
    }

    async fn update(
        &self,
        id: &ResourceId,
        provider_id: &str,
        changed: &AttrMap,
    ) -> std::result::Result<AttrMap, ProviderError> {
        self.before_call(id).await?;
        check_attributes(changed)?;

        let mut cloud = self.cloud.lock().await;
        let resource = cloud
            .resources
            .get_mut(provider_id)
            .ok_or_else(|| ProviderError::not_found(provider_id))?;

        for (key, value) in changed {
            if value.is_null() {
                resource.attributes.remove(key);
            } else {
                resource.attributes.insert(key.clone(), value.clone());
            }
        }
        let outputs = resource.outputs.clone();
        self.persist(&cloud).await?;
        debug!("Updated {id} ({provider_id})");

        Ok(outputs)
    }

    async fn delete(&self, id: &ResourceId, provider_id: &str) -> std::result::Result<(), ProviderError> {
        self.before_call(id).await?;

        let mut cloud = self.cloud.lock().await;
        if cloud.resources.remove(provider_id).is_none() {
            return Err(ProviderError::not_found(provider_id));
        }
        self.persist(&cloud).await?;
        debug!("Deleted {id} ({provider_id})");

        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;

    fn attrs(pairs: &[(&str, Value)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let provider = SimulatedProvider::new();
        let id = ResourceId::new("network", "main");

        let created = provider
            .create(&id, &attrs(&[("cidr_block", Value::from("10.0.0.0/16"))]))
            .await
            .expect("create");
        assert!(created.provider_id.starts_with("vpc-"));
        assert!(created.outputs.contains_key("default_route_table_id"));

        provider
            .update(&id, &created.provider_id, &attrs(&[("tags", Value::from("prod"))]))
            .await
            .expect("update");
        let (_, live) = provider.find(&id).await.expect("live");
        assert_eq!(live.attributes.get("tags"), Some(&Value::from("prod")));

        provider.delete(&id, &created.provider_id).await.expect("delete");
        let err = provider
            .delete(&id, &created.provider_id)
            .await
            .expect_err("already gone");
        assert_eq!(err.code, ProviderErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_kind_specific_outputs() {
        let provider = SimulatedProvider::new().with_region("eu-west-3");
        let lb = provider
            .create(&ResourceId::new("load_balancer", "web"), &AttrMap::new())
            .await
            .expect("create");
        assert!(
            lb.outputs["dns_name"]
                .as_str()
                .is_some_and(|s| s.starts_with("web-1.eu-west-3"))
        );

        let repo = provider
            .create(
                &ResourceId::new("container_registry", "app"),
                &attrs(&[("name", Value::from("my-repo"))]),
            )
            .await
            .expect("create");
        assert!(
            repo.outputs["repository_url"]
                .as_str()
                .is_some_and(|s| s.ends_with("/my-repo"))
        );

        let vm = provider
            .create(
                &ResourceId::new("instance", "web"),
                &attrs(&[("associate_public_ip_address", Value::Bool(true))]),
            )
            .await
            .expect("create");
        assert!(vm.outputs.contains_key("public_ip"));
    }

    #[tokio::test]
    async fn test_invalid_cidr_rejected() {
        let provider = SimulatedProvider::new();
        let err = provider
            .create(
                &ResourceId::new("subnet", "a"),
                &attrs(&[("cidr_block", Value::from("10.0.1.0"))]),
            )
            .await
            .expect_err("invalid");
        assert_eq!(err.code, ProviderErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_cidr_octets_must_be_in_range() {
        let provider = SimulatedProvider::new();
        let subnet = ResourceId::new("subnet", "a");
        for cidr in ["999.1.1.1/8", "10.0.0/24", "10.0.0.1.5/24", "a.b.c.d/16"] {
            let err = provider
                .create(&subnet, &attrs(&[("cidr_block", Value::from(cidr))]))
                .await
                .expect_err(cidr);
            assert_eq!(err.code, ProviderErrorCode::InvalidInput, "{cidr}");
        }
        assert!(provider
            .create(&subnet, &attrs(&[("cidr_block", Value::from("10.0.1.0/24"))]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let provider = SimulatedProvider::new();
        let id = ResourceId::new("subnet", "a");
        provider
            .inject_failure(id.clone(), ProviderError::transient("flaky"), 2)
            .await;

        assert!(provider.create(&id, &AttrMap::new()).await.is_err());
        assert!(provider.create(&id, &AttrMap::new()).await.is_err());
        assert!(provider.create(&id, &AttrMap::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_persistence_survives_reopen() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let path = temp.path().join("cloud.json");
        let id = ResourceId::new("network", "main");

        let provider = SimulatedProvider::open(&path).await.expect("open");
        let created = provider.create(&id, &AttrMap::new()).await.expect("create");

        let reopened = SimulatedProvider::open(&path).await.expect("reopen");
        let (provider_id, _) = reopened.find(&id).await.expect("persisted");
        assert_eq!(provider_id, created.provider_id);

        let next = reopened
            .create(&ResourceId::new("network", "other"), &AttrMap::new())
            .await
            .expect("create");
        assert_ne!(next.provider_id, created.provider_id);
    }
}
