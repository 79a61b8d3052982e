//! Access to NatPMP resources on the API server

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::crd::NatPMP;
use crate::Error;

/// Trait abstracting Kubernetes client operations for NatPMP
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Read a NatPMP straight from the API server
    ///
    /// Returns `Ok(None)` if it no longer exists.
    async fn get_natpmp(&self, namespace: &str, name: &str) -> Result<Option<NatPMP>, Error>;

    /// Replace the status of `natpmp`
    ///
    /// The write carries the object's `resourceVersion`, so it fails with a
    /// conflict if the object changed since it was read. Returns the object
    /// as stored, with its new `resourceVersion`.
    async fn replace_status(&self, natpmp: &NatPMP) -> Result<NatPMP, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_natpmp(&self, namespace: &str, name: &str) -> Result<Option<NatPMP>, Error> {
        let api: Api<NatPMP> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::kube("unable to fetch NatPMP", e))
    }

    async fn replace_status(&self, natpmp: &NatPMP) -> Result<NatPMP, Error> {
        let namespace = natpmp.namespace().unwrap_or_default();
        let api: Api<NatPMP> = Api::namespaced(self.client.clone(), &namespace);
        let body = serde_json::to_vec(natpmp)?;

        api.replace_status(&natpmp.name_any(), &PostParams::default(), body)
            .await
            .map_err(Error::persist)
    }
}
