//! Applying rendered documents
//!
//! Every document is tagged with a controller owner reference to its NatPMP
//! before it is applied, so the cluster garbage collector removes it when the
//! NatPMP is deleted. Documents are applied one at a time with server-side
//! apply; there is no grouping across documents.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersion;
use kube::discovery::{pinned_kind, Scope};
use kube::{Client, Resource, ResourceExt};
use serde_json::Value;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use crate::crd::NatPMP;
use crate::template::DerivedDocument;
use crate::Error;

/// Capability to idempotently apply one document
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceApplier: Send + Sync {
    /// Force-apply `document` under `field_manager`
    ///
    /// Re-applying unchanged input is a no-op on the server.
    async fn apply(&self, document: &DerivedDocument, field_manager: &str) -> Result<(), Error>;
}

/// Applies documents with server-side apply, resolving types by discovery
pub struct ServerSideApplier {
    client: Client,
}

impl ServerSideApplier {
    /// Create an applier using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceApplier for ServerSideApplier {
    async fn apply(&self, document: &DerivedDocument, field_manager: &str) -> Result<(), Error> {
        let identity = DocumentIdentity::of(document)?;
        let fail = |message: String| Error::apply(identity.kind, identity.name, message);

        let gvk = identity
            .api_version
            .parse::<GroupVersion>()
            .map_err(|e| fail(format!("invalid apiVersion {:?}: {}", identity.api_version, e)))?
            .with_kind(identity.kind);

        let (resource, caps) = pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| fail(format!("unable to resolve {}: {}", identity.api_version, e)))?;

        if matches!(caps.scope, Scope::Cluster) {
            return Err(fail(
                "cluster-scoped resources cannot be owned by a NatPMP".to_string(),
            ));
        }
        let namespace = document
            .namespace()
            .ok_or_else(|| fail("missing metadata.namespace".to_string()))?;

        let object: DynamicObject = serde_json::from_value(document.as_value().clone())
            .map_err(|e| fail(format!("not a valid object: {}", e)))?;

        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);
        api.patch(
            identity.name,
            &PatchParams::apply(field_manager).force(),
            &Patch::Apply(&object),
        )
        .await
        .map_err(|e| fail(e.to_string()))?;

        info!(
            kind = %identity.kind,
            name = %identity.name,
            namespace = %namespace,
            "applied rendered document"
        );
        Ok(())
    }
}

/// The fields every applied document must carry
struct DocumentIdentity<'a> {
    api_version: &'a str,
    kind: &'a str,
    name: &'a str,
}

impl<'a> DocumentIdentity<'a> {
    fn of(document: &'a DerivedDocument) -> Result<Self, Error> {
        let kind = document.kind().unwrap_or_default();
        let name = document.name().unwrap_or_default();
        let missing = |field: &str| Error::apply(kind, name, format!("missing {field}"));

        Ok(Self {
            api_version: document.api_version().ok_or_else(|| missing("apiVersion"))?,
            kind: document.kind().ok_or_else(|| missing("kind"))?,
            name: document.name().ok_or_else(|| missing("metadata.name"))?,
        })
    }
}

/// Make `owner` the controller of `document`
///
/// A document without a namespace is placed in the owner's namespace. A
/// document in another namespace, or already controlled by another object,
/// is rejected. An existing reference to the same owner is replaced. The
/// reference blocks foreground deletion of the owner until the document is
/// gone.
pub fn set_controller_reference(document: &mut DerivedDocument, owner: &NatPMP) -> Result<(), Error> {
    let kind = document.kind().unwrap_or_default().to_string();
    let name = document.name().unwrap_or_default().to_string();
    let fail = |message: String| Error::apply(kind.as_str(), name.as_str(), message);

    let mut owner_ref = owner
        .controller_owner_ref(&())
        .ok_or_else(|| fail(format!("owner {} has no uid", owner.name_any())))?;
    owner_ref.block_owner_deletion = Some(true);
    let owner_namespace = owner
        .namespace()
        .ok_or_else(|| fail(format!("owner {} has no namespace", owner.name_any())))?;

    let metadata = document
        .metadata_mut()
        .ok_or_else(|| fail("metadata is not a mapping".to_string()))?;

    match metadata.get("namespace").and_then(Value::as_str) {
        None => {
            metadata.insert("namespace".to_string(), Value::String(owner_namespace));
        }
        Some(ns) if ns == owner_namespace => {}
        Some(ns) => {
            return Err(fail(format!(
                "cross-namespace owner references are disallowed: owner is in {owner_namespace}, document is in {ns}"
            )));
        }
    }

    let mut refs: Vec<OwnerReference> = match metadata.remove("ownerReferences") {
        None | Some(Value::Null) => Vec::new(),
        Some(existing) => serde_json::from_value(existing)
            .map_err(|e| fail(format!("invalid metadata.ownerReferences: {e}")))?,
    };

    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner_ref.uid)
    {
        return Err(fail(format!(
            "already controlled by {} {}",
            other.kind, other.name
        )));
    }

    refs.retain(|r| r.uid != owner_ref.uid);
    refs.push(owner_ref);
    metadata.insert("ownerReferences".to_string(), serde_json::to_value(refs)?);
    Ok(())
}
