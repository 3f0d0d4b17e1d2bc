//! # Apply Engine
//!
//! Idempotent create-or-replace over decoded manifest documents, in manifest
//! order. The caller owns ordering: later documents may depend on earlier
//! ones (a webhook registration on a namespace, a Certificate on its Issuer),
//! and the engine applies strictly sequentially with no dependency graph.
//!
//! Each [`Applier`] holds discovery data for one apply batch. Discovery is
//! fetched once when the batch starts and reused for every document in it;
//! a new batch (e.g. the next manifest file, which may carry CRDs installed
//! by the previous one) gets a fresh [`Applier`].
//!
//! Failure semantics: the first error aborts the remaining documents and is
//! surfaced as [`Error::PartialApply`] with the number of documents already
//! written. Nothing is rolled back and nothing is retried; re-running the
//! batch is safe because each document is an idempotent upsert. A replace
//! carries forward the resourceVersion returned by the fetch, as the API
//! server requires; an object modified by another actor between fetch and
//! replace is overwritten without detection — an accepted limitation.

use kube::api::{Api, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::discovery::{Discovery, Scope};
use kube::Client;
use tracing::info;

use crate::error::{Error, Result};

pub struct Applier {
    client: Client,
    discovery: Discovery,
}

impl Applier {
    /// Start an apply batch: fetch the cluster's API discovery data once.
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self { client, discovery })
    }

    /// Apply every object in manifest order, aborting on the first failure.
    pub async fn apply_all(&self, objects: &[DynamicObject]) -> Result<()> {
        for (applied, object) in objects.iter().enumerate() {
            self.apply(object).await.map_err(|source| {
                let kind = object
                    .types
                    .as_ref()
                    .map_or("<unknown kind>", |t| t.kind.as_str());
                let name = object.metadata.name.as_deref().unwrap_or("<unnamed>");
                Error::PartialApply {
                    applied,
                    name: format!("{kind}/{name}"),
                    source: Box::new(source),
                }
            })?;
        }
        Ok(())
    }

    /// Create-or-replace one object: fetch by name, create on 404, replace
    /// otherwise with the fetched resourceVersion carried forward.
    async fn apply(&self, object: &DynamicObject) -> Result<()> {
        let types = object
            .types
            .as_ref()
            .ok_or_else(|| Error::Schema("document is missing apiVersion/kind".to_string()))?;
        let gvk = GroupVersionKind::try_from(types)
            .map_err(|e| Error::Schema(e.to_string()))?;

        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::Schema(format!("{} document has no metadata.name", gvk.kind)))?;

        let (resource, scope) = self.resolve(&gvk)?;
        let api = self.api_for(&resource, scope, object);

        match api.get(name).await {
            Ok(existing) => {
                let mut desired = object.clone();
                desired.metadata.resource_version = existing.metadata.resource_version;
                api.replace(name, &PostParams::default(), &desired).await?;
                info!(kind = %gvk.kind, name, "replaced");
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                api.create(&PostParams::default(), object).await?;
                info!(kind = %gvk.kind, name, "created");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Resolve a GVK against the batch's discovery data.
    fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, Scope)> {
        self.discovery
            .resolve_gvk(gvk)
            .map(|(resource, caps)| (resource, caps.scope))
            .ok_or_else(|| Error::UnknownResourceKind {
                gvk: format!("{}/{}", gvk.api_version(), gvk.kind),
            })
    }

    fn api_for(
        &self,
        resource: &ApiResource,
        scope: Scope,
        object: &DynamicObject,
    ) -> Api<DynamicObject> {
        match scope {
            Scope::Namespaced => {
                let namespace = object.metadata.namespace.as_deref().unwrap_or("default");
                Api::namespaced_with(self.client.clone(), namespace, resource)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), resource),
        }
    }
}
