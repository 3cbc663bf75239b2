// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Finalizer handling for Stack and Pipeline resources.
//!
//! Both kinds share a single finalizer (`herd.suse.com/finalizer`) and a
//! single teardown flow: owned Bundles are reaped before the finalizer is
//! released, so a deleted parent never orphans its Bundles. Only two
//! operations exist — stamping the finalizer on first observation and
//! running the cleanup-then-release sequence on deletion — and both write
//! through one shared metadata patch path.
//!
//! # Example
//!
//! ```rust,ignore
//! use herd::reconcilers::finalizers::{ensure_finalizer, handle_deletion, FinalizerCleanup};
//!
//! #[async_trait::async_trait]
//! impl FinalizerCleanup for Stack {
//!     async fn cleanup(&self, ctx: &Context) -> Result<()> {
//!         // Reap owned Bundles
//!         Ok(())
//!     }
//! }
//!
//! async fn reconcile(ctx: Arc<Context>, stack: Stack) -> Result<()> {
//!     if stack.metadata.deletion_timestamp.is_some() {
//!         return handle_deletion(&ctx, &stack).await;
//!     }
//!     ensure_finalizer(&ctx.client, &stack).await?;
//!     // Normal reconciliation...
//!     Ok(())
//! }
//! ```

use crate::context::Context;
use crate::labels::HERD_FINALIZER;
use anyhow::Result;
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::info;

/// Teardown that must complete before the finalizer is released.
///
/// If `cleanup` returns an error the finalizer stays in place and deletion
/// is retried on the next reconciliation.
#[async_trait::async_trait]
pub trait FinalizerCleanup: Resource + ResourceExt + Clone {
    /// Delete everything this resource owns (Bundles, markers).
    ///
    /// # Errors
    ///
    /// Should return an error while owned Bundles cannot be deleted or are
    /// still present; deletion is blocked until cleanup succeeds.
    async fn cleanup(&self, ctx: &Context) -> Result<()>;
}

fn has_finalizer<T: ResourceExt>(resource: &T) -> bool {
    resource.finalizers().iter().any(|f| f == HERD_FINALIZER)
}

/// Patch the resource's finalizer list. Shared by the stamp and release
/// paths so there is exactly one metadata write site.
async fn write_finalizers<T>(client: &Client, resource: &T, finalizers: Vec<String>) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let api: Api<T> = Api::namespaced(
        client.clone(),
        &resource.namespace().unwrap_or_default(),
    );
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(
        &resource.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Stamp the Herd finalizer onto a resource on first observation.
///
/// Idempotent: a resource that already carries the finalizer is left
/// untouched.
///
/// # Errors
///
/// Returns an error if the metadata patch fails.
pub async fn ensure_finalizer<T>(client: &Client, resource: &T) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    if has_finalizer(resource) {
        return Ok(());
    }

    info!(
        "Stamping finalizer on {} {}/{}",
        T::kind(&()),
        resource.namespace().unwrap_or_default(),
        resource.name_any()
    );

    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(HERD_FINALIZER.to_string());
    write_finalizers(client, resource, finalizers).await
}

/// Run teardown for a deleted resource, then release the finalizer so
/// Kubernetes can remove it.
///
/// A resource without the finalizer needs nothing from us; one with it gets
/// its [`FinalizerCleanup::cleanup`] run first, and the finalizer is only
/// released once cleanup succeeds.
///
/// # Errors
///
/// Returns an error if cleanup or the release patch fails; the finalizer
/// then remains and deletion is retried on a subsequent reconciliation.
pub async fn handle_deletion<T>(ctx: &Context, resource: &T) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + FinalizerCleanup
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();

    if !has_finalizer(resource) {
        // Nothing to release; Kubernetes finishes the delete on its own
        return Ok(());
    }

    info!(
        "Tearing down {} {}/{} before finalizer release",
        T::kind(&()),
        namespace,
        name
    );
    resource.cleanup(ctx).await?;

    let remaining: Vec<String> = resource
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != HERD_FINALIZER)
        .cloned()
        .collect();
    write_finalizers(&ctx.client, resource, remaining).await?;

    info!("Released finalizer on {} {}/{}", T::kind(&()), namespace, name);
    Ok(())
}
