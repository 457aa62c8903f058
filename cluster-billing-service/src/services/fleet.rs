//! Fleet-management API: users, projects, role bindings, and namespaces.

use crate::config::FleetApiConfig;
use crate::error::{BillingError, Upstream};
use crate::models::{
    FleetNamespace, FleetProject, FleetSnapshot, FleetUser, ProjectId, RoleBinding, PROJECT_LABEL,
};
use crate::services::upstream::fetch_json;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use service_core::observability::TracedClientExt;
use service_core::retry::{retry_call, RetryConfig};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{info, instrument, warn};

/// Upper bound on pages followed for one listing.
const MAX_PAGES: usize = 10_000;

/// Read access to fleet identities.
#[async_trait]
pub trait FleetSource: Send + Sync {
    async fn list_users(&self) -> Result<Vec<FleetUser>, BillingError>;
    async fn list_projects(&self) -> Result<Vec<FleetProject>, BillingError>;
    async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>, BillingError>;
    async fn list_clusters(&self) -> Result<Vec<String>, BillingError>;
    async fn list_namespaces(&self, cluster_id: &str) -> Result<Vec<FleetNamespace>, BillingError>;
}

/// Fetch everything a run correlates.
///
/// Users, projects, bindings and clusters must all be listed or the run
/// cannot proceed. Namespace listings run concurrently per cluster and a
/// failing cluster is recorded in `failed_clusters` instead of aborting.
#[instrument(skip(source, retry))]
pub async fn fetch_snapshot(
    source: &dyn FleetSource,
    retry: &RetryConfig,
    cluster_concurrency: usize,
) -> Result<FleetSnapshot, BillingError> {
    let (users, projects, bindings, clusters) = tokio::try_join!(
        retry_call(retry, "list_users", || source.list_users()),
        retry_call(retry, "list_projects", || source.list_projects()),
        retry_call(retry, "list_role_bindings", || source.list_role_bindings()),
        retry_call(retry, "list_clusters", || source.list_clusters()),
    )?;

    let listings: Vec<_> = stream::iter(clusters)
        .map(|cluster_id| async move {
            let result =
                retry_call(retry, "list_namespaces", || source.list_namespaces(&cluster_id)).await;
            (cluster_id, result)
        })
        .buffer_unordered(cluster_concurrency.max(1))
        .collect()
        .await;

    let mut cluster_namespaces = BTreeMap::new();
    let mut failed_clusters = BTreeMap::new();
    for (cluster_id, result) in listings {
        match result {
            Ok(namespaces) => {
                cluster_namespaces.insert(cluster_id, namespaces);
            }
            Err(e) => {
                warn!(cluster_id = %cluster_id, error = %e, "Namespace listing failed, cluster skipped");
                failed_clusters.insert(cluster_id, e.to_string());
            }
        }
    }

    info!(
        users = users.len(),
        projects = projects.len(),
        bindings = bindings.len(),
        clusters = cluster_namespaces.len(),
        failed_clusters = failed_clusters.len(),
        "Fleet snapshot fetched"
    );

    Ok(FleetSnapshot {
        users,
        projects,
        bindings,
        cluster_namespaces,
        failed_clusters,
    })
}

/// One page of a fleet collection.
#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Pagination {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
}

/// Follow `next` links until the collection is complete.
///
/// When the API reports a `total`, stopping short of it (an empty page or a
/// missing `next` link) is an error rather than a truncated list.
pub(crate) async fn collect_pages<T, F, Fut>(
    upstream: Upstream,
    context: &str,
    mut fetch_page: F,
) -> Result<Vec<T>, BillingError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, BillingError>>,
{
    let mut items = Vec::new();
    let mut next = None;

    for page_number in 1..=MAX_PAGES {
        let page = fetch_page(next.take()).await?;
        let fetched = page.data.len();
        items.extend(page.data);
        let pagination = page.pagination.unwrap_or_default();

        match pagination.total {
            Some(total) if items.len() as u64 >= total => return Ok(items),
            Some(total) => {
                if fetched == 0 {
                    return Err(BillingError::malformed(
                        upstream,
                        context,
                        format!("page {} was empty after {} of {} items", page_number, items.len(), total),
                    ));
                }
                match pagination.next {
                    Some(url) => next = Some(url),
                    None => {
                        return Err(BillingError::malformed(
                            upstream,
                            context,
                            format!("pagination ended after {} of {} items", items.len(), total),
                        ))
                    }
                }
            }
            None => match pagination.next {
                Some(_) if fetched == 0 => {
                    return Err(BillingError::malformed(
                        upstream,
                        context,
                        format!("page {} was empty but links to another page", page_number),
                    ))
                }
                Some(url) => next = Some(url),
                None => return Ok(items),
            },
        }
    }

    Err(BillingError::malformed(
        upstream,
        context,
        format!("more than {} pages", MAX_PAGES),
    ))
}

#[derive(Debug, Deserialize)]
struct RancherUser {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RancherProject {
    id: String,
    #[serde(default)]
    cluster_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RancherRoleBinding {
    #[serde(default)]
    user_id: Option<String>,
    project_id: String,
}

#[derive(Debug, Deserialize)]
struct RancherCluster {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RancherNamespace {
    id: String,
    #[serde(default)]
    metadata: NamespaceMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct NamespaceMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

/// Client for the Rancher v3 and per-cluster Kubernetes proxy APIs.
#[derive(Clone)]
pub struct RancherClient {
    client: reqwest::Client,
    base_url: String,
    token: Secret<String>,
    page_size: u32,
}

impl RancherClient {
    pub fn new(config: &FleetApiConfig) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BillingError::Config(format!("failed to build fleet API client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.bearer_token.clone(),
            page_size: config.page_size,
        })
    }

    async fn list_all<T: DeserializeOwned>(&self, path: &str, operation: &str) -> Result<Vec<T>, BillingError> {
        let first_url = format!("{}{}", self.base_url, path);
        let context = format!("listing {}", path);
        let page_size = self.page_size.to_string();

        collect_pages(Upstream::FleetManagement, &context, |next: Option<String>| {
            let request = match next {
                Some(url) => self.client.traced_get(&url),
                None => self
                    .client
                    .traced_get(&first_url)
                    .query(&[("limit", page_size.as_str())]),
            }
            .bearer_auth(self.token.expose_secret());
            let context = context.clone();
            async move {
                fetch_json::<Page<T>>(Upstream::FleetManagement, operation, &context, request).await
            }
        })
        .await
    }
}

#[async_trait]
impl FleetSource for RancherClient {
    #[instrument(skip(self))]
    async fn list_users(&self) -> Result<Vec<FleetUser>, BillingError> {
        let users: Vec<RancherUser> = self.list_all("/v3/users", "list_users").await?;
        Ok(users
            .into_iter()
            .map(|u| FleetUser {
                id: u.id,
                username: u.username,
                enabled: u.enabled.unwrap_or(true),
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> Result<Vec<FleetProject>, BillingError> {
        let projects: Vec<RancherProject> = self.list_all("/v3/projects", "list_projects").await?;
        Ok(projects.into_iter().filter_map(convert_project).collect())
    }

    #[instrument(skip(self))]
    async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>, BillingError> {
        let bindings: Vec<RancherRoleBinding> = self
            .list_all("/v3/projectRoleTemplateBindings", "list_role_bindings")
            .await?;
        Ok(bindings.into_iter().filter_map(convert_binding).collect())
    }

    #[instrument(skip(self))]
    async fn list_clusters(&self) -> Result<Vec<String>, BillingError> {
        let clusters: Vec<RancherCluster> = self.list_all("/v3/clusters", "list_clusters").await?;
        Ok(clusters.into_iter().map(|c| c.id).collect())
    }

    #[instrument(skip(self))]
    async fn list_namespaces(&self, cluster_id: &str) -> Result<Vec<FleetNamespace>, BillingError> {
        let path = format!("/k8s/clusters/{}/v1/namespaces", cluster_id);
        let namespaces: Vec<RancherNamespace> = self.list_all(&path, "list_namespaces").await?;
        Ok(namespaces
            .into_iter()
            .map(|ns| {
                let mut metadata = ns.metadata;
                FleetNamespace {
                    name: metadata.name.take().unwrap_or(ns.id),
                    project_label: metadata.labels.remove(PROJECT_LABEL),
                }
            })
            .collect())
    }
}

fn convert_project(project: RancherProject) -> Option<FleetProject> {
    let id = match ProjectId::parse(&project.id) {
        Ok(id) => id,
        Err(e) => {
            warn!(project_id = %project.id, error = %e, "Skipping project with malformed id");
            return None;
        }
    };
    if let Some(cluster_id) = project.cluster_id.as_deref() {
        if cluster_id != id.cluster_id() {
            warn!(
                project_id = %id,
                cluster_id = %cluster_id,
                "Project id and clusterId disagree, using the id"
            );
        }
    }
    Some(FleetProject {
        name: project.name.unwrap_or_else(|| id.bare().to_string()),
        id,
    })
}

fn convert_binding(binding: RancherRoleBinding) -> Option<RoleBinding> {
    // Group bindings carry no user.
    let user_id = binding.user_id.filter(|id| !id.is_empty())?;
    match ProjectId::parse(&binding.project_id) {
        Ok(project_id) => Some(RoleBinding { user_id, project_id }),
        Err(e) => {
            warn!(
                user_id = %user_id,
                project_id = %binding.project_id,
                error = %e,
                "Skipping role binding with malformed project id"
            );
            None
        }
    }
}
