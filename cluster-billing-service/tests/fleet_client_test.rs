//! Rancher client against a mock fleet-management API.

use cluster_billing_service::config::FleetApiConfig;
use cluster_billing_service::error::{BillingError, Upstream};
use cluster_billing_service::models::ProjectId;
use cluster_billing_service::services::{FleetSource, RancherClient};
use secrecy::Secret;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "token-abc:secret";

fn client(server: &MockServer) -> RancherClient {
    RancherClient::new(&FleetApiConfig {
        url: format!("{}/", server.uri()),
        bearer_token: Secret::new(TOKEN.to_string()),
        page_size: 2,
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn follows_pagination_with_bearer_auth() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v3/users"))
        .and(query_param("limit", "2"))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "u-1", "username": "alice", "enabled": true },
                { "id": "u-2", "username": "bob", "enabled": false }
            ],
            "pagination": { "total": 3, "next": format!("{}/v3/users?marker=u-2", server.uri()) }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v3/users"))
        .and(query_param("marker", "u-2"))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "u-3" }],
            "pagination": { "total": 3 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let users = client(&server).list_users().await.unwrap();

    let ids: Vec<_> = users.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["u-1", "u-2", "u-3"]);
    assert!(!users[1].enabled);
    assert!(users[2].enabled);
    assert_eq!(users[2].username, None);
}

#[tokio::test]
async fn truncated_pagination_is_malformed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v3/clusters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "c-1" }],
            "pagination": { "total": 4 }
        })))
        .mount(&server)
        .await;

    let err = client(&server).list_clusters().await.unwrap_err();
    assert!(matches!(
        err,
        BillingError::MalformedResponse {
            upstream: Upstream::FleetManagement,
            ..
        }
    ));
}

#[tokio::test]
async fn projects_keep_composite_ids_and_skip_malformed_ones() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v3/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "c-1:p-abc", "clusterId": "c-1", "name": "Team A" },
                { "id": "no-separator", "clusterId": "c-1" }
            ]
        })))
        .mount(&server)
        .await;

    let projects = client(&server).list_projects().await.unwrap();

    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].id, ProjectId::parse("c-1:p-abc").unwrap());
    assert_eq!(projects[0].name, "Team A");
}

#[tokio::test]
async fn group_role_bindings_are_ignored() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v3/projectRoleTemplateBindings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "userId": "u-1", "projectId": "c-1:p-abc" },
                { "groupPrincipalId": "okta_group://eng", "projectId": "c-1:p-abc" }
            ]
        })))
        .mount(&server)
        .await;

    let bindings = client(&server).list_role_bindings().await.unwrap();

    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].user_id, "u-1");
}

#[tokio::test]
async fn namespaces_carry_their_project_label() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/k8s/clusters/c-1/v1/namespaces"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "id": "team-a",
                    "metadata": {
                        "name": "team-a",
                        "labels": { "field.cattle.io/projectId": "p-abc", "other": "x" }
                    }
                },
                { "id": "kube-system", "metadata": { "name": "kube-system" } }
            ]
        })))
        .mount(&server)
        .await;

    let namespaces = client(&server).list_namespaces("c-1").await.unwrap();

    assert_eq!(namespaces.len(), 2);
    assert_eq!(namespaces[0].name, "team-a");
    assert_eq!(namespaces[0].project_label.as_deref(), Some("p-abc"));
    assert_eq!(namespaces[1].project_label, None);
}

#[tokio::test]
async fn server_errors_are_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v3/users"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let err = client(&server).list_users().await.unwrap_err();
    assert!(matches!(err, BillingError::SourceUnavailable { .. }));
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v3/users"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client(&server).list_users().await.unwrap_err();
    assert!(matches!(
        err,
        BillingError::Unauthorized {
            upstream: Upstream::FleetManagement,
            ..
        }
    ));
}
