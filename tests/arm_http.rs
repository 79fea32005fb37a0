//! Integration tests for the ARM client using wiremock
//!
//! These tests drive [`ArmClient`] and the reconciler against mocked
//! management endpoints: status classification, request metadata and the
//! create/read/delete flows end to end.

use std::sync::Arc;
use std::time::Duration;

use azmon::azure::{ApiError, ArmClient, RemoteApi};
use azmon::bag::{ConfigBag, ConfigStore};
use azmon::identity::{DiagnosticSettingId, Identity, ResourceId};
use azmon::monitor::{ActionGroupKind, DiagnosticSettingKind};
use azmon::reconciler::{ReconcileOptions, Reconciler, Scope, WaitPolicy};
use azmon::ReconcileError;
use serde_json::{json, Value};
use wiremock::matchers::{bearer_token, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GROUP_PATH: &str =
    "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Insights/actionGroups/oncall";
const VAULT: &str = "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv";

fn group_id() -> ResourceId {
    ResourceId::new("sub-1", "rg", "actionGroups", "oncall").unwrap()
}

fn group_body() -> Value {
    json!({
        "id": GROUP_PATH,
        "location": "global",
        "tags": {"team": "sre"},
        "properties": {
            "groupShortName": "oncall",
            "enabled": true,
            "emailReceivers": [
                {"name": "ops", "emailAddress": "ops@example.com", "useCommonAlertSchema": true}
            ],
            "smsReceivers": null
        }
    })
}

fn group_config() -> ConfigBag {
    ConfigBag::from_value(json!({
        "name": "oncall",
        "resource_group_name": "rg",
        "short_name": "oncall",
        "email_receiver": [
            {"name": "ops", "email_address": "ops@example.com", "use_common_alert_schema": true}
        ],
        "tags": {"team": "sre"}
    }))
    .unwrap()
}

fn client(server: &MockServer) -> ArmClient {
    ArmClient::new(&server.uri(), "test-token").unwrap()
}

fn fast_options() -> ReconcileOptions {
    ReconcileOptions {
        create_wait: WaitPolicy {
            required_hits: 1,
            min_interval: Duration::from_millis(10),
        },
        delete_wait: WaitPolicy {
            required_hits: 2,
            min_interval: Duration::from_millis(10),
        },
        ..Default::default()
    }
}

fn group_reconciler(server: &MockServer) -> Reconciler<ActionGroupKind> {
    let api: Arc<dyn RemoteApi<ActionGroupKind>> = Arc::new(client(server));
    Reconciler::new(api, Scope::new("sub-1"), fast_options())
}

/// Test module for the raw client contract
mod client_tests {
    use super::*;

    /// GET sends the token, api-version and a client request id
    #[tokio::test]
    async fn test_get_decodes_model() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .and(query_param("api-version", "2023-01-01"))
            .and(bearer_token("test-token"))
            .and(header_exists("x-ms-client-request-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(group_body()))
            .expect(1)
            .mount(&server)
            .await;

        let group = RemoteApi::<ActionGroupKind>::get(&client(&server), &group_id())
            .await
            .expect("GET should succeed");

        assert_eq!(group.properties.group_short_name, "oncall");
        assert_eq!(group.properties.email_receivers.len(), 1);
        assert!(group.properties.sms_receivers.is_empty());
    }

    /// 404 is classified as NotFound and keeps the service request id
    #[tokio::test]
    async fn test_404_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .respond_with(
                ResponseTemplate::new(404)
                    .insert_header("x-ms-request-id", "req-404")
                    .set_body_json(json!({
                        "error": {"code": "ResourceNotFound", "message": "not here"}
                    })),
            )
            .mount(&server)
            .await;

        let err = RemoteApi::<ActionGroupKind>::get(&client(&server), &group_id())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ApiError::NotFound {
                request_id: Some("req-404".to_string())
            }
        );
    }

    /// Error envelopes surface code and message
    #[tokio::test]
    async fn test_error_envelope_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(GROUP_PATH))
            .respond_with(
                ResponseTemplate::new(400)
                    .insert_header("x-ms-request-id", "req-400")
                    .set_body_json(json!({
                        "error": {"code": "InvalidRequest", "message": "groupShortName too long"}
                    })),
            )
            .mount(&server)
            .await;

        let model = serde_json::from_value(group_body()).unwrap();
        let err = RemoteApi::<ActionGroupKind>::create_or_update(&client(&server), &group_id(), &model)
            .await
            .unwrap_err();

        match err {
            ApiError::Remote {
                status,
                code,
                message,
                request_id,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "InvalidRequest");
                assert_eq!(message, "groupShortName too long");
                assert_eq!(request_id.as_deref(), Some("req-400"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    /// A PUT answered without a body echoes the request model
    #[tokio::test]
    async fn test_put_without_body_returns_request() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let model = serde_json::from_value(group_body()).unwrap();
        let echoed =
            RemoteApi::<ActionGroupKind>::create_or_update(&client(&server), &group_id(), &model)
                .await
                .unwrap();

        assert_eq!(echoed, model);
    }

    /// Unparseable bodies are decode errors, not transport errors
    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"location\": 5"))
            .mount(&server)
            .await;

        let err = RemoteApi::<ActionGroupKind>::get(&client(&server), &group_id())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    /// Deleting an absent resource (204) succeeds
    #[tokio::test]
    async fn test_delete_no_content() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        RemoteApi::<ActionGroupKind>::delete(&client(&server), &group_id())
            .await
            .expect("DELETE should succeed");
    }
}

/// Test module for reconciler flows over HTTP
mod reconcile_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_writes_observed_state() {
        let server = MockServer::start().await;

        // existence check, then the read-back after the write
        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(group_body()))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(group_body()))
            .expect(1)
            .mount(&server)
            .await;

        let mut bag = group_config();
        group_reconciler(&server).create(&mut bag).await.unwrap();

        assert_eq!(bag.id(), Some(group_id().encode().unwrap().as_str()));
        let state = bag.as_map();
        assert_eq!(state["location"], json!("global"));
        assert_eq!(state["email_receiver"][0]["email_address"], json!("ops@example.com"));
    }

    #[tokio::test]
    async fn test_create_refuses_existing_resource() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(group_body()))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut bag = group_config();
        let err = group_reconciler(&server).create(&mut bag).await.unwrap_err();

        assert!(matches!(err, ReconcileError::AlreadyExists { .. }));
        assert!(!bag.exists());
    }

    #[tokio::test]
    async fn test_read_of_missing_resource_clears_state() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut bag = ConfigBag::from_value(json!({"id": GROUP_PATH, "name": "oncall"})).unwrap();
        group_reconciler(&server).read(&mut bag).await.unwrap();

        assert_eq!(bag, ConfigBag::new());
    }

    #[tokio::test]
    async fn test_read_surfaces_server_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut bag = ConfigBag::from_value(json!({"id": GROUP_PATH})).unwrap();
        let err = group_reconciler(&server).read(&mut bag).await.unwrap_err();

        assert!(matches!(err, ReconcileError::Remote { .. }));
        assert!(bag.exists());
    }

    #[tokio::test]
    async fn test_diagnostic_delete_waits_for_absence() {
        let server = MockServer::start().await;
        let id = DiagnosticSettingId::new(VAULT, "audit").unwrap();
        let setting_path = id.resource_path();

        Mock::given(method("DELETE"))
            .and(path(setting_path.as_str()))
            .and(query_param("api-version", "2021-05-01-preview"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(setting_path.as_str()))
            .respond_with(ResponseTemplate::new(404))
            .expect(2..)
            .mount(&server)
            .await;

        let api: Arc<dyn RemoteApi<DiagnosticSettingKind>> = Arc::new(client(&server));
        let reconciler = Reconciler::new(api, Scope::new("sub-1"), fast_options());

        let mut bag =
            ConfigBag::from_value(json!({"id": id.encode().unwrap(), "name": "audit"})).unwrap();
        reconciler.delete(&mut bag).await.unwrap();
    }
}
