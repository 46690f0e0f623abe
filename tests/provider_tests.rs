/// Provider adapter tests with mocked upstream HTTP services.
/// Covers URL template substitution, status handling and the
/// geolocation fallback chain without hitting real providers.
use lookup_broker::config::Config;
use lookup_broker::models::Service;
use lookup_broker::providers::{HttpProviders, ProviderDispatch};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create a config whose provider templates point at
/// the mock server.
fn test_config(base: &str) -> Config {
    Config {
        database_url: "postgres://localhost/test".to_string(),
        port: 3000,
        auth_secret: "test-secret".to_string(),
        admin_token: Some("test-admin-token".to_string()),
        mobile_api_url: format!("{}/mobile?num={{query}}", base),
        vehicle_api_url: format!("{}/vehicle/{{query}}", base),
        ip_api_url: format!("{}/ip/{{query}}", base),
        ip_fallback_api_url: format!("{}/ip-fallback/{{query}}", base),
        national_id_api_url: None,
        retry_max_attempts: 3,
        retry_backoff_ms: 0,
        lookup_deadline_secs: 5,
        cache_ttl_secs: None,
    }
}

#[tokio::test]
async fn mobile_template_substitutes_the_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/mobile"))
        .and(query_param("num", "9876543210"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "Asha Rao",
            "operator": "Jio"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let providers = HttpProviders::new(&test_config(&mock_server.uri())).unwrap();
    let payload = providers
        .fetch(Service::Mobile, "9876543210")
        .await
        .unwrap();

    assert_eq!(payload["operator"], "Jio");
}

#[tokio::test]
async fn vehicle_template_substitutes_into_the_path() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/vehicle/MH12AB1234"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "rc_number": "MH12AB1234",
            "owner_name": "Asha Rao"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let providers = HttpProviders::new(&test_config(&mock_server.uri())).unwrap();
    let payload = providers
        .fetch(Service::Vehicle, "MH12AB1234")
        .await
        .unwrap();

    assert_eq!(payload["rc_number"], "MH12AB1234");
}

#[tokio::test]
async fn non_success_status_is_a_transport_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/mobile"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let providers = HttpProviders::new(&test_config(&mock_server.uri())).unwrap();
    let result = providers.fetch(Service::Mobile, "9876543210").await;

    let error = result.unwrap_err();
    assert!(error.to_string().contains("500"));
}

#[tokio::test]
async fn unparseable_body_is_a_transport_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/mobile"))
        .respond_with(ResponseTemplate::new(200).set_body_string("definitely not json"))
        .mount(&mock_server)
        .await;

    let providers = HttpProviders::new(&test_config(&mock_server.uri())).unwrap();
    let result = providers.fetch(Service::Mobile, "9876543210").await;

    assert!(result.is_err());
}

#[tokio::test]
async fn ip_lookup_falls_back_when_the_primary_fails() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ip/8.8.8.8"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ip-fallback/8.8.8.8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "country": "United States",
            "isp": "Google LLC"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let providers = HttpProviders::new(&test_config(&mock_server.uri())).unwrap();
    let payload = providers.fetch(Service::Ip, "8.8.8.8").await.unwrap();

    assert_eq!(payload["country"], "United States");
}

#[tokio::test]
async fn ip_primary_success_skips_the_fallback() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ip/1.1.1.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "country": "Australia"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ip-fallback/1.1.1.1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let providers = HttpProviders::new(&test_config(&mock_server.uri())).unwrap();
    let payload = providers.fetch(Service::Ip, "1.1.1.1").await.unwrap();

    assert_eq!(payload["country"], "Australia");
}

#[tokio::test]
async fn missing_national_id_provider_serves_a_masked_record() {
    // No server involved: with no provider configured the adapter
    // answers locally with a masked record.
    let providers = HttpProviders::new(&test_config("http://example.invalid")).unwrap();
    let payload = providers
        .fetch(Service::NationalId, "1234567890123456")
        .await
        .unwrap();

    assert_eq!(payload["number"], "XXXXXXXXXXXX3456");
    assert_eq!(payload["status"], "registered");
}

#[tokio::test]
async fn configured_national_id_provider_is_called() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/nid/1234567890123456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "active",
            "state": "Maharashtra"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = test_config(&mock_server.uri());
    config.national_id_api_url = Some(format!("{}/nid/{{query}}", mock_server.uri()));

    let providers = HttpProviders::new(&config).unwrap();
    let payload = providers
        .fetch(Service::NationalId, "1234567890123456")
        .await
        .unwrap();

    assert_eq!(payload["state"], "Maharashtra");
}
