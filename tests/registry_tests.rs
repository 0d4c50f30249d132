use anyhow::Result;
use notification_pipeline::{
    clients::registry::RegistryClient,
    error::{ErrorKind, PipelineError},
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// Test: The first catalog entry wins and its service address is preferred
#[tokio::test]
async fn test_resolve_uses_first_entry() -> Result<()> {
    let catalog = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog/service/user-service"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "Address": "10.0.0.1", "ServiceAddress": "user-service", "ServicePort": 3001 },
            { "Address": "10.0.0.2", "ServiceAddress": "", "ServicePort": 3002 }
        ])))
        .expect(1)
        .mount(&catalog)
        .await;

    let registry = RegistryClient::new(format!("{}/v1/", catalog.uri()))?;
    let endpoint = registry.resolve("user-service").await?;

    assert_eq!(endpoint.name, "user-service");
    assert_eq!(endpoint.address, "user-service");
    assert_eq!(endpoint.port, 3001);
    assert_eq!(endpoint.url_for("api/v1/users"), "http://user-service:3001/api/v1/users");

    Ok(())
}

/// Test: A blank service address falls back to the node address
#[tokio::test]
async fn test_resolve_falls_back_to_node_address() -> Result<()> {
    let catalog = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog/service/template-service"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "Address": "10.0.0.7", "ServicePort": 3002 }
        ])))
        .mount(&catalog)
        .await;

    let registry = RegistryClient::new(format!("{}/v1", catalog.uri()))?;
    let endpoint = registry.resolve("template-service").await?;

    assert_eq!(endpoint.base_url(), "http://10.0.0.7:3002");
    Ok(())
}

/// Test: An empty catalog means the service is not registered
#[tokio::test]
async fn test_resolve_empty_catalog_is_not_found() -> Result<()> {
    let catalog = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog/service/push-service"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&catalog)
        .await;

    let registry = RegistryClient::new(format!("{}/v1", catalog.uri()))?;
    let err = registry.resolve("push-service").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("push-service"));
    Ok(())
}

/// Test: An unreachable catalog is reported as discovery failure
#[tokio::test]
async fn test_resolve_unreachable_catalog() -> Result<()> {
    let registry = RegistryClient::new("http://127.0.0.1:1/v1")?;
    let err = registry.resolve("user-service").await.unwrap_err();

    assert!(matches!(
        &err,
        PipelineError::DiscoveryUnavailable { service, .. } if service == "user-service"
    ));
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    Ok(())
}

/// Test: A failing catalog is reported as discovery failure
#[tokio::test]
async fn test_resolve_catalog_error_status() -> Result<()> {
    let catalog = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&catalog)
        .await;

    let registry = RegistryClient::new(format!("{}/v1", catalog.uri()))?;
    let err = registry.resolve("user-service").await.unwrap_err();

    assert!(matches!(err, PipelineError::DiscoveryUnavailable { .. }));
    Ok(())
}
