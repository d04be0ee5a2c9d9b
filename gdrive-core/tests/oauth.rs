use gdrive_core::{ClientSecrets, DRIVE_READONLY_SCOPE, OAuthClient, OAuthError};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn authorize_url_includes_required_params() {
    let client = OAuthClient::with_base_url("https://oauth.example", "client-id", "secret")
        .expect("client should build");
    let url = client
        .authorize_url(
            "urn:ietf:wg:oauth:2.0:oob",
            DRIVE_READONLY_SCOPE,
            Some("state-1"),
        )
        .expect("url should build");

    assert_eq!(url.path(), "/o/oauth2/auth");
    let query = url.query().unwrap_or_default();
    assert!(query.contains("response_type=code"));
    assert!(query.contains("client_id=client-id"));
    assert!(query.contains("redirect_uri=urn%3Aietf%3Awg%3Aoauth%3A2.0%3Aoob"));
    assert!(query.contains("scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fdrive.readonly"));
    assert!(query.contains("access_type=offline"));
    assert!(query.contains("state=state-1"));
}

#[tokio::test]
async fn exchange_code_posts_form_data() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/o/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .and(body_string_contains("client_id=client-id"))
        .and(body_string_contains("client_secret=secret"))
        .and(body_string_contains(
            "redirect_uri=urn%3Aietf%3Awg%3Aoauth%3A2.0%3Aoob",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "refresh"
        })))
        .mount(&server)
        .await;

    let client = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
    let token = client
        .exchange_code("auth-code", "urn:ietf:wg:oauth:2.0:oob")
        .await
        .unwrap();

    assert_eq!(token.access_token, "token");
    assert_eq!(token.token_type, "Bearer");
    assert_eq!(token.expires_in, Some(3600));
    assert_eq!(token.refresh_token.as_deref(), Some("refresh"));
}

#[tokio::test]
async fn refresh_token_reports_api_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/o/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .mount(&server)
        .await;

    let client = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
    let err = client.refresh_token("stale").await.unwrap_err();

    match err {
        OAuthError::Api { status, body } => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(body, "invalid_grant");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn client_secrets_reads_installed_section() {
    let secrets = ClientSecrets::from_json(
        r#"{"installed":{"client_id":"id","client_secret":"s","redirect_uris":["http://localhost"]}}"#,
    )
    .unwrap();

    assert_eq!(secrets.client_id, "id");
    assert_eq!(secrets.redirect_uri(), "http://localhost");
}

#[test]
fn client_secrets_defaults_to_out_of_band_redirect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client_secrets.json");
    std::fs::write(&path, r#"{"web":{"client_id":"id","client_secret":"s"}}"#).unwrap();

    let secrets = ClientSecrets::from_file(&path).unwrap();
    assert_eq!(secrets.redirect_uri(), "urn:ietf:wg:oauth:2.0:oob");
}

#[test]
fn client_secrets_without_known_section_is_rejected() {
    let err = ClientSecrets::from_json(r#"{"other":{}}"#).unwrap_err();
    assert!(matches!(err, OAuthError::MissingSecretsSection));
}
