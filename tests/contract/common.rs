use connector::ApiClient;
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(&server.uri()).expect("mock server URI is valid")
}

pub fn user_json(name: &str, username: &str) -> Value {
    json!({
        "name": name,
        "username": username,
        "profile_picture": null,
    })
}

/// Serve `GET /auth` for requests carrying `Bearer <token>`.
pub async fn mount_user(server: &MockServer, token: &str, name: &str, username: &str) {
    Mock::given(method("GET"))
        .and(path("/auth"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json(name, username)))
        .mount(server)
        .await;
}

/// Count received requests to `path_`, optionally only those with the given
/// authorization header value.
pub async fn count_requests(server: &MockServer, path_: &str, authorization: Option<&str>) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == path_)
        .filter(|r| match authorization {
            Some(expected) => r
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                == Some(expected),
            None => true,
        })
        .count()
}
