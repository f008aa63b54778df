use std::time::Duration;

use connector::auth::{Gender, LoginSession, NewUserDetails};
use connector::net::REFRESH_PATH;
use connector::{Error, ErrorKind, RefreshError, Session};
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{client, mount_user};

async fn authenticated_session(server: &MockServer) -> Session {
    mount_user(server, "T1", "Ada Lovelace", "ada").await;
    let session = Session::new(client(server));
    session.api().store().set_token("T1");
    assert!(session.fetch_user().await.is_some());
    assert!(session.is_authenticated());
    session
}

#[tokio::test]
async fn test_new_user_login_and_onboarding() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login/email"))
        .and(body_json(json!({ "email": "user@example.com" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "token": "T1", "is_new_user": true })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/verify/email"))
        .and(body_json(json!({
            "token": "T1",
            "verification_code": "123456",
            "is_new_user": true,
            "name": "Ada",
            "username": "ada",
            "gender": "female",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "AT1" })))
        .expect(1)
        .mount(&server)
        .await;
    mount_user(&server, "AT1", "Ada", "ada").await;

    let session = Session::new(client(&server));
    let login = session.request_login(" user@example.com ").await.unwrap();
    assert_eq!(
        login,
        LoginSession {
            login_token: "T1".into(),
            is_new_user: true,
        }
    );

    let result = session
        .verify_login(
            &login.login_token,
            "123456",
            login.is_new_user,
            Some(NewUserDetails {
                name: "Ada".into(),
                username: "ada".into(),
                gender: Gender::Female,
            }),
        )
        .await
        .unwrap();

    assert!(result.is_new_user);
    assert_eq!(result.user.unwrap().username, "ada");
    assert!(session.is_authenticated());
    assert_eq!(session.user().unwrap().name, "Ada");
    assert_eq!(session.api().store().token().unwrap().as_str(), "AT1");
    assert!(session.api().store().refresh_credential_may_exist());
}

#[tokio::test]
async fn test_existing_user_verify_omits_details() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/verify/email"))
        .and(body_json(json!({
            "token": "T1",
            "verification_code": "654321",
            "is_new_user": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "AT2" })))
        .expect(1)
        .mount(&server)
        .await;
    mount_user(&server, "AT2", "Grace", "grace").await;

    let session = Session::new(client(&server));
    let result = session
        .verify_login("T1", "654321", false, None)
        .await
        .unwrap();
    assert!(!result.is_new_user);
    assert_eq!(result.user.unwrap().username, "grace");
}

#[tokio::test]
async fn test_request_login_backend_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login/email"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad email"))
        .mount(&server)
        .await;

    let session = Session::new(client(&server));
    let err = session.request_login("user@example.com").await.unwrap_err();
    assert!(matches!(err, Error::Http { status: 400, .. }));
    assert_eq!(err.kind(), ErrorKind::Request);
    assert_eq!(err.user_message(), "Request failed. Please reload and try again.");
}

#[tokio::test]
async fn test_validation_errors_never_reach_the_network() {
    let server = MockServer::start().await;
    let session = Session::new(client(&server));

    assert!(matches!(
        session.request_login("user@").await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        session.check_username("no spaces").await,
        Err(Error::Validation(_))
    ));
    let err = session
        .verify_login(
            "T1",
            "123456",
            true,
            Some(NewUserDetails {
                name: "A".into(),
                username: "ada".into(),
                gender: Gender::Male,
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "Name is too short.");

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_check_username_availability() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/attempt/username"))
        .and(body_json(json!({ "username": "ada" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "available": false })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/attempt/username"))
        .and(body_json(json!({ "username": "ada_99" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "available": true })))
        .mount(&server)
        .await;

    let session = Session::new(client(&server));
    assert!(!session.check_username("ada").await.unwrap());
    assert!(session.check_username("ada_99").await.unwrap());
}

#[tokio::test]
async fn test_logout_failure_still_clears_local_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let session = authenticated_session(&server).await;
    session.logout().await;

    assert!(session.api().store().token().is_none());
    assert!(!session.is_authenticated());
    assert!(session.user().is_none());
}

#[tokio::test]
async fn test_logout_sends_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = authenticated_session(&server).await;
    session.logout().await;
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_fetch_user_failure_logs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = Session::new(client(&server));
    session.api().store().set_token("T1");

    assert!(session.fetch_user().await.is_none());
    assert!(!session.is_authenticated());
    assert!(session.api().store().token().is_none());
}

#[tokio::test]
async fn test_initial_load_restores_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "T9" })))
        .expect(1)
        .mount(&server)
        .await;
    mount_user(&server, "T9", "Ada", "ada").await;

    let session = Session::new(client(&server));
    let mut rx = session.subscribe();
    assert!(session.is_loading());

    session.initialize().await;

    assert!(rx.has_changed().unwrap());
    let state = rx.borrow_and_update().clone();
    assert!(!state.is_loading);
    assert!(state.is_authenticated);
    assert_eq!(state.user.unwrap().username, "ada");
}

#[tokio::test]
async fn test_initial_load_without_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = Session::start(client(&server)).await;
    let state = session.state();
    assert!(!state.is_loading);
    assert!(!state.is_authenticated);
    assert!(state.user.is_none());
    assert!(session.api().store().token().is_none());
}

#[tokio::test]
async fn test_refresh_failure_mid_session_signs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let session = authenticated_session(&server).await;
    let err = session.api().get_json::<Value>("/feed").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Refresh);
    assert!(!session.is_authenticated());
    assert!(session.user().is_none());
    assert!(session.api().store().token().is_none());
}

#[tokio::test]
async fn test_initial_load_user_failure_skips_logout_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "T9" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = Session::start(client(&server)).await;
    let state = session.state();
    assert!(!state.is_loading);
    assert!(!state.is_authenticated);
    assert!(state.user.is_none());
    assert!(session.api().store().token().is_none());
}

#[tokio::test]
async fn test_logout_during_refresh_keeps_session_cleared() {
    let server = MockServer::start().await;
    mount_user(&server, "T1", "Ada Lovelace", "ada").await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "T2" }))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = authenticated_session(&server).await;
    let request = {
        let api = session.api().clone();
        tokio::spawn(async move { api.get_json::<Value>("/data").await })
    };
    for _ in 0..1000 {
        if session.api().coordinator().is_refreshing() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(session.api().coordinator().is_refreshing());

    session.logout().await;

    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Refresh(RefreshError::Abandoned)));
    assert!(session.api().store().token().is_none());
    assert!(!session.is_authenticated());
    assert!(session.user().is_none());
}
