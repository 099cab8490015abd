//! `HttpTokenRefresh` against an in-process auth backend.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use event_socket::{
    AuthSession, AuthToken, HttpTokenRefresh, TokenRefresh, TokenRefreshApi, refresh_session,
};

const BOOTSTRAP: &str = "Basic Ym9vdHN0cmFw";

async fn refresh_handler(headers: HeaderMap, Json(body): Json<TokenRefresh>) -> Response {
    let authorization = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if authorization != BOOTSTRAP && authorization != "old-access" {
        return (StatusCode::UNAUTHORIZED, "bad credentials").into_response();
    }
    if body.refresh_token != "r1" {
        return (StatusCode::BAD_REQUEST, "unknown refresh token").into_response();
    }
    Json(AuthToken {
        access_token: "new-access".into(),
        refresh_token: "r2".into(),
    })
    .into_response()
}

async fn start_server() -> String {
    let app = Router::new().route("/auth/refresh", post(refresh_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{port}/auth")
}

#[tokio::test]
async fn create_new_token_returns_issued_token() {
    let api = HttpTokenRefresh::new(start_server().await);
    let token = api
        .create_new_token(
            &TokenRefresh {
                refresh_token: "r1".into(),
            },
            BOOTSTRAP,
        )
        .await
        .unwrap();
    assert_eq!(token.access_token, "new-access");
    assert_eq!(token.refresh_token, "r2");
}

#[tokio::test]
async fn rejected_refresh_reports_status_and_body() {
    let api = HttpTokenRefresh::new(start_server().await);
    let err = api
        .create_new_token(
            &TokenRefresh {
                refresh_token: "r1".into(),
            },
            "Bearer nope",
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "refresh_failure");
    assert_eq!(
        err,
        event_socket::SocketError::Refresh {
            status: 401,
            message: "bad credentials".into(),
        }
    );
}

#[tokio::test]
async fn unreachable_backend_is_a_refresh_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let api = HttpTokenRefresh::new(format!("http://127.0.0.1:{port}"));
    let err = api
        .create_new_token(
            &TokenRefresh {
                refresh_token: "r1".into(),
            },
            BOOTSTRAP,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        event_socket::SocketError::Refresh { status: 0, .. }
    ));
}

#[tokio::test]
async fn session_rotates_to_refreshed_token() {
    let api = HttpTokenRefresh::new(start_server().await);
    let session = AuthSession::new(Some(AuthToken {
        access_token: "old-access".into(),
        refresh_token: "r1".into(),
    }));

    refresh_session(&api, &session, None).await.unwrap();
    assert_eq!(session.token().unwrap().access_token, "new-access");
}
