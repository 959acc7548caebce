mod common;

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
        Request, StatusCode,
    },
    response::Response,
    Router,
};
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower::ServiceExt;
use url::form_urlencoded;
use votegate::{
    api::{self, GatewayConfig, CSRF_HEADER_NAME, SESSION_COOKIE_NAME},
    biometric::{Assertion, Enrollment, ScriptedVerifier, VerifierError},
    store::MemoryStore,
};

const FORM: &str = "application/x-www-form-urlencoded";
const PEER: ([u8; 4], u16) = ([198, 51, 100, 9], 40_000);
const FORWARDED: &str = "203.0.113.7";

struct Harness {
    app: Router,
    store: MemoryStore,
    verifier: Arc<ScriptedVerifier>,
}

impl Harness {
    fn new() -> Result<Self> {
        Self::build(
            common::gateway_config(),
            ScriptedVerifier::new(),
            Duration::from_secs(2),
        )
    }

    /// Every request arrives from `PEER`, as if through `into_make_service_with_connect_info`.
    fn build(
        config: GatewayConfig,
        verifier: ScriptedVerifier,
        verifier_timeout: Duration,
    ) -> Result<Self> {
        let store = MemoryStore::new();
        let verifier = Arc::new(verifier);
        let state = common::app_state_with(&store, verifier.clone(), config, verifier_timeout)?;
        Ok(Self {
            app: api::router(state)?.layer(MockConnectInfo(SocketAddr::from(PEER))),
            store,
            verifier,
        })
    }

    async fn send(&self, request: Request<Body>) -> Result<Response> {
        Ok(self.app.clone().oneshot(request).await?)
    }

    async fn post_form(
        &self,
        uri: &str,
        fields: &[(&str, &str)],
        session: Option<&str>,
    ) -> Result<Response> {
        self.post_form_via(uri, fields, session, FORWARDED).await
    }

    async fn post_form_via(
        &self,
        uri: &str,
        fields: &[(&str, &str)],
        session: Option<&str>,
        forwarded_for: &str,
    ) -> Result<Response> {
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, FORM)
            .header("x-forwarded-for", forwarded_for);
        if let Some(session) = session {
            builder = builder.header(COOKIE, format!("{SESSION_COOKIE_NAME}={session}"));
        }
        self.send(builder.body(Body::from(body))?).await
    }

    async fn post_json(&self, uri: &str, body: &Value) -> Result<Response> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body)?))?;
        self.send(request).await
    }

    async fn get(&self, uri: &str, session: Option<&str>) -> Result<Response> {
        let mut builder = Request::builder().uri(uri);
        if let Some(session) = session {
            builder = builder.header(COOKIE, format!("{SESSION_COOKIE_NAME}={session}"));
        }
        self.send(builder.body(Body::empty())?).await
    }

    async fn register_voter(&self, username: &str) -> Result<Response> {
        let face_data = common::face_data();
        let email = format!("{username}@x.com");
        self.post_form(
            "/register",
            &[
                ("full_name", "Abebe Kebede"),
                ("username", username),
                ("email", &email),
                ("password", common::PASSWORD),
                ("role", "voter"),
                ("district", "Bole"),
                ("face_data", &face_data),
            ],
            None,
        )
        .await
    }

    async fn login(&self, username: &str, password: &str) -> Result<Response> {
        self.login_via(username, password, FORWARDED).await
    }

    async fn login_via(
        &self,
        username: &str,
        password: &str,
        forwarded_for: &str,
    ) -> Result<Response> {
        self.post_form_via(
            "/login",
            &[("username", username), ("password", password)],
            None,
            forwarded_for,
        )
        .await
    }
}

async fn body_json(response: Response) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn session_from(response: &Response) -> Result<String> {
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .context("missing Set-Cookie")?
        .to_str()?;
    let value = cookie
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix(&format!("{SESSION_COOKIE_NAME}=")))
        .ok_or_else(|| anyhow!("unexpected cookie: {cookie}"))?;
    Ok(value.to_string())
}

#[tokio::test]
async fn health_reports_store_status() -> Result<()> {
    let harness = Harness::new()?;

    let response = harness.get("/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = body_json(response).await?;
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));

    harness.store.set_offline(true);
    let response = harness.get("/health", None).await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn reference_lists_districts_and_categories() -> Result<()> {
    let harness = Harness::new()?;

    let body = body_json(harness.get("/reference", None).await?).await?;

    let districts = body["districts"].as_array().context("districts")?;
    assert_eq!(districts.len(), 10);
    assert!(districts.contains(&json!("Bole")));
    assert_eq!(body["categories"], json!(["Federal", "Local", "Regional"]));
    Ok(())
}

#[tokio::test]
async fn register_then_login_sets_session_cookie() -> Result<()> {
    let harness = Harness::new()?;

    let response = harness.register_voter("abebe").await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "success");
    assert_eq!(body["redirect"], "/login");

    let response = harness.login("abebe", common::PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .context("missing Set-Cookie")?
        .to_str()?
        .to_string();
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(!cookie.contains("Secure"));
    let body = body_json(response).await?;
    assert_eq!(body, json!({"status": "success", "redirect": "/me"}));

    // Forwarded headers are ignored unless the proxy is trusted.
    let attempts = harness.store.login_attempts().await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].origin, "198.51.100.9");
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_a_conflict() -> Result<()> {
    let harness = Harness::new()?;
    harness.register_voter("abebe").await?;

    let response = harness.register_voter("abebe").await?;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Username already exists");
    Ok(())
}

#[tokio::test]
async fn voter_registration_without_face_is_rejected() -> Result<()> {
    let harness = Harness::new()?;

    let response = harness
        .post_form(
            "/register",
            &[
                ("full_name", "Abebe Kebede"),
                ("username", "abebe"),
                ("email", "abebe@x.com"),
                ("password", common::PASSWORD),
                ("role", "voter"),
                ("district", "Bole"),
            ],
            None,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await?;
    assert_eq!(
        body["message"],
        "Face capture and processing failed or was not completed."
    );
    assert!(harness.store.accounts().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_generic() -> Result<()> {
    let harness = Harness::new()?;
    harness.register_voter("abebe").await?;

    let response = harness.login("abebe", "bad-password").await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(SET_COOKIE).is_none());
    let body = body_json(response).await?;
    assert_eq!(body["message"], "Invalid username or password.");
    Ok(())
}

#[tokio::test]
async fn claim_login_for_unknown_id_is_an_error() -> Result<()> {
    let harness = Harness::new()?;

    let response = harness.post_json("/login", &json!({"user_id": 42})).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "error");
    assert!(harness.store.login_attempts().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn me_requires_session_and_hands_out_csrf_token() -> Result<()> {
    let harness = Harness::new()?;
    harness.register_voter("abebe").await?;

    let response = harness.get("/me", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let session = session_from(&harness.login("abebe", common::PASSWORD).await?)?;
    let first = body_json(harness.get("/me", Some(&session)).await?).await?;
    let second = body_json(harness.get("/me", Some(&session)).await?).await?;

    assert_eq!(first["username"], "abebe");
    assert_eq!(first["role"], "voter");
    assert_eq!(first["details"]["district"], "Bole");
    assert!(first["csrf_token"].as_str().is_some_and(|token| !token.is_empty()));
    assert_eq!(first["csrf_token"], second["csrf_token"]);
    Ok(())
}

#[tokio::test]
async fn logout_requires_the_anti_forgery_token() -> Result<()> {
    let harness = Harness::new()?;
    harness.register_voter("abebe").await?;
    let session = session_from(&harness.login("abebe", common::PASSWORD).await?)?;
    let me = body_json(harness.get("/me", Some(&session)).await?).await?;
    let csrf = me["csrf_token"].as_str().context("csrf_token")?.to_string();

    let forged = harness
        .post_form("/logout", &[("csrf_token", "forged")], Some(&session))
        .await?;
    assert_eq!(forged.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        harness.get("/me", Some(&session)).await?.status(),
        StatusCode::OK
    );

    let response = harness
        .post_form("/logout", &[("csrf_token", &csrf)], Some(&session))
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(LOCATION).map(|v| v.as_bytes()),
        Some(&b"/login"[..])
    );
    assert_eq!(
        harness.get("/me", Some(&session)).await?.status(),
        StatusCode::UNAUTHORIZED
    );
    Ok(())
}

#[tokio::test]
async fn candidate_profile_update_accepts_header_token() -> Result<()> {
    let harness = Harness::new()?;
    harness
        .post_form(
            "/register",
            &[
                ("full_name", "Almaz Tesfaye"),
                ("username", "almaz"),
                ("email", "almaz@x.com"),
                ("password", common::PASSWORD),
                ("role", "candidate"),
                ("category", "Federal"),
            ],
            None,
        )
        .await?;
    let session = session_from(&harness.login("almaz", common::PASSWORD).await?)?;
    let me = body_json(harness.get("/me", Some(&session)).await?).await?;
    let csrf = me["csrf_token"].as_str().context("csrf_token")?.to_string();

    let request = Request::builder()
        .method("POST")
        .uri("/me/candidate")
        .header(CONTENT_TYPE, FORM)
        .header(COOKIE, format!("{SESSION_COOKIE_NAME}={session}"))
        .header(CSRF_HEADER_NAME, csrf)
        .body(Body::from("party=Unity&manifesto=Roads"))?;
    let response = harness.send(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let me = body_json(harness.get("/me", Some(&session)).await?).await?;
    assert_eq!(me["details"]["category"], "Federal");
    assert_eq!(me["details"]["party"], "Unity");
    assert_eq!(me["details"]["manifesto"], "Roads");
    Ok(())
}

#[tokio::test]
async fn face_login_hands_off_to_session() -> Result<()> {
    let harness = Harness::new()?;
    harness.register_voter("abebe").await?;
    let account_id = harness.store.accounts().await[0].id;
    harness
        .verifier
        .push_assertion(Ok(Assertion::Matched(account_id)))
        .await;
    harness.verifier.push_assertion(Ok(Assertion::NoMatch)).await;

    let capture = json!({"face_data": "data:image/jpeg;base64,AAAA"});
    let response = harness.post_json("/login/face", &capture).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let session = session_from(&response)?;
    assert_eq!(
        harness.get("/me", Some(&session)).await?.status(),
        StatusCode::OK
    );

    let response = harness.post_json("/login/face", &capture).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "no_match");
    Ok(())
}

#[tokio::test]
async fn face_enrollment_returns_encoding() -> Result<()> {
    let harness = Harness::new()?;
    harness
        .verifier
        .push_enrollment(Ok(Enrollment::Encoding(vec![0.1, 0.2, 0.3])))
        .await;

    let capture = json!({"face_data": "data:image/jpeg;base64,AAAA"});
    let response = harness.post_json("/register/face", &capture).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "success");
    assert_eq!(body["encoding"], json!([0.1, 0.2, 0.3]));

    // Nothing scripted: the verifier reports no face.
    let response = harness.post_json("/register/face", &capture).await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_escape_lockout() -> Result<()> {
    let harness = Harness::new()?;
    harness.register_voter("abebe").await?;

    for attempt in 0..5 {
        let forwarded = format!("10.{attempt}.0.1");
        let response = harness
            .login_via("abebe", "bad-password", &forwarded)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = harness
        .login_via("abebe", common::PASSWORD, "10.99.0.1")
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(SET_COOKIE).is_none());
    let body = body_json(response).await?;
    assert_eq!(body["message"], "Invalid username or password.");

    let attempts = harness.store.login_attempts().await;
    assert_eq!(attempts.len(), 5);
    assert!(attempts
        .iter()
        .all(|attempt| attempt.origin == "198.51.100.9" && !attempt.success));
    Ok(())
}

#[tokio::test]
async fn trusted_proxy_origin_comes_from_forwarded_for() -> Result<()> {
    let harness = Harness::build(
        common::gateway_config().with_trust_forwarded_for(true),
        ScriptedVerifier::new(),
        Duration::from_secs(2),
    )?;
    harness.register_voter("abebe").await?;

    harness.login("abebe", common::PASSWORD).await?;
    // Oversized garbage cannot become an origin; the peer address is used instead.
    let junk = "x".repeat(200);
    harness
        .login_via("abebe", common::PASSWORD, &junk)
        .await?;

    let origins: Vec<String> = harness
        .store
        .login_attempts()
        .await
        .into_iter()
        .map(|attempt| attempt.origin)
        .collect();
    assert_eq!(origins, vec![FORWARDED, "198.51.100.9"]);
    Ok(())
}

#[tokio::test]
async fn face_login_for_missing_account_is_denied() -> Result<()> {
    let harness = Harness::new()?;
    harness
        .verifier
        .push_assertion(Ok(Assertion::Matched(999)))
        .await;

    let capture = json!({"face_data": "data:image/jpeg;base64,AAAA"});
    let response = harness.post_json("/login/face", &capture).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(SET_COOKIE).is_none());
    let body = body_json(response).await?;
    assert_eq!(body["status"], "error");
    assert!(harness.store.login_attempts().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn face_login_for_inactive_account_is_denied() -> Result<()> {
    let harness = Harness::new()?;
    harness.register_voter("abebe").await?;
    let account_id = harness.store.accounts().await[0].id;
    harness.store.set_active(account_id, false).await;
    harness
        .verifier
        .push_assertion(Ok(Assertion::Matched(account_id)))
        .await;

    let capture = json!({"face_data": "data:image/jpeg;base64,AAAA"});
    let response = harness.post_json("/login/face", &capture).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(SET_COOKIE).is_none());
    assert!(!harness
        .store
        .login_attempts()
        .await
        .iter()
        .any(|attempt| attempt.success));
    assert!(harness.store.accounts().await[0].last_login.is_none());
    Ok(())
}

#[tokio::test]
async fn verifier_failure_is_unavailable() -> Result<()> {
    let harness = Harness::new()?;
    harness.register_voter("abebe").await?;
    harness
        .verifier
        .push_assertion(Err(VerifierError::Protocol("500: upstream error".to_string())))
        .await;
    harness
        .verifier
        .push_enrollment(Err(VerifierError::Protocol("500: upstream error".to_string())))
        .await;

    let capture = json!({"face_data": "data:image/jpeg;base64,AAAA"});
    let response = harness.post_json("/login/face", &capture).await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().get(SET_COOKIE).is_none());

    let response = harness.post_json("/register/face", &capture).await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(harness.store.login_attempts().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn slow_verifier_times_out_as_unavailable() -> Result<()> {
    let harness = Harness::build(
        common::gateway_config(),
        ScriptedVerifier::new().with_delay(Duration::from_secs(5)),
        Duration::from_millis(50),
    )?;
    harness.register_voter("abebe").await?;
    let account_id = harness.store.accounts().await[0].id;
    harness
        .verifier
        .push_assertion(Ok(Assertion::Matched(account_id)))
        .await;

    let capture = json!({"face_data": "data:image/jpeg;base64,AAAA"});
    let response = harness.post_json("/login/face", &capture).await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().get(SET_COOKIE).is_none());

    let response = harness.post_json("/register/face", &capture).await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(harness.store.login_attempts().await.is_empty());
    Ok(())
}
