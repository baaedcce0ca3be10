//! End-to-end smoke tests for the ATTUNE API
//!
//! These need a running PostgreSQL with the schema from `schema.sql`
//! loaded and `ATTUNE_DB_*` pointing at it. Enable with
//! `cargo test -p attune-api --features db-tests`.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

use attune_api::db::{NewExperiment, ObservationUpdate};
use attune_api::{
    create_api_router, hash_password, ApiConfig, ApiResult, AppState, AuthConfig, DbClient,
    DbConfig,
};
use attune_core::{CovariateSpec, VariableKind};
use attune_optimizer::{OptimizerEngine, SequentialSearchEngine};

fn test_db() -> ApiResult<DbClient> {
    let config = DbConfig::from_env();
    DbClient::from_config(&config)
}

fn api_router() -> ApiResult<Router> {
    let state = AppState {
        db: test_db()?,
        engine: Arc::new(SequentialSearchEngine::seeded(7)),
        auth: Arc::new(AuthConfig::from_env()),
    };
    create_api_router(state, &ApiConfig::default())
}

/// Emails have a UNIQUE constraint; salt them so reruns never collide.
fn unique_email(prefix: &str) -> String {
    format!("{}-{}@test.com", prefix, uuid::Uuid::now_v7().simple())
}

fn post_json(uri: &str, token: Option<&str>, body: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

fn get_authed(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .expect("request should build")
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

/// Sign up a fresh user and return a bearer token for them.
async fn signup_and_login(app: &Router, email: &str, password: &str) -> String {
    let response = app
        .clone()
        .oneshot(post_json(
            "/user/new",
            None,
            &serde_json::json!({ "email": email, "password": password }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(post_json(
            "/auth/login",
            None,
            &serde_json::json!({ "email": email, "password": password }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["token_type"], "bearer");
    body["access_token"]
        .as_str()
        .expect("login returns a token")
        .to_string()
}

#[tokio::test]
#[cfg(feature = "db-tests")]
async fn smoke_test_session_persistence_chain() -> ApiResult<()> {
    let db = test_db()?;
    let user = db
        .user_get_or_create(&unique_email("chain"), &hash_password("CHANGEME"))
        .await?;

    let engine = SequentialSearchEngine::seeded(11);
    let mut spec: CovariateSpec = BTreeMap::new();
    spec.insert(
        "x".to_string(),
        VariableKind::Continuous {
            guess: 0.5,
            min: 0.0,
            max: 1.0,
        },
    );
    spec.insert(
        "batch".to_string(),
        VariableKind::Integer {
            guess: 16,
            min: 1,
            max: 128,
        },
    );

    let session = engine
        .construct(&spec, "SingleTaskGP", "ExpectedImprovement")
        .await?;
    let blob = engine.serialize(&session)?;

    let covars_json = serde_json::to_value(&spec)?;
    let record = db
        .experiment_insert(&NewExperiment {
            exp_uuid: attune_core::new_entity_id(),
            name: "smoke-chain",
            description: Some("Persistence chain smoke test"),
            covars: &covars_json,
            model_type: "SingleTaskGP",
            acq_func: "ExpectedImprovement",
            covars_sampled_iter: session.covars_sampled_iter,
            response_sampled_iter: session.response_sampled_iter,
            session_blob: &blob,
            user_id: user.id,
        })
        .await?;

    assert_eq!(record.version, 1);
    assert_eq!(record.covars_sampled_iter, 0);
    assert_eq!(record.response_sampled_iter, 0);
    assert!(record.is_active);
    assert!(record.best_response.is_none());

    let fetched = db
        .experiment_get_by_uuid(record.exp_uuid)
        .await?
        .expect("inserted experiment is retrievable");
    assert_eq!(fetched.model_object_binary, blob);

    // Ask path: propose, persist the mutated session under the loaded
    // version. Counters stay untouched.
    let mut session = engine.deserialize(&fetched.model_object_binary)?;
    let proposal = engine.ask(&mut session).await?;
    let blob = engine.serialize(&session)?;

    let updated = db
        .experiment_store_session(record.exp_uuid, fetched.version, &blob)
        .await?
        .expect("loaded version is current");
    assert_eq!(updated.version, 2);
    assert_eq!(updated.covars_sampled_iter, 0);
    assert_eq!(updated.response_sampled_iter, 0);

    // A writer holding the superseded version loses the race
    let stale = db
        .experiment_store_session(record.exp_uuid, fetched.version, &blob)
        .await?;
    assert!(stale.is_none());

    // Tell path: absorb the observation, advance both counters, snapshot
    // the best response.
    engine.tell(&mut session, proposal.clone(), 1.23).await?;
    let blob = engine.serialize(&session)?;
    let best = session.best.as_ref().expect("tell sets the best snapshot");
    let best_response = serde_json::json!({ "Response": best.response });
    let best_covars = serde_json::to_value(&best.covars)?;

    let told = db
        .experiment_store_observation(
            record.exp_uuid,
            updated.version,
            &ObservationUpdate {
                session_blob: &blob,
                covars_sampled_iter: session.covars_sampled_iter,
                response_sampled_iter: session.response_sampled_iter,
                best_response: Some(&best_response),
                covars_best_response: Some(&best_covars),
            },
        )
        .await?
        .expect("loaded version is current");
    assert_eq!(told.version, 3);
    assert_eq!(told.covars_sampled_iter, 1);
    assert_eq!(told.response_sampled_iter, 1);
    assert_eq!(told.best_response, Some(best_response));
    assert!(told.time_updated >= record.time_updated);

    let listed = db.experiment_list_by_owner(user.id).await?;
    assert!(listed.iter().any(|e| e.exp_uuid == record.exp_uuid));

    println!("✅ Session persistence chain passed");
    Ok(())
}

#[tokio::test]
#[cfg(feature = "db-tests")]
async fn smoke_test_http_sequential_loop() -> ApiResult<()> {
    let app = api_router()?;
    let token = signup_and_login(&app, &unique_email("loop"), "smoke-password").await;

    // Create an experiment from a covariate specification; defaults fill
    // the unnamed fields
    let response = app
        .clone()
        .oneshot(post_json(
            "/experiment/new",
            Some(&token),
            &serde_json::json!({
                "covars": { "x": { "vtype": "cont", "guess": 0.5, "min": 0.0, "max": 1.0 } }
            }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::CREATED);

    let created = body_json(response).await;
    let exp_uuid = created["exp_uuid"]
        .as_str()
        .expect("uuid on the wire")
        .to_string();
    assert_eq!(created["name"], "Experiment name");
    assert_eq!(created["model_type"], "SingleTaskGP");
    assert_eq!(created["covars_sampled_iter"], 0);
    assert_eq!(created["response_sampled_iter"], 0);
    assert!(created["best_response"].is_null());
    assert!(created["user_uuid"].is_string());
    assert_eq!(created["active"], true);

    // Ask: a point inside the declared domain comes back, and the
    // iteration counters stay where they were
    let response = app
        .clone()
        .oneshot(get_authed(&format!("/experiment/ask/{}", exp_uuid), &token))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::OK);

    let ask = body_json(response).await;
    assert_eq!(ask["exp_uuid"], serde_json::json!(exp_uuid));
    let x = ask["covars_next_exp"]["x"]
        .as_f64()
        .expect("proposed x is a float");
    assert!((0.0..=1.0).contains(&x), "proposal {} out of bounds", x);

    let response = app
        .clone()
        .oneshot(get_authed("/experiment/all", &token))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::OK);

    let listed = body_json(response).await;
    assert_eq!(listed[0]["covars_sampled_iter"], 0);
    assert_eq!(listed[0]["response_sampled_iter"], 0);
    // Listings never carry the owner
    assert!(listed[0].get("user_uuid").is_none());

    // Tell: the observation advances both counters and becomes the best
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/experiment/tell/{}", exp_uuid),
            Some(&token),
            &serde_json::json!({
                "covars": { "x": x },
                "response": { "Response": 1.23 }
            }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let report = body_json(response).await;
    assert_eq!(report["covars_sampled_iter"], 1);
    assert_eq!(report["response_sampled_iter"], 1);
    assert_eq!(report["response_tell"], serde_json::json!({ "Response": 1.23 }));
    assert_eq!(report["best_response"], serde_json::json!({ "Response": 1.23 }));
    assert_eq!(report["covars_best_response"]["x"], serde_json::json!(x));

    // An integer response row is not a float and must not be absorbed
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/experiment/tell/{}", exp_uuid),
            Some(&token),
            &serde_json::json!({
                "covars": { "x": x },
                "response": { "Response": 1 }
            }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");

    println!("✅ Sequential loop passed");
    Ok(())
}

#[tokio::test]
#[cfg(feature = "db-tests")]
async fn smoke_test_foreign_experiment_is_forbidden() -> ApiResult<()> {
    let app = api_router()?;
    let owner_token = signup_and_login(&app, &unique_email("owner"), "smoke-password").await;
    let other_token = signup_and_login(&app, &unique_email("other"), "smoke-password").await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/experiment/new",
            Some(&owner_token),
            &serde_json::json!({
                "covars": { "x": { "vtype": "cont", "guess": 0.5, "min": 0.0, "max": 1.0 } }
            }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::CREATED);
    let exp_uuid = body_json(response).await["exp_uuid"]
        .as_str()
        .expect("uuid on the wire")
        .to_string();

    // Another user's token opens nothing
    let response = app
        .clone()
        .oneshot(get_authed(&format!("/experiment/ask/{}", exp_uuid), &other_token))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["code"], "FORBIDDEN");

    // And their listing does not leak it
    let response = app
        .clone()
        .oneshot(get_authed("/experiment/all", &other_token))
        .await
        .expect("request should complete");
    let listed = body_json(response).await;
    let listed = listed.as_array().expect("listing is an array");
    assert!(listed
        .iter()
        .all(|e| e["exp_uuid"] != serde_json::json!(exp_uuid)));

    println!("✅ Ownership isolation passed");
    Ok(())
}

#[tokio::test]
#[cfg(feature = "db-tests")]
async fn smoke_test_duplicate_signup_is_rejected() -> ApiResult<()> {
    let app = api_router()?;
    let email = unique_email("dup");

    let body = serde_json::json!({ "email": email, "password": "smoke-password" });
    let response = app
        .clone()
        .oneshot(post_json("/user/new", None, &body))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(post_json("/user/new", None, &body))
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["code"], "EMAIL_ALREADY_REGISTERED");

    println!("✅ Duplicate signup rejected");
    Ok(())
}

#[tokio::test]
#[cfg(feature = "db-tests")]
async fn smoke_test_readiness_with_database() -> ApiResult<()> {
    let db = test_db()?;
    db.health_check().await?;

    let app = api_router()?;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health/ready")
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");

    println!("✅ Readiness with database passed");
    Ok(())
}
