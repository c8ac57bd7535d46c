// tests/api_tests.rs

mod common;

use common::{seed_quiz, seed_user};
use livequiz::{config::Config, db, models::user::Role, routes, state::AppState, utils::jwt::sign_jwt};
use serde_json::{Value, json};
use sqlx::SqlitePool;

struct TestApp {
    address: String,
    pool: SqlitePool,
    config: Config,
}

impl TestApp {
    fn token(&self, id: i64, role: Role) -> String {
        sign_jwt(id, role, &self.config.jwt_secret, self.config.jwt_expiration)
            .expect("Failed to sign token")
    }
}

/// Helper function to spawn the app on a random port for testing.
async fn spawn_app() -> TestApp {
    // 1. Create an in-memory pool
    let config = Config::for_tests();
    let pool = db::connect(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to open in-memory database");

    // 2. Run migrations
    db::migrate(&pool).await.expect("Failed to migrate database");

    // 3. Create the router with the app state
    let state = AppState::new(pool.clone(), config.clone());
    let app = routes::create_router(state);

    // 4. Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // 5. Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address,
        pool,
        config,
    }
}

#[tokio::test]
async fn health_check_404() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/random_path_that_does_not_exist", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn router_serves_without_a_listener() {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    let config = Config::for_tests();
    let pool = db::connect(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to open in-memory database");
    db::migrate(&pool).await.expect("Failed to migrate database");
    let app = routes::create_router(AppState::new(pool, config.clone()));

    let token = sign_jwt(1, Role::Host, &config.jwt_secret, 60).unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sessions/12345")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn session_routes_require_a_token() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/sessions", app.address))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 401);

    let response = client
        .get(format!("{}/api/sessions", app.address))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn live_flow_over_http() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let host = seed_user(&app.pool, "host", Role::Host).await;
    let player = seed_user(&app.pool, "player", Role::Participant).await;
    let (quiz_id, questions) = seed_quiz(&app.pool, host, 2, 1000, 20).await;
    let host_token = app.token(host, Role::Host);
    let player_token = app.token(player, Role::Participant);

    // Create
    let response = client
        .post(format!("{}/api/sessions", app.address))
        .bearer_auth(&host_token)
        .json(&json!({ "quiz_id": quiz_id, "mode": "live" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 201);
    let session: Value = response.json().await.unwrap();
    let id = session["id"].as_i64().unwrap();
    let code = session["join_code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), app.config.join_code_length);
    assert_eq!(session["status"], "waiting");

    // Participants cannot create sessions
    let response = client
        .post(format!("{}/api/sessions", app.address))
        .bearer_auth(&player_token)
        .json(&json!({ "quiz_id": quiz_id, "mode": "live" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 403);

    // Join, twice
    for expected in [false, true] {
        let response = client
            .post(format!("{}/api/sessions/join", app.address))
            .bearer_auth(&player_token)
            .json(&json!({ "join_code": code }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 200);
        let joined: Value = response.json().await.unwrap();
        assert_eq!(joined["reconnected"], expected);
    }

    let response = client
        .get(format!("{}/api/sessions/code/{}", app.address, code))
        .bearer_auth(&player_token)
        .send()
        .await
        .expect("Failed to execute request");
    let by_code: Value = response.json().await.unwrap();
    assert_eq!(by_code["roster"].as_array().unwrap().len(), 1);

    // Only the owner starts
    let response = client
        .post(format!("{}/api/sessions/{}/start", app.address, id))
        .bearer_auth(&player_token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 403);

    let response = client
        .post(format!("{}/api/sessions/{}/start", app.address, id))
        .bearer_auth(&host_token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 200);
    let started: Value = response.json().await.unwrap();
    assert_eq!(started["status"], "active");
    assert_eq!(started["question_phase"], "open");

    // Editing a started session conflicts
    let response = client
        .put(format!("{}/api/sessions/{}", app.address, id))
        .bearer_auth(&host_token)
        .json(&json!({ "show_ranking": false }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_STATE");

    // Answer with a prefixed option token
    let response = client
        .post(format!("{}/api/sessions/{}/answers", app.address, id))
        .bearer_auth(&player_token)
        .json(&json!({ "question_id": questions[0], "selected": ["opt_1"], "elapsed_seconds": 0 }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 200);
    let receipt: Value = response.json().await.unwrap();
    assert_eq!(receipt["outcome"], "recorded");
    assert_eq!(receipt["points"], 1000);

    let response = client
        .post(format!("{}/api/sessions/{}/answers", app.address, id))
        .bearer_auth(&player_token)
        .json(&json!({ "question_id": questions[0], "selected": [0] }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 200);
    let receipt: Value = response.json().await.unwrap();
    assert_eq!(receipt["outcome"], "already_answered");
    assert_eq!(receipt["total_score"], 1000);

    let response = client
        .get(format!("{}/api/sessions/{}/participation", app.address, id))
        .bearer_auth(&player_token)
        .send()
        .await
        .expect("Failed to execute request");
    let ledger: Value = response.json().await.unwrap();
    assert_eq!(ledger["score"], 1000);
    assert_eq!(ledger["answers"].as_array().unwrap().len(), 1);

    // Stop
    let response = client
        .post(format!("{}/api/sessions/{}/stop", app.address, id))
        .bearer_auth(&host_token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 200);
    let stopped: Value = response.json().await.unwrap();
    assert_eq!(stopped["status"], "finished");

    let response = client
        .get(format!("{}/api/sessions/{}/ranking", app.address, id))
        .bearer_auth(&host_token)
        .send()
        .await
        .expect("Failed to execute request");
    let ranking: Value = response.json().await.unwrap();
    assert_eq!(ranking[0]["participantId"], player);
    assert_eq!(ranking[0]["rank"], 1);

    // Delete
    let response = client
        .delete(format!("{}/api/sessions/{}", app.address, id))
        .bearer_auth(&host_token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 204);

    let response = client
        .get(format!("{}/api/sessions/{}", app.address, id))
        .bearer_auth(&host_token)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn private_session_rejects_strangers() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let host = seed_user(&app.pool, "host", Role::Host).await;
    let invited = seed_user(&app.pool, "invited", Role::Participant).await;
    let stranger = seed_user(&app.pool, "stranger", Role::Participant).await;
    let (quiz_id, _) = seed_quiz(&app.pool, host, 3, 10, 20).await;

    let response = client
        .post(format!("{}/api/sessions", app.address))
        .bearer_auth(app.token(host, Role::Host))
        .json(&json!({
            "quiz_id": quiz_id,
            "mode": "exam",
            "access": "private",
            "allow_list": [invited],
            "exam_total_minutes": 15
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 201);
    let session: Value = response.json().await.unwrap();
    let code = session["join_code"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/api/sessions/join", app.address))
        .bearer_auth(app.token(stranger, Role::Participant))
        .json(&json!({ "join_code": code }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "PERMISSION_DENIED");

    let response = client
        .post(format!("{}/api/sessions/join", app.address))
        .bearer_auth(app.token(invited, Role::Participant))
        .json(&json!({ "join_code": code }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn exam_without_duration_is_rejected() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let host = seed_user(&app.pool, "host", Role::Host).await;
    let (quiz_id, _) = seed_quiz(&app.pool, host, 1, 10, 20).await;

    let response = client
        .post(format!("{}/api/sessions", app.address))
        .bearer_auth(app.token(host, Role::Host))
        .json(&json!({ "quiz_id": quiz_id, "mode": "exam" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 400);

    let response = client
        .post(format!("{}/api/sessions", app.address))
        .bearer_auth(app.token(host, Role::Host))
        .json(&json!({ "quiz_id": 9999, "mode": "live" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 404);
}
