#[cfg(test)]
mod integration_tests {
    use axum::http::{HeaderName, HeaderValue};
    use axum_test::{TestServer, TestServerConfig};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    use crate::handlers::api::AppState;
    use crate::routes::create_router;
    use crate::services::clock::MockClock;
    use crate::services::database::CsvRegistrationStore;
    use crate::services::form::FormSettings;
    use crate::services::rate_limiter::RateLimitConfig;
    use crate::services::storage::JsonFileStore;

    struct TestEnv {
        server: TestServer,
        database: Arc<CsvRegistrationStore>,
        clock: MockClock,
        _dir: TempDir,
    }

    // Helper function to set up a test environment in simulation mode
    fn setup_test_environment(is_production: bool) -> TestEnv {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("registrations.csv");
        let limits_path = dir.path().join("rate_limits.json");

        let database = Arc::new(CsvRegistrationStore::new(csv_path.to_str().unwrap()).unwrap());
        let limits = Arc::new(JsonFileStore::new(&limits_path).unwrap());
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap());

        let app_state = Arc::new(AppState::new(
            database.clone(),
            limits,
            Arc::new(clock.clone()),
            RateLimitConfig::default(),
            FormSettings::default(),
        ));

        let app = create_router(app_state, is_production);
        let config = TestServerConfig::builder().mock_transport().build();
        let server = TestServer::new_with_config(app, config).unwrap();

        TestEnv {
            server,
            database,
            clock,
            _dir: dir,
        }
    }

    fn client_header(id: &'static str) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-client-id"),
            HeaderValue::from_static(id),
        )
    }

    // Helper to create a registration payload as the site posts it
    fn create_registration_payload(email: &str) -> Value {
        json!({
            "fullName": "Jean Dupont",
            "email": email,
            "phoneCode": "+33",
            "phone": "06 12 34 56 78",
            "country": "France",
            "city": "Paris",
            "spokenLanguage": "Français",
            "needsAccommodation": true,
            "startDate": "2025-07-10",
            "endDate": "2025-07-14",
            "hasChildren": true,
            "numberOfChildren": 2,
            "childrenAges": "4, 7",
            "hasReducedMobility": false,
            "hasSpecialNeeds": false,
            "allergies": "",
            "comments": "<b>Hâte d'y être</b>"
        })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let env = setup_test_environment(true);

        let response = env.server.get("/health").await;

        assert_eq!(response.status_code().as_u16(), 200);
        assert_eq!(response.text(), "OK");
    }

    #[tokio::test]
    async fn test_successful_registration() {
        let env = setup_test_environment(false);
        let (name, value) = client_header("alice");

        let response = env
            .server
            .post("/registrations")
            .add_header(name, value)
            .json(&create_registration_payload("Jean@Example.com"))
            .await;

        assert_eq!(response.status_code().as_u16(), 201);
        let body: Value = response.json();
        assert_eq!(body["registration"]["id"], json!("csv-1"));
        assert_eq!(body["registration"]["email"], json!("jean@example.com"));
        assert_eq!(body["registration"]["number_of_children"], json!(2));
        assert_eq!(body["registration"]["comments"], json!("Hâte d'y être"));
        assert_eq!(body["registration"]["allergies"], Value::Null);
        assert_eq!(body["registration"]["status"], json!("pending"));
        assert!(body["message"].as_str().unwrap().contains("Registration received"));

        // Verify the registration was written to the CSV file
        let stored = env.database.find_by_email("jean@example.com").unwrap();
        assert!(stored.is_some());
        assert_eq!(stored.unwrap().record.languages.as_deref(), Some("Français"));

        let (name, value) = client_header("alice");
        let status: Value = env
            .server
            .get("/registrations/status")
            .add_header(name, value)
            .await
            .json();
        assert_eq!(status["status"], json!({ "state": "success" }));
        assert_eq!(status["remaining_attempts"], json!(3));
    }

    #[tokio::test]
    async fn test_invalid_registration_returns_field_errors() {
        let env = setup_test_environment(false);

        let mut payload = create_registration_payload("not-an-email");
        payload["fullName"] = json!("<script>x</script>");
        payload["endDate"] = json!("2025-07-01");

        let response = env.server.post("/registrations").json(&payload).await;

        assert_eq!(response.status_code().as_u16(), 422);
        let body: Value = response.json();
        assert_eq!(body["error"], json!("validation_failed"));
        assert_eq!(body["focus"], json!("fullName"));
        assert!(body["errors"]["fullName"].is_string());
        assert!(body["errors"]["email"].is_string());
        assert!(body["errors"]["dates"].is_string());
        assert!(body["errors"].get("phone").is_none());

        assert!(env.database.all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let env = setup_test_environment(false);
        let payload = create_registration_payload("jean@example.com");

        let first = env.server.post("/registrations").json(&payload).await;
        assert_eq!(first.status_code().as_u16(), 201);

        // Another visitor submits the same email
        let (name, value) = client_header("bob");
        let second = env
            .server
            .post("/registrations")
            .add_header(name, value)
            .json(&payload)
            .await;

        assert_eq!(second.status_code().as_u16(), 409);
        let body: Value = second.json();
        assert_eq!(body["error"], json!("duplicate_email"));
        assert!(body["message"].as_str().unwrap().contains("already registered"));
        assert_eq!(env.database.all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_after_three_attempts() {
        let env = setup_test_environment(false);
        let payload = create_registration_payload("jean@example.com");

        let first = env.server.post("/registrations").json(&payload).await;
        assert_eq!(first.status_code().as_u16(), 201);

        // Duplicates from a second client count against its own window
        for _ in 0..3 {
            let (name, value) = client_header("carol");
            let response = env
                .server
                .post("/registrations")
                .add_header(name, value)
                .json(&payload)
                .await;
            assert_eq!(response.status_code().as_u16(), 409);
        }

        let (name, value) = client_header("carol");
        let blocked = env
            .server
            .post("/registrations")
            .add_header(name, value)
            .json(&create_registration_payload("carol@example.com"))
            .await;

        assert_eq!(blocked.status_code().as_u16(), 429);
        assert_eq!(blocked.header("retry-after"), "60");
        let body: Value = blocked.json();
        assert_eq!(body["retry_after_ms"], json!(60_000));
        assert!(body["message"].as_str().unwrap().contains("Too many attempts"));

        let (name, value) = client_header("carol");
        let status: Value = env
            .server
            .get("/registrations/status")
            .add_header(name, value)
            .await
            .json();
        assert_eq!(status["is_blocked"], json!(true));
        assert_eq!(status["countdown"], json!("1 minute / 1 minute"));

        // Once the window has elapsed the client can register
        env.clock.advance(chrono::Duration::seconds(60));
        let (name, value) = client_header("carol");
        let response = env
            .server
            .post("/registrations")
            .add_header(name, value)
            .json(&create_registration_payload("carol@example.com"))
            .await;
        assert_eq!(response.status_code().as_u16(), 201);
    }

    #[tokio::test]
    async fn test_dev_routes() {
        let env = setup_test_environment(false);

        let response = env
            .server
            .post("/registrations/validate")
            .json(&create_registration_payload("Jean@Example.com"))
            .await;
        assert_eq!(response.status_code().as_u16(), 200);
        let body: Value = response.json();
        assert_eq!(body["is_valid"], json!(true));
        assert_eq!(body["sanitized"]["email"], json!("jean@example.com"));
        assert!(env.database.all().unwrap().is_empty());

        let payload = create_registration_payload("jean@example.com");
        let (name, value) = client_header("dave");
        let first = env
            .server
            .post("/registrations")
            .add_header(name, value)
            .json(&payload)
            .await;
        assert_eq!(first.status_code().as_u16(), 201);
        assert_eq!(first.header("x-client-id"), "dave");

        // The confirmation is still showing, so a resubmit is refused
        let (name, value) = client_header("dave");
        let second = env
            .server
            .post("/registrations")
            .add_header(name, value)
            .json(&payload)
            .await;
        assert_eq!(second.status_code().as_u16(), 409);
        let body: Value = second.json();
        assert_eq!(body["error"], json!("submission_in_progress"));

        let (name, value) = client_header("dave");
        let status: Value = env
            .server
            .get("/registrations/status")
            .add_header(name, value)
            .await
            .json();
        assert_eq!(status["remaining_attempts"], json!(3));

        let (name, value) = client_header("dave");
        let response = env
            .server
            .delete("/registrations/rate-limit")
            .add_header(name, value)
            .await;
        assert_eq!(response.status_code().as_u16(), 204);
    }

    #[tokio::test]
    async fn test_status_without_client_id_reveals_nothing() {
        let env = setup_test_environment(true);

        let mut payload = create_registration_payload("alice@private.example");
        payload["fullName"] = json!("Alice Secret");
        let response = env.server.post("/registrations").json(&payload).await;
        assert_eq!(response.status_code().as_u16(), 201);

        let status: Value = env.server.get("/registrations/status").await.json();
        assert_eq!(status["status"], json!({ "state": "idle" }));
        assert_eq!(status["fields"]["fullName"], json!(""));
        assert_eq!(status["fields"]["email"], json!(""));
        assert_eq!(status["fields"]["phone"], json!(""));
        assert_eq!(status["notice"], Value::Null);
    }

    #[tokio::test]
    async fn test_production_hides_dev_routes() {
        let env = setup_test_environment(true);

        let response = env
            .server
            .post("/registrations/validate")
            .json(&create_registration_payload("jean@example.com"))
            .await;
        assert_eq!(response.status_code().as_u16(), 404);

        let (name, value) = client_header("dave");
        let response = env
            .server
            .delete("/registrations/rate-limit")
            .add_header(name, value)
            .await;
        assert_eq!(response.status_code().as_u16(), 404);

        let response = env
            .server
            .post("/registrations")
            .json(&create_registration_payload("jean@example.com"))
            .await;
        assert_eq!(response.status_code().as_u16(), 201);
    }
}
