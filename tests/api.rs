// End-to-end tests of the REST API against an in-memory database
#![cfg(feature = "server")]

use akig::api::{router, AppState};
use akig::models::user::insert_user;
use akig::services::auth::hash_password;
use akig::{ensure_default_agency, open_database, Config, Role};
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

const PASSWORD: &str = "motdepasse-solide";

fn test_app() -> Router {
    let conn = open_database(":memory:").unwrap();
    let agency = ensure_default_agency(&conn).unwrap();
    let hash = hash_password(PASSWORD).unwrap();
    insert_user(&conn, agency, "gerant@akig.gn", &hash, "Gérant", Role::Manager).unwrap();
    insert_user(&conn, agency, "agent@akig.gn", &hash, "Agent terrain", Role::Agent).unwrap();

    let config = Config {
        jwt_secret: Some("integration-test-secret".to_string()),
        ..Config::default()
    };
    router(AppState::new(conn, config).unwrap())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

async fn login(app: &Router, email: &str) -> String {
    let (status, _, body) = send(
        app,
        json_request(
            Method::POST,
            "/api/auth/login",
            None,
            json!({ "email": email, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    body["data"]["access_token"].as_str().unwrap().to_string()
}

/// Owner, site, tenant and a 1 500 000 GNF lease; returns (tenant_id, contract_id)
async fn lease(app: &Router, token: &str) -> (i64, i64) {
    let (status, _, owner) = send(
        app,
        json_request(Method::POST, "/api/owners", Some(token), json!({ "name": "Alpha Condé" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, _, property) = send(
        app,
        json_request(
            Method::POST,
            "/api/properties",
            Some(token),
            json!({
                "owner_id": owner["data"]["id"],
                "name": "Résidence Kaloum",
                "rent_amount": 1_500_000
            }),
        ),
    )
    .await;

    let (_, _, tenant) = send(
        app,
        json_request(
            Method::POST,
            "/api/tenants",
            Some(token),
            json!({
                "full_name": "Mamadou Diallo",
                "phone": "620 12 34 56",
                "property_id": property["data"]["id"]
            }),
        ),
    )
    .await;
    let tenant_id = tenant["data"]["id"].as_i64().unwrap();

    let (status, _, contract) = send(
        app,
        json_request(
            Method::POST,
            "/api/contracts",
            Some(token),
            json!({
                "tenant_id": tenant_id,
                "monthly_rent": 1_500_000,
                "start_date": "2024-01-01"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", contract);
    (tenant_id, contract["data"]["id"].as_i64().unwrap())
}

#[tokio::test]
async fn test_health_is_public() {
    let app = test_app();
    let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
    let (status, _, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let app = test_app();
    let request = Request::builder().uri("/api/tenants").body(Body::empty()).unwrap();
    let (status, _, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _, _) = send(&app, get("/api/tenants", "not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_sets_cookie_and_cookie_authenticates() {
    let app = test_app();
    let (status, headers, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/login",
            None,
            json!({ "email": "gerant@akig.gn", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["token_type"], "Bearer");
    assert!(body["data"]["user"].get("password_hash").is_none());

    let cookie = headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("akig_token="));
    assert!(cookie.contains("HttpOnly"));

    let session = cookie.split(';').next().unwrap();
    let request = Request::builder()
        .uri("/api/auth/me")
        .header(header::COOKIE, session)
        .body(Body::empty())
        .unwrap();
    let (status, _, me) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["data"]["email"], "gerant@akig.gn");
    assert_eq!(me["data"]["role"], "manager");
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let app = test_app();
    let (status, _, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/login",
            None,
            json!({ "email": "gerant@akig.gn", "password": "mauvais-mot" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "invalid email or password");
}

#[tokio::test]
async fn test_refresh_rotates_and_logout_revokes() {
    let app = test_app();
    let (_, _, first) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/login",
            None,
            json!({ "email": "agent@akig.gn", "password": PASSWORD }),
        ),
    )
    .await;
    let refresh_token = first["data"]["refresh_token"].as_str().unwrap();

    let (status, _, second) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/refresh",
            None,
            json!({ "refresh_token": refresh_token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rotated = second["data"]["refresh_token"].as_str().unwrap();
    assert_ne!(rotated, refresh_token);

    let (status, _, _) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/refresh",
            None,
            json!({ "refresh_token": refresh_token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, headers, _) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/logout",
            None,
            json!({ "refresh_token": rotated }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let cleared = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cleared.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_payment_idempotency_and_commission() {
    let app = test_app();
    let token = login(&app, "gerant@akig.gn").await;
    let (tenant_id, contract_id) = lease(&app, &token).await;

    let payment = json!({
        "contract_id": contract_id,
        "tenant_id": tenant_id,
        "amount": 1_500_000,
        "mode": "Orange Money",
        "paid_at": "2024-03-05"
    });
    let request = |body: &Value| {
        Request::builder()
            .method(Method::POST)
            .uri("/api/payments")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header("Idempotency-Key", "mobile-7f3a")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let (status, _, created) = send(&app, request(&payment)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    assert_eq!(created["data"]["commission_amount"], 225_000);
    assert_eq!(created["data"]["owner_net"], 1_275_000);
    assert_eq!(created["data"]["mode"], "orange_money");
    assert!(created["data"]["reference"]
        .as_str()
        .unwrap()
        .starts_with("GNF-2024-"));

    let (status, _, replay) = send(&app, request(&payment)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["data"]["id"], created["data"]["id"]);

    let (_, _, page) = send(&app, get("/api/payments?page=1&page_size=10", &token)).await;
    assert_eq!(page["data"]["total"], 1);

    let history_uri = format!("/api/payments/{}/history", created["data"]["id"]);
    let (status, _, history) = send(&app, get(&history_uri, &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["data"][0]["event_type"], "payment_created");
}

#[tokio::test]
async fn test_agent_cannot_confirm_payments() {
    let app = test_app();
    let manager = login(&app, "gerant@akig.gn").await;
    let (tenant_id, contract_id) = lease(&app, &manager).await;

    let agent = login(&app, "agent@akig.gn").await;
    let (status, _, created) = send(
        &app,
        json_request(
            Method::POST,
            "/api/payments",
            Some(&agent),
            json!({
                "contract_id": contract_id,
                "tenant_id": tenant_id,
                "amount": 1_500_000,
                "mode": "Espèces",
                "paid_at": "2024-04-05"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/api/payments/{}/confirm", created["data"]["id"]);

    let (status, _, body) = send(&app, json_request(Method::POST, &uri, Some(&agent), json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _, confirmed) =
        send(&app, json_request(Method::POST, &uri, Some(&manager), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["data"]["status"], "confirmed");
}

#[tokio::test]
async fn test_csv_import_feeds_arrears() {
    let app = test_app();
    let token = login(&app, "gerant@akig.gn").await;

    let csv = "Nom locataire;Téléphone;Propriétaire;Immeuble/Site;Contrat;Date paiement;Montant;Mode paiement\n\
               Awa Sylla;664 55 66 77;Fatoumata Bah;Immeuble Ratoma;CTR-R1;05/01/2024;900 000;Espèces\n\
               Awa Sylla;664 55 66 77;Fatoumata Bah;Immeuble Ratoma;CTR-R1;05/02/2024;900 000;OM\n\
               Awa Sylla;664 55 66 77;Fatoumata Bah;Immeuble Ratoma;CTR-R1;bientôt;900 000;Espèces\n";
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/imports/csv")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "text/csv")
        .header("X-Filename", "paiements%20janvier.csv")
        .body(Body::from(csv))
        .unwrap();
    let (status, _, report) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", report);
    assert_eq!(report["data"]["source_file"], "paiements janvier.csv");
    assert_eq!(report["data"]["rows_inserted"], 2);
    assert_eq!(report["data"]["rows_failed"], 1);

    let run_id = report["data"]["run_id"].as_i64().unwrap();
    let (status, _, run) = send(&app, get(&format!("/api/imports/{}", run_id), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["data"]["rows_total"], 3);

    // 12 × 900 000 due, 1 800 000 paid
    let (status, _, arrears) = send(&app, get("/api/arrears?year=2024", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(arrears["data"]["totals"]["contracts"], 1);
    assert_eq!(arrears["data"]["rows"][0]["arrears_amount"], 9_000_000);
    assert_eq!(arrears["data"]["rows"][0]["pressure_level"], "closure");
}

#[tokio::test]
async fn test_unknown_entity_is_404() {
    let app = test_app();
    let token = login(&app, "gerant@akig.gn").await;
    let (status, _, body) = send(&app, get("/api/contracts/999", &token)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_huge_page_number_returns_empty_page() {
    let app = test_app();
    let token = login(&app, "gerant@akig.gn").await;

    let (status, _, page) = send(&app, get("/api/payments?page=4294967295", &token)).await;
    assert_eq!(status, StatusCode::OK, "{}", page);
    assert_eq!(page["data"]["items"], json!([]));

    // the server keeps answering afterwards
    let (status, _, _) = send(&app, get("/api/tenants", &token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_oversized_payment_is_rejected() {
    let app = test_app();
    let token = login(&app, "gerant@akig.gn").await;
    let (tenant_id, contract_id) = lease(&app, &token).await;

    let (status, _, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/payments",
            Some(&token),
            json!({
                "contract_id": contract_id,
                "tenant_id": tenant_id,
                "amount": 7_000_000_000_000_000_i64,
                "mode": "cash",
                "paid_at": "2024-02-05"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert_eq!(body["error"], "validation_error");
}
