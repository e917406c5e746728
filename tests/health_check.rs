use actix_web::{test, App, web};
use fitcoach_server::{health_check, AppState, Hub, Settings};
use chrono::DateTime;

#[actix_web::test]
async fn test_health_check() {
    let config = Settings::new_for_test().expect("Failed to load test config");
    let hub = Hub::spawn(config.chat.hub_capacity);
    let state = web::Data::new(AppState::new(config, hub));

    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
    ).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;

    assert!(resp.status().is_success());

    let body = test::read_body(resp).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["status"], "healthy");
    assert_eq!(json["online"], 0);
    assert!(DateTime::parse_from_rfc3339(
        json["timestamp"].as_str().unwrap()
    ).is_ok());
}

#[actix_web::test]
async fn test_health_check_without_hub() {
    let config = Settings::new_for_test().expect("Failed to load test config");
    let (hub, handle) = Hub::new(config.chat.hub_capacity);
    drop(hub);
    let state = web::Data::new(AppState::new(config, handle));

    let app = test::init_service(
        App::new()
            .app_data(state)
            .route("/health", web::get().to(health_check))
    ).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 503);
}
