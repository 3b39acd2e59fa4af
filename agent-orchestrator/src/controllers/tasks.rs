use super::{bad_request, error_response};
use crate::AppState;
use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct StartTaskRequest {
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/tasks")
            .route(web::post().to(start_task))
            .route(web::get().to(list_tasks)),
    )
    // Registered before /{id} so "reap" is not taken for an id
    .service(web::resource("/api/tasks/reap").route(web::post().to(reap_tasks)))
    .service(web::resource("/api/tasks/{id}").route(web::get().to(task_status)))
    .service(web::resource("/api/tasks/{id}/cancel").route(web::post().to(cancel_task)));
}

async fn start_task(state: web::Data<AppState>, body: web::Json<StartTaskRequest>) -> impl Responder {
    let body = body.into_inner();
    if body.prompt.trim().is_empty() {
        return bad_request("prompt must not be empty");
    }

    let task_id = state.registry.start(body.prompt, body.system_prompt, body.model);
    HttpResponse::Ok().json(serde_json::json!({
        "status": "started",
        "task_id": task_id,
        "message": format!("Task {} started; poll /api/tasks/{} for status", task_id, task_id)
    }))
}

async fn list_tasks(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "tasks": state.registry.list()
    }))
}

async fn task_status(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match state.registry.status(&path) {
        Ok(snapshot) => HttpResponse::Ok().json(snapshot),
        Err(e) => error_response(&e),
    }
}

async fn cancel_task(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let task_id = path.into_inner();
    match state.registry.cancel(&task_id) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Cancellation requested for task {}", task_id)
        })),
        Err(e) => error_response(&e),
    }
}

async fn reap_tasks(state: web::Data<AppState>) -> impl Responder {
    let removed = state.registry.reap_finished(state.config.task_retention);
    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "removed": removed
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_state, ScriptedProvider, StubSession};
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};
    use std::time::Duration;

    #[actix_web::test]
    async fn test_start_then_poll_until_completed() {
        let state = app_state(ScriptedProvider::text("OK"), StubSession::new(), std::env::temp_dir());
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/tasks")
            .set_json(json!({"prompt": "summarize last session", "model": "gemini-test"}))
            .to_request();
        let started: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(started["status"], "started");
        let task_id = started["task_id"].as_str().unwrap().to_string();

        let mut last = Value::Null;
        for _ in 0..200 {
            let req = test::TestRequest::get().uri(&format!("/api/tasks/{}", task_id)).to_request();
            last = test::call_and_read_body_json(&app, req).await;
            if last["status"] != "running" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(last["status"], "completed");
        assert_eq!(last["result"], "OK");
        assert_eq!(last["task_id"], task_id.as_str());
    }

    #[actix_web::test]
    async fn test_unknown_task_maps_to_404() {
        let state = app_state(ScriptedProvider::text("OK"), StubSession::new(), std::env::temp_dir());
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/tasks/missing").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post().uri("/api/tasks/missing/cancel").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["kind"], "not_found");
    }

    #[actix_web::test]
    async fn test_empty_prompt_is_rejected() {
        let state = app_state(ScriptedProvider::text("OK"), StubSession::new(), std::env::temp_dir());
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/tasks")
            .set_json(json!({"prompt": "   "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_reap_route_is_not_an_id() {
        let state = app_state(ScriptedProvider::text("OK"), StubSession::new(), std::env::temp_dir());
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::post().uri("/api/tasks/reap").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["removed"], 0);
    }
}
