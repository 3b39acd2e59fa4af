use super::{bad_request, error_response};
use crate::agent::ResearchRequest;
use crate::AppState;
use actix_web::{web, HttpResponse, Responder};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/research").route(web::post().to(research)));
}

async fn research(state: web::Data<AppState>, body: web::Json<ResearchRequest>) -> impl Responder {
    let request = body.into_inner();
    if request.query.trim().is_empty() {
        return bad_request("query must not be empty");
    }

    match state.research.run(request).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => {
            log::error!("[RESEARCH] Failed: {}", e);
            error_response(&e)
        }
    }
}
