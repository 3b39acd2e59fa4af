use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

mod agent;
mod ai;
mod config;
mod controllers;
mod error;
mod graph;
mod mcp;
mod skills;
mod tasks;
#[cfg(test)]
mod testing;

use agent::{AgentRuntime, ResearchService};
use ai::ProviderAdapter;
use config::Config;
use mcp::McpHttpConnector;
use tasks::capture::CapturingLogger;
use tasks::TaskRegistry;

pub struct AppState {
    pub config: Config,
    pub registry: Arc<TaskRegistry>,
    pub research: Arc<ResearchService>,
}

fn startup_error(what: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", what, err);
    std::io::Error::other(format!("{}: {}", what, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    if let Err(e) = CapturingLogger::init() {
        eprintln!("Failed to install logger: {}", e);
    }

    let config = Config::from_env();
    let port = config.port;

    log::info!("Initializing provider adapter (default model {})", config.default_model);
    let provider = ProviderAdapter::from_config(&config)
        .map_err(|e| startup_error("Failed to initialize provider adapter", e))?;

    log::info!("Tool sessions will connect to {}", config.mcp_server_url);
    let connector = McpHttpConnector::new(config.mcp_request_timeout)
        .map_err(|e| startup_error("Failed to initialize MCP connector", e))?;

    let runtime = Arc::new(AgentRuntime::from_config(
        &config,
        Arc::new(connector),
        Arc::new(provider),
    ));
    let registry = Arc::new(TaskRegistry::new(runtime.clone(), config.task_max_log_lines));
    let research = Arc::new(ResearchService::new(runtime, &config.skills_dir));

    // Reaper for finished tasks
    let reaper = Arc::clone(&registry);
    let retention = config.task_retention;
    let period = config.task_reap_interval.max(std::time::Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            reaper.reap_finished(retention);
        }
    });
    log::info!(
        "Task reaper every {:?}, retention {:?}",
        period,
        retention
    );

    log::info!("Starting agent orchestrator on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                config: config.clone(),
                registry: Arc::clone(&registry),
                research: Arc::clone(&research),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::tasks::config)
            .configure(controllers::research::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
