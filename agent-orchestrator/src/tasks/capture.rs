//! Per-task log capture
//!
//! The task a line belongs to is carried by a tokio task-local, so nothing
//! below the executor needs a task id in its signature. Lines go to the
//! process log as usual and, when a task context is present, into that
//! task's buffer in the table.

use super::TaskTable;
use chrono::{SecondsFormat, Utc};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Records with this target were already appended by `emit`
pub const CAPTURE_TARGET: &str = "task";

#[derive(Clone)]
pub struct TaskLogContext {
    pub task_id: String,
    pub table: Arc<TaskTable>,
}

tokio::task_local! {
    static CURRENT: TaskLogContext;
}

/// Run `future` with `ctx` as the ambient task
pub async fn scope<F: Future>(ctx: TaskLogContext, future: F) -> F::Output {
    CURRENT.scope(ctx, future).await
}

pub fn current() -> Option<TaskLogContext> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

pub(crate) fn timestamped(message: &str) -> String {
    format!(
        "[{}] {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        message
    )
}

/// Log a diagnostic line and attribute it to the ambient task, if any
pub fn emit(message: impl Into<String>) {
    let message = message.into();
    match current() {
        Some(ctx) => {
            log::info!(target: CAPTURE_TARGET, "[TASK {}] {}", ctx.task_id, message);
            ctx.table.append_log(&ctx.task_id, &message);
        }
        None => log::info!(target: CAPTURE_TARGET, "{}", message),
    }
}

/// `tokio::spawn` that carries the caller's task context into the new task
pub fn spawn_in_context<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Some(ctx) => tokio::spawn(CURRENT.scope(ctx, future)),
        None => tokio::spawn(future),
    }
}

/// env_logger front-end that also copies Info+ records into the log of the
/// task they were emitted under
pub struct CapturingLogger {
    inner: env_logger::Logger,
}

impl CapturingLogger {
    pub fn init() -> Result<(), SetLoggerError> {
        let inner = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
        // Info must always reach `log` so task buffers see it
        let max_level = inner.filter().max(LevelFilter::Info);
        log::set_boxed_logger(Box::new(CapturingLogger { inner }))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for CapturingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata) || metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &Record) {
        if self.inner.enabled(record.metadata()) {
            self.inner.log(record);
        }

        if record.level() > log::Level::Info || record.target() == CAPTURE_TARGET {
            return;
        }
        if let Some(ctx) = current() {
            ctx.table.append_log(&ctx.task_id, &record.args().to_string());
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}
