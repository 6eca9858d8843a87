//! The demo work the host runs on its worker.

use core::time::Duration;
use lull::{Handler, TaskContext};
use tokio::time::sleep;

/// One unit of demo work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Sleeps, giving up early if cancelled.
    Sleep(Duration),
    /// Prints the text and completes.
    Echo(String),
    /// Fails with the text as its reason.
    Fail(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobHandler;

impl Handler<Job> for JobHandler {
    type Error = String;

    async fn handle(&self, job: Job, ctx: TaskContext) -> Result<(), String> {
        match job {
            Job::Sleep(duration) => {
                tokio::select! {
                    () = sleep(duration) => {}
                    () = ctx.cancelled() => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Task {} stopped sleeping early", ctx.id());
                    }
                }
                Ok(())
            }
            Job::Echo(text) => {
                println!("[{}] {text}", ctx.id());
                Ok(())
            }
            Job::Fail(reason) => Err(reason),
        }
    }
}
