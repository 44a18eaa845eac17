use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::warn;

use crate::{jobs::JOB_SEND_EMAIL, mailer::OutgoingEmail, state::AppState};

use super::{JobExecution, JobHandler};

pub struct SendEmailJob;

impl SendEmailJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendEmailJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for SendEmailJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_EMAIL
    }

    async fn handle(&self, state: Arc<AppState>, job: crate::models::Job) -> JobExecution {
        let email: OutgoingEmail = match serde_json::from_value(job.payload.clone()) {
            Ok(email) => email,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid email payload: {err}"),
                }
            }
        };

        match state.mailer.send(&email).await {
            Ok(()) => JobExecution::Success,
            Err(err) => {
                warn!(job_id = %job.id, to = %email.to, error = %err, "email delivery will retry");
                JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: err.to_string(),
                }
            }
        }
    }
}
