use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use diesel::prelude::*;
use serde::Deserialize;
use tokio::task;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    calendar::CalendarEvent,
    jobs::JOB_SYNC_APPOINTMENT,
    models::{Appointment, CalendarAccount, Client},
    schema::{appointments, calendar_accounts, clients},
    state::AppState,
};

use super::{JobExecution, JobHandler};

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Push,
    Remove,
}

#[derive(Debug, Deserialize)]
struct SyncPayload {
    appointment_id: Uuid,
    action: SyncAction,
}

pub struct SyncAppointmentJob;

impl SyncAppointmentJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SyncAppointmentJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for SyncAppointmentJob {
    fn job_type(&self) -> &'static str {
        JOB_SYNC_APPOINTMENT
    }

    async fn handle(&self, state: Arc<AppState>, job: crate::models::Job) -> JobExecution {
        let payload: SyncPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid sync payload: {err}"),
                }
            }
        };

        let state_clone = state.clone();
        let appointment_id = payload.appointment_id;
        let loaded = match task::spawn_blocking(move || load_sync_data(state_clone, appointment_id))
            .await
        {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(err)) => {
                warn!(job_id = %job.id, error = %err, "calendar sync will retry");
                return JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: err,
                };
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "calendar sync task panicked");
                return JobExecution::Retry {
                    delay: Duration::from_secs(60),
                    error: format!("worker panicked: {join_err}"),
                };
            }
        };

        let (appointment, client, accounts) = loaded;
        if accounts.is_empty() {
            return JobExecution::Success;
        }

        for account in &accounts {
            let result = match payload.action {
                SyncAction::Push => {
                    let Some(starts_at) = appointment.scheduled_at else {
                        return JobExecution::Failed {
                            error: "cannot push an appointment without a scheduled time".into(),
                        };
                    };
                    let event = CalendarEvent {
                        appointment_id: appointment.id,
                        title: format!("{}: {}", appointment.appointment_type, client.name),
                        starts_at,
                        ends_at: starts_at
                            + chrono::Duration::minutes(appointment.duration_minutes as i64),
                        description: appointment.admin_notes.clone(),
                    };
                    state.calendar.push_event(account, &event).await
                }
                SyncAction::Remove => {
                    state.calendar.remove_event(account, appointment.id).await
                }
            };

            if let Err(err) = result {
                warn!(
                    job_id = %job.id,
                    provider = %account.provider,
                    error = %err,
                    "calendar provider call failed, job will retry"
                );
                return JobExecution::Retry {
                    delay: Duration::from_secs(60),
                    error: err.to_string(),
                };
            }
        }

        JobExecution::Success
    }
}

type SyncData = (Appointment, Client, Vec<CalendarAccount>);

fn load_sync_data(state: Arc<AppState>, appointment_id: Uuid) -> Result<SyncData, String> {
    let mut conn = state.db().map_err(|err| format!("{err:?}"))?;

    let appointment: Appointment = appointments::table
        .find(appointment_id)
        .first(&mut conn)
        .map_err(|err| format!("{err:?}"))?;

    let client: Client = clients::table
        .find(appointment.client_id)
        .first(&mut conn)
        .map_err(|err| format!("{err:?}"))?;

    let accounts: Vec<CalendarAccount> = calendar_accounts::table
        .load(&mut conn)
        .map_err(|err| format!("{err:?}"))?;

    Ok((appointment, client, accounts))
}
