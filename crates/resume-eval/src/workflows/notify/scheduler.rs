use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::dispatcher::ChatDispatcher;
use super::service::{PushError, PushService};
use crate::workflows::candidates::CandidateRepository;

/// Daily local wall-clock time of the scheduled push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushSchedule {
    hour: u8,
    minute: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("push time must be formatted as HH:MM")]
    Format,
    #[error("hour {0} is outside 0-23")]
    Hour(u32),
    #[error("minute {0} is outside 0-59")]
    Minute(u32),
}

impl PushSchedule {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ScheduleError> {
        if hour > 23 {
            return Err(ScheduleError::Hour(hour.into()));
        }
        if minute > 59 {
            return Err(ScheduleError::Minute(minute.into()));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// First occurrence strictly after `now`, in `now`'s zone. A wall-clock time skipped by a
    /// DST jump moves on to the next day.
    pub fn next_fire_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let zone = now.timezone();
        let mut date = now.date_naive();
        for _ in 0..3 {
            let fire = date
                .and_hms_opt(self.hour.into(), self.minute.into(), 0)
                .and_then(|naive| zone.from_local_datetime(&naive).earliest());
            if let Some(fire) = fire {
                if fire > *now {
                    return fire;
                }
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        now.clone() + chrono::Duration::days(1)
    }
}

impl FromStr for PushSchedule {
    type Err = ScheduleError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = raw.trim().split_once(':').ok_or(ScheduleError::Format)?;
        let field = |value: &str| {
            let value = value.trim();
            if value.is_empty() || value.len() > 2 {
                return Err(ScheduleError::Format);
            }
            value.parse::<u32>().map_err(|_| ScheduleError::Format)
        };
        let (hour, minute) = (field(hour)?, field(minute)?);
        if hour > 23 {
            return Err(ScheduleError::Hour(hour));
        }
        if minute > 59 {
            return Err(ScheduleError::Minute(minute));
        }
        Self::new(hour as u8, minute as u8)
    }
}

impl fmt::Display for PushSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Sleeps until the next scheduled time, pushes, repeats.
pub struct PushScheduler<R, D> {
    service: Arc<PushService<R, D>>,
    schedule: PushSchedule,
}

impl<R, D> PushScheduler<R, D>
where
    R: CandidateRepository + 'static,
    D: ChatDispatcher + 'static,
{
    pub fn new(service: Arc<PushService<R, D>>, schedule: PushSchedule) -> Self {
        Self { service, schedule }
    }

    pub async fn tick(&self) -> Result<usize, PushError> {
        self.service.push_scheduled().await
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(schedule = %self.schedule, "daily push scheduler started");
            loop {
                let now = Local::now();
                let next = self.schedule.next_fire_after(&now);
                let wait = (next - now).to_std().unwrap_or(Duration::from_secs(60));
                info!(next = %next.format("%Y-%m-%d %H:%M"), "next daily push scheduled");
                tokio::time::sleep(wait).await;

                match self.tick().await {
                    Ok(count) => info!(count, "daily push finished"),
                    Err(err) => error!(error = %err, "daily push failed"),
                }
            }
        })
    }
}
