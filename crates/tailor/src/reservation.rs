//! Client side of the ad-prefetch reservation API. Schedules are owned by the
//! ad-decisioning service; this side only creates and deletes them by name.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Result, TailorError};

pub const AVAIL_DURATION_VARIABLE: &str = "session.avail_duration_secs";

/// Parameters of one prefetch schedule to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub name: String,
    pub retrieval_start: DateTime<Utc>,
    pub retrieval_end: DateTime<Utc>,
    pub consumption_start: DateTime<Utc>,
    pub consumption_end: DateTime<Utc>,
    /// Dynamic variable the schedule is matched on at consumption time.
    pub dynamic_variable: String,
    /// Value given to `dynamic_variable` when the creative is retrieved.
    pub dynamic_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSchedule {
    pub name: String,
    /// Retrieval end as recorded by the service. Absent when the service
    /// does not echo it back.
    pub retrieval_end: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PrefetchReservations: Send + Sync {
    async fn create(&self, request: &ScheduleRequest) -> Result<CreatedSchedule>;

    async fn delete(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateScheduleBody<'a> {
    consumption: ConsumptionBody<'a>,
    retrieval: RetrievalBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ConsumptionBody<'a> {
    avail_matching_criteria: Vec<AvailMatchingCriteria<'a>>,
    #[serde(with = "chrono::serde::ts_seconds")]
    start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    end_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AvailMatchingCriteria<'a> {
    dynamic_variable: &'a str,
    operator: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RetrievalBody<'a> {
    dynamic_variables: HashMap<&'a str, &'a str>,
    #[serde(with = "chrono::serde::ts_seconds")]
    start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    end_time: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateScheduleResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    retrieval: Option<RetrievalResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RetrievalResponse {
    /// Epoch seconds, possibly fractional.
    #[serde(default)]
    end_time: Option<f64>,
}

fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

/// REST client addressing schedules as
/// `{endpoint}/prefetchSchedule/{playback configuration}/{name}`.
#[derive(Debug, Clone)]
pub struct HttpReservationClient {
    client: reqwest::Client,
    endpoint: Url,
    playback_configuration_name: String,
}

impl HttpReservationClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        playback_configuration_name: impl Into<String>,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| TailorError::invalid_url(endpoint, e.to_string()))?;
        if endpoint.cannot_be_a_base() {
            return Err(TailorError::invalid_url(
                endpoint.as_str(),
                "endpoint cannot be a base URL",
            ));
        }
        Ok(Self {
            client,
            endpoint,
            playback_configuration_name: playback_configuration_name.into(),
        })
    }

    fn schedule_url(&self, name: &str) -> Url {
        let mut url = self.endpoint.clone();
        // cannot_be_a_base was rejected in `new`
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("prefetchSchedule")
                .push(&self.playback_configuration_name)
                .push(name);
        }
        url
    }
}

#[async_trait]
impl PrefetchReservations for HttpReservationClient {
    async fn create(&self, request: &ScheduleRequest) -> Result<CreatedSchedule> {
        let url = self.schedule_url(&request.name);
        let body = CreateScheduleBody {
            consumption: ConsumptionBody {
                avail_matching_criteria: vec![AvailMatchingCriteria {
                    dynamic_variable: &request.dynamic_variable,
                    operator: "EQUALS",
                }],
                start_time: request.consumption_start,
                end_time: request.consumption_end,
            },
            retrieval: RetrievalBody {
                dynamic_variables: HashMap::from([(
                    request.dynamic_variable.as_str(),
                    request.dynamic_value.as_str(),
                )]),
                start_time: request.retrieval_start,
                end_time: request.retrieval_end,
            },
        };

        let response = self
            .client
            .put(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| TailorError::reservation("create", &request.name, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TailorError::reservation(
                "create",
                &request.name,
                format!("HTTP {status} from {url}"),
            ));
        }

        let parsed: CreateScheduleResponse = response
            .json()
            .await
            .map_err(|e| TailorError::reservation("create", &request.name, e.to_string()))?;
        debug!(name = %request.name, ?parsed, "Prefetch schedule response");

        Ok(CreatedSchedule {
            name: parsed.name.unwrap_or_else(|| request.name.clone()),
            retrieval_end: parsed
                .retrieval
                .and_then(|r| r.end_time)
                .and_then(from_epoch_seconds),
        })
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let url = self.schedule_url(name);
        let response = self
            .client
            .delete(url.clone())
            .send()
            .await
            .map_err(|e| TailorError::reservation("delete", name, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TailorError::reservation(
                "delete",
                name,
                format!("HTTP {status} from {url}"),
            ));
        }
        Ok(())
    }
}
