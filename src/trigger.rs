//! Downstream pipeline triggers through the Airflow REST API.
//!
//! Triggering is at-least-once and advisory: a DAG that is paused or already
//! has a live run is skipped, and any failure is logged rather than returned.

use crate::api::{Session, SessionOptions, build_session};
use crate::secrets::{AIRFLOW_SECRET, SecretStore, secret_str};
use anyhow::{Context, Result, bail};
use chrono::{TimeDelta, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

pub const DAG_ASSETS: &str = "citygeo__assets";
pub const DAG_ASSET_HISTORY: &str = "citygeo__asset_history";
pub const DAG_POLLBOOK_LOCATIONS: &str = "citygeo__pollbook_locations";
pub const DAG_ASSET_ROUTER_LOCATIONS: &str = "citygeo__asset_router_locations";

/// Runs started within this window are checked for `running`/`queued` state.
const RECENT_RUN_HOURS: i64 = 96;
const RECENT_RUN_LIMIT: &str = "20";

#[derive(Debug, Deserialize)]
struct DagInfo {
    is_paused: bool,
}

#[derive(Debug, Deserialize)]
struct DagRunList {
    #[serde(default)]
    dag_runs: Option<Vec<DagRun>>,
}

#[derive(Debug, Deserialize)]
struct DagRun {
    dag_run_id: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct CreatedRun {
    dag_run_id: String,
}

/// Why a DAG was not triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Paused,
    /// A recent run is still `running` or `queued`.
    Active { dag_run_id: String, state: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Triggered { dag_run_id: String },
    Skipped(SkipReason),
    /// Test mode; nothing was sent.
    DryRun,
    /// The request failed; already logged.
    Failed,
}

struct AirflowClient {
    session: Session,
    base_url: Url,
    login: String,
    password: String,
}

enum Mode {
    Live(AirflowClient),
    DryRun,
}

pub struct DagTrigger {
    mode: Mode,
}

impl DagTrigger {
    /// Log instead of triggering.
    pub fn dry_run() -> Self {
        Self { mode: Mode::DryRun }
    }

    pub fn live(
        base_url: &str,
        login: String,
        password: String,
        options: &SessionOptions,
    ) -> Result<Self> {
        let mut base_url = Url::parse(base_url).context("invalid Airflow URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            mode: Mode::Live(AirflowClient {
                session: build_session(options)?,
                base_url,
                login,
                password,
            }),
        })
    }

    pub async fn from_secrets(secrets: &dyn SecretStore, options: &SessionOptions) -> Result<Self> {
        let secret = secrets
            .get(AIRFLOW_SECRET)
            .await
            .context("failed to load Airflow secret")?;
        Self::live(
            &secret_str(&secret, "url")?,
            secret_str(&secret, "login")?,
            secret_str(&secret, "password")?,
            options,
        )
    }

    /// Trigger `dag` unless it is paused or already running. Never fails.
    pub async fn notify(&self, dag: &str) -> TriggerOutcome {
        let client = match &self.mode {
            Mode::DryRun => {
                info!(dag, "Test mode, not triggering DAG");
                return TriggerOutcome::DryRun;
            }
            Mode::Live(client) => client,
        };

        let outcome = async {
            if let Some(reason) = client.check_runnable(dag).await? {
                return Ok(TriggerOutcome::Skipped(reason));
            }
            let dag_run_id = client.trigger(dag).await?;
            Ok::<_, anyhow::Error>(TriggerOutcome::Triggered { dag_run_id })
        }
        .await;

        match outcome {
            Ok(TriggerOutcome::Triggered { dag_run_id }) => {
                info!(dag, dag_run_id = dag_run_id.as_str(), "DAG triggered");
                TriggerOutcome::Triggered { dag_run_id }
            }
            Ok(TriggerOutcome::Skipped(reason)) => {
                match &reason {
                    SkipReason::Paused => warn!(dag, "DAG is paused, not triggering"),
                    SkipReason::Active { dag_run_id, state } => info!(
                        dag,
                        dag_run_id = dag_run_id.as_str(),
                        state = state.as_str(),
                        "DAG already has a live run, not triggering"
                    ),
                }
                TriggerOutcome::Skipped(reason)
            }
            Ok(other) => other,
            Err(e) => {
                warn!(dag, error = ?e, "Failed to trigger DAG");
                TriggerOutcome::Failed
            }
        }
    }
}

impl AirflowClient {
    fn dag_url(&self, dag: &str, suffix: &str) -> Result<Url> {
        self.base_url
            .join(&format!("api/v1/dags/{dag}{suffix}"))
            .with_context(|| format!("cannot build URL for DAG '{dag}'"))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .session
            .get(url.clone())
            .basic_auth(&self.login, Some(&self.password))
            .header(http::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("GET {url} returned {status}");
        }
        crate::api::json::parse_json_with_context(&body)
    }

    /// `Some(reason)` when the DAG must not be triggered now.
    async fn check_runnable(&self, dag: &str) -> Result<Option<SkipReason>> {
        let info: DagInfo = self.get_json(self.dag_url(dag, "")?, &[]).await?;
        if info.is_paused {
            return Ok(Some(SkipReason::Paused));
        }

        let since = (Utc::now() - TimeDelta::hours(RECENT_RUN_HOURS)).to_rfc3339();
        let runs: DagRunList = self
            .get_json(
                self.dag_url(dag, "/dagRuns")?,
                &[
                    ("limit", RECENT_RUN_LIMIT),
                    ("start_date_gte", since.as_str()),
                    ("order_by", "-dag_run_id"),
                ],
            )
            .await?;

        let active = runs
            .dag_runs
            .unwrap_or_default()
            .into_iter()
            .find(|run| run.state == "running" || run.state == "queued");
        Ok(active.map(|run| SkipReason::Active {
            dag_run_id: run.dag_run_id,
            state: run.state,
        }))
    }

    async fn trigger(&self, dag: &str) -> Result<String> {
        let url = self.dag_url(dag, "/dagRuns")?;
        let response = self
            .session
            .post(url.clone())
            .basic_auth(&self.login, Some(&self.password))
            .header(http::header::ACCEPT, "application/json")
            .json(&json!({ "conf": {} }))
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("POST {url} returned {status}: {body}");
        }
        let created: CreatedRun = crate::api::json::parse_json_with_context(&body)?;
        Ok(created.dag_run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::fast_options;
    use wiremock::matchers::{basic_auth, body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn trigger_for(server: &MockServer) -> DagTrigger {
        DagTrigger::live(
            &server.uri(),
            "airflow".into(),
            "hunter2".into(),
            &fast_options(),
        )
        .unwrap()
    }

    async fn mount_dag(server: &MockServer, paused: bool) {
        Mock::given(method("GET"))
            .and(path("/api/v1/dags/citygeo__assets"))
            .and(basic_auth("airflow", "hunter2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "dag_id": "citygeo__assets",
                "is_paused": paused,
            })))
            .mount(server)
            .await;
    }

    async fn mount_runs(server: &MockServer, runs: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/api/v1/dags/citygeo__assets/dagRuns"))
            .and(query_param("limit", "20"))
            .and(query_param("order_by", "-dag_run_id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "dag_runs": runs })))
            .mount(server)
            .await;
    }

    async fn expect_post(server: &MockServer, times: u64) {
        Mock::given(method("POST"))
            .and(path("/api/v1/dags/citygeo__assets/dagRuns"))
            .and(basic_auth("airflow", "hunter2"))
            .and(body_json(json!({ "conf": {} })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"dag_run_id": "manual__1"})),
            )
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn triggers_idle_dag() {
        let server = MockServer::start().await;
        mount_dag(&server, false).await;
        mount_runs(
            &server,
            json!([{"dag_run_id": "scheduled__0", "state": "success"}]),
        )
        .await;
        expect_post(&server, 1).await;

        let outcome = trigger_for(&server).notify(DAG_ASSETS).await;
        assert_eq!(
            outcome,
            TriggerOutcome::Triggered {
                dag_run_id: "manual__1".into()
            }
        );
    }

    #[tokio::test]
    async fn paused_dag_is_skipped() {
        let server = MockServer::start().await;
        mount_dag(&server, true).await;
        expect_post(&server, 0).await;

        let outcome = trigger_for(&server).notify(DAG_ASSETS).await;
        assert_eq!(outcome, TriggerOutcome::Skipped(SkipReason::Paused));
    }

    #[tokio::test]
    async fn queued_run_is_skipped() {
        let server = MockServer::start().await;
        mount_dag(&server, false).await;
        mount_runs(
            &server,
            json!([
                {"dag_run_id": "manual__2", "state": "queued"},
                {"dag_run_id": "manual__1", "state": "failed"},
            ]),
        )
        .await;
        expect_post(&server, 0).await;

        let outcome = trigger_for(&server).notify(DAG_ASSETS).await;
        assert!(matches!(
            outcome,
            TriggerOutcome::Skipped(SkipReason::Active { ref state, .. }) if state == "queued"
        ));
    }

    #[tokio::test]
    async fn null_run_list_triggers() {
        let server = MockServer::start().await;
        mount_dag(&server, false).await;
        mount_runs(&server, serde_json::Value::Null).await;
        expect_post(&server, 1).await;

        let outcome = trigger_for(&server).notify(DAG_ASSETS).await;
        assert!(matches!(outcome, TriggerOutcome::Triggered { .. }));
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        expect_post(&server, 0).await;

        let outcome = trigger_for(&server).notify(DAG_ASSETS).await;
        assert_eq!(outcome, TriggerOutcome::Failed);
    }

    #[tokio::test]
    async fn dry_run_sends_nothing() {
        assert_eq!(
            DagTrigger::dry_run().notify(DAG_ASSET_HISTORY).await,
            TriggerOutcome::DryRun
        );
    }
}
