//! RPC method dispatch.

use std::path::PathBuf;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::context::AppContext;
use crate::core::classifier;
use crate::core::transfer_engine::TransferEngineType;
use crate::core::{JobConfig, JobNotification, JobStatus, ManagerError, ManagerStatus};
use crate::settings::LastSettings;

use super::protocol::{OperationResult, Request, Response};

pub const SUBSCRIBE_METHOD: &str = "events.subscribe";

const DEFAULT_HISTORY_LIMIT: usize = 20;

pub struct MethodHandler {
    ctx: AppContext,
    start_time: Instant,
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Deserialize)]
struct PathPairParams {
    source: PathBuf,
    target: PathBuf,
}

fn parse<T: DeserializeOwned>(id: &Value, params: Value) -> Result<T, Response> {
    serde_json::from_value(params).map_err(|e| Response::invalid_params(id.clone(), e.to_string()))
}

/// Map a manager call onto the `{ok, reason}` body. Only a dead manager is a
/// protocol error.
fn operation<T: Serialize>(id: Value, result: Result<T, ManagerError>) -> Response {
    match result {
        Ok(outcome) => {
            let outcome = serde_json::to_value(outcome)
                .ok()
                .filter(|v| !v.is_null());
            Response::success(id, OperationResult::accepted(outcome))
        }
        Err(ManagerError::Unavailable) => {
            Response::internal_error(id, ManagerError::Unavailable.to_string())
        }
        Err(e) => Response::success(id, OperationResult::rejected(e.to_string())),
    }
}

impl MethodHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            start_time: Instant::now(),
        }
    }

    /// Receiver for the notification stream a subscribed connection forwards.
    pub fn subscribe(&self) -> broadcast::Receiver<JobNotification> {
        self.ctx.manager.subscribe()
    }

    pub async fn handle(&self, request: Request) -> Response {
        let id = request.id.clone().unwrap_or(Value::Null);
        let params = request.params.unwrap_or(Value::Null);
        debug!(method = %request.method, "RPC call");

        let result = match request.method.as_str() {
            "daemon.status" => self.daemon_status(id).await,
            "jobs.list" => self.jobs_list(id, params).await,
            "jobs.get" => self.jobs_get(id, params).await,
            "jobs.create" => self.jobs_create(id, params).await,
            "jobs.start" | "jobs.pause" | "jobs.resume" | "jobs.stop" | "jobs.restart"
            | "jobs.remove" => self.job_operation(&request.method, id, params).await,
            "history.recent" => self.history_recent(id, params).await,
            "history.similar" => self.history_similar(id, params).await,
            "history.predict" => self.history_predict(id, params).await,
            "errors.classify" => self.errors_classify(id, params),
            "optimizer.recommend" => self.optimizer_recommend(id, params).await,
            "settings.load" => Ok(Response::success(id, self.ctx.settings.load())),
            "settings.save" => self.settings_save(id, params),
            SUBSCRIBE_METHOD => Ok(Response::success(id, OperationResult::accepted(None))),
            _ => Ok(Response::method_not_found(id, &request.method)),
        };

        result.unwrap_or_else(|response| response)
    }

    async fn daemon_status(&self, id: Value) -> Result<Response, Response> {
        #[derive(Serialize)]
        struct DaemonStatus {
            version: &'static str,
            uptime_secs: u64,
            rpc_bind: String,
            transfer_engine: TransferEngineType,
            #[serde(flatten)]
            jobs: ManagerStatus,
        }

        let jobs = self
            .ctx
            .manager
            .status()
            .await
            .map_err(|e| Response::internal_error(id.clone(), e.to_string()))?;

        Ok(Response::success(
            id,
            DaemonStatus {
                version: env!("CARGO_PKG_VERSION"),
                uptime_secs: self.start_time.elapsed().as_secs(),
                rpc_bind: self.ctx.config.rpc_bind.to_string(),
                transfer_engine: self.ctx.config.transfer_engine,
                jobs,
            },
        ))
    }

    async fn jobs_list(&self, id: Value, params: Value) -> Result<Response, Response> {
        #[derive(Deserialize, Default)]
        struct Params {
            #[serde(default)]
            status: Option<JobStatus>,
            #[serde(default)]
            limit: Option<usize>,
            #[serde(default)]
            offset: Option<usize>,
        }

        let params: Params = if params.is_null() {
            Params::default()
        } else {
            parse(&id, params)?
        };

        let jobs = self
            .ctx
            .manager
            .list()
            .await
            .map_err(|e| Response::internal_error(id.clone(), e.to_string()))?;

        let jobs: Vec<_> = jobs
            .into_iter()
            .filter(|job| params.status.is_none_or(|s| job.status == s))
            .skip(params.offset.unwrap_or(0))
            .take(params.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(Response::success(id, jobs))
    }

    async fn jobs_get(&self, id: Value, params: Value) -> Result<Response, Response> {
        let params: IdParams = parse(&id, params)?;
        Ok(match self.ctx.manager.get(&params.id).await {
            Ok(job) => Response::success(id, job),
            Err(e) => operation::<()>(id, Err(e)),
        })
    }

    async fn jobs_create(&self, id: Value, params: Value) -> Result<Response, Response> {
        #[derive(Deserialize)]
        struct Params {
            source: PathBuf,
            target: PathBuf,
            #[serde(default)]
            is_move: bool,
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            start: bool,
        }

        let params: Params = parse(&id, params)?;
        let manager = &self.ctx.manager;

        let job = manager
            .create_job(JobConfig {
                name: params.name,
                source: params.source,
                target: params.target,
                is_move: params.is_move,
            })
            .await
            .map_err(|e| Response::internal_error(id.clone(), e.to_string()))?;

        if params.start {
            // A rejected start still leaves the job registered; report both.
            let started = manager.start(&job.id).await;
            let job = manager.get(&job.id).await.unwrap_or(job);

            #[derive(Serialize)]
            struct Created {
                job: crate::core::Job,
                start: OperationResult,
            }
            let start = match started {
                Ok(outcome) => OperationResult::accepted(serde_json::to_value(outcome).ok()),
                Err(e) => OperationResult::rejected(e.to_string()),
            };
            return Ok(Response::success(id, Created { job, start }));
        }

        Ok(Response::success(id, job))
    }

    async fn job_operation(&self, method: &str, id: Value, params: Value) -> Result<Response, Response> {
        let params: IdParams = parse(&id, params)?;
        let manager = &self.ctx.manager;
        let job_id = params.id.as_str();

        Ok(match method {
            "jobs.start" => operation(id, manager.start(job_id).await),
            "jobs.pause" => operation(id, manager.pause(job_id).await),
            "jobs.resume" => operation(id, manager.resume(job_id).await),
            "jobs.stop" => operation(id, manager.stop(job_id).await),
            "jobs.restart" => operation(id, manager.restart(job_id).await),
            "jobs.remove" => operation(id, manager.remove(job_id).await),
            other => Response::method_not_found(id, other),
        })
    }

    async fn history_recent(&self, id: Value, params: Value) -> Result<Response, Response> {
        #[derive(Deserialize, Default)]
        struct Params {
            #[serde(default)]
            limit: Option<usize>,
        }

        let params: Params = if params.is_null() {
            Params::default()
        } else {
            parse(&id, params)?
        };

        self.ctx
            .manager
            .recent_history(params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await
            .map(|records| Response::success(id.clone(), records))
            .map_err(|e| Response::internal_error(id, e.to_string()))
    }

    async fn history_similar(&self, id: Value, params: Value) -> Result<Response, Response> {
        let params: PathPairParams = parse(&id, params)?;
        self.ctx
            .manager
            .similar_history(&params.source, &params.target)
            .await
            .map(|records| Response::success(id.clone(), records))
            .map_err(|e| Response::internal_error(id, e.to_string()))
    }

    async fn history_predict(&self, id: Value, params: Value) -> Result<Response, Response> {
        #[derive(Deserialize)]
        struct Params {
            file_count: u64,
        }

        let params: Params = parse(&id, params)?;
        self.ctx
            .manager
            .predict(params.file_count)
            .await
            .map(|prediction| Response::success(id.clone(), prediction))
            .map_err(|e| Response::internal_error(id, e.to_string()))
    }

    fn errors_classify(&self, id: Value, params: Value) -> Result<Response, Response> {
        #[derive(Deserialize)]
        struct Params {
            text: String,
        }

        let params: Params = parse(&id, params)?;
        Ok(Response::success(id, classifier::classify(&params.text)))
    }

    async fn optimizer_recommend(&self, id: Value, params: Value) -> Result<Response, Response> {
        let params: PathPairParams = parse(&id, params)?;
        self.ctx
            .manager
            .recommend(&params.source, &params.target)
            .await
            .map(|advice| Response::success(id.clone(), advice))
            .map_err(|e| Response::internal_error(id, e.to_string()))
    }

    fn settings_save(&self, id: Value, params: Value) -> Result<Response, Response> {
        let settings: LastSettings = parse(&id, params)?;
        let result = if self.ctx.settings.save(&settings) {
            OperationResult::accepted(None)
        } else {
            OperationResult::rejected(format!(
                "could not write {}",
                self.ctx.settings.path().display()
            ))
        };
        Ok(Response::success(id, result))
    }
}
