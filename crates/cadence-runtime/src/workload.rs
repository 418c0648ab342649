use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::RuntimeError;
use crate::host::{InstanceStatus, LaunchRequest, ScheduleHost};

/// What a workload receives when a schedule launches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadInvocation {
    pub instance_id: String,
    pub schedule_id: String,
    pub input: Option<String>,
}

/// A named unit of work a schedule can launch.
#[async_trait]
pub trait Workload: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, invocation: WorkloadInvocation) -> anyhow::Result<()>;
}

/// Workloads addressable by orchestration name.
#[derive(Default, Clone)]
pub struct WorkloadRegistry {
    workloads: HashMap<String, Arc<dyn Workload>>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workload under its own name, replacing any earlier one.
    pub fn register(&mut self, workload: Arc<dyn Workload>) {
        self.workloads.insert(workload.name().to_string(), workload);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Workload>> {
        self.workloads.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workloads.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Executes claimed launches and records how each instance ended.
pub struct WorkloadRunner {
    host: Arc<ScheduleHost>,
    registry: Arc<WorkloadRegistry>,
}

impl WorkloadRunner {
    pub fn new(host: Arc<ScheduleHost>, registry: Arc<WorkloadRegistry>) -> Self {
        Self { host, registry }
    }

    /// Consume launches until every sender is gone. Each launch runs on its
    /// own task so a slow workload never delays the next one.
    pub async fn run(self, mut launches: mpsc::Receiver<LaunchRequest>) {
        info!(workloads = ?self.registry.names(), "workload runner started");
        let runner = Arc::new(self);
        while let Some(request) = launches.recv().await {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.launch(request).await });
        }
        info!("workload runner stopped");
    }

    /// Run one launch to completion and record its final status.
    pub async fn launch(&self, request: LaunchRequest) -> InstanceStatus {
        let status = match self.registry.get(&request.workload) {
            Some(workload) => {
                let invocation = WorkloadInvocation {
                    instance_id: request.instance_id.clone(),
                    schedule_id: request.schedule_id.clone(),
                    input: request.input.clone(),
                };
                match workload.run(invocation).await {
                    Ok(()) => {
                        info!(
                            schedule_id = %request.schedule_id,
                            instance_id = %request.instance_id,
                            workload = %request.workload,
                            "workload completed"
                        );
                        InstanceStatus::Completed
                    }
                    Err(e) => {
                        warn!(
                            schedule_id = %request.schedule_id,
                            instance_id = %request.instance_id,
                            workload = %request.workload,
                            error = %e,
                            "workload failed"
                        );
                        InstanceStatus::Failed
                    }
                }
            }
            None => {
                let err = RuntimeError::UnknownWorkload {
                    name: request.workload.clone(),
                };
                warn!(instance_id = %request.instance_id, code = err.code(), "{err}");
                InstanceStatus::Failed
            }
        };

        if let Err(e) = self.host.finish_instance(&request.instance_id, status) {
            error!(instance_id = %request.instance_id, "failed to record workload status: {e}");
        }
        status
    }
}
