//! Workloads compiled into the gateway.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use cadence_runtime::{Workload, WorkloadInvocation, WorkloadRegistry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

const STOCK_SYMBOLS: [&str; 5] = ["AAPL", "GOOGL", "MSFT", "AMZN", "FB"];
const MIN_PRICE: u64 = 100;
const MAX_PRICE: u64 = 1000;

/// Registry holding every built-in workload.
pub fn builtin_registry() -> WorkloadRegistry {
    let mut registry = WorkloadRegistry::new();
    registry.register(Arc::new(GenStockReportOrchestrator));
    registry
}

/// Demo workload: logs a price report for a fixed set of symbols.
///
/// Prices are drawn from a generator seeded by the instance id, so replaying
/// the same instance yields the same report.
pub struct GenStockReportOrchestrator;

#[async_trait]
impl Workload for GenStockReportOrchestrator {
    fn name(&self) -> &str {
        "GenStockReportOrchestrator"
    }

    async fn run(&self, invocation: WorkloadInvocation) -> anyhow::Result<()> {
        info!(
            schedule_id = %invocation.schedule_id,
            instance_id = %invocation.instance_id,
            "GenStockReportOrchestrator started"
        );
        let report = stock_report(&invocation.instance_id);
        info!(instance_id = %invocation.instance_id, results = %report, "stock report generated");
        Ok(())
    }
}

/// `"AAPL: 412, GOOGL: 157, ..."` with prices in `100..1000`.
pub fn stock_report(seed: &str) -> String {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());
    STOCK_SYMBOLS
        .iter()
        .map(|symbol| {
            let price = rng.gen_range(MIN_PRICE..MAX_PRICE);
            format!("{symbol}: {price}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}
