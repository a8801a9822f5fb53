//! Fleet activation, consolidation and teardown.

use std::collections::HashSet;

use async_trait::async_trait;
use stratus_reconcile::{BoxError, Leased, Processor};
use tracing::{debug, info, instrument};

use crate::models::{FleetRecord, FleetStatus, FleetUpdate, InstanceRecord, InstanceStatus};
use crate::state::ServerContext;

pub const NAME: &str = "fleets";

pub struct FleetsProcessor {
    ctx: ServerContext,
}

impl FleetsProcessor {
    pub fn new(ctx: ServerContext) -> Self {
        Self { ctx }
    }

    /// Moves the live instance count into `nodes`.
    ///
    /// Missing instances are created `pending`; only idle instances are
    /// removed when there are too many, the highest numbers first.
    async fn consolidate(&self, fleet: &FleetRecord) -> Result<FleetUpdate, BoxError> {
        let store = &self.ctx.stores().instances;
        let instances = store.list_fleet_instances(&fleet.id).await?;
        let live: Vec<&InstanceRecord> = instances.iter().filter(|i| i.status.is_active()).collect();
        let nodes = &fleet.spec.nodes;

        let min = nodes.min.unwrap_or(0) as usize;
        if live.len() < min {
            let used: HashSet<u32> = instances.iter().map(|i| i.instance_num).collect();
            let free = (0..).filter(|num| !used.contains(num));
            let now = self.ctx.now();
            for instance_num in free.take(min - live.len()) {
                let instance = InstanceRecord::pending(
                    fleet.project_id,
                    Some(fleet.id),
                    format!("{}-{instance_num}", fleet.name),
                    instance_num,
                    fleet.spec.instance_spec(),
                    now,
                );
                store.create_instance(&instance).await?;
                info!(instance = %instance.name, "Created fleet instance");
            }
            return Ok(FleetUpdate::default());
        }

        if let Some(max) = nodes.max.map(|max| max as usize) {
            if live.len() > max {
                let mut idle: Vec<_> = live.iter().filter(|i| i.is_idle()).collect();
                idle.sort_by(|a, b| b.instance_num.cmp(&a.instance_num));
                for instance in idle.into_iter().take(live.len() - max) {
                    let marked = store
                        .mark_instance_terminating(
                            &instance.id,
                            true,
                            "Fleet has more instances than it needs",
                        )
                        .await?;
                    if marked {
                        info!(instance = %instance.name, "Terminating redundant fleet instance");
                    }
                }
            }
        }
        Ok(FleetUpdate::default())
    }

    async fn terminate(&self, fleet: &FleetRecord) -> Result<FleetUpdate, BoxError> {
        let store = &self.ctx.stores().instances;
        let instances = store.list_fleet_instances(&fleet.id).await?;
        for instance in instances.iter().filter(|i| i.status.is_active()) {
            store
                .mark_instance_terminating(&instance.id, false, "Fleet is terminating")
                .await?;
        }

        let remaining = instances
            .iter()
            .filter(|i| i.status != InstanceStatus::Terminated)
            .count();
        if remaining > 0 {
            debug!(remaining, "Waiting for fleet instances to terminate");
            return Ok(FleetUpdate::default());
        }

        info!("Fleet terminated");
        Ok(FleetUpdate {
            status: Some(FleetStatus::Terminated),
            deleted_at: Some(self.ctx.now()),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Processor<FleetRecord> for FleetsProcessor {
    #[instrument(skip_all, fields(fleet_id = %item.item.id, fleet = %item.item.name))]
    async fn process(&self, item: &Leased<FleetRecord>) -> Result<FleetUpdate, BoxError> {
        let fleet = &item.item;
        match fleet.status {
            FleetStatus::Submitted => {
                info!("Fleet is active");
                Ok(FleetUpdate {
                    status: Some(FleetStatus::Active),
                    ..Default::default()
                })
            }
            FleetStatus::Active => self.consolidate(fleet).await,
            FleetStatus::Terminating => self.terminate(fleet).await,
            FleetStatus::Terminated | FleetStatus::Failed => Ok(FleetUpdate::default()),
        }
    }
}
