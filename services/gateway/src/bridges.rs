use shared::events::{
    BackupDomain, Domain, ProjectDomain, ProjectTaskDomain, SessionDomain, SkillDomain, UserDomain,
};
use shared::{BridgeStatsSnapshot, BusError, CorrelationBridge, EventBus};
use std::sync::Arc;
use std::time::Duration;

/// One correlation bridge per domain, shared by every request handler
pub struct Bridges {
    pub session: Arc<CorrelationBridge<SessionDomain>>,
    pub user: Arc<CorrelationBridge<UserDomain>>,
    pub skill: Arc<CorrelationBridge<SkillDomain>>,
    pub project: Arc<CorrelationBridge<ProjectDomain>>,
    pub task: Arc<CorrelationBridge<ProjectTaskDomain>>,
    pub backup: Arc<CorrelationBridge<BackupDomain>>,
}

async fn start<D: Domain>(
    bus: &Arc<dyn EventBus>,
    prefix: &str,
    timeout: Duration,
) -> Result<Arc<CorrelationBridge<D>>, BusError> {
    let bridge = CorrelationBridge::<D>::start(Arc::clone(bus), D::topics(prefix), timeout).await?;
    Ok(Arc::new(bridge))
}

impl Bridges {
    pub async fn start(
        bus: Arc<dyn EventBus>,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Self, BusError> {
        Ok(Self {
            session: start(&bus, prefix, timeout).await?,
            user: start(&bus, prefix, timeout).await?,
            skill: start(&bus, prefix, timeout).await?,
            project: start(&bus, prefix, timeout).await?,
            task: start(&bus, prefix, timeout).await?,
            backup: start(&bus, prefix, timeout).await?,
        })
    }

    pub fn stats(&self) -> Vec<BridgeStatsSnapshot> {
        vec![
            self.session.stats(),
            self.user.stats(),
            self.skill.stats(),
            self.project.stats(),
            self.task.stats(),
            self.backup.stats(),
        ]
    }

    pub async fn shutdown(&self) {
        self.session.shutdown().await;
        self.user.shutdown().await;
        self.skill.shutdown().await;
        self.project.shutdown().await;
        self.task.shutdown().await;
        self.backup.shutdown().await;
    }
}
