//! The control loop tying component and service management together:
//! one entrypoint ([`Supervisor::init`]) followed by several independent
//! background loops spawned as abortable [`tokio::task::JoinHandle`]s,
//! rather than a single monolithic select loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use costrict_component::ComponentManager;
use costrict_config::{IntervalsConfig, ManagerSpecification, MidnightWindow, ServiceSpecification};
use costrict_core::{CostrictDir, OsProcess, ProcessLister};
use costrict_service::ServiceManager;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::SupervisorResult;
use crate::types::{HealthState, HealthSummary};

/// Construction parameters for [`Supervisor`].
pub struct SupervisorConfig {
    pub dir: CostrictDir,
    pub components: Arc<ComponentManager>,
    pub services: Arc<ServiceManager>,
    pub lister: Arc<dyn ProcessLister>,
    pub intervals: IntervalsConfig,
    pub midnight: MidnightWindow,
    /// Every component name the system spec declares. The stray-process
    /// sweep and the excessive-process detector only ever look for
    /// processes under these names.
    pub declared_component_names: Vec<String>,
    /// This daemon's own PID, so the stray sweep and the excessive-process
    /// detector never treat themselves as a stray/extraneous process.
    pub self_pid: u32,
}

/// Owns the daemon's background loops: startup reattachment/cleanup,
/// periodic recovery, optional metrics/log-reporting cadences, and the
/// once-daily upgrade check (the "midnight rooster" window).
pub struct Supervisor {
    dir: CostrictDir,
    components: Arc<ComponentManager>,
    services: Arc<ServiceManager>,
    lister: Arc<dyn ProcessLister>,
    intervals: IntervalsConfig,
    midnight: MidnightWindow,
    declared_component_names: Vec<String>,
    self_pid: u32,
}

impl Supervisor {
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            dir: config.dir,
            components: config.components,
            services: config.services,
            lister: config.lister,
            intervals: config.intervals,
            midnight: config.midnight,
            declared_component_names: config.declared_component_names,
            self_pid: config.self_pid,
        }
    }

    /// `Init`: kill stray processes left over from a previous run, refresh
    /// every component's version info and upgrade what's out of date,
    /// then register every declared service (re-attaching to any process
    /// or tunnel a prior run left running, via [`ServiceManager::start_service`]
    /// once [`Self::start_all_service`] runs).
    pub async fn init(
        &self,
        manager_spec: &ManagerSpecification,
        services: Vec<ServiceSpecification>,
    ) -> SupervisorResult<()> {
        self.kill_stray_processes();
        self.components.init().await;
        self.components.upgrade_all().await?;
        self.services.init(manager_spec, services).await?;
        Ok(())
    }

    /// Kills every process whose name matches a declared component,
    /// other than this process itself. A prior run's children are
    /// reattached by PID/cache rather than left running unsupervised, so
    /// anything still answering to a declared name at this point is a
    /// stray from a crash that skipped cleanup.
    fn kill_stray_processes(&self) {
        for name in &self.declared_component_names {
            for proc in self.lister.list_by_name(name) {
                if proc.pid == self.self_pid {
                    continue;
                }
                warn!(name = %name, pid = proc.pid, "killing stray process found at startup");
                self.lister.kill(proc.pid);
            }
        }
    }

    /// `StartAllService`: spawns every `startup=once` tool, then starts
    /// every `startup=always` service.
    pub async fn start_all_service(&self) -> SupervisorResult<()> {
        self.services.run_once_tools().await?;
        self.services.start_all().await?;
        self.services
            .export_knowledge(&self.dir.well_known_path())
            .await?;
        Ok(())
    }

    /// `StopAllService`: stops every currently-running service.
    pub async fn stop_all_service(&self) -> SupervisorResult<()> {
        self.services.stop_all().await?;
        Ok(())
    }

    /// `StartMonitoring`: every `intervals.monitoringSecs`, recovers every
    /// registered service (closing/reopening a drifted tunnel, or fully
    /// restarting a dead process).
    pub fn start_monitoring(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        let period = Duration::from_secs(supervisor.intervals.monitoring_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                supervisor.recover_all_services().await;
            }
        })
    }

    async fn recover_all_services(&self) {
        for detail in self.services.list(true).await {
            if let Err(e) = self.services.recover_service(&detail.name).await {
                warn!(service = %detail.name, error = %e, "recover_service failed");
            }
        }
    }

    /// `StartReportMetrics`: an optional timer disabled when
    /// `intervals.reportMetricsSecs <= 0`. Pushing to a metrics
    /// collector is out of scope here; this owns only the cadence a
    /// real push would run on.
    pub fn start_report_metrics(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let secs = self.intervals.report_metrics_secs;
        if secs <= 0 {
            return None;
        }
        let period = Duration::from_secs(secs as u64);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                info!("metrics report tick");
            }
        }))
    }

    /// `StartLogReporting`: same shape as [`Self::start_report_metrics`],
    /// on `intervals.logReportingSecs`.
    pub fn start_log_reporting(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let secs = self.intervals.log_reporting_secs;
        if secs <= 0 {
            return None;
        }
        let period = Duration::from_secs(secs as u64);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                info!("log report tick");
            }
        }))
    }

    /// `StartMidnightRooster`: once inside a random instant within
    /// `[midnight.startHour, midnight.endHour)` each day, re-checks every
    /// component's version and sweeps for extraneous processes; if
    /// either turns up something, exits the process so its supervising
    /// service manager (systemd, launchd, a parent shell) restarts it
    /// clean rather than trying to hot-upgrade a running daemon.
    pub fn start_midnight_rooster(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let delay = supervisor.next_midnight_delay();
                tokio::time::sleep(delay).await;

                let need_upgrade = supervisor.components.check_components().await > 0;
                let extraneous = supervisor.debounced_excessive_processes().await;
                if need_upgrade || !extraneous.is_empty() {
                    info!(
                        need_upgrade,
                        extraneous = extraneous.len(),
                        "midnight rooster found work pending, exiting for a clean restart"
                    );
                    std::process::exit(0);
                }
            }
        })
    }

    /// How long to sleep before the next midnight-rooster firing: a
    /// uniformly random instant within tomorrow's configured window, so
    /// every deployed instance doesn't wake at the exact same second.
    fn next_midnight_delay(&self) -> Duration {
        let start_hour = u32::from(self.midnight.start_hour);
        let end_hour = u32::from(self.midnight.end_hour).max(start_hour + 1);
        let span_secs = (end_hour - start_hour) * 3600;
        let offset_secs: u32 = rand::thread_rng().gen_range(0..span_secs);

        let tomorrow = chrono::Utc::now().date_naive() + chrono::Days::new(1);
        let window_start = tomorrow
            .and_hms_opt(start_hour, 0, 0)
            .unwrap_or_else(|| tomorrow.and_hms_opt(0, 0, 0).expect("midnight is always valid"));
        let target = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(window_start, chrono::Utc)
            + chrono::Duration::seconds(i64::from(offset_secs));

        (target - chrono::Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(1))
    }

    /// `Check`: aggregates every service's [`costrict_service::ServiceHealth`]
    /// and every component's `needUpgrade` flag into a single summary.
    pub async fn check(&self) -> HealthSummary {
        let mut passed = 0usize;
        let mut failed = 0usize;

        for detail in self.services.list(true).await {
            match self.services.check_service(&detail.name).await {
                Ok(costrict_service::ServiceHealth::Healthy) => passed += 1,
                _ => failed += 1,
            }
        }
        for detail in self.components.list().await {
            if detail.need_upgrade {
                failed += 1;
            } else {
                passed += 1;
            }
        }

        let total = passed + failed;
        let state = if failed == 0 {
            HealthState::Healthy
        } else if total > 0 && (failed as f64) < (total as f64) * 0.5 {
            HealthState::Warning
        } else {
            HealthState::Error
        };

        HealthSummary {
            state,
            passed,
            failed,
            total,
            generated_at: chrono::Utc::now(),
        }
    }

    /// `CheckExcessiveProcesses`: every OS process matching a declared
    /// component name that the service manager doesn't currently expect
    /// to be running (and that isn't this daemon itself).
    pub async fn check_excessive_processes(&self) -> Vec<OsProcess> {
        let expected: HashSet<u32> = self.services.expected_pids().await.into_iter().collect();
        let mut unexpected = Vec::new();
        for name in &self.declared_component_names {
            for proc in self.lister.list_by_name(name) {
                if proc.pid == self.self_pid || expected.contains(&proc.pid) {
                    continue;
                }
                unexpected.push(proc);
            }
        }
        unexpected
    }

    /// A debounced [`Self::check_excessive_processes`]: only PIDs that
    /// show up as unexpected across every sample are reported, so a
    /// process caught mid-restart (briefly unexpected while its
    /// replacement is being attached) doesn't trip the midnight rooster.
    async fn debounced_excessive_processes(&self) -> Vec<OsProcess> {
        const SAMPLES: usize = 3;
        const GAP: Duration = Duration::from_millis(500);

        let mut last = self.check_excessive_processes().await;
        let mut persistent: HashSet<u32> = last.iter().map(|p| p.pid).collect();
        for _ in 1..SAMPLES {
            tokio::time::sleep(GAP).await;
            last = self.check_excessive_processes().await;
            let pids: HashSet<u32> = last.iter().map(|p| p.pid).collect();
            persistent = persistent.intersection(&pids).copied().collect();
        }
        last.into_iter().filter(|p| persistent.contains(&p.pid)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costrict_component::ComponentManager;
    use costrict_config::ComponentSpecification;
    use costrict_core::CostrictDir;
    use costrict_repo::RepoClient;
    use costrict_service::{ServiceManager, ServiceManagerConfig};
    use costrict_store::PackageStore;
    use costrict_tunnel::TunnelManagerClient;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex;

    struct FakeLister {
        killed: StdMutex<Vec<u32>>,
        named: Vec<OsProcess>,
    }

    impl ProcessLister for FakeLister {
        fn list_by_name(&self, name: &str) -> Vec<OsProcess> {
            self.named
                .iter()
                .filter(|p| p.name.eq_ignore_ascii_case(name))
                .cloned()
                .collect()
        }
        fn name_of(&self, pid: u32) -> Option<String> {
            self.named.iter().find(|p| p.pid == pid).map(|p| p.name.clone())
        }
        fn kill(&self, pid: u32) {
            self.killed.lock().unwrap().push(pid);
        }
    }

    async fn build_fixture(named: Vec<OsProcess>, self_pid: u32) -> (Supervisor, Arc<FakeLister>) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = CostrictDir::from_path(tmp.path());
        dir.ensure().unwrap();

        let repo = RepoClient::new("https://repo.invalid", false).unwrap();
        let store = Arc::new(PackageStore::new(dir.clone(), repo.clone(), "unused"));
        let components = Arc::new(ComponentManager::new(
            dir.bin_dir(),
            store,
            repo,
            false,
            true,
            vec![ComponentSpecification {
                name: "demo".to_string(),
                install_dir: None,
            }],
            vec![],
        ));

        let auth_path = dir.auth_path();
        tokio::fs::write(
            &auth_path,
            r#"{"id":"u1","name":"alice","access_token":"tok123","machine_id":"m1","base_url":"https://example.com"}"#,
        )
        .await
        .unwrap();

        let lister = Arc::new(FakeLister {
            killed: StdMutex::new(Vec::new()),
            named,
        });

        let services = Arc::new(ServiceManager::new(ServiceManagerConfig {
            dir: dir.clone(),
            port_pool: Arc::new(Mutex::new(costrict_core::PortPool::new(22000, 22000))),
            components: components.clone(),
            tunnel_manager: TunnelManagerClient::new("https://tun.invalid".to_string()),
            auth: Arc::new(costrict_config::AuthStore::new(auth_path)),
            tunnel_client_template: costrict_config::TunnelClientTemplate {
                command: "sleep".to_string(),
                args: vec!["5".to_string()],
            },
            remote_addr: "tun.example.com:443".to_string(),
            lister: lister.clone() as Arc<dyn ProcessLister>,
            daemonized: false,
            log_dir: "/var/log/costrict".to_string(),
            log_level: "info".to_string(),
        }));

        let supervisor = Supervisor::new(SupervisorConfig {
            dir,
            components,
            services,
            lister: lister.clone() as Arc<dyn ProcessLister>,
            intervals: IntervalsConfig {
                monitoring_secs: 30,
                report_metrics_secs: 0,
                log_reporting_secs: 0,
            },
            midnight: MidnightWindow {
                start_hour: 2,
                end_hour: 4,
            },
            declared_component_names: vec!["demo".to_string()],
            self_pid,
        });

        (supervisor, lister)
    }

    #[tokio::test]
    async fn kill_stray_processes_skips_self_pid() {
        let (supervisor, lister) = build_fixture(
            vec![
                OsProcess { pid: 111, name: "demo".to_string() },
                OsProcess { pid: 222, name: "demo".to_string() },
            ],
            111,
        )
        .await;

        supervisor.kill_stray_processes();
        let killed = lister.killed.lock().unwrap().clone();
        assert_eq!(killed, vec![222]);
    }

    #[tokio::test]
    async fn check_excessive_processes_excludes_expected_and_self() {
        let (supervisor, _lister) = build_fixture(
            vec![
                OsProcess { pid: 50, name: "demo".to_string() },
                OsProcess { pid: 60, name: "demo".to_string() },
            ],
            50,
        )
        .await;

        let found = supervisor.check_excessive_processes().await;
        let pids: Vec<u32> = found.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![60]);
    }

    #[tokio::test]
    async fn check_with_no_registered_services_or_components_is_empty_and_healthy() {
        let (supervisor, _lister) = build_fixture(vec![], 1).await;
        let summary = supervisor.check().await;
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.state, HealthState::Healthy);
    }
}
