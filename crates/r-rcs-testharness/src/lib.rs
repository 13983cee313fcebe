//! ---
//! rcs_section: "15-testing-qa"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Scripted command-channel and process-manager doubles."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Test doubles for the R-RCS orchestration core.
//!
//! [`ScriptedChannelFactory`] stands in for the per-application command
//! transport: each (application, command) pair can be scripted to
//! acknowledge after a delay, fail, or stay silent. Acknowledgements travel
//! through the real [`ResponseListener`], so the collector-loop timing the
//! core relies on is exercised for real.
//!
//! [`HarnessProcessManagerFactory`] stands in for the launcher backend,
//! with per-application liveness control and observable terminate counts.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::json;
use serde_json::Value;

use r_rcs_common::{PartitionConfig, SubsystemConfig};
use r_rcs_control::{
    Ack, AppDescriptor, ChannelFactory, CommandSender, ControlError, LivenessProbe,
    ProcessManager, ProcessManagerFactory, ResponseListener,
};
use r_rcs_fsm::Command;

/// Scripted behavior for one (application, command) pair.
#[derive(Debug, Clone)]
pub enum AckScript {
    /// Acknowledge success after the given delay.
    AckAfter(Duration),
    /// Acknowledge failure carrying the given error text, after the delay.
    FailAfter(Duration, String),
    /// Never acknowledge; the dispatch deadline decides.
    Never,
}

#[derive(Debug, Default)]
struct ChannelState {
    scripts: HashMap<(String, Command), AckScript>,
    fail_ping: HashSet<String>,
    stops: HashMap<String, u32>,
}

/// Factory producing scripted command channels, shared across a whole tree.
#[derive(Debug, Default)]
pub struct ScriptedChannelFactory {
    state: Arc<Mutex<ChannelState>>,
}

impl ScriptedChannelFactory {
    /// A factory whose channels acknowledge every command promptly.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the behavior for one (application, command) pair. Unscripted
    /// pairs acknowledge success after 10 ms.
    pub fn script(&self, application: &str, command: Command, script: AckScript) {
        self.state
            .lock()
            .scripts
            .insert((application.to_owned(), command), script);
    }

    /// Make the named application fail its reachability probe.
    pub fn fail_ping(&self, application: &str) {
        self.state.lock().fail_ping.insert(application.to_owned());
    }

    /// How many times the named application's channel was stopped.
    pub fn stop_count(&self, application: &str) -> u32 {
        self.state
            .lock()
            .stops
            .get(application)
            .copied()
            .unwrap_or(0)
    }
}

impl ChannelFactory for ScriptedChannelFactory {
    fn open(
        &self,
        descriptor: &AppDescriptor,
        listener: &ResponseListener,
    ) -> Box<dyn CommandSender> {
        Box::new(ScriptedSender {
            name: descriptor.name.clone(),
            listener: listener.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

struct ScriptedSender {
    name: String,
    listener: ResponseListener,
    state: Arc<Mutex<ChannelState>>,
}

#[async_trait]
impl CommandSender for ScriptedSender {
    async fn send(&self, command: Command, _payload: Value) -> Result<(), ControlError> {
        let script = self
            .state
            .lock()
            .scripts
            .get(&(self.name.clone(), command))
            .cloned()
            .unwrap_or(AckScript::AckAfter(Duration::from_millis(10)));
        let listener = self.listener.clone();
        let node = self.name.clone();
        match script {
            AckScript::AckAfter(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    listener.deliver(Ack {
                        node,
                        command,
                        success: true,
                        detail: Value::Null,
                    });
                });
            }
            AckScript::FailAfter(delay, error) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    listener.deliver(Ack {
                        node,
                        command,
                        success: false,
                        detail: json!({ "error": error }),
                    });
                });
            }
            AckScript::Never => {}
        }
        Ok(())
    }

    async fn ping(&self) -> bool {
        !self.state.lock().fail_ping.contains(&self.name)
    }

    fn stop(&self) {
        *self
            .state
            .lock()
            .stops
            .entry(self.name.clone())
            .or_insert(0) += 1;
    }
}

#[derive(Debug)]
struct HarnessProbe {
    name: String,
    dead: Arc<Mutex<HashSet<String>>>,
}

impl LivenessProbe for HarnessProbe {
    fn is_alive(&self) -> bool {
        !self.dead.lock().contains(&self.name)
    }

    fn process_state(&self) -> String {
        if self.is_alive() {
            "alive".to_owned()
        } else {
            "dead[1]".to_owned()
        }
    }
}

/// Process-manager double for one subsystem.
#[derive(Debug)]
pub struct HarnessProcessManager {
    subsystem: String,
    booted: Mutex<bool>,
    terminations: AtomicU32,
    dead: Arc<Mutex<HashSet<String>>>,
    fail_boot: Option<String>,
}

impl HarnessProcessManager {
    /// How many times terminate was invoked on this manager.
    pub fn terminations(&self) -> u32 {
        self.terminations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ProcessManager for HarnessProcessManager {
    async fn boot(
        &self,
        config: &SubsystemConfig,
    ) -> Result<IndexMap<String, AppDescriptor>, ControlError> {
        if let Some(reason) = &self.fail_boot {
            return Err(ControlError::BootFailure(reason.clone()));
        }
        let mut booted = self.booted.lock();
        if *booted {
            return Err(ControlError::AlreadyBooted(self.subsystem.clone()));
        }
        *booted = true;

        let mut apps = IndexMap::new();
        for (name, launch) in &config.applications {
            apps.insert(
                name.clone(),
                AppDescriptor {
                    name: name.clone(),
                    host: launch.host.clone(),
                    port: launch.port,
                    handle: Arc::new(HarnessProbe {
                        name: name.clone(),
                        dead: Arc::clone(&self.dead),
                    }),
                },
            );
        }
        Ok(apps)
    }

    async fn terminate(&self) {
        *self.booted.lock() = false;
        self.terminations.fetch_add(1, Ordering::Relaxed);
    }

    fn is_alive(&self, name: &str) -> bool {
        !self.dead.lock().contains(name)
    }
}

/// Factory producing [`HarnessProcessManager`]s and keeping them reachable
/// for assertions.
#[derive(Debug, Default)]
pub struct HarnessProcessManagerFactory {
    dead: Arc<Mutex<HashSet<String>>>,
    fail_boot: Mutex<HashMap<String, String>>,
    managers: Mutex<HashMap<String, Arc<HarnessProcessManager>>>,
}

impl HarnessProcessManagerFactory {
    /// A factory whose managers launch everything alive.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Declare the named application's process dead: it still "launches"
    /// but fails the liveness check.
    pub fn kill(&self, application: &str) {
        self.dead.lock().insert(application.to_owned());
    }

    /// Make boot of the named subsystem fail outright.
    pub fn fail_boot(&self, subsystem: &str, reason: &str) {
        self.fail_boot
            .lock()
            .insert(subsystem.to_owned(), reason.to_owned());
    }

    /// The manager most recently created for `subsystem`, if any.
    pub fn manager(&self, subsystem: &str) -> Option<Arc<HarnessProcessManager>> {
        self.managers.lock().get(subsystem).cloned()
    }
}

impl ProcessManagerFactory for HarnessProcessManagerFactory {
    fn create(&self, subsystem: &str) -> Arc<dyn ProcessManager> {
        let manager = Arc::new(HarnessProcessManager {
            subsystem: subsystem.to_owned(),
            booted: Mutex::new(false),
            terminations: AtomicU32::new(0),
            dead: Arc::clone(&self.dead),
            fail_boot: self.fail_boot.lock().get(subsystem).cloned(),
        });
        self.managers
            .lock()
            .insert(subsystem.to_owned(), Arc::clone(&manager));
        manager
    }
}

/// Build a partition configuration from `(subsystem, [applications])`
/// pairs, with synthetic hosts/ports and the stock lifecycle graph.
pub fn partition_config(name: &str, subsystems: &[(&str, &[&str])]) -> PartitionConfig {
    let mut raw = json!({ "name": name, "subsystems": {} });
    let mut port = 3333u16;
    for (subsystem, applications) in subsystems {
        let mut apps = serde_json::Map::new();
        for application in *applications {
            apps.insert(
                (*application).to_owned(),
                json!({ "host": format!("{subsystem}-host"), "port": port }),
            );
            port += 1;
        }
        raw["subsystems"][*subsystem] = json!({ "applications": apps });
    }
    PartitionConfig::from_json_str(&raw.to_string()).expect("harness partition config is valid")
}

/// Everything a scenario test needs: the channel and process-manager
/// doubles plus the partition configuration they will serve.
pub struct Harness {
    /// Scripted command transport shared by every application.
    pub channels: Arc<ScriptedChannelFactory>,
    /// Launcher double shared by every subsystem.
    pub processes: Arc<HarnessProcessManagerFactory>,
    /// Partition description for [`r_rcs_control::TopNode::from_config`].
    pub config: PartitionConfig,
}

impl Harness {
    /// Assemble a harness for the given `(subsystem, [applications])` layout.
    /// Also installs the development tracing subscriber so scenario logs are
    /// visible under `RUST_LOG`.
    pub fn new(name: &str, subsystems: &[(&str, &[&str])]) -> Self {
        r_rcs_common::logging::init();
        Self {
            channels: ScriptedChannelFactory::new(),
            processes: HarnessProcessManagerFactory::new(),
            config: partition_config(name, subsystems),
        }
    }

    /// Build the top node over the harness doubles.
    pub fn top(&self) -> r_rcs_control::TopNode {
        r_rcs_control::TopNode::from_config(
            &self.config,
            Arc::clone(&self.processes) as Arc<dyn ProcessManagerFactory>,
            Arc::clone(&self.channels) as Arc<dyn ChannelFactory>,
        )
        .expect("harness tree builds")
    }
}
