//! Command dispatch: bridges CLI args -> device manager -> output formatting.

pub mod config_cmd;
pub mod request;
pub mod serve;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use hwlink_config::Config;
use hwlink_core::sim::{SimApp, SimDevice};
use hwlink_core::{ConnectionState, DeviceManager};

use crate::cli::{Command, DeviceArgs, GlobalOpts};
use crate::error::CliError;

/// Dispatch a device-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Serve(args) => serve::handle(args, config).await,
        Command::Watch(args) => watch::handle(args, config, global).await,
        Command::Address(args) => request::address(args, config, global).await,
        Command::Sign(args) => request::sign(args, config, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}

// ── Device setup ─────────────────────────────────────────────────────

/// A manager wired to its driver, plus the simulator handle for scripting.
pub struct Device {
    pub manager: DeviceManager,
    pub sim: Arc<SimDevice>,
}

impl Device {
    /// Build the manager. Only the simulated backend is available.
    pub fn open(config: &Config, args: &DeviceArgs) -> Result<Self, CliError> {
        if !args.simulate {
            return Err(CliError::NoBackend);
        }

        let manager_config = config.to_manager_config()?;
        let sim = SimDevice::new(config.sim_seed);
        let manager = DeviceManager::new(manager_config, sim.driver(), SimApp::shared());
        tracing::debug!(seed = config.sim_seed, "using simulated device");
        Ok(Self { manager, sim })
    }

    /// Enable the manager, attach the simulated device and wait up to
    /// `wait_secs` for a transport.
    pub async fn connect(&self, wait_secs: u64) -> Result<(), CliError> {
        self.manager.enable().await?;
        self.sim.plug();

        let mut state = self.manager.watch_state();
        tokio::time::timeout(
            Duration::from_secs(wait_secs),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .map_err(|_| CliError::Timeout { seconds: wait_secs })?
        .map_err(|_| CliError::Internal("device manager stopped".into()))?;
        Ok(())
    }
}
