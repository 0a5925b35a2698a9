use crate::cli::Cli;
use eyre::{Context, Result};
use idbak_core::backup::BackupJob;
use idbak_core::config::{self, AgentConfig};
use idbak_core::util::IdevsUtil;

#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: AgentConfig,
    pub util: IdevsUtil,
}

impl AppContext {
    pub fn load(cli: &Cli) -> Result<Self> {
        if let Some(dir) = &cli.config_dir {
            config::set_config_dir(dir);
        }

        let path = match &cli.config {
            Some(path) => path.clone(),
            None => config::default_config_path()?,
        };
        let config = AgentConfig::load(&path).wrap_err("failed to read config")?;
        let util = IdevsUtil::from_config(&config);

        Ok(Self { config, util })
    }

    /// Resolve server and device; failure here ends the process.
    pub fn connect(&self) -> Result<BackupJob> {
        BackupJob::connect(&self.config, &self.util)
    }
}
