use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use thermolock_core::lockin::LockInConfig;
use thermolock_core::sim::SyntheticCameraConfig;

/// Contents of a simulation config file: a `[lockin]` and a `[camera]` table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub lockin: LockInConfig,
    #[serde(default)]
    pub camera: SyntheticCameraConfig,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save the default SimulationConfig as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let toml_str = toml::to_string_pretty(&SimulationConfig::default())?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Default config saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips() {
        let text = toml::to_string_pretty(&SimulationConfig::default()).unwrap();
        let parsed: SimulationConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, SimulationConfig::default());
    }

    #[test]
    fn test_missing_tables_use_defaults() {
        let parsed: SimulationConfig = toml::from_str("[lockin]\nfrequency_hz = 2.0\n").unwrap();
        assert_eq!(parsed.lockin.frequency_hz, 2.0);
        assert_eq!(parsed.camera, SyntheticCameraConfig::default());
    }
}
