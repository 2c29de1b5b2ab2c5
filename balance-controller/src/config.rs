use std::{fs, path::Path};

use anyhow::{Context, Result};
use balance_controller_core::{BalanceConfig, CostWeights, PhysicalConstants};
use nalgebra::Vector4;

use crate::args::Cli;

/// Reads physical constants from a TOML file. Missing keys keep their defaults.
pub fn load_constants(path: &Path) -> Result<PhysicalConstants> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading constants from {}", path.display()))?;
    parse_constants(&text).with_context(|| format!("parsing {}", path.display()))
}

fn parse_constants(text: &str) -> Result<PhysicalConstants> {
    Ok(toml::from_str(text)?)
}

pub fn build_config(cli: &Cli) -> Result<BalanceConfig> {
    let mut config = BalanceConfig::default();

    if let Some(path) = &cli.constants {
        config.constants = load_constants(path)?;
    }

    let state = cli.state_weights.to_fixed::<1, 4>("state weights")?;
    let input = cli.input_weight.to_fixed::<1, 1>("input weight")?;
    config.weights = CostWeights {
        state: Vector4::new(state[0], state[1], state[2], state[3]),
        input: input[0],
    };

    config.calibration_samples = cli.calibration_samples;
    config.riccati.step = cli.solver_step;

    config.validate()?;
    Ok(config)
}
