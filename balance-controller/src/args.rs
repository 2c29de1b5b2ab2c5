use std::path::PathBuf;

use balance_controller_core::MatrixLiteral;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "Balance Controller")]
#[command(bin_name = "balance-controller")]
#[command(about = "LQR balance controller for a two-wheeled inverted pendulum robot")]
pub struct Cli {
    #[arg(help = "serial port the robot is attached to, e.g. /dev/ttyUSB0")]
    pub port: String,

    #[arg(long, default_value_t = 115200)]
    pub baud: u32,

    #[arg(
        short = 'q',
        long,
        default_value = "1 1 1000 10",
        help = "diagonal state cost, 1x4 matrix literal"
    )]
    pub state_weights: MatrixLiteral,

    #[arg(
        short = 'r',
        long,
        default_value = "1000000",
        help = "input cost, 1x1 matrix literal"
    )]
    pub input_weight: MatrixLiteral,

    #[arg(long, help = "TOML file overriding the physical constants")]
    pub constants: Option<PathBuf>,

    #[arg(long, default_value_t = 200)]
    pub calibration_samples: usize,

    #[arg(long, default_value_t = 0.01, help = "discretization step of the Riccati solver, s")]
    pub solver_step: f64,

    #[arg(long, help = "write every sample to this CSV file")]
    pub record: Option<PathBuf>,
}
