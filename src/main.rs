use clap::{Parser, Subcommand};
use modulem_rs::constants::DEFAULT_BAUD_RATE;
use modulem_rs::{init_logger, log_info, DriverConfig, ModuleMDriver, SerialConfig};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "modulem-cli")]
#[command(about = "CLI tool for the Module M energy meter link")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the driver loop against a connected Module M.
    Run {
        #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
        baudrate: u32,
        /// Seconds without a valid frame before live values are zeroed.
        #[arg(long, default_value = "10")]
        staleness_secs: u64,
        /// Helper executable run with the port name before opening, to stop
        /// a competing serial claimant.
        #[arg(long)]
        release_helper: Option<String>,
    },
    /// List serial ports and their USB identities.
    ListPorts,
}

#[tokio::main]
async fn main() {
    init_logger();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            baudrate,
            staleness_secs,
            release_helper,
        } => {
            let config = DriverConfig {
                serial: SerialConfig {
                    baudrate,
                    release_helper,
                    ..SerialConfig::default()
                },
                staleness_threshold: Duration::from_secs(staleness_secs),
                ..DriverConfig::default()
            };
            let mut driver = ModuleMDriver::new(config);
            driver.run().await;
        }
        Commands::ListPorts => {
            for info in tokio_serial::available_ports().unwrap_or_default() {
                match info.port_type {
                    tokio_serial::SerialPortType::UsbPort(usb) => log_info(&format!(
                        "{} vid 0x{:04X} pid 0x{:04X} {}",
                        info.port_name,
                        usb.vid,
                        usb.pid,
                        usb.product.as_deref().unwrap_or("")
                    )),
                    _ => log_info(&info.port_name),
                }
            }
        }
    }
}
