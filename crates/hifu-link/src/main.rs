use clap::{Parser, Subcommand, ValueEnum};
use hifu_link::{
    Client, ClientEvent, CommandTag, GroupKey, GroupedSpotMap, LinkConfig, Server,
    SessionProgress, SettingsStore, SonicationParameter, Spot3D, SpotOrder,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Bench tool for the HIFU plan/command/status link"
)]
struct Args {
    /// Settings file with the Receive and Send endpoints
    #[arg(short, long, default_value = "hifu-link.toml")]
    settings: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Act as the workstation: listen and print every event
    Client,
    /// Send one session command to the workstation
    Command {
        #[arg(value_enum)]
        command: CommandArg,
    },
    /// Send a generated plan to the workstation
    Plan {
        /// Number of layers
        #[arg(long, default_value = "2")]
        layers: usize,
        /// Spots per layer
        #[arg(long, default_value = "4")]
        spots: usize,
    },
    /// Act as the controller: wait for one status report
    Status,
    /// Send a progress report to the controller
    Report {
        #[arg(long, default_value = "0")]
        spot_index: i32,
        #[arg(long, default_value = "0")]
        period_index: i32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CommandArg {
    Start,
    Stop,
    Pause,
    Resume,
}

impl From<CommandArg> for CommandTag {
    fn from(arg: CommandArg) -> Self {
        match arg {
            CommandArg::Start => CommandTag::Start,
            CommandArg::Stop => CommandTag::Stop,
            CommandArg::Pause => CommandTag::Pause,
            CommandArg::Resume => CommandTag::Resume,
        }
    }
}

fn demo_plan(layers: usize, spots: usize) -> (GroupedSpotMap, SpotOrder) {
    let mut grouped = GroupedSpotMap::new();
    let mut order = SpotOrder::new();
    for layer in 0..layers {
        let key = GroupKey::new(layer as f32 + 1.0);
        let z = layer as f64 * 2.0;
        let layer_spots = (0..spots)
            .map(|i| Spot3D::new((i % 3) as f64, (i / 3) as f64, z))
            .collect();
        grouped.insert(key, layer_spots);
        order.insert(key, (0..spots as i32).collect());
    }
    (grouped, order)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let store = SettingsStore::open(&args.settings)?;
    let config = LinkConfig::default();

    match args.mode {
        Mode::Client => {
            let mut client = Client::new(store, config);
            let addr = client.listen()?;
            info!("Workstation listening on {}", addr);
            client.run(|event| {
                match event {
                    ClientEvent::PlanReceived(delivery) => info!(
                        "Plan received: {} layers, {} spots, receipt \"{}\"",
                        delivery.plan.spots.len(),
                        delivery.plan.spot_count(),
                        delivery.receipt
                    ),
                    command => info!("Command received: {:?}", command),
                }
                true
            })?;
        }
        Mode::Command { command } => {
            let mut server = Server::new(store, config);
            server.send_command(command.into())?;
        }
        Mode::Plan { layers, spots } => {
            let parameter = SonicationParameter::default();
            if let Err(e) = parameter.validate() {
                error!("Invalid sonication parameters: {}", e);
                return Err(e.into());
            }

            let (grouped, order) = demo_plan(layers, spots);
            let mut server = Server::new(store, config);
            server.set_coordinates(grouped);
            server.set_spot_order(order);
            server.set_parameter(parameter);
            let receipt = server.send_plan()?;
            info!("Plan confirmed with receipt \"{}\"", receipt);
        }
        Mode::Status => {
            let mut server = Server::new(store, config);
            let addr = server.listen()?;
            info!("Controller listening on {}", addr);
            loop {
                if let Some(status) = server.receive_status()? {
                    for (key, value) in &status {
                        info!("{} = {:?}", key, value);
                    }
                    break;
                }
            }
        }
        Mode::Report {
            spot_index,
            period_index,
        } => {
            let mut client = Client::new(store, config);
            client.set_status(
                SessionProgress {
                    spot_index,
                    period_index,
                }
                .into(),
            );
            client.send_status()?;
        }
    }

    Ok(())
}
