//! Loopback demo for hifu-link
//!
//! Runs the workstation in a background thread and drives it from a
//! controller in the main thread: one plan, then a start command.

use hifu_link::{
    Client, ClientEvent, CommandTag, Endpoint, GroupKey, GroupedSpotMap, LinkConfig,
    LinkSettings, Server, SettingsStore, SonicationParameter, Spot3D,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut client = Client::new(
        SettingsStore::in_memory(LinkSettings::new(
            Endpoint::new("127.0.0.1", 0),
            Endpoint::default(),
        )),
        LinkConfig::default(),
    );
    let addr = client.listen()?;
    println!("Workstation listening on {addr}");
    let (events, _handle) = client.run_async();

    let mut server = Server::new(
        SettingsStore::in_memory(LinkSettings::new(
            Endpoint::default(),
            Endpoint::new(addr.ip().to_string(), addr.port()),
        )),
        LinkConfig::default(),
    );

    let mut spots = GroupedSpotMap::new();
    spots.insert(
        GroupKey::new(1.0),
        vec![Spot3D::new(0.0, 0.0, 0.0), Spot3D::new(1.0, 1.0, 1.0)],
    );
    spots.insert(GroupKey::new(2.0), vec![Spot3D::new(2.0, 2.0, 2.0)]);
    server.set_coordinates(spots);
    server.set_parameter(SonicationParameter::default());

    let receipt = server.send_plan()?;
    println!("Plan confirmed: {receipt}");

    server.send_command(CommandTag::Start)?;

    for _ in 0..2 {
        match events.recv()? {
            ClientEvent::PlanReceived(delivery) => {
                println!("Workstation got {} spots", delivery.plan.spot_count())
            }
            other => println!("Workstation got {other:?}"),
        }
    }

    Ok(())
}
