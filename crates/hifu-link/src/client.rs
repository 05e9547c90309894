//! Workstation side of the link
//!
//! The client listens for plans and commands from the controller and pushes
//! status reports back. Each inbound connection carries exactly one message.

use crate::command::ClientEvent;
use crate::connection::{connect, write_frame, ConnectionConfig, Listener};
use crate::error::LinkError;
use crate::plan::PlanTransfer;
use crate::protocol::{Header, Protocol, WireWrite};
use crate::settings::SettingsStore;
use crate::status::encode_status;
use crate::types::{GroupedSpotMap, Plan, SonicationParameter, SpotOrder, StatusSnapshot};
use crate::LinkConfig;
use std::io::{BufReader, Cursor};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, error, info, trace, warn};

/// Workstation endpoint
pub struct Client {
    store: SettingsStore,
    config: LinkConfig,
    protocol: Protocol,
    listener: Option<Listener>,
    plan: Plan,
    status: StatusSnapshot,
    plans_received: u64,
    commands_received: u64,
}

impl Client {
    pub fn new(store: SettingsStore, config: LinkConfig) -> Self {
        let protocol = Protocol::new().with_max_message_size(config.max_message_size);
        Self {
            store,
            config,
            protocol,
            listener: None,
            plan: Plan::default(),
            status: StatusSnapshot::new(),
            plans_received: 0,
            commands_received: 0,
        }
    }

    /// Start listening on the configured receive endpoint
    pub fn listen(&mut self) -> Result<SocketAddr, LinkError> {
        if let Some(listener) = &self.listener {
            return listener.local_addr();
        }

        self.store.ensure_receive_address()?;
        let endpoint = &self.store.settings.receive;
        let listener = Listener::bind(
            (endpoint.ip_address.as_str(), endpoint.port),
            self.config.connection.clone(),
        )?;
        let addr = listener.local_addr()?;
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Last plan received
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn coordinates(&self) -> &GroupedSpotMap {
        &self.plan.spots
    }

    pub fn spot_order(&self) -> &SpotOrder {
        &self.plan.spot_order
    }

    pub fn parameter(&self) -> SonicationParameter {
        self.plan.parameter
    }

    pub fn set_status(&mut self, status: StatusSnapshot) {
        self.status = status;
    }

    /// Accept one connection and handle the message on it
    ///
    /// Returns `Ok(None)` for messages with an unknown header or command tag;
    /// those leave the client state untouched.
    pub fn receive_one(&mut self) -> Result<Option<ClientEvent>, LinkError> {
        let listener = self.listener.as_ref().ok_or(LinkError::NotListening)?;
        let (stream, addr) = listener.accept_next()?;

        let result = self.handle_stream(&stream, addr);
        let _ = stream.shutdown(Shutdown::Both);
        result
    }

    fn handle_stream(
        &mut self,
        stream: &TcpStream,
        addr: SocketAddr,
    ) -> Result<Option<ClientEvent>, LinkError> {
        let mut reader = BufReader::new(stream);

        match self.protocol.read_header(&mut reader)? {
            Some(Header::Command) => {
                let event = self
                    .protocol
                    .read_command(&mut reader)?
                    .map(ClientEvent::from);
                if let Some(event) = &event {
                    self.commands_received += 1;
                    info!("Received command {:?} from {}", event, addr);
                }
                Ok(event)
            }
            Some(Header::Plan) => {
                // A new plan replaces the old one even if it fails to decode
                self.plan.clear();

                let payload = self.protocol.read_framed_payload(&mut reader)?;
                let delivery = PlanTransfer::decode(&mut Cursor::new(payload))?
                    .reconstruct()
                    .map_err(|e| {
                        error!("Rejecting plan from {}: {}", addr, e);
                        e
                    })?;

                let mut reply = Vec::new();
                reply.write_string(delivery.receipt.as_str())?;
                let mut writer = stream;
                write_frame(&mut writer, &reply)?;
                debug!("Echoed receipt \"{}\"", delivery.receipt);

                let mismatched = delivery.plan.spot_order_mismatches();
                if !mismatched.is_empty() {
                    warn!("Spot order does not match spot count for layers {:?}", mismatched);
                }

                self.plan = delivery.plan.clone();
                self.plans_received += 1;
                info!(
                    "Received plan from {}: {} layers, {} spots",
                    addr,
                    self.plan.spots.len(),
                    self.plan.spot_count()
                );
                Ok(Some(ClientEvent::PlanReceived(delivery)))
            }
            Some(Header::Status) => {
                debug!("Ignoring status message from {}", addr);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Push the current status report to the controller
    pub fn send_status(&mut self) -> Result<(), LinkError> {
        let addr = self.store.settings.send.socket_addr()?;
        let frame = encode_status(&self.status)?;
        self.protocol.check_size(&frame)?;

        let mut stream = connect(addr, &self.config.connection)?;
        write_frame(&mut stream, &frame)?;
        let _ = stream.shutdown(Shutdown::Both);

        info!("Sent status update ({} entries)", self.status.len());
        Ok(())
    }

    /// Run the receive loop with a callback for each event
    ///
    /// The callback returns `false` to stop. Decode errors are logged and the
    /// loop moves on to the next connection.
    pub fn run<F>(&mut self, mut callback: F) -> Result<(), LinkError>
    where
        F: FnMut(ClientEvent) -> bool,
    {
        info!("Starting client receive loop");

        loop {
            match self.receive_one() {
                Ok(Some(event)) => {
                    if !callback(event) {
                        info!("Callback requested stop");
                        break;
                    }
                }
                Ok(None) => trace!("Message dropped"),
                Err(LinkError::AcceptTimeout) => {
                    trace!("Accept timeout, continuing");
                }
                Err(e @ (LinkError::NotListening | LinkError::Bind { .. })) => return Err(e),
                Err(e) => error!("Error receiving message: {}", e),
            }
        }

        info!(
            "Client stopped. Received {} plans, {} commands",
            self.plans_received, self.commands_received
        );
        Ok(())
    }

    /// Move the client to a background thread and forward its events
    pub fn run_async(mut self) -> (mpsc::Receiver<ClientEvent>, thread::JoinHandle<Self>) {
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            if let Err(e) = self.run(|event| tx.send(event).is_ok()) {
                error!("Client loop failed: {}", e);
            }
            self
        });

        (rx, handle)
    }

    /// Statistics about handled messages
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            plans_received: self.plans_received,
            commands_received: self.commands_received,
        }
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.config.connection
    }
}

/// Statistics about handled messages
#[derive(Debug, Clone, Copy)]
pub struct ClientStats {
    pub plans_received: u64,
    pub commands_received: u64,
}
