//! Treatment-controller side of the link
//!
//! The server pushes plans and commands to the workstation and receives its
//! status reports. Each send opens a fresh connection. A plan counts as
//! delivered only when the workstation echoes its receipt back unchanged.

use crate::command::CommandTag;
use crate::connection::{connect, write_frame, Listener};
use crate::error::LinkError;
use crate::plan::PlanTransfer;
use crate::protocol::{Header, Protocol, WireRead};
use crate::receipt::{Receipt, ReceiptIssuer};
use crate::settings::SettingsStore;
use crate::types::{GroupedSpotMap, Plan, SonicationParameter, SpotOrder, StatusSnapshot};
use crate::LinkConfig;
use std::io::{BufReader, ErrorKind};
use std::net::{Shutdown, SocketAddr};
use tracing::{debug, error, info, warn};

/// Treatment-controller endpoint
pub struct Server {
    store: SettingsStore,
    config: LinkConfig,
    protocol: Protocol,
    listener: Option<Listener>,
    plan: Plan,
    issuer: ReceiptIssuer,
    pending_receipt: Option<Receipt>,
    status: StatusSnapshot,
}

impl Server {
    pub fn new(store: SettingsStore, config: LinkConfig) -> Self {
        let protocol = Protocol::new().with_max_message_size(config.max_message_size);
        let issuer = ReceiptIssuer::new(config.server_name.clone(), config.client_name.clone());
        Self {
            store,
            config,
            protocol,
            listener: None,
            plan: Plan::new(
                GroupedSpotMap::new(),
                SpotOrder::new(),
                SonicationParameter::default(),
            ),
            issuer,
            pending_receipt: None,
            status: StatusSnapshot::new(),
        }
    }

    pub fn set_coordinates(&mut self, spots: GroupedSpotMap) {
        self.plan.spots = spots;
    }

    pub fn set_spot_order(&mut self, spot_order: SpotOrder) {
        self.plan.spot_order = spot_order;
    }

    pub fn set_parameter(&mut self, parameter: SonicationParameter) {
        self.plan.parameter = parameter;
    }

    /// Plan waiting to be sent
    pub fn pending_plan(&self) -> &Plan {
        &self.plan
    }

    /// Number of plans confirmed so far
    pub fn sessions_sent(&self) -> u32 {
        self.issuer.send_count() - 1
    }

    /// Latest status report from the workstation
    pub fn status(&self) -> &StatusSnapshot {
        &self.status
    }

    /// Issue a receipt and encode the pending plan with it
    pub fn prepare_plan_frame(&mut self) -> Result<Vec<u8>, LinkError> {
        let receipt = self.issuer.issue();
        let frame = PlanTransfer::new(&self.plan, receipt.clone()).encode()?;
        self.protocol.check_size(&frame)?;
        debug!(
            "Prepared plan: {} spots, {} bytes, receipt \"{}\"",
            self.plan.spot_count(),
            frame.len(),
            receipt
        );
        self.pending_receipt = Some(receipt);
        Ok(frame)
    }

    /// Check the receipt echoed by the workstation
    ///
    /// On a match the send counter advances and the plan buffers are
    /// cleared. On a mismatch nothing changes, so the caller may send again.
    pub fn confirm_receipt(&mut self, echoed: &str) -> Result<Receipt, LinkError> {
        let Some(expected) = self.pending_receipt.as_ref() else {
            return Err(LinkError::ReceiptMismatch {
                expected: String::new(),
                received: echoed.to_string(),
            });
        };

        if !expected.matches(echoed) {
            warn!("Receipt mismatch: sent \"{}\", got \"{}\"", expected, echoed);
            return Err(LinkError::ReceiptMismatch {
                expected: expected.to_string(),
                received: echoed.to_string(),
            });
        }

        let receipt = self.pending_receipt.take().unwrap_or_default();
        self.issuer.confirm();
        self.plan.spots.clear();
        self.plan.spot_order.clear();
        info!("Plan delivered, session {}", self.sessions_sent());
        Ok(receipt)
    }

    /// Send the pending plan and wait for its receipt
    pub fn send_plan(&mut self) -> Result<Receipt, LinkError> {
        let addr = self.store.settings.send.socket_addr()?;
        let mut stream = connect(addr, &self.config.connection)?;

        info!("Sending plan to {}", addr);
        let frame = self.prepare_plan_frame()?;
        write_frame(&mut stream, &frame)?;

        let echoed = {
            let mut reader = BufReader::new(&stream);
            match reader.read_string() {
                Ok(echoed) => echoed,
                Err(crate::protocol::ProtocolError::Io(e))
                    if e.kind() == ErrorKind::UnexpectedEof =>
                {
                    error!("Connection closed before the receipt arrived");
                    return Err(LinkError::MissingAcknowledgement);
                }
                Err(e) => return Err(e.into()),
            }
        };
        let _ = stream.shutdown(Shutdown::Both);

        self.confirm_receipt(&echoed)
    }

    /// Send one session command
    pub fn send_command(&mut self, command: CommandTag) -> Result<(), LinkError> {
        let addr = self.store.settings.send.socket_addr()?;
        let mut stream = connect(addr, &self.config.connection)?;

        let frame = self.protocol.encode_command(command);
        write_frame(&mut stream, &frame)?;
        let _ = stream.shutdown(Shutdown::Both);

        info!("Sent command {}", command);
        Ok(())
    }

    /// Start listening for status reports
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

    /// Accept one connection and read a status report from it
    ///
    /// Returns `Ok(None)` when the message is not a STATUS message; such
    /// messages are dropped and the stored status stays as it was.
    pub fn receive_status(&mut self) -> Result<Option<StatusSnapshot>, LinkError> {
        let listener = self.listener.as_ref().ok_or(LinkError::NotListening)?;
        let (stream, addr) = listener.accept_next()?;
        let mut reader = BufReader::new(&stream);

        let status = match self.protocol.read_header(&mut reader)? {
            Some(Header::Status) => {
                let payload = self.protocol.read_framed_payload(&mut reader)?;
                Some(crate::status::decode_status(&mut payload.as_slice())?)
            }
            Some(other) => {
                debug!("Ignoring {:?} message from {}", other, addr);
                None
            }
            None => None,
        };
        let _ = stream.shutdown(Shutdown::Both);

        if let Some(status) = &status {
            info!("Received status update from {} ({} entries)", addr, status.len());
            self.status = status.clone();
        }
        Ok(status)
    }
}
