//! The server's network facade: the shared client map, the per-tick input
//! inbox, and the event queues that bridge the receive thread and the
//! simulation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use acre::net::events::EventQueue;
use acre::net::messages::{
    ClientInputs, ConnectionRequest, Heartbeat, Message, MessageDropInfo, MessageType,
};
use acre::net::sorter::{ReceiveGuard, TickSorter, Validity};
use acre::net::wire::{self, WireError};
use acre::sim::input::InputStateVec;

use super::client::Client;
use crate::config::ServerConfig;

/// An input that made it into the inbox; the tick is implied by the slot it
/// sorted into. The network id is filled in server-side from the socket the
/// message arrived on — ids from the client itself can't be trusted.
#[derive(Debug, Clone)]
pub struct SortedInput {
    pub net_id: u32,
    pub inputs: InputStateVec,
}

/// Shared between the client-handler thread (add/remove/receive) and the
/// simulation task (reads and sends). The reader-writer discipline follows
/// the map's usage: exclusive access only to mutate membership.
pub type ClientMap = HashMap<u32, Arc<Client>>;

pub struct ServerNetwork {
    config: ServerConfig,
    clients: RwLock<ClientMap>,
    inbox: TickSorter<SortedInput>,
    /// Newly accepted connections, for operator logging.
    connect_events: EventQueue<u32>,
    /// Clients erased from the map; the sim tears their entity down.
    disconnect_events: EventQueue<u32>,
    /// Connection requests waiting for the sim to build an entity.
    connect_requests: EventQueue<(u32, ConnectionRequest)>,
    /// Clients whose input was dropped; the sim flags them for an
    /// authoritative correction.
    drop_events: EventQueue<u32>,
    /// The sim's tick counter, shared so the receive thread can compute
    /// heartbeat diffs without locking anything.
    current_tick: AtomicU32,
}

impl ServerNetwork {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
            inbox: TickSorter::new(),
            connect_events: EventQueue::new(),
            disconnect_events: EventQueue::new(),
            connect_requests: EventQueue::new(),
            drop_events: EventQueue::new(),
            current_tick: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn clients(&self) -> &RwLock<ClientMap> {
        &self.clients
    }

    pub fn connect_events(&self) -> &EventQueue<u32> {
        &self.connect_events
    }

    pub fn disconnect_events(&self) -> &EventQueue<u32> {
        &self.disconnect_events
    }

    pub fn connect_requests(&self) -> &EventQueue<(u32, ConnectionRequest)> {
        &self.connect_requests
    }

    pub fn drop_events(&self) -> &EventQueue<u32> {
        &self.drop_events
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick.load(Ordering::Acquire)
    }

    /// Called by the simulation once per tick, after the inbox window has
    /// already moved via the receive guard drop.
    pub fn advance_tick(&self) {
        self.current_tick.fetch_add(1, Ordering::AcqRel);
    }

    pub fn connected_count(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    /// Serializes and queues a message for one client. A miss means the
    /// client disconnected since the caller looked; that's fine, the entry
    /// is already on its way out.
    pub fn send<M: Message>(&self, net_id: u32, message: &M) -> Result<(), WireError> {
        let record = wire::encode_message(message, &self.config.shared)?;
        if let Some(client) = self.clients.read().unwrap().get(&net_id) {
            client.queue_message(record);
        }
        Ok(())
    }

    /// Grants the simulation the input queue for exactly `tick`; dropping
    /// the guard advances the inbox window.
    pub fn start_receive_inputs(&self, tick: u32) -> ReceiveGuard<'_, SortedInput> {
        self.inbox.start_receive(tick)
    }

    /// Flushes every client's queued messages as one batch, stamping each
    /// header with that client's current adjustment. Runs once per network
    /// tick on the simulation task.
    pub fn flush_batches(&self) {
        let clients = self.clients.read().unwrap();
        for client in clients.values() {
            if !client.is_connected() {
                continue;
            }
            let adjustment = client.tick_adjustment(&self.config.sync);
            client.send_waiting_messages(adjustment, &self.config.shared);
        }
    }

    /// Routes one received message. Runs on the client-handler thread.
    pub fn handle_received(&self, client: &Client, message_type: MessageType, body: &[u8]) {
        let result = match message_type {
            MessageType::ConnectionRequest => self.handle_connection_request(client, body),
            MessageType::ClientInputs => self.handle_client_inputs(client, body),
            MessageType::Heartbeat => self.handle_heartbeat(client, body),
            _ => {
                log::error!(
                    "client {} sent a message type we don't accept: {message_type:?}",
                    client.net_id()
                );
                Ok(())
            }
        };

        if let Err(error) = result {
            log::error!(
                "failed to process a message from client {}: {error}",
                client.net_id()
            );
        }
    }

    fn handle_connection_request(
        &self,
        client: &Client,
        body: &[u8],
    ) -> Result<(), WireError> {
        let request: ConnectionRequest = wire::decode_message(body)?;
        self.connect_requests.push((client.net_id(), request));
        Ok(())
    }

    fn handle_client_inputs(&self, client: &Client, body: &[u8]) -> Result<(), WireError> {
        let message: ClientInputs = wire::decode_message(body)?;

        // Blocks if the sim is mid-receive on the inbox.
        let result = self.inbox.push(
            message.tick,
            SortedInput {
                net_id: client.net_id(),
                inputs: message.inputs,
            },
        );

        if result.validity != Validity::Valid {
            log::info!(
                "dropped an input from client {}: tick {}, diff {}",
                client.net_id(),
                message.tick,
                result.diff
            );
            self.send(client.net_id(), &MessageDropInfo { tick: message.tick })?;
            self.drop_events.push(client.net_id());
        }

        client.record_tick_diff(result.diff, &self.config.sync);
        Ok(())
    }

    fn handle_heartbeat(&self, client: &Client, body: &[u8]) -> Result<(), WireError> {
        let message: Heartbeat = wire::decode_message(body)?;

        // The shared tick counter makes this cheap enough to do inline.
        let diff = i64::from(message.tick) - i64::from(self.current_tick());
        client.record_tick_diff(diff, &self.config.sync);
        Ok(())
    }
}
