//! The client-handler thread: accepts new connections, sweeps out
//! disconnected peers, and receives whatever the sockets have waiting.

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use acre::net::peer::Peer;

use super::client::{Client, ClientReceive};
use super::id_pool::IdPool;
use super::network::ServerNetwork;

/// How long the service loop sleeps when no socket had any activity.
const INACTIVE_SLEEP: Duration = Duration::from_millis(2);

pub struct ClientHandler {
    exit_requested: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ClientHandler {
    /// Starts servicing clients on a dedicated thread. The listener is
    /// switched to non-blocking so accepts interleave with receives.
    pub fn spawn(network: Arc<ServerNetwork>, listener: TcpListener) -> std::io::Result<Self> {
        listener.set_nonblocking(true)?;

        let exit_requested = Arc::new(AtomicBool::new(false));
        let exit = Arc::clone(&exit_requested);
        let thread = std::thread::Builder::new()
            .name("client-handler".into())
            .spawn(move || service_clients(network, listener, exit))?;

        Ok(Self {
            exit_requested,
            thread: Some(thread),
        })
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        self.exit_requested.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn service_clients(network: Arc<ServerNetwork>, listener: TcpListener, exit: Arc<AtomicBool>) {
    let mut id_pool = IdPool::new(network.config().max_clients);

    while !exit.load(Ordering::Acquire) {
        accept_new_clients(&network, &listener, &mut id_pool);
        erase_disconnected_clients(&network, &mut id_pool);

        if !receive_client_messages(&network) {
            std::thread::sleep(INACTIVE_SLEEP);
        }
    }

    log::debug!("client handler exiting");
}

fn accept_new_clients(network: &ServerNetwork, listener: &TcpListener, id_pool: &mut IdPool) {
    loop {
        let stream = match listener.accept() {
            Ok((stream, _address)) => stream,
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(error) => {
                log::error!("accept failed: {error}");
                return;
            }
        };

        let Some(net_id) = id_pool.reserve() else {
            log::warn!("refusing a connection: server is full");
            continue;
        };

        let peer = match Peer::from_stream(stream, network.config().shared.receive_timeout()) {
            Ok(peer) => peer,
            Err(error) => {
                log::error!("failed to wrap an accepted stream: {error}");
                id_pool.free(net_id);
                continue;
            }
        };

        log::info!("new client connected, assigning net id {net_id}");
        let client = Arc::new(Client::new(net_id, peer, &network.config().sync));

        let mut clients = network.clients().write().unwrap();
        clients.insert(net_id, client);
        drop(clients);

        network.connect_events().push(net_id);
    }
}

fn erase_disconnected_clients(network: &ServerNetwork, id_pool: &mut IdPool) {
    // Checking needs only a read lock; take the write lock just for the
    // actual removal.
    let disconnected: Vec<u32> = {
        let clients = network.clients().read().unwrap();
        clients
            .values()
            .filter(|client| !client.is_connected())
            .map(|client| client.net_id())
            .collect()
    };

    if disconnected.is_empty() {
        return;
    }

    let mut clients = network.clients().write().unwrap();
    for net_id in disconnected {
        if clients.remove(&net_id).is_some() {
            log::info!("erased disconnected client with net id {net_id}");
            id_pool.free(net_id);
            network.disconnect_events().push(net_id);
        }
    }
}

/// Receives every waiting message from every client. Returns whether any
/// socket had activity.
fn receive_client_messages(network: &ServerNetwork) -> bool {
    // Snapshot under the read lock so receives don't block accepts.
    let clients: Vec<Arc<Client>> = {
        let clients = network.clients().read().unwrap();
        clients.values().cloned().collect()
    };

    let mut had_activity = false;
    for client in clients {
        loop {
            match client.receive_message(&network.config().shared) {
                ClientReceive::Message { message_type, body } => {
                    had_activity = true;
                    network.handle_received(&client, message_type, &body);
                }
                ClientReceive::NoWaitingData => break,
                ClientReceive::Disconnected => break,
            }
        }
    }

    had_activity
}
