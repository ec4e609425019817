//! The client's connection to the server: a dedicated receive thread, the
//! tick-adjustment application state, and the send path the simulation
//! uses.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use acre::net::messages::{ConnectionRequest, Heartbeat, Message};
use acre::net::peer::{Peer, ReceiveResult, SendResult};
use acre::net::wire::{self, SERVER_HEADER_SIZE, ServerHeader, WireError};

use super::processor::{ConnectionError, MessageProcessor, NetEventQueues};
use crate::config::ClientConfig;

/// How long the receive loop sleeps when the socket has nothing for us.
const INACTIVE_SLEEP: Duration = Duration::from_millis(1);
/// How long the initial TCP connect may take before we call it failed.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum NetError {
    #[error("protocol framing error")]
    Framing(#[from] WireError),
    #[error("adjustment iteration out of sequence: current {current}, received {received}")]
    AdjustmentOutOfSequence { current: u8, received: u8 },
    #[error("connection lost mid-batch")]
    Disconnected,
}

/// State shared between the simulation task and the I/O thread.
struct IoShared {
    peer: RwLock<Option<Arc<Peer>>>,
    /// Ticks still to be applied from the current adjustment.
    tick_adjustment: AtomicI32,
    /// The idempotency key: adjustments stamped with any other iteration
    /// are ignored.
    adjustment_iteration: AtomicU8,
    is_applying_adjustment: AtomicBool,
    exit_requested: AtomicBool,
}

pub struct ClientNetwork {
    config: ClientConfig,
    queues: Arc<NetEventQueues>,
    io: Arc<IoShared>,
    receive_thread: Mutex<Option<JoinHandle<()>>>,
    /// Messages sent since the last network tick; zero means the next
    /// boundary sends a heartbeat.
    messages_sent_since_tick: AtomicU32,
    heartbeat_accumulator: Mutex<f32>,
}

impl ClientNetwork {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            queues: Arc::new(NetEventQueues::default()),
            io: Arc::new(IoShared {
                peer: RwLock::new(None),
                tick_adjustment: AtomicI32::new(0),
                adjustment_iteration: AtomicU8::new(0),
                is_applying_adjustment: AtomicBool::new(false),
                exit_requested: AtomicBool::new(false),
            }),
            receive_thread: Mutex::new(None),
            messages_sent_since_tick: AtomicU32::new(0),
            heartbeat_accumulator: Mutex::new(0.0),
        }
    }

    pub fn queues(&self) -> &Arc<NetEventQueues> {
        &self.queues
    }

    /// Spins up the receive thread, which owns the connection attempt.
    pub fn connect(&self) {
        let mut thread = self.receive_thread.lock().unwrap();
        if thread.is_some() {
            log::info!("attempted to connect while already connected");
            return;
        }

        self.io.exit_requested.store(false, Ordering::Release);
        let config = self.config.clone();
        let io = Arc::clone(&self.io);
        let queues = Arc::clone(&self.queues);

        *thread = Some(
            std::thread::Builder::new()
                .name("client-receive".into())
                .spawn(move || connect_and_receive(config, io, queues))
                .expect("failed to spawn the receive thread"),
        );
    }

    /// Tears the connection down and resets all sync state.
    pub fn disconnect(&self) {
        self.io.exit_requested.store(true, Ordering::Release);
        if let Some(thread) = self.receive_thread.lock().unwrap().take() {
            let _ = thread.join();
        }

        *self.io.peer.write().unwrap() = None;
        self.io.tick_adjustment.store(0, Ordering::Release);
        self.io.adjustment_iteration.store(0, Ordering::Release);
        self.io.is_applying_adjustment.store(false, Ordering::Release);
        self.messages_sent_since_tick.store(0, Ordering::Release);
        *self.heartbeat_accumulator.lock().unwrap() = 0.0;
    }

    /// Frames and sends one message, echoing our current adjustment
    /// iteration in the client header.
    pub fn send_message<M: Message>(&self, message: &M) -> Result<(), WireError> {
        let peer = self.io.peer.read().unwrap().clone();
        let Some(peer) = peer else {
            // The receive thread is responsible for emitting the
            // ConnectionError; nothing to do here.
            log::info!("tried to send while the server is disconnected");
            return Ok(());
        };

        let record = wire::encode_message(message, &self.config.shared)?;
        let iteration = self.io.adjustment_iteration.load(Ordering::Acquire);
        let frame = wire::encode_client_frame(iteration, &record);

        match peer.send(&frame) {
            SendResult::Sent => {
                self.messages_sent_since_tick.fetch_add(1, Ordering::AcqRel);
            }
            SendResult::Disconnected => {
                log::info!("message send failed, server disconnected");
            }
        }
        Ok(())
    }

    /// Called once per sim tick. At every network tick boundary, sends a
    /// heartbeat if nothing else went out since the last boundary, so the
    /// server always has a fresh tick-diff reading for us.
    pub fn tick(&self, current_tick: u32, delta: f32) {
        if self.io.peer.read().unwrap().is_none() {
            return;
        }

        let mut accumulator = self.heartbeat_accumulator.lock().unwrap();
        *accumulator += delta;

        let network_step = self.config.shared.network_timestep_s();
        while *accumulator >= network_step {
            *accumulator -= network_step;

            let sent = self.messages_sent_since_tick.swap(0, Ordering::AcqRel);
            if sent == 0 && current_tick != 0 {
                if let Err(error) = self.send_message(&Heartbeat { tick: current_tick }) {
                    log::error!("failed to send a heartbeat: {error}");
                }
            }
        }
    }

    /// Hands the simulation whatever tick adjustment is due this tick.
    ///
    /// A negative pending adjustment is paid out one tick at a time (the
    /// sim can only freeze one tick per step); a positive one is paid out
    /// all at once so the sim catches up in a single frame. When the
    /// pending amount reaches zero the iteration advances, which is what
    /// makes the whole exchange exactly-once: from then on we echo the new
    /// iteration, and the server stops resending the old adjustment.
    pub fn transfer_tick_adjustment(&self) -> i32 {
        if !self.io.is_applying_adjustment.load(Ordering::Acquire) {
            return 0;
        }

        let current = self.io.tick_adjustment.load(Ordering::Acquire);
        if current < 0 {
            self.io.tick_adjustment.fetch_add(1, Ordering::AcqRel);
            -1
        } else if current > 0 {
            self.io.tick_adjustment.fetch_sub(current, Ordering::AcqRel);
            current
        } else {
            self.io.adjustment_iteration.fetch_add(1, Ordering::AcqRel);
            self.io.is_applying_adjustment.store(false, Ordering::Release);
            0
        }
    }
}

fn connect_and_receive(config: ClientConfig, io: Arc<IoShared>, queues: Arc<NetEventQueues>) {
    let processor = MessageProcessor::new(Arc::clone(&queues));

    let peer = match Peer::connect(
        config.server_address,
        CONNECT_TIMEOUT,
        config.shared.receive_timeout(),
    ) {
        Ok(peer) => Arc::new(peer),
        Err(error) => {
            log::info!("failed to connect to {}: {error}", config.server_address);
            queues.connection_errors.push(ConnectionError::Failed);
            return;
        }
    };
    *io.peer.write().unwrap() = Some(Arc::clone(&peer));

    // Introduce ourselves; the server builds our entity off this.
    let request = ConnectionRequest {
        name: config.player_name.clone(),
    };
    match wire::encode_message(&request, &config.shared) {
        Ok(record) => {
            peer.send(&wire::encode_client_frame(0, &record));
        }
        Err(error) => {
            log::error!("failed to encode the connection request: {error}");
            queues.connection_errors.push(ConnectionError::Failed);
            return;
        }
    }

    // Receive message batches from the server.
    while !io.exit_requested.load(Ordering::Acquire) {
        match peer.receive_bytes(SERVER_HEADER_SIZE, false) {
            ReceiveResult::Data(header) => {
                if let Err(error) = process_batch(&peer, &header, &io, &processor, &config) {
                    log::error!("fatal error while processing a batch: {error}");
                    peer.mark_disconnected();
                    queues.connection_errors.push(ConnectionError::Disconnected);
                    return;
                }
            }
            ReceiveResult::NoWaitingData => {
                if peer.timed_out() {
                    log::info!("server went silent past the receive timeout");
                    peer.mark_disconnected();
                    queues.connection_errors.push(ConnectionError::Disconnected);
                    return;
                }
                std::thread::sleep(INACTIVE_SLEEP);
            }
            ReceiveResult::Disconnected => {
                log::info!("found the server disconnected while receiving a header");
                queues.connection_errors.push(ConnectionError::Disconnected);
                return;
            }
        }
    }
}

/// Processes one received batch: header adjustment first, then the payload.
///
/// Any failure here is fatal for the connection; a batch is either fully
/// processed or the stream is considered broken, never partially applied.
fn process_batch(
    peer: &Peer,
    header_bytes: &[u8],
    io: &IoShared,
    processor: &MessageProcessor,
    config: &ClientConfig,
) -> Result<(), NetError> {
    let header = ServerHeader::decode(header_bytes, &config.shared)?;

    adjust_if_needed(io, header.adjustment, header.iteration)?;

    if header.payload_len == 0 {
        return Ok(());
    }

    let payload = match peer.receive_bytes(header.payload_len, true) {
        ReceiveResult::Data(payload) => payload,
        _ => return Err(NetError::Disconnected),
    };

    let payload = if header.compressed {
        wire::decompress_batch(&payload, &config.shared)?
    } else {
        payload
    };

    wire::for_each_message(&payload, |message_type, body| {
        processor.process_received_message(message_type, body)
    })?;

    Ok(())
}

/// Applies a received header's adjustment, exactly once.
///
/// Only an adjustment stamped with our current iteration, arriving while
/// we're not already applying one, is accepted; the server keeps resending
/// under the same iteration until we echo the next one, and those repeats
/// land in the no-op arm. An iteration from the future means the two sides
/// disagree about what has been applied, which is unrecoverable.
fn adjust_if_needed(io: &IoShared, adjustment: i8, iteration: u8) -> Result<(), NetError> {
    if adjustment == 0 {
        return Ok(());
    }

    let current = io.adjustment_iteration.load(Ordering::Acquire);
    if iteration == current && !io.is_applying_adjustment.load(Ordering::Acquire) {
        io.tick_adjustment
            .fetch_add(i32::from(adjustment), Ordering::AcqRel);
        io.is_applying_adjustment.store(true, Ordering::Release);
        log::info!("received tick adjustment: {adjustment}, iteration: {iteration}");
        Ok(())
    } else if iteration > current {
        Err(NetError::AdjustmentOutOfSequence {
            current,
            received: iteration,
        })
    } else {
        Ok(())
    }
}
