//! One connected client: its peer, outgoing queue, and sync bookkeeping.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use acre::SharedConfig;
use acre::net::messages::MessageType;
use acre::net::peer::{Peer, ReceiveResult, SendResult};
use acre::net::sync::{AdjustmentData, SyncConfig, TickDiffHistory, calc_adjustment};
use acre::net::wire::{CLIENT_HEADER_SIZE, MESSAGE_HEADER_SIZE, ServerHeader, compress_batch};

/// Outcome of one receive attempt against a client.
#[derive(Debug)]
pub enum ClientReceive {
    Message {
        message_type: MessageType,
        body: Vec<u8>,
    },
    NoWaitingData,
    Disconnected,
}

pub struct Client {
    net_id: u32,
    peer: Peer,
    /// Framed records waiting for the next batch flush. Written by the
    /// simulation task, drained by the flush; a mutex-guarded deque keeps
    /// records whole and in order.
    send_queue: Mutex<VecDeque<Vec<u8>>>,
    tick_diffs: Mutex<TickDiffHistory>,
    /// The latest adjustment iteration this client has echoed back.
    /// Advancing it is the client acknowledging an applied adjustment.
    latest_adj_iteration: AtomicU8,
}

impl Client {
    pub fn new(net_id: u32, peer: Peer, sync: &SyncConfig) -> Self {
        Self {
            net_id,
            peer,
            send_queue: Mutex::new(VecDeque::new()),
            tick_diffs: Mutex::new(TickDiffHistory::new(sync.history_length)),
            latest_adj_iteration: AtomicU8::new(0),
        }
    }

    pub fn net_id(&self) -> u32 {
        self.net_id
    }

    pub fn is_connected(&self) -> bool {
        self.peer.is_connected()
    }

    /// Queues a framed record to go out with the next batch flush.
    pub fn queue_message(&self, record: Vec<u8>) {
        self.send_queue.lock().unwrap().push_back(record);
    }

    /// Flushes queued records as one batch frame.
    ///
    /// The frame always goes out, even with an empty payload: the header
    /// itself is the keep-alive and carries the adjustment piggyback.
    /// Records that don't fit under the batch cap stay queued for the next
    /// flush.
    pub fn send_waiting_messages(
        &self,
        adjustment: AdjustmentData,
        shared: &SharedConfig,
    ) -> SendResult {
        let mut payload = Vec::new();
        {
            let mut queue = self.send_queue.lock().unwrap();
            while let Some(record) = queue.front() {
                if payload.len() + record.len() > shared.max_batch_size {
                    break;
                }
                let record = queue.pop_front().unwrap();
                payload.extend_from_slice(&record);
            }
        }

        let (payload, compressed) = compress_batch(payload, shared);
        let header = ServerHeader {
            adjustment: adjustment.adjustment,
            iteration: adjustment.iteration,
            payload_len: payload.len(),
            compressed,
        };

        let mut frame = Vec::with_capacity(header.encode().len() + payload.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&payload);
        self.peer.send(&frame)
    }

    /// Tries to receive one message from this client.
    ///
    /// Reads the one-byte client header (processing the iteration echo),
    /// then one complete message record. When no data is waiting, also
    /// checks the receive timer and drops the connection on timeout.
    pub fn receive_message(&self, shared: &SharedConfig) -> ClientReceive {
        let header = match self.peer.receive_bytes(CLIENT_HEADER_SIZE, false) {
            ReceiveResult::Data(header) => header,
            ReceiveResult::NoWaitingData => {
                if self.peer.timed_out() {
                    log::info!("dropping client {}: receive timeout", self.net_id);
                    self.peer.mark_disconnected();
                    return ClientReceive::Disconnected;
                }
                return ClientReceive::NoWaitingData;
            }
            ReceiveResult::Disconnected => return ClientReceive::Disconnected,
        };

        if !self.process_iteration_echo(header[0]) {
            return ClientReceive::Disconnected;
        }

        let record_header = match self.peer.receive_bytes(MESSAGE_HEADER_SIZE, true) {
            ReceiveResult::Data(bytes) => bytes,
            _ => return ClientReceive::Disconnected,
        };

        let Some(message_type) = MessageType::from_u8(record_header[0]) else {
            log::error!(
                "client {} sent unknown message type {}",
                self.net_id,
                record_header[0]
            );
            self.peer.mark_disconnected();
            return ClientReceive::Disconnected;
        };

        let size = u16::from_be_bytes([record_header[1], record_header[2]]) as usize;
        if size > shared.max_message_size {
            log::error!(
                "client {} sent an oversized message body: {size} bytes",
                self.net_id
            );
            self.peer.mark_disconnected();
            return ClientReceive::Disconnected;
        }

        let body = match self.peer.receive_bytes(size, true) {
            ReceiveResult::Data(bytes) => bytes,
            _ => return ClientReceive::Disconnected,
        };

        ClientReceive::Message { message_type, body }
    }

    /// Handles the iteration echo in a client header.
    ///
    /// The echo equals the client's current iteration; it moves to
    /// `latest + 1` exactly when the client finished applying the
    /// adjustment we sent under `latest`. An echo further ahead means the
    /// client applied an adjustment we never finished issuing.
    fn process_iteration_echo(&self, received: u8) -> bool {
        let expected = self
            .latest_adj_iteration
            .load(Ordering::Relaxed)
            .wrapping_add(1);

        if received == expected {
            self.latest_adj_iteration.store(received, Ordering::Release);
        } else if received > expected {
            log::error!(
                "client {} skipped an adjustment iteration: expected at most {expected}, got {received}",
                self.net_id
            );
            self.peer.mark_disconnected();
            return false;
        }

        true
    }

    /// Records a tick diff measured from this client's message stream.
    ///
    /// A diff outside the valid range means the client is hopelessly out of
    /// sync, and the connection is dropped rather than adjusted.
    pub fn record_tick_diff(&self, diff: i64, sync: &SyncConfig) {
        if !sync.diff_in_valid_range(diff) {
            log::info!(
                "dropping client {}: tick diff {diff} outside the valid range",
                self.net_id
            );
            self.peer.mark_disconnected();
            return;
        }

        self.tick_diffs.lock().unwrap().push(diff as i8);
    }

    /// The adjustment to stamp into this client's next batch header.
    pub fn tick_adjustment(&self, sync: &SyncConfig) -> AdjustmentData {
        let history = self.tick_diffs.lock().unwrap();
        if !history.is_seeded() {
            return AdjustmentData::default();
        }

        AdjustmentData {
            adjustment: calc_adjustment(&history, sync),
            iteration: self.latest_adj_iteration.load(Ordering::Acquire),
        }
    }
}
