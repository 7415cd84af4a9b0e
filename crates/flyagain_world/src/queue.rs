//! Lock-free input queue between network tasks and the tick thread.
//!
//! Multi-producer, single-consumer. Bounded; overflow drops the newest
//! command and logs a warning. The consumer drains the whole queue every
//! tick into a reusable buffer.

use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

use flyagain_protocol::messages::CharacterRecord;

use crate::connection::ConnectionHandle;

pub const DEFAULT_QUEUE_CAPACITY: usize = 50_000;

/// One client frame, decoded no further than its opcode.
#[derive(Debug)]
pub struct QueuedPacket {
    pub account_id: i64,
    pub opcode: u16,
    pub payload: Bytes,
    /// Absent for UDP-sourced packets; replies go via the entity's own
    /// TCP handle.
    pub conn: Option<ConnectionHandle>,
    pub received_ms: u64,
}

/// Everything the tick thread consumes: client packets plus the two
/// lifecycle transitions prepared by the network layer.
#[derive(Debug)]
pub enum WorldCommand {
    Packet(QueuedPacket),
    Join(Box<JoinRequest>),
    Leave { account_id: i64 },
}

/// A fully validated EnterWorld, ready for zone placement on the tick
/// thread. All suspending work (token, snapshot, session) already happened.
#[derive(Debug)]
pub struct JoinRequest {
    pub account_id: i64,
    pub entity_id: u64,
    pub record: CharacterRecord,
    pub session_id: String,
    pub udp_token: u64,
    pub conn: ConnectionHandle,
}

pub struct InputQueue {
    queue: ArrayQueue<WorldCommand>,
    dropped: AtomicU64,
}

impl InputQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    /// Producer side. A full queue drops the incoming command (newest
    /// loses) and records it.
    pub fn push(&self, command: WorldCommand) {
        if self.queue.push(command).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(total_dropped = total, "input queue full, dropping packet");
        }
    }

    /// Consumer side: move everything into `buf` (cleared first, capacity
    /// retained across ticks).
    pub fn drain_into(&self, buf: &mut Vec<WorldCommand>) {
        buf.clear();
        while let Some(command) = self.queue.pop() {
            buf.push(command);
        }
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(account_id: i64, opcode: u16) -> WorldCommand {
        WorldCommand::Packet(QueuedPacket {
            account_id,
            opcode,
            payload: Bytes::new(),
            conn: None,
            received_ms: 0,
        })
    }

    #[test]
    fn test_single_producer_order_preserved() {
        let queue = InputQueue::new(16);
        for opcode in 0..5u16 {
            queue.push(packet(1, opcode));
        }

        let mut buf = Vec::new();
        queue.drain_into(&mut buf);
        let opcodes: Vec<u16> = buf
            .iter()
            .map(|c| match c {
                WorldCommand::Packet(p) => p.opcode,
                _ => panic!("unexpected command"),
            })
            .collect();
        assert_eq!(opcodes, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_overflow_drops_newest_and_counts() {
        let queue = InputQueue::new(2);
        queue.push(packet(1, 1));
        queue.push(packet(1, 2));
        queue.push(packet(1, 3)); // dropped

        assert_eq!(queue.dropped_total(), 1);
        let mut buf = Vec::new();
        queue.drain_into(&mut buf);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_drain_reuses_buffer() {
        let queue = InputQueue::new(8);
        let mut buf = Vec::with_capacity(8);
        queue.push(packet(1, 1));
        queue.drain_into(&mut buf);
        assert_eq!(buf.len(), 1);

        let capacity = buf.capacity();
        queue.push(packet(1, 2));
        queue.drain_into(&mut buf);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn test_concurrent_producers_all_land() {
        let queue = std::sync::Arc::new(InputQueue::new(10_000));
        let mut handles = Vec::new();
        for producer in 0..4i64 {
            let queue = queue.clone();
            handles.push(std::thread::spawn(move || {
                for opcode in 0..1_000u16 {
                    queue.push(packet(producer, opcode));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut buf = Vec::new();
        queue.drain_into(&mut buf);
        assert_eq!(buf.len(), 4_000);

        // Per-producer ordering survives concurrent interleaving.
        let mut last_seen = std::collections::HashMap::new();
        for command in &buf {
            if let WorldCommand::Packet(p) = command {
                let last = last_seen.entry(p.account_id).or_insert(-1i32);
                assert!((p.opcode as i32) > *last);
                *last = p.opcode as i32;
            }
        }
    }
}
