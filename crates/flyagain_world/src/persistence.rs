//! Tick-to-I/O bridge and the async side of persistence.
//!
//! The tick thread never suspends: anything that needs the network (redis
//! snapshots, DataService saves, presence sets, loot grants) is described
//! as an [`IoTask`] and handed to the I/O worker through an unbounded
//! channel. Results never flow back into the tick synchronously.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use flyagain_common::{DataApi, SharedStore};
use flyagain_protocol::messages::{CharacterRecord, MoveItemResult};
use flyagain_protocol::{encode_frame, Opcode};

use crate::connection::ConnectionHandle;

#[derive(Debug)]
pub enum IoTask {
    /// Periodic dirty-player snapshot into the shared store.
    SnapshotSave(CharacterRecord),
    /// Full disconnect flush: authoritative save, then store cleanup.
    DisconnectFlush {
        record: CharacterRecord,
        zone_id: u32,
        channel_id: u32,
        session_id: String,
        account_id: i64,
    },
    PresenceAdd {
        zone_id: u32,
        channel_id: u32,
        character_id: i64,
    },
    PresenceSwitch {
        from_zone: u32,
        from_channel: u32,
        to_zone: u32,
        to_channel: u32,
        character_id: i64,
    },
    LootGrant {
        character_id: i64,
        item_id: u32,
        quantity: u32,
    },
    /// Inventory move routed to the DataService; the result frame goes
    /// straight out on the player's connection.
    ItemMove {
        character_id: i64,
        from_slot: u32,
        to_slot: u32,
        conn: ConnectionHandle,
    },
    /// Periodic session liveness probe. A player whose session was evicted
    /// by a newer login (or expired) is queued for removal.
    SessionCheck {
        account_id: i64,
        session_id: String,
    },
}

/// Sending half used by the tick thread. Sends never block and never fail
/// visibly; a torn-down worker only means shutdown is already underway.
#[derive(Clone)]
pub struct IoSink {
    tx: mpsc::UnboundedSender<IoTask>,
}

impl IoSink {
    pub fn new() -> (IoSink, mpsc::UnboundedReceiver<IoTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (IoSink { tx }, rx)
    }

    pub fn send(&self, task: IoTask) {
        let _ = self.tx.send(task);
    }
}

/// Drains the task channel, spawning one task per item so a slow save
/// cannot head-of-line block presence updates.
pub async fn run_io_worker(
    mut rx: mpsc::UnboundedReceiver<IoTask>,
    store: SharedStore,
    data: Arc<dyn DataApi>,
    queue: Arc<crate::queue::InputQueue>,
) {
    while let Some(task) = rx.recv().await {
        let store = store.clone();
        let data = Arc::clone(&data);
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            execute(task, store, data, queue).await;
        });
    }
}

async fn execute(
    task: IoTask,
    store: SharedStore,
    data: Arc<dyn DataApi>,
    queue: Arc<crate::queue::InputQueue>,
) {
    match task {
        IoTask::SnapshotSave(record) => {
            // Periodic save: failures are logged and swallowed; the state
            // survives in memory and the next sweep retries.
            if let Err(e) = store.write_character_snapshot(&record).await {
                warn!(character_id = record.id, error = %e, "snapshot save failed");
            }
        }
        IoTask::DisconnectFlush {
            record,
            zone_id,
            channel_id,
            session_id,
            account_id,
        } => {
            let character_id = record.id;
            if let Err(e) = data.character_save(record).await {
                warn!(character_id, error = %e, "disconnect save failed, state remains in store snapshot");
            }
            if let Err(e) = store
                .disconnect_cleanup(character_id, zone_id, channel_id, &session_id, account_id)
                .await
            {
                warn!(character_id, error = %e, "disconnect store cleanup failed");
            }
            info!(character_id, account_id, "disconnect flush complete");
        }
        IoTask::PresenceAdd {
            zone_id,
            channel_id,
            character_id,
        } => {
            if let Err(e) = store
                .add_channel_member(zone_id, channel_id, character_id)
                .await
            {
                debug!(character_id, error = %e, "presence add failed");
            }
        }
        IoTask::PresenceSwitch {
            from_zone,
            from_channel,
            to_zone,
            to_channel,
            character_id,
        } => {
            if let Err(e) = store
                .remove_channel_member(from_zone, from_channel, character_id)
                .await
            {
                debug!(character_id, error = %e, "presence remove failed");
            }
            if let Err(e) = store
                .add_channel_member(to_zone, to_channel, character_id)
                .await
            {
                debug!(character_id, error = %e, "presence add failed");
            }
        }
        IoTask::LootGrant {
            character_id,
            item_id,
            quantity,
        } => {
            if let Err(e) = data.item_add(character_id, item_id, quantity).await {
                warn!(character_id, item_id, error = %e, "loot grant failed");
            }
        }
        IoTask::ItemMove {
            character_id,
            from_slot,
            to_slot,
            conn,
        } => {
            let result = data.item_move(character_id, from_slot, to_slot).await;
            let response = match result {
                Ok(ack) => MoveItemResult {
                    success: ack.success,
                    message: ack.message,
                    from_slot,
                    to_slot,
                },
                Err(e) => MoveItemResult {
                    success: false,
                    message: e.wire_message(),
                    from_slot,
                    to_slot,
                },
            };
            conn.send_frame(&encode_frame(Opcode::MoveItem, &response));
        }
        IoTask::SessionCheck {
            account_id,
            session_id,
        } => {
            match store.get_session(&session_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    info!(account_id, "session evicted or expired, removing player");
                    queue.push(crate::queue::WorldCommand::Leave { account_id });
                }
                // Store trouble is no reason to drop players.
                Err(e) => debug!(account_id, error = %e, "session check failed"),
            }
        }
    }
}
