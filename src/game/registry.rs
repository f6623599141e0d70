//! Registry of live rooms and the OS threads that run them
//!
//! Each room runs its simulation loop on a dedicated thread; the async side
//! only talks to it through the room's command queue. A room is created on
//! the first join attempt for its key and torn down when the last attached
//! connection detaches.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, info_span, trace, warn};

use crate::config::{Config, GameConfig};
use crate::util::time::TickClock;
use crate::ws::protocol::InputEvent;

use super::entity::ClientId;
use super::physics::RapierWorld;
use super::room::{Frame, JoinAccepted, RoomCommand, RoomError, RoomSimulation};
use super::terrain::MarchingSquares;

struct RoomShared {
    key: String,
    input_tx: mpsc::Sender<RoomCommand>,
    running: Arc<AtomicBool>,
    /// Connections attached to this room, counted from the join attempt
    live_clients: AtomicUsize,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    shared: Arc<RoomShared>,
}

impl RoomHandle {
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn live_clients(&self) -> usize {
        self.shared.live_clients.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stopped and its thread joined
    #[cfg(test)]
    pub fn is_stopped(&self) -> bool {
        !self.is_running() && self.shared.thread.lock().is_none()
    }

    fn is_same(&self, other: &RoomHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Ask the room for a seat; on success the reply carries the frame stream
    pub async fn join(&self, player_name: String) -> Result<JoinAccepted, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Join { player_name, reply }).await?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    pub async fn send_events(
        &self,
        client_id: ClientId,
        events: Vec<InputEvent>,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::Events { client_id, events }).await
    }

    pub async fn leave(&self, client_id: ClientId) {
        if self.send(RoomCommand::Leave { client_id }).await.is_err() {
            debug!(room = %self.key(), client_id, "room already closed on leave");
        }
    }

    async fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.shared
            .input_tx
            .send(command)
            .await
            .map_err(|_| RoomError::Closed)
    }

    /// Clear the running flag, wake the loop with a stop sentinel and wait
    /// for the room thread to exit
    async fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        // a closed queue means the loop has already exited
        let _ = self.shared.input_tx.send(RoomCommand::Stop).await;

        let thread = self.shared.thread.lock().take();
        let Some(thread) = thread else {
            return;
        };
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => error!(room = %self.key(), "room thread panicked"),
            Err(e) => error!(room = %self.key(), error = %e, "failed to join room thread"),
        }
    }
}

/// Registry of all active rooms, keyed by room name
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
    game: Arc<GameConfig>,
    input_capacity: usize,
    outbound_capacity: usize,
}

impl RoomRegistry {
    pub fn new(game: Arc<GameConfig>, input_capacity: usize, outbound_capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            game,
            input_capacity: input_capacity.max(1),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(config.game.clone()),
            config.room_input_capacity,
            config.room_outbound_capacity,
        )
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<RoomHandle> {
        self.rooms.get(key).map(|r| r.value().clone())
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn live_clients(&self) -> usize {
        self.rooms.iter().map(|r| r.value().live_clients()).sum()
    }

    /// Look up or create the room and count the caller as attached.
    ///
    /// The count is taken while the map entry is locked, so a concurrent
    /// teardown of the same key either sees it or has already removed the
    /// entry and this call creates a fresh room.
    pub fn attach(&self, key: &str) -> Result<RoomHandle, RoomError> {
        let handle = match self.rooms.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_running() {
                    warn!(room = %key, "replacing room whose loop has exited");
                    entry.insert(self.spawn_room(key)?);
                }
                let handle = entry.get().clone();
                handle.shared.live_clients.fetch_add(1, Ordering::AcqRel);
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn_room(key)?;
                handle.shared.live_clients.fetch_add(1, Ordering::AcqRel);
                entry.insert(handle.clone());
                handle
            }
        };
        Ok(handle)
    }

    /// Drop the caller's attachment; the last one out tears the room down
    /// and waits for its thread to finish.
    pub async fn detach(&self, room: &RoomHandle) {
        let previous = room
            .shared
            .live_clients
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous != 1 {
            return;
        }

        let removed = self
            .rooms
            .remove_if(room.key(), |_, current| {
                current.is_same(room) && current.live_clients() == 0
            })
            .is_some();
        let orphaned = !removed
            && !self
                .rooms
                .get(room.key())
                .is_some_and(|current| current.is_same(room));

        if removed || orphaned {
            room.stop().await;
            info!(room = %room.key(), "room cleaned up");
        }
    }

    /// Stop every room; used on server shutdown
    pub async fn shutdown(&self) {
        let keys: Vec<String> = self.rooms.iter().map(|r| r.key().clone()).collect();
        for key in keys {
            if let Some((_, room)) = self.rooms.remove(&key) {
                room.stop().await;
                info!(room = %key, "room stopped for shutdown");
            }
        }
    }

    fn spawn_room(&self, key: &str) -> Result<RoomHandle, RoomError> {
        let (input_tx, input_rx) = mpsc::channel(self.input_capacity);
        let (outbound_tx, _) = broadcast::channel(self.outbound_capacity);
        let running = Arc::new(AtomicBool::new(true));

        let worker = RoomWorker {
            key: key.to_string(),
            config: self.game.clone(),
            input_rx,
            outbound_tx,
            running: running.clone(),
        };
        let thread = std::thread::Builder::new()
            .name(thread_name(key))
            .spawn(move || worker.run())
            .map_err(|e| RoomError::Spawn(e.to_string()))?;

        info!(room = %key, "room created");
        Ok(RoomHandle {
            shared: Arc::new(RoomShared {
                key: key.to_string(),
                input_tx,
                running,
                live_clients: AtomicUsize::new(0),
                thread: Mutex::new(Some(thread)),
            }),
        })
    }
}

fn thread_name(key: &str) -> String {
    let safe: String = key
        .chars()
        .filter(|c| c.is_ascii_graphic())
        .take(10)
        .collect();
    format!("room-{safe}")
}

/// State moved onto a room thread
struct RoomWorker {
    key: String,
    config: Arc<GameConfig>,
    input_rx: mpsc::Receiver<RoomCommand>,
    outbound_tx: broadcast::Sender<Frame>,
    running: Arc<AtomicBool>,
}

impl RoomWorker {
    fn run(mut self) {
        let span = info_span!("room", room = %self.key);
        let _enter = span.enter();

        let physics = RapierWorld::new(self.config.gravity, self.config.map.world_size);
        let mut room = RoomSimulation::new(
            self.key.clone(),
            self.config.clone(),
            physics,
            Box::new(MarchingSquares::default()),
            self.outbound_tx,
        );

        let mut clock = TickClock::new(self.config.tick_rate);
        info!(
            map = %self.config.map.name,
            tick_period = ?clock.period(),
            "room loop started"
        );
        let mut delta = 0.0;

        while self.running.load(Ordering::Acquire) {
            let (commands, closed) = drain(&mut self.input_rx);
            let result = panic::catch_unwind(AssertUnwindSafe(|| room.run_tick(commands, delta)));
            match result {
                Ok(Ok(outcome)) if outcome.stop => break,
                Ok(Ok(outcome)) => {
                    if outcome.broadcast {
                        trace!(tick = room.tick(), "snapshot published");
                    }
                }
                Ok(Err(e)) => {
                    error!(error = %e, tick = room.tick(), "simulation fault, closing room");
                    break;
                }
                Err(panic) => {
                    error!(panic = %panic_message(&*panic), "room loop panicked, closing room");
                    break;
                }
            }
            if closed {
                debug!("command queue closed");
                break;
            }
            delta = clock.tick();
        }

        self.running.store(false, Ordering::Release);
        let stats = room.snapshot_stats();
        info!(
            ticks = room.tick(),
            bodies = room.physics().body_count(),
            snapshots = stats.total_snapshots,
            snapshot_bytes = stats.total_bytes,
            avg_objects = stats.avg_objects_per_snapshot,
            "room loop stopped"
        );
    }
}

/// Everything queued right now; the flag is set once all senders are gone
fn drain(rx: &mut mpsc::Receiver<RoomCommand>) -> (Vec<RoomCommand>, bool) {
    let mut commands = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(command) => commands.push(command),
            Err(TryRecvError::Empty) => return (commands, false),
            Err(TryRecvError::Disconnected) => return (commands, true),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ws::protocol::GameState;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Arc::new(GameConfig::default()), 64, 64)
    }

    #[tokio::test]
    async fn first_join_creates_room_and_last_leave_removes_it() {
        let rooms = registry();
        let room = rooms.attach("r1").unwrap();
        assert_eq!(rooms.active_rooms(), 1);
        assert_eq!(rooms.live_clients(), 1);

        let mut accepted = tokio_test::assert_ok!(room.join("ann".to_string()).await);
        assert_eq!(accepted.client_id, 0);

        let frame = tokio::time::timeout(Duration::from_secs(5), accepted.frames.recv())
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "game_state");
        tokio_test::assert_ok!(GameState::from_frame(&frame));

        room.leave(accepted.client_id).await;
        rooms.detach(&room).await;
        assert_eq!(rooms.active_rooms(), 0);
        assert!(room.is_stopped());
        assert!(rooms.get("r1").is_none());
    }

    #[tokio::test]
    async fn room_survives_while_anyone_is_attached() {
        let rooms = registry();
        let a = rooms.attach("r1").unwrap();
        let b = rooms.attach("r1").unwrap();
        assert!(a.is_same(&b));
        assert_eq!(a.live_clients(), 2);

        rooms.detach(&a).await;
        assert_eq!(rooms.active_rooms(), 1);
        assert!(b.is_running());

        rooms.detach(&b).await;
        assert_eq!(rooms.active_rooms(), 0);
        assert!(b.is_stopped());
    }

    #[tokio::test]
    async fn third_join_to_cave_is_rejected() {
        let rooms = registry();
        let room = rooms.attach("r1").unwrap();
        tokio_test::assert_ok!(room.join("a".to_string()).await);
        tokio_test::assert_ok!(room.join("b".to_string()).await);
        let rejected = tokio_test::assert_err!(room.join("c".to_string()).await);
        assert_eq!(rejected, RoomError::Full);
        rooms.detach(&room).await;
    }

    #[tokio::test]
    async fn rooms_are_independent() {
        let rooms = registry();
        let a = rooms.attach("a").unwrap();
        let b = rooms.attach("b").unwrap();
        assert!(!a.is_same(&b));

        rooms.detach(&a).await;
        assert!(a.is_stopped());
        assert!(b.is_running());
        tokio_test::assert_ok!(b.join("bob".to_string()).await);
        rooms.shutdown().await;
        assert!(b.is_stopped());
        assert_eq!(rooms.active_rooms(), 0);
    }

    #[tokio::test]
    async fn stopped_room_rejects_as_closed() {
        let rooms = registry();
        let room = rooms.attach("r1").unwrap();
        room.stop().await;
        let err = tokio_test::assert_err!(room.join("late".to_string()).await);
        assert_eq!(err, RoomError::Closed);

        let fresh = rooms.attach("r1").unwrap();
        assert!(!fresh.is_same(&room));
        tokio_test::assert_ok!(fresh.join("late".to_string()).await);
        rooms.shutdown().await;
    }

    #[test]
    fn thread_names_are_sanitized() {
        assert_eq!(thread_name("lobby"), "room-lobby");
        assert_eq!(thread_name("a\0b c"), "room-abc");
        assert_eq!(thread_name("abcdefghijklmnop"), "room-abcdefghij");
    }
}
