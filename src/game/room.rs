//! Room state and the authoritative per-tick simulation

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::ws::protocol::InputEvent;

use super::combat::CombatResolver;
use super::entity::{ClientId, Container, ObjectId};
use super::objects::{Client, GameObject, ObjectBehaviour, Projectile, Tank, TankAction};
use super::physics::PhysicsWorld;
use super::snapshot::{SnapshotBuilder, SnapshotStats};
use super::terrain::{GeometryExtractor, Terrain, TerrainMask};
use super::turn::TurnManager;

/// Encoded outbound frame shared by every subscriber
pub type Frame = Arc<str>;

/// Reply to an accepted join: the new client ID and the room's frame stream
#[derive(Debug)]
pub struct JoinAccepted {
    pub client_id: ClientId,
    pub frames: broadcast::Receiver<Frame>,
}

/// Messages from the gateway to a room's simulation thread
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        player_name: String,
        reply: oneshot::Sender<Result<JoinAccepted, RoomError>>,
    },
    Leave {
        client_id: ClientId,
    },
    Events {
        client_id: ClientId,
        events: Vec<InputEvent>,
    },
    /// Sentinel that ends the room loop
    Stop,
}

/// Why a join (or a message to a room) did not go through
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room is full")]
    Full,

    #[error("No free start position")]
    NoSeat,

    #[error("Already joined a room")]
    AlreadyJoined,

    #[error("Room is closed")]
    Closed,

    #[error("Could not start room: {0}")]
    Spawn(String),
}

/// Unrecoverable fault inside a room; ends that room only
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("object {0} is not a tank")]
    NotATank(ObjectId),

    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result of one loop iteration
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// A snapshot was published this tick
    pub broadcast: bool,
    /// A stop sentinel was received
    pub stop: bool,
}

/// One room: its entities, terrain and physics world
pub struct RoomSimulation<P: PhysicsWorld> {
    room_key: String,
    config: Arc<GameConfig>,
    physics: P,
    terrain: Terrain,
    objects: Container<GameObject>,
    clients: Container<Client>,
    turns: TurnManager,
    combat: CombatResolver,
    snapshots: SnapshotBuilder,
    outbound: broadcast::Sender<Frame>,
    tick: u64,
}

impl<P: PhysicsWorld> RoomSimulation<P> {
    pub fn new(
        room_key: impl Into<String>,
        config: Arc<GameConfig>,
        mut physics: P,
        extractor: Box<dyn GeometryExtractor>,
        outbound: broadcast::Sender<Frame>,
    ) -> Self {
        let room_key = room_key.into();
        let terrain = Terrain::new(TerrainMask::from_map(&config.map), extractor);
        let segments = terrain.rebuild(&mut physics);
        debug!(room = %room_key, map = %config.map.name, segments, "terrain generated");

        Self {
            turns: TurnManager::new(config.max_ap),
            combat: CombatResolver::new(&config),
            snapshots: SnapshotBuilder::new(config.ticks_per_broadcast),
            room_key,
            config,
            physics,
            terrain,
            objects: Container::new(),
            clients: Container::new(),
            outbound,
            tick: 0,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    #[cfg(test)]
    pub fn current_player(&self) -> Option<ClientId> {
        self.turns.current()
    }

    #[cfg(test)]
    pub fn clients(&self) -> &Container<Client> {
        &self.clients
    }

    #[cfg(test)]
    pub fn objects(&self) -> &Container<GameObject> {
        &self.objects
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    #[cfg(test)]
    pub fn physics_mut(&mut self) -> &mut P {
        &mut self.physics
    }

    pub fn snapshot_stats(&self) -> &SnapshotStats {
        self.snapshots.stats()
    }

    /// Run one loop iteration over the commands drained from the inbound queue
    pub fn run_tick(
        &mut self,
        commands: Vec<RoomCommand>,
        delta: f32,
    ) -> Result<TickOutcome, SimulationError> {
        self.apply_pending_changes();

        if self.process_commands(commands)? {
            return Ok(TickOutcome {
                broadcast: false,
                stop: true,
            });
        }
        self.turns.update(&self.clients, &mut self.objects);

        self.update_objects(delta);
        self.update_combat();

        let broadcast = self.snapshots.should_send(self.tick);
        if broadcast {
            let msg = self.snapshots.build(
                self.turns.current(),
                &self.objects,
                &self.physics,
                self.terrain.take_erased(),
            );
            let frame = self.snapshots.encode(&msg)?;
            // no subscribers is fine, the room may be empty
            let _ = self.outbound.send(Frame::from(frame));
        }

        self.tick += 1;
        Ok(TickOutcome {
            broadcast,
            stop: false,
        })
    }

    /// Commit staged additions and deletions; release bodies of removed objects
    fn apply_pending_changes(&mut self) {
        for object in self.objects.apply_pending_changes() {
            debug!(object_id = object.id(), owner_id = object.owner_id(), "object removed");
            self.physics.remove_body(object.body());
        }
        self.clients.apply_pending_changes();
    }

    /// Returns true if a stop sentinel was seen
    fn process_commands(&mut self, commands: Vec<RoomCommand>) -> Result<bool, SimulationError> {
        for command in commands {
            match command {
                RoomCommand::Join { player_name, reply } => {
                    let outcome = self.join(player_name).map(|client_id| JoinAccepted {
                        client_id,
                        frames: self.outbound.subscribe(),
                    });
                    if let Err(Ok(accepted)) = reply.send(outcome) {
                        debug!(client_id = accepted.client_id, "joiner went away before the reply");
                        self.leave(accepted.client_id);
                    }
                }
                RoomCommand::Leave { client_id } => self.leave(client_id),
                RoomCommand::Events { client_id, events } => {
                    self.handle_events(client_id, events)?;
                }
                RoomCommand::Stop => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Create a client record and its tank on the next free start position.
    ///
    /// Both are staged; they become visible on the next tick.
    pub fn join(&mut self, player_name: String) -> Result<ClientId, RoomError> {
        if self.clients.count(true) >= self.config.map.max_players {
            info!(room = %self.room_key, player_name = %player_name, "join rejected, room is full");
            return Err(RoomError::Full);
        }
        let seat = self.free_seat().ok_or(RoomError::NoSeat)?;

        let map = &self.config.map;
        let position = map.start_positions[seat];
        let direction = map.start_directions.get(seat).copied().unwrap_or(glam::Vec2::X);
        let client_id = self.clients.next_id();
        let model = match self.config.tank_models.len() {
            0 => String::new(),
            n => self.config.tank_models[client_id as usize % n].clone(),
        };

        let body = self
            .physics
            .add_body(Tank::body_desc(position, &self.config.tank));
        let config = &self.config;
        let name = player_name.clone();
        let tank_id = self.objects.add_with(|id| {
            GameObject::Tank(Tank::new(
                id, client_id, body, name, model, position, direction, config,
            ))
        });
        self.clients.add(Client {
            id: client_id,
            player_name,
            tank_id,
            seat,
            disconnected: false,
        });

        info!(
            room = %self.room_key,
            client_id,
            tank_id,
            seat,
            client_count = self.clients.count(true),
            "client joined"
        );
        Ok(client_id)
    }

    fn free_seat(&self) -> Option<usize> {
        let taken: BTreeSet<usize> = self
            .clients
            .values()
            .chain(self.clients.pending_values())
            .map(|client| client.seat)
            .collect();
        (0..self.config.map.start_positions.len()).find(|seat| !taken.contains(seat))
    }

    /// Remove a client and its tank. Passes the turn on first if the leaver
    /// held it. Leaving twice is a no-op.
    pub fn leave(&mut self, client_id: ClientId) {
        let client = if self.clients.is_pending(client_id) {
            self.clients.get_pending_mut(client_id)
        } else {
            self.clients.get_mut(client_id).ok()
        };
        let Some(client) = client else {
            warn!(room = %self.room_key, client_id, "leave from unknown client");
            return;
        };
        if client.disconnected {
            return;
        }
        client.disconnected = true;
        let tank_id = client.tank_id;

        if self.turns.current() == Some(client_id) {
            self.turns
                .advance(&self.clients, &mut self.objects, Some(client_id));
        }
        self.objects.delete(tank_id);
        self.clients.delete(client_id);
        info!(room = %self.room_key, client_id, "client left");
    }

    /// Route raw key events to the client's tank
    pub fn handle_events(
        &mut self,
        client_id: ClientId,
        events: Vec<InputEvent>,
    ) -> Result<(), SimulationError> {
        let tank_id = match self.clients.get(client_id) {
            Ok(client) if !client.disconnected => client.tank_id,
            Ok(_) => {
                warn!(client_id, "dropping input from disconnected client");
                return Ok(());
            }
            Err(e) => {
                warn!(room = %self.room_key, client_id, error = %e, "dropping input from unknown client");
                return Ok(());
            }
        };

        for event in events {
            let Some(key) = event.key() else {
                debug!(client_id, value = ?event.value, "ignoring unmapped key");
                continue;
            };
            let object = match self.objects.get_mut(tank_id) {
                Ok(object) => object,
                Err(e) => {
                    warn!(room = %self.room_key, client_id, tank_id, error = %e, "dropping input for missing tank");
                    return Ok(());
                }
            };
            let tank = object
                .as_tank_mut()
                .ok_or(SimulationError::NotATank(tank_id))?;
            if let Some(TankAction::Shoot) = tank.handle_input(event.kind, key, &self.config) {
                self.shoot(tank_id)?;
            }
        }
        Ok(())
    }

    fn shoot(&mut self, tank_id: ObjectId) -> Result<(), SimulationError> {
        let object = match self.objects.get_mut(tank_id) {
            Ok(object) => object,
            Err(e) => {
                warn!(room = %self.room_key, tank_id, error = %e, "dropping shot for missing tank");
                return Ok(());
            }
        };
        let tank = object
            .as_tank_mut()
            .ok_or(SimulationError::NotATank(tank_id))?;
        let Some(shot) = self.combat.fire(tank, &self.physics) else {
            debug!(tank_id, "not enough action points to fire");
            return Ok(());
        };

        let body = self.physics.add_body(self.combat.projectile_desc(&shot));
        let projectile_id = self.objects.add_with(|id| {
            GameObject::Projectile(Projectile::new(
                id,
                shot.owner_id,
                body,
                shot.direction,
                shot.launcher,
            ))
        });
        debug!(tank_id, projectile_id, "shell fired");
        Ok(())
    }

    /// Entity update, one fixed physics step, then movement accounting
    fn update_objects(&mut self, delta: f32) {
        for (_, object) in self.objects.iter_mut() {
            object.update(delta, &mut self.physics, &self.config);
        }

        self.physics.step(self.config.tick_delta());

        for (_, object) in self.objects.iter_mut() {
            if let Some(tank) = object.as_tank_mut() {
                self.combat.charge_movement(tank, &mut self.physics, delta);
            }
        }
    }

    fn update_combat(&mut self) {
        let explosions =
            self.combat
                .resolve_impacts(&mut self.objects, &mut self.physics, &mut self.terrain);
        for explosion in explosions {
            for hit in explosion.hits.iter().filter(|hit| hit.knocked_out) {
                info!(
                    room = %self.room_key,
                    tank_id = hit.tank_id,
                    projectile_id = explosion.projectile_id,
                    "tank destroyed"
                );
            }
        }
        self.combat
            .check_boundaries(&mut self.objects, &self.physics);
    }
}
