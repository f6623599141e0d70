//! Snapshot building for network transmission

use glam::Vec2;

use crate::ws::protocol::{GameState, MapUpdate, ServerMsg};

use super::entity::{ClientId, Container};
use super::objects::{GameObject, ObjectBehaviour};
use super::physics::PhysicsWorld;

/// Builds full-state snapshots every `snapshot_interval` ticks
pub struct SnapshotBuilder {
    snapshot_interval: u32,
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            snapshot_interval: snapshot_interval.max(1),
            stats: SnapshotStats::default(),
        }
    }

    /// Check if `tick` is a broadcast tick
    pub fn should_send(&self, tick: u64) -> bool {
        tick % u64::from(self.snapshot_interval) == 0
    }

    /// Build a snapshot message from committed objects
    pub fn build(
        &self,
        current_player: Option<ClientId>,
        objects: &Container<GameObject>,
        physics: &dyn PhysicsWorld,
        erased: Vec<(Vec2, f32)>,
    ) -> ServerMsg {
        ServerMsg::GameState {
            state: GameState {
                current_player,
                objects: objects
                    .iter()
                    .map(|(id, object)| (id, object.state(physics)))
                    .collect(),
                map_update: erased
                    .into_iter()
                    .map(|(center, radius)| MapUpdate::circle(center, radius))
                    .collect(),
            },
        }
    }

    /// Encode a snapshot for the outbound queue and record its size
    pub fn encode(&mut self, msg: &ServerMsg) -> Result<String, serde_json::Error> {
        let frame = msg.encode()?;
        let objects = match msg {
            ServerMsg::GameState { state } => state.objects.len(),
            _ => 0,
        };
        self.stats.record(objects, frame.len());
        Ok(frame)
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// Snapshot volume for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_objects_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, object_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_objects_per_snapshot =
            self.avg_objects_per_snapshot * ((n - 1.0) / n) + (object_count as f32 / n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::objects::Tank;
    use crate::game::physics::testing::ScriptedPhysics;
    use crate::ws::protocol::ObjectState;

    #[test]
    fn sends_every_nth_tick() {
        let builder = SnapshotBuilder::new(4);
        let sent: Vec<u64> = (0..10).filter(|t| builder.should_send(*t)).collect();
        assert_eq!(sent, vec![0, 4, 8]);
    }

    #[test]
    fn builds_committed_objects_and_craters() {
        let config = GameConfig::default();
        let mut physics = ScriptedPhysics::new();
        let mut objects = Container::new();
        let position = Vec2::new(90.0, 540.0);
        let body = physics.add_body(Tank::body_desc(position, &config.tank));
        let committed = objects.add_with(|id| {
            GameObject::Tank(Tank::new(
                id,
                0,
                body,
                "ann".to_string(),
                "tank1_blue".to_string(),
                position,
                Vec2::X,
                &config,
            ))
        });
        objects.apply_pending_changes();
        let staged = objects.add_with(|id| {
            GameObject::Tank(Tank::new(
                id,
                1,
                body,
                "bob".to_string(),
                "tank1_red".to_string(),
                position,
                Vec2::X,
                &config,
            ))
        });

        let mut builder = SnapshotBuilder::new(4);
        let msg = builder.build(
            Some(0),
            &objects,
            &physics,
            vec![(Vec2::new(1.0, 2.0), 30.0)],
        );
        let ServerMsg::GameState { state } = &msg else {
            panic!("expected game_state");
        };
        assert_eq!(state.current_player, Some(0));
        assert!(state.objects.contains_key(&committed));
        assert!(!state.objects.contains_key(&staged));
        assert!(matches!(state.objects[&committed], ObjectState::Tank(_)));
        assert_eq!(state.map_update.len(), 1);

        let frame = builder.encode(&msg).unwrap();
        assert!(frame.starts_with(r#"{"type":"game_state""#));
        assert_eq!(builder.stats().total_snapshots, 1);
        assert_eq!(builder.stats().total_bytes, frame.len() as u64);
    }
}
