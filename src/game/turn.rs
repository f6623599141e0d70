//! Turn rotation between the clients of a room

use tracing::debug;

use super::entity::{ClientId, Container};
use super::objects::{Client, GameObject, Tank};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    NoTurn,
    ActiveTurn(ClientId),
}

/// Decides who may act; exactly one eligible client holds the turn at a time
#[derive(Debug)]
pub struct TurnManager {
    state: TurnState,
    max_ap: f32,
}

impl TurnManager {
    pub fn new(max_ap: f32) -> Self {
        Self {
            state: TurnState::NoTurn,
            max_ap,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn current(&self) -> Option<ClientId> {
        match self.state {
            TurnState::ActiveTurn(client_id) => Some(client_id),
            TurnState::NoTurn => None,
        }
    }

    /// Per-tick turn pass: hand out a turn if nobody holds one, or move it on
    /// once the holder is out of action points, ended its turn, lost or left.
    pub fn update(&mut self, clients: &Container<Client>, objects: &mut Container<GameObject>) {
        let expired = match self.state {
            TurnState::NoTurn => clients.count(false) > 0,
            TurnState::ActiveTurn(client_id) => match holder_tank(clients, objects, client_id) {
                Some(tank) => {
                    tank.action_points <= 0.0 || tank.turn_ended || tank.has_lost
                }
                None => true,
            },
        };
        if expired {
            self.advance(clients, objects, None);
        }
    }

    /// Pass the turn to the next eligible client after the current holder,
    /// wrapping around. `exclude` is skipped even if eligible.
    pub fn advance(
        &mut self,
        clients: &Container<Client>,
        objects: &mut Container<GameObject>,
        exclude: Option<ClientId>,
    ) -> TurnState {
        let start = match self.state {
            TurnState::ActiveTurn(previous) => {
                if let Some(tank) = tank_of_mut(clients, objects, previous) {
                    tank.turn_ended = true;
                }
                previous + 1
            }
            TurnState::NoTurn => 0,
        };

        let span = clients.next_id();
        let next = (0..span)
            .map(|offset| (start + offset) % span)
            .filter(|candidate| Some(*candidate) != exclude)
            .find(|candidate| is_eligible(clients, objects, *candidate));

        let previous = self.state;
        self.state = match next {
            Some(client_id) => {
                if let Some(tank) = tank_of_mut(clients, objects, client_id) {
                    tank.start_turn(self.max_ap);
                }
                TurnState::ActiveTurn(client_id)
            }
            None => TurnState::NoTurn,
        };
        if previous != self.state {
            debug!(from = ?previous, to = ?self.state, "turn advanced");
        }
        self.state
    }
}

fn is_eligible(clients: &Container<Client>, objects: &Container<GameObject>, client_id: ClientId) -> bool {
    holder_tank(clients, objects, client_id).is_some_and(|tank| !tank.has_lost)
}

/// The tank of a committed, still connected client
fn holder_tank<'a>(
    clients: &Container<Client>,
    objects: &'a Container<GameObject>,
    client_id: ClientId,
) -> Option<&'a Tank> {
    let client = clients.get(client_id).ok().filter(|c| !c.disconnected)?;
    objects.get(client.tank_id).ok()?.as_tank()
}

fn tank_of_mut<'a>(
    clients: &Container<Client>,
    objects: &'a mut Container<GameObject>,
    client_id: ClientId,
) -> Option<&'a mut Tank> {
    let client = clients.get(client_id).ok()?;
    objects.get_mut(client.tank_id).ok()?.as_tank_mut()
}
