//! Registry of a session's groups across its rounds

use dashmap::DashMap;
use uuid::Uuid;

use crate::game::ParticipantId;

use super::round::GroupHandle;

/// Groups of every started round, indexed by group id. Seats point each
/// participant at their group in the latest round.
pub struct RoundRegistry {
    groups: DashMap<Uuid, GroupHandle>,
    seats: DashMap<ParticipantId, Uuid>,
}

impl RoundRegistry {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
            seats: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: GroupHandle) {
        for member in handle.members.iter() {
            self.seats.insert(*member, handle.id);
        }
        self.groups.insert(handle.id, handle);
    }

    pub fn get(&self, id: &Uuid) -> Option<GroupHandle> {
        self.groups.get(id).map(|g| g.value().clone())
    }

    /// The group a participant sits in for the latest round
    pub fn group_for(&self, participant: &ParticipantId) -> Option<GroupHandle> {
        let group_id = *self.seats.get(participant)?;
        self.get(&group_id)
    }

    /// Groups created for `round`, settled or not
    pub fn groups_for_round(&self, round: u32) -> Vec<GroupHandle> {
        self.groups
            .iter()
            .filter(|g| g.value().round == round)
            .map(|g| g.value().clone())
            .collect()
    }

    /// Groups still accepting decisions
    pub fn open_groups(&self) -> usize {
        self.groups.iter().filter(|g| g.value().is_open()).count()
    }

    pub fn clear(&self) {
        self.seats.clear();
        self.groups.clear();
    }
}

impl Default for RoundRegistry {
    fn default() -> Self {
        Self::new()
    }
}
