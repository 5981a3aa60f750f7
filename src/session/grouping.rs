//! Partition a session's participants into fixed groups

use crate::game::{ParticipantId, MIN_GROUP_SIZE};

use super::SessionError;

/// Splits participants into groups of a fixed size, in enrollment order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMatcher {
    /// `None` keeps the whole session together as one group
    group_size: Option<usize>,
}

impl GroupMatcher {
    pub fn new(group_size: Option<usize>) -> Self {
        Self { group_size }
    }

    /// Form groups; the same input always yields the same groups, so
    /// membership stays fixed across rounds
    pub fn form_groups(
        &self,
        participants: &[ParticipantId],
    ) -> Result<Vec<Vec<ParticipantId>>, SessionError> {
        let size = self.group_size.unwrap_or(participants.len());
        let required = size.max(MIN_GROUP_SIZE);

        if participants.len() < required || size < MIN_GROUP_SIZE {
            return Err(SessionError::NotEnoughParticipants {
                participants: participants.len(),
                required,
            });
        }

        if participants.len() % size != 0 {
            return Err(SessionError::UnevenGroups {
                participants: participants.len(),
                group_size: size,
            });
        }

        Ok(participants.chunks(size).map(<[ParticipantId]>::to_vec).collect())
    }
}
