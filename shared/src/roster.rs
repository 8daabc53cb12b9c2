use serde::{Deserialize, Serialize};

use crate::error::{WheelError, WheelResult};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Waiting,
    Accepted,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub status: ParticipantStatus,
    pub joined_at: u64, // unix ms
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, joined_at: u64) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            status: ParticipantStatus::Waiting,
            joined_at,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == ParticipantStatus::Accepted
    }
}

/// What happens to an accepted participant that is taken out of the pool.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DemoteMode {
    #[default]
    ToWaiting,
    Remove,
}

/// Participants of one round, in registration order.
///
/// The roster itself knows nothing about round state; `WheelGame` is its only
/// owner and checks that the round is Idle before calling any mutator.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ParticipantRoster {
    participants: Vec<Participant>,
}

impl ParticipantRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn all(&self) -> &[Participant] {
        &self.participants
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    fn position(&self, id: &str) -> WheelResult<usize> {
        self.participants
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| WheelError::NotFound(id.to_string()))
    }

    /// The prize pool: accepted participants in roster order.
    pub fn accepted(&self) -> Vec<Participant> {
        self.participants
            .iter()
            .filter(|p| p.is_accepted())
            .cloned()
            .collect()
    }

    pub fn accepted_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_accepted()).count()
    }

    pub fn register(&mut self, mut participant: Participant) -> WheelResult<&Participant> {
        if self.get(&participant.id).is_some() {
            return Err(WheelError::AlreadyRegistered(participant.id));
        }
        participant.status = ParticipantStatus::Waiting;
        self.participants.push(participant);
        let last = self.participants.len() - 1;
        Ok(&self.participants[last])
    }

    /// Removes a waiting participant. Accepted participants cannot back out.
    pub fn cancel(&mut self, id: &str) -> WheelResult<Participant> {
        let index = self.position(id)?;
        if self.participants[index].is_accepted() {
            return Err(WheelError::invalid_state(
                "cancel",
                format!("participant {} has already been accepted", id),
            ));
        }
        Ok(self.participants.remove(index))
    }

    pub fn accept(&mut self, id: &str) -> WheelResult<&Participant> {
        let index = self.position(id)?;
        self.participants[index].status = ParticipantStatus::Accepted;
        Ok(&self.participants[index])
    }

    /// Returns the number of participants that changed status.
    pub fn accept_all(&mut self) -> usize {
        let mut changed = 0;
        for participant in self.participants.iter_mut().filter(|p| !p.is_accepted()) {
            participant.status = ParticipantStatus::Accepted;
            changed += 1;
        }
        changed
    }

    /// Takes one accepted participant out of the pool. Waiting participants are left alone.
    pub fn demote(&mut self, id: &str, mode: DemoteMode) -> WheelResult<Participant> {
        let index = self.position(id)?;
        if !self.participants[index].is_accepted() {
            return Err(WheelError::invalid_state(
                "demote",
                format!("participant {} is not accepted", id),
            ));
        }
        match mode {
            DemoteMode::ToWaiting => {
                self.participants[index].status = ParticipantStatus::Waiting;
                Ok(self.participants[index].clone())
            }
            DemoteMode::Remove => Ok(self.participants.remove(index)),
        }
    }

    /// Takes every accepted participant out of the pool. Returns the affected participants.
    pub fn demote_all(&mut self, mode: DemoteMode) -> Vec<Participant> {
        match mode {
            DemoteMode::ToWaiting => self
                .participants
                .iter_mut()
                .filter(|p| p.is_accepted())
                .map(|p| {
                    p.status = ParticipantStatus::Waiting;
                    p.clone()
                })
                .collect(),
            DemoteMode::Remove => {
                let (removed, kept): (Vec<_>, Vec<_>) = self
                    .participants
                    .drain(..)
                    .partition(|p| p.is_accepted());
                self.participants = kept;
                removed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster_with(names: &[&str]) -> ParticipantRoster {
        let mut roster = ParticipantRoster::new();
        for (i, name) in names.iter().enumerate() {
            roster
                .register(Participant::new(name.to_lowercase(), *name, i as u64))
                .unwrap();
        }
        roster
    }

    #[test]
    fn test_register_rejects_duplicate_id() {
        let mut roster = roster_with(&["Alice"]);
        let err = roster
            .register(Participant::new("alice", "Alice Again", 5))
            .unwrap_err();
        assert_eq!(err, WheelError::AlreadyRegistered("alice".to_string()));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_register_forces_waiting_status() {
        let mut roster = ParticipantRoster::new();
        let mut p = Participant::new("bob", "Bob", 0);
        p.status = ParticipantStatus::Accepted;
        let registered = roster.register(p).unwrap();
        assert_eq!(registered.status, ParticipantStatus::Waiting);
        assert!(roster.accepted().is_empty());
    }

    #[test]
    fn test_register_then_cancel_leaves_no_residue() {
        let mut roster = roster_with(&["Alice", "Bob"]);
        let before = roster.clone();
        roster.register(Participant::new("carol", "Carol", 9)).unwrap();
        roster.cancel("carol").unwrap();
        assert_eq!(roster, before);
    }

    #[test]
    fn test_cancel_accepted_is_invalid_state() {
        let mut roster = roster_with(&["Alice"]);
        roster.accept("alice").unwrap();
        assert!(matches!(
            roster.cancel("alice"),
            Err(WheelError::InvalidState { action: "cancel", .. })
        ));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let mut roster = roster_with(&["Alice"]);
        assert_eq!(roster.accept("zed"), Err(WheelError::NotFound("zed".to_string())));
        assert!(matches!(roster.cancel("zed"), Err(WheelError::NotFound(_))));
        assert!(matches!(roster.demote("zed", DemoteMode::Remove), Err(WheelError::NotFound(_))));
    }

    #[test]
    fn test_accepted_pool_keeps_roster_order() {
        let mut roster = roster_with(&["Alice", "Bob", "Carol", "Dana"]);
        roster.accept("dana").unwrap();
        roster.accept("bob").unwrap();
        let pool: Vec<_> = roster.accepted().into_iter().map(|p| p.id).collect();
        assert_eq!(pool, vec!["bob", "dana"]);
    }

    #[test]
    fn test_accept_all_and_demote_all_modes() {
        let mut roster = roster_with(&["Alice", "Bob", "Carol"]);
        assert_eq!(roster.accept_all(), 3);
        assert_eq!(roster.accept_all(), 0);

        let demoted = roster.demote_all(DemoteMode::ToWaiting);
        assert_eq!(demoted.len(), 3);
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.accepted_count(), 0);

        roster.accept("alice").unwrap();
        roster.accept("carol").unwrap();
        let removed = roster.demote_all(DemoteMode::Remove);
        assert_eq!(removed.len(), 2);
        let left: Vec<_> = roster.all().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(left, vec!["bob"]);
    }

    #[test]
    fn test_demote_single() {
        let mut roster = roster_with(&["Alice", "Bob"]);
        roster.accept_all();
        let p = roster.demote("alice", DemoteMode::ToWaiting).unwrap();
        assert_eq!(p.status, ParticipantStatus::Waiting);
        roster.demote("bob", DemoteMode::Remove).unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.accepted_count(), 0);
    }

    #[test]
    fn test_demote_waiting_is_invalid_state() {
        let mut roster = roster_with(&["Alice", "Bob"]);
        roster.accept("bob").unwrap();
        let before = roster.clone();
        for mode in [DemoteMode::ToWaiting, DemoteMode::Remove] {
            assert!(matches!(
                roster.demote("alice", mode),
                Err(WheelError::InvalidState { action: "demote", .. })
            ));
        }
        assert_eq!(roster, before);
    }
}
