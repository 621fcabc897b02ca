use crate::bridge::AttendeeRef;

/// A participant currently present in the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attendee {
    pub id: String,
    pub external_user_id: String,
    pub muted: bool,
}

/// Deduplicated set of present attendees, kept in first-seen order.
///
/// Updated by the session controller from engine events. Read by UI layers
/// through session snapshots.
#[derive(Debug, Clone, Default)]
pub struct AttendanceRegistry {
    attendees: Vec<Attendee>,
}

impl AttendanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `joined` into the set. Returns how many were new.
    pub fn add_attendees(&mut self, joined: &[AttendeeRef]) -> usize {
        let mut added = 0;
        for r in joined {
            match self.attendee_mut(&r.attendee_id) {
                Some(existing) => {
                    if existing.external_user_id.is_empty() && !r.external_user_id.is_empty() {
                        existing.external_user_id = r.external_user_id.clone();
                    }
                }
                None => {
                    self.attendees.push(Attendee {
                        id: r.attendee_id.clone(),
                        external_user_id: r.external_user_id.clone(),
                        muted: false,
                    });
                    added += 1;
                }
            }
        }
        added
    }

    /// Subtract `ids` from the set. Returns how many were present.
    pub fn remove_attendees(&mut self, ids: &[String]) -> usize {
        let before = self.attendees.len();
        self.attendees.retain(|a| !ids.contains(&a.id));
        before - self.attendees.len()
    }

    /// Set the mute flag on present members; unknown ids are ignored.
    /// Returns how many members actually changed.
    pub fn set_muted(&mut self, ids: &[String], muted: bool) -> usize {
        let mut changed = 0;
        for a in self.attendees.iter_mut().filter(|a| ids.contains(&a.id)) {
            if a.muted != muted {
                a.muted = muted;
                changed += 1;
            }
        }
        changed
    }

    pub fn attendees(&self) -> &[Attendee] {
        &self.attendees
    }

    pub fn attendee(&self, id: &str) -> Option<&Attendee> {
        self.attendees.iter().find(|a| a.id == id)
    }

    fn attendee_mut(&mut self, id: &str) -> Option<&mut Attendee> {
        self.attendees.iter_mut().find(|a| a.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.attendee(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.attendees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attendees.is_empty()
    }

    pub fn clear(&mut self) {
        self.attendees.clear();
    }
}
