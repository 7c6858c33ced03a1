//! Domain events published on the bus.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Something that happened in the application.
///
/// Events are immutable facts: a closed set of variants, matched by
/// subscribers via [`event_type`](Event::event_type). The bus never
/// persists them; an event published with no subscribers is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A note was created.
    NoteCreated {
        note_id: Uuid,
        actor_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// A note's content changed.
    NoteUpdated {
        note_id: Uuid,
        actor_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// A note was deleted.
    NoteDeleted {
        note_id: Uuid,
        actor_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// A deck was created.
    DeckCreated {
        deck_id: Uuid,
        actor_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// A deck was deleted, along with its cards.
    DeckDeleted {
        deck_id: Uuid,
        actor_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// A card was added to a deck.
    CardAdded {
        card_id: Uuid,
        deck_id: Uuid,
        actor_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// A card was reviewed.
    CardReviewed {
        card_id: Uuid,
        deck_id: Uuid,
        actor_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// A new account was registered.
    UserRegistered {
        user_id: Uuid,
        occurred_at: DateTime<Utc>,
    },
}

impl Event {
    /// Subscription key for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::NoteCreated { .. } => "note.created",
            Event::NoteUpdated { .. } => "note.updated",
            Event::NoteDeleted { .. } => "note.deleted",
            Event::DeckCreated { .. } => "deck.created",
            Event::DeckDeleted { .. } => "deck.deleted",
            Event::CardAdded { .. } => "card.added",
            Event::CardReviewed { .. } => "card.reviewed",
            Event::UserRegistered { .. } => "user.registered",
        }
    }

    /// When the underlying fact occurred.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Event::NoteCreated { occurred_at, .. }
            | Event::NoteUpdated { occurred_at, .. }
            | Event::NoteDeleted { occurred_at, .. }
            | Event::DeckCreated { occurred_at, .. }
            | Event::DeckDeleted { occurred_at, .. }
            | Event::CardAdded { occurred_at, .. }
            | Event::CardReviewed { occurred_at, .. }
            | Event::UserRegistered { occurred_at, .. } => *occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_are_dotted_discriminators() {
        let event = Event::NoteCreated {
            note_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
        };
        assert_eq!(event.event_type(), "note.created");

        let event = Event::CardReviewed {
            card_id: Uuid::new_v4(),
            deck_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
        };
        assert_eq!(event.event_type(), "card.reviewed");
    }

    #[test]
    fn occurred_at_reads_through_every_variant() {
        let at = Utc::now();
        let event = Event::UserRegistered {
            user_id: Uuid::new_v4(),
            occurred_at: at,
        };
        assert_eq!(event.occurred_at(), at);
    }
}
