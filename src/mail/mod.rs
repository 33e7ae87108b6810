//! Mail-side data: the threads handed to the engine by the mail gateway.

pub mod types;

pub use types::{
    EmailAttachment, EmailLabel, EmailMessage, EmailParticipant, EmailThread, LabelKind,
    ParticipantRole,
};
