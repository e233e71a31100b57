pub mod canonical;
pub mod chat;
pub mod interest;
pub mod match_record;
pub mod message;
pub mod presence;

pub use canonical::ParticipantPair;
pub use chat::ChatThread;
pub use interest::{EventInterestIndex, Interest};
pub use match_record::{match_strength, MatchCandidate, MatchRecord, MatchStatus};
pub use message::Message;
pub use presence::TypingState;
