//! Sea-ORM entities for inbox-store

pub mod conversation_participants;
pub mod conversations;
pub mod messages;
pub mod profiles;

pub use conversation_participants::Entity as ConversationParticipant;
pub use conversations::Entity as Conversation;
pub use messages::Entity as Message;
pub use profiles::Entity as Profile;
