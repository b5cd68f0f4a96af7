pub mod bots;
pub mod channels;
pub mod chat_engine;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod ids;
pub mod invites;
pub mod locks;
pub mod members;
pub mod messages;
pub mod patch;
pub mod permissions;
pub mod servers;
pub mod session_registry;
pub mod user_session;
pub mod users;
pub mod validation;
