pub mod bots;
pub mod channels;
pub mod invites;
pub mod members;
pub mod messages;
pub mod servers;
pub mod users;
