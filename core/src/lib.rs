pub mod analytics;
pub mod auth;
pub mod error;
pub mod events;
pub mod identity;
pub mod invitations;
pub mod menu;
pub mod validation;
