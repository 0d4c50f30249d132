pub mod circuit_breaker;
pub mod delivery;
pub mod endpoint;
pub mod fcm;
pub mod health;
pub mod message;
pub mod request;
pub mod response;
pub mod retry;
pub mod status;
pub mod template;
pub mod user;
