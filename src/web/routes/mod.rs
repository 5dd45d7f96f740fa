pub mod channel_routes;
pub mod notify_routes;
pub mod user_routes;
