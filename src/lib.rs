pub mod server;

pub mod db;
pub mod notifications;
pub mod services;
pub mod web;
