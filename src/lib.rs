pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod fanout;
pub mod geofence;
pub mod ledger;
pub mod model;
pub mod models;
pub mod notify;
pub mod routes;
pub mod state;
pub mod sync;
