pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use services::{DashboardService, DeliveryDispatcher, SessionService};
pub use state::AppContext;
pub use websocket::{ConnectionRegistry, WsEvent};
