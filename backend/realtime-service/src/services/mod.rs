pub mod dashboard;
pub mod dispatcher;
pub mod push_gateway;
pub mod session_service;

pub use dashboard::{DashboardService, DashboardStats};
pub use dispatcher::DeliveryDispatcher;
pub use push_gateway::{
    EmailRelay, HttpEmailRelay, HttpPushGateway, PushGateway, PushOutcome, PushPayload,
};
pub use session_service::SessionService;
