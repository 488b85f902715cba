pub mod dispatcher;
pub mod phone;
pub mod queue;
pub mod session;
pub mod template;
