pub mod health_handlers;
pub mod object_handlers;
pub mod page_handlers;
