pub mod admission;
pub mod catalog;
pub mod dispatcher;
pub mod gateway;
pub mod priority_queue;
pub mod stat;
pub mod worker;
