pub mod broker;
pub mod cluster;
pub mod error;
pub mod handler;
pub mod message;
pub mod topic;
