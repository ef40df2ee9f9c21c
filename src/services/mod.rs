pub mod broker;
pub mod cleanup;
pub mod imaging;
pub mod queue;
pub mod redis_broker;
pub mod storage;
pub mod worker;
