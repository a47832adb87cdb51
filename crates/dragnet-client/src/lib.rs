pub mod config;
pub mod invoker;
pub mod trigger;

pub use config::ClientConfig;
pub use invoker::HttpExtractorInvoker;
pub use trigger::HttpContinuationTrigger;
