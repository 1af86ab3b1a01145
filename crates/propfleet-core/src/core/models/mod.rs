pub mod dataset;
pub mod property;
pub mod request;
pub mod result;
