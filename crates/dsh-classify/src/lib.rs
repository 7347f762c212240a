pub mod classifier;
pub mod config;
pub mod worker;

pub use classifier::{Category, Classification, DomainClassifier, Verdict};
pub use config::ClassifierConfig;
pub use worker::ClassifierHandle;
