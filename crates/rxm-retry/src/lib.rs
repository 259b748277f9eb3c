mod executor;
mod policy;

pub use executor::{RetryClassifier, RetryableQueryExecutor, Sleeper, TokioSleeper};
pub use policy::RetryPolicy;
