mod abort_on_drop;
mod backoff;
pub mod wallet;

pub use abort_on_drop::AbortOnDropHandle;
pub use backoff::ExponentialBackoff;
pub use wallet::Wallet;
