//! Shutdown signal handling
//!
//! SIGINT and SIGTERM are blocked in every thread and consumed
//! synchronously by one waiter thread, which cancels the root token.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    }
}
