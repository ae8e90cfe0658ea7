//! # basalt-kernel: the application state machine
//!
//! The kernel is the pure functional core that the replication layer drives:
//! committed commands are applied in log order to produce reply values.
//! It performs no I/O, reads no clocks, and draws no randomness, so every
//! replica that applies the same command sequence reaches the same state.
//!
//! ```ignore
//! let mut store = Store::new();
//! let value = store.apply(&Command::put(Key::new(7), b"hello".to_vec()));
//! assert!(value.is_empty()); // writes reply with an empty value
//! ```

mod command;
mod store;

pub use command::{Command, Key, Value};
pub use store::Store;
