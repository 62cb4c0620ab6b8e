// brainlink-api: async WebSocket session client for brain heating controllers.
//
// Owns the wire format, the per-session transport (connect, secure
// handshake, login, update stream) and correlation of commands with
// their acknowledgements. Entity semantics live in `brainlink-core`.

pub mod connection;
pub mod correlator;
pub mod error;
pub mod wire;

pub use connection::{Connection, ConnectionOptions, Update, normalize_host};
pub use correlator::AckCorrelator;
pub use error::{Error, ErrorKind};
pub use wire::{Command, Entry, Key, KeyClass, ParseKeyError, ValueMeta};
