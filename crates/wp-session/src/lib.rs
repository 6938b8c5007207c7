//! Session and synchronization engine for the WavePortal client.
//!
//! Single-threaded by construction: components share state through `Rc`
//! and `RefCell`, and no borrow is held across an `.await`.

pub mod app;
pub mod config;
pub mod error;
pub mod session;
pub mod surface;
pub mod sync;
pub mod transaction;

pub use app::WavePortalApp;
pub use config::{ConfigError, SessionConfig};
pub use error::SessionError;
pub use session::{SessionController, SessionState};
pub use surface::ErrorSurface;
pub use sync::{PendingWave, WaveHistory, WaveSynchronizer};
pub use transaction::{TransactionCoordinator, TransactionState};
