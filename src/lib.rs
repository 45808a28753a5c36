#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Keeping format!("{}", x) over format!("{x}") for readability with complex exprs
#![allow(clippy::uninlined_format_args)]
// Counters and durations cross between u32/u64/usize
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod limiter;
pub mod phone;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod transport;
pub(crate) mod utils;

pub use dispatch::{BulkSendResult, Dispatcher, MessagePayload, SendReceipt, SendRequest};
pub use errors::CourierError;
pub use limiter::RateLimiter;
pub use phone::{CanonicalNumber, PhoneNormalizer};
pub use registry::{SessionRegistry, TenantChannel};
pub use scheduler::{NotificationScheduler, ReminderKind, ReminderPlan};
pub use session::{SessionController, SessionEvent, SessionEventKind, SessionSnapshot, SessionState};
pub use transport::{ChannelTransport, TransportEvent};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
