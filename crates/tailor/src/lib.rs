//! Per-tick controllers for a live ad-insertion demo workload.
//!
//! Two cooperating state machines are driven by an external fixed-cadence
//! invoker that persists each tick's returned state and feeds it back in:
//!
//! - [`SessionPoolController`] keeps one shard's pool of simulated viewer
//!   sessions at the size dictated by an audience curve ([`volume`]).
//! - [`PrefetchWindowEngine`] keeps a rolling window of prefetch schedules
//!   ahead of the live edge of a media playlist and tears them down when an
//!   ad avail ends.
//!
//! Network collaborators sit behind traits ([`PlaylistSource`],
//! [`SessionInitializer`], [`PrefetchReservations`]) so ticks can be replayed
//! against fakes.

pub mod clock;
pub mod config;
pub mod error;
pub mod playlist;
pub mod pool;
pub mod prefetch;
pub mod reservation;
pub mod session;
pub mod state;
pub mod volume;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{HttpClientConfig, build_client};
pub use error::{Result, TailorError};
pub use playlist::{Playlist, PlaylistClient, PlaylistSource};
pub use pool::{PoolConfig, PoolEffect, SessionPoolController};
pub use prefetch::{AvailEndDetector, PrefetchConfig, PrefetchEffect, PrefetchWindowEngine};
pub use reservation::{CreatedSchedule, HttpReservationClient, PrefetchReservations, ScheduleRequest};
pub use session::{HttpSessionBootstrap, SessionInitializer};
pub use state::{PrefetchWindowState, SessionPoolState, TickOutcome};
pub use volume::{GrowthPattern, GrowthPoint, SessionRequirements};
