pub mod clock;
pub mod models;
pub mod repository;
pub mod services;

pub use clock::{Clock, FixedClock, SystemClock};
pub use models::*;
pub use repository::{InMemoryRepository, RepositoryError, SchedulingRepository, SupabaseRepository};
pub use services::*;
