mod observer;
mod parse;
mod snapshot;
mod targets;

pub use observer::ObserveError;
pub use observer::StatusObserver;
pub use parse::first_integer;
pub use parse::generalized_time_to_epoch;
pub use parse::leading_integer;
pub use parse::parse_flag;
pub use snapshot::AgreementSnapshot;
pub use snapshot::Observation;
pub use snapshot::ReplicaSnapshot;
pub use targets::resolve_targets;
pub use targets::Targets;

pub(crate) use observer::all_missing;
pub(crate) use observer::{
    LAST_INIT_END, LAST_INIT_STATUS, LAST_INIT_STATUS_JSON, LAST_UPDATE_END, LAST_UPDATE_START, LAST_UPDATE_STATUS,
    REPLICA_ENABLED, UPDATE_IN_PROGRESS,
};
