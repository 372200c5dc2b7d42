pub mod loops;
pub mod probe;
pub mod scanner;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod upload;

pub use loops::FileTick;
pub use probe::{ConnectivityState, PingProber, Prober, validate_syntax};
pub use status::{BroadcastSink, MessageLevel, StatusEvent, StatusMessage, StatusSink, TracingSink};
pub use store::ConfigStore;
pub use supervisor::{ShutdownReport, Supervisor, TaskKind, TaskState};
pub use upload::{
    AdHocRequest, DeviceClient, HttpDeviceClient, SkipReason, UploadOutcome, UploadPipeline,
};
