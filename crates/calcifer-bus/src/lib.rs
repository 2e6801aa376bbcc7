// calcifer-bus: Wire formats and messaging-bus boundary for Calcifer

pub mod error;
pub mod family;
pub mod frame;
pub mod payload;
pub mod publisher;
pub mod routing;

pub use error::BusError;
pub use family::DeviceFamily;
pub use frame::{FeedbackFrame, ParsedFeedback};
pub use payload::FeedbackValue;
pub use publisher::{CommandPublisher, MemoryBus, WireCommand};
pub use routing::StateRoute;
