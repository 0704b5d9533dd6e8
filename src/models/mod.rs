pub mod channel;
pub mod overrides;
pub mod stream;

pub use channel::{
    Channel, ChannelFilter, ChannelView, ChannelsResponse, SourceLabel, StreamRecord, StreamView,
};
pub use overrides::{
    BulkUpdateRequest, BulkUpdateResult, OverrideError, OverridePatch, PatchField,
};
pub use stream::{EngineStats, SessionState, StartedStream, StreamQuery, StreamSession};
