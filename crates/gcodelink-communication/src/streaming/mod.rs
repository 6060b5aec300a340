//! Flow-controlled streaming engine
//!
//! - [`FlowController`]: shared credit/pending/flag accounting
//! - [`CommandChannel`]: the single serialized write path
//! - [`reader`]: thread decoding firmware output and releasing credit
//! - [`uploader`]: thread streaming an [`UploadSource`] under flow control

pub mod flow_control;
pub mod reader;
pub mod source;
pub mod uploader;
pub mod write_channel;

pub use flow_control::{Acquire, FlowController, FlowSnapshot};
pub use reader::{spawn_reader, ReaderContext};
pub use source::{clean_line, SourceOptions, UploadSource};
pub use uploader::{spawn_uploader, UploaderContext};
pub use write_channel::CommandChannel;
