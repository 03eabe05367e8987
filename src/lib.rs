// src/lib.rs

// Import the top-level `oasis` module.
pub mod oasis;

// Re-exporting key items for easier external access.
pub use oasis::collaborators::Collaborators;
pub use oasis::config::OasisConfig;
pub use oasis::error::{Error, Result};
pub use oasis::event::{EngineEvent, EventHandler};
pub use oasis::forum::Forum;
pub use oasis::registry::Registry;
pub use oasis::schedule::Schedule;
pub use oasis::stream::TopicUpdate;
// If you wish, you can also re-export specific clients from the `clients` submodule:
// pub use oasis::clients::openai::OpenAiLlmClient;
