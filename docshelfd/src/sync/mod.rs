pub mod context;
pub mod coordinator;
pub mod layout;
pub mod local_watcher;
pub mod mappings;
pub mod paths;
pub mod queue;
pub mod reconciler;
pub mod relay;
pub mod resolver;
pub mod transfer;
