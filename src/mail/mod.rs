pub mod cache;
pub mod client;
pub mod service;
pub mod types;

pub use cache::ClientCache;
pub use service::MailboxService;
pub use types::{DraftUpdate, ItemBody, Message, NewDraft};
