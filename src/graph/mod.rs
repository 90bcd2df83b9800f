//! Microsoft Graph REST client.
//!
//! Single-shot calls only: no retry and no paging through `@odata.nextLink`.

pub mod client;
pub mod models;

pub use client::{GraphClient, RequestBody, UploadTarget};
pub use models::{DriveItem, SendMailRequest, UserProfile};
