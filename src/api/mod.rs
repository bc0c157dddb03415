pub mod client;
pub mod credentials;
pub mod error;
pub mod types;

pub use client::{LookupApiClient, TaskBackend};
pub use credentials::{CSRF_COOKIE, CSRF_HEADER, CookieJar, CredentialProvider, NoCredentials, StaticToken};
pub use error::ApiError;
pub use types::{LookupRequest, LookupResult, PollReply, PollResponse, TaskId};
