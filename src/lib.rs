pub mod body;
pub mod cache;
pub mod cache_control;
pub mod call;
pub mod client;
pub mod config;
pub mod cookie;
pub mod exception;
pub mod headers;
pub mod host;
pub mod hyper_transport;
pub mod listener;
pub mod pairs;
pub mod param;
pub mod request;
pub mod response;
pub mod transport;
pub mod url_composer;
pub mod util;

pub use body::RequestBody;
pub use cache::ResponseCache;
pub use cache_control::CacheControl;
pub use call::{CallState, FailureKind, RequestCall, RequestError};
pub use client::{Client, ClientBuilder};
pub use config::Config;
pub use cookie::{Cookie, CookieJar, MemoryCookieJar};
pub use exception::Exception;
pub use headers::Headers;
pub use host::{BackgroundHost, HostContext, HostKind, MainLoopHost};
pub use hyper_transport::HyperTransport;
pub use listener::{EventListener, LoggingEventListener, NullListener, RequestListener};
pub use pairs::{FileHandle, ParamBag, ParamValue};
pub use param::{HttpEncoding, HttpMethod};
pub use request::{Request, RequestBuilder};
pub use response::Response;
pub use transport::{HttpTransport, NetworkMonitor, TransportCallback, TransportError};
