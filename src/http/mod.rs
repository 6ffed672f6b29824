//! HTTP client layer: `IntegrateHttp` request helper.

pub mod client;

pub use client::{IntegrateHttp, ResponseBody, RoutePrefix, SessionExpiredHook};
