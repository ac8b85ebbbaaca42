//! 原生 Web API 封装模块
//!
//! 浏览器端的传输、定时器与会话持久化，直接基于 `web_sys`。

mod http;
mod storage;
mod timer;

pub use http::FetchHttpClient;
pub use storage::{LocalCredentialStore, LocalStorage};
pub use timer::{Interval, IntervalTicker};
