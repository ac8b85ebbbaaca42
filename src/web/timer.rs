//! 定时器封装模块
//!
//! 使用 `web_sys` 的原生 `setInterval`，并适配为会话心跳所需的 `Ticker`。

use crate::error::{AppError, Result};
use crate::ticker::Ticker;
use futures::StreamExt;
use futures::channel::mpsc::unbounded;
use futures::stream::LocalBoxStream;
use std::time::Duration;
use tracing::warn;
use wasm_bindgen::prelude::*;

/// 周期性定时器
///
/// 封装 `setInterval` API。当 `Interval` 被 drop 时，自动清除定时器。
pub struct Interval {
    handle: i32,
    _closure: Closure<dyn Fn()>,
}

impl Interval {
    pub fn new<F>(millis: u32, callback: F) -> Result<Self>
    where
        F: Fn() + 'static,
    {
        let closure = Closure::<dyn Fn()>::new(callback);
        let window = web_sys::window().ok_or_else(|| AppError::config("无法获取 window 对象"))?;

        let handle = window
            .set_interval_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                i32::try_from(millis).unwrap_or(i32::MAX),
            )
            .map_err(|e| AppError::config(format!("设置定时器失败: {:?}", e)))?;

        Ok(Self {
            handle,
            _closure: closure,
        })
    }

    pub fn cancel(&self) {
        if let Some(window) = web_sys::window() {
            window.clear_interval_with_handle(self.handle);
        }
    }
}

impl Drop for Interval {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// `setInterval` based ticker. The interval lives inside the stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalTicker;

impl Ticker for IntervalTicker {
    fn ticks(&self, period: Duration) -> LocalBoxStream<'static, ()> {
        let (tx, rx) = unbounded();
        let millis = u32::try_from(period.as_millis()).unwrap_or(u32::MAX);
        let interval = match Interval::new(millis, move || {
            let _ = tx.unbounded_send(());
        }) {
            Ok(interval) => interval,
            Err(err) => {
                warn!(error = %err, "heartbeat timer unavailable");
                return futures::stream::empty().boxed_local();
            }
        };

        futures::stream::unfold((rx, interval), |(mut rx, interval)| async move {
            rx.next().await.map(|()| ((), (rx, interval)))
        })
        .boxed_local()
    }
}
