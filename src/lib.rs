//! UniMatch 客户端核心
//!
//! 浏览器与原生宿主共用的业务层：
//! - `identity`: 身份服务 (Firebase Auth REST) 与会话持久化
//! - `api`: 资料/匹配 API 网关
//! - `session`: 会话状态 (身份 + 资料 + 心跳)
//! - `guard`: 路由守卫
//! - `onboarding`, `browse`, `account`, `settings`, `matches`: 各业务流程
//! - `app`: 组合根

pub mod account;
pub mod api;
pub mod app;
pub mod broadcast;
pub mod browse;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod matches;
pub mod onboarding;
pub mod request;
pub mod session;
pub mod settings;
pub mod ticker;

#[cfg(target_arch = "wasm32")]
pub mod web;

#[cfg(test)]
mod testing;

pub use app::AppContext;
pub use config::RuntimeConfig;
pub use error::{AppError, Result};

// =========================================================
// 日志初始化 (Logging)
// =========================================================

/// 安装全局 `tracing` 订阅者，`RUST_LOG` 可覆盖默认过滤规则。重复调用无副作用。
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "unimatch=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// 安装 panic hook 与输出到浏览器控制台的订阅者，时间戳交给开发者工具显示。
#[cfg(target_arch = "wasm32")]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    console_error_panic_hook::set_once();
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("unimatch=info"))
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_ansi(false)
                .with_writer(console::ConsoleWriter::default),
        )
        .try_init();
}

#[cfg(target_arch = "wasm32")]
mod console {
    use std::io;

    /// Buffers one formatted event and logs it on drop.
    #[derive(Default)]
    pub struct ConsoleWriter(Vec<u8>);

    impl io::Write for ConsoleWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for ConsoleWriter {
        fn drop(&mut self) {
            let line = String::from_utf8_lossy(&self.0);
            let line = line.trim_end();
            if !line.is_empty() {
                web_sys::console::log_1(&line.into());
            }
        }
    }
}

// =========================================================
// 入口 (Entry Point)
// =========================================================

/// 浏览器入口：按编译期配置构建应用，解析首个视图，然后运行会话循环。
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    use std::rc::Rc;

    init_logging();
    let app = Rc::new(AppContext::new(
        RuntimeConfig::from_env(),
        web::FetchHttpClient,
        web::LocalCredentialStore::default(),
    ));

    wasm_bindgen_futures::spawn_local(async move {
        app.start().await;
        let path = web_sys::window()
            .and_then(|w| w.location().pathname().ok())
            .unwrap_or_else(|| "/".to_string());
        let view = app.navigator.navigate(&path).await;
        tracing::info!(path = %path, ?view, "initial view");
        app.run(&web::IntervalTicker).await;
    });
}
