//! 路由层：语言识别与快速路由

pub mod fast_router;
pub mod locale;

pub use fast_router::{FastRouter, RoutingResult, RoutingRule, DEFAULT_THRESHOLD, SIMPLE_REPLY_MAX_CHARS};
pub use locale::Locale;
