use std::sync::Once;

use crate::backend::headless::{HeadlessConfig, HeadlessDevice, HeadlessProbe};
use crate::basic::types::Extent2D;
use crate::context::Context;
use crate::settings::GfxSettings;

static INIT: Once = Once::new();

/// 初始化日志与 tracy client，`span!` 需要一个正在运行的 client
pub fn setup() {
    INIT.call_once(|| {
        strata_crate_tools::init_log::init_log_with_level(log::LevelFilter::Debug);
        tracy_client::Client::start();
    });
}

pub const TEST_EXTENT: Extent2D = Extent2D::new(64, 32);

/// 使用 headless 后端创建 Context
pub fn headless_context(config: HeadlessConfig) -> (Context<HeadlessDevice>, HeadlessProbe) {
    headless_context_with(config, GfxSettings::default())
}

pub fn headless_context_with(config: HeadlessConfig, settings: GfxSettings) -> (Context<HeadlessDevice>, HeadlessProbe) {
    setup();
    let device = HeadlessDevice::new(config);
    let probe = device.probe();
    let ctx = Context::new(device, settings, TEST_EXTENT).unwrap();
    (ctx, probe)
}
