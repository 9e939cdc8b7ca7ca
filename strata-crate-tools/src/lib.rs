//! Strata 工具集
//!
//! 提供日志初始化、TOML 配置读写等通用工具。

pub mod config;
pub mod init_log;
