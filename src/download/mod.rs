//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`      — 下载格式、结果与取消令牌
//! - `progress`    — 进度回调与 CLI 进度条
//! - `downloader`  — 单卷/批量下载编排

pub mod downloader;
pub mod models;
pub mod progress;
