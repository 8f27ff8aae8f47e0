//! 本地书库。
//!
//! 子模块：
//! - `models`  — 条目、下载记录、根索引、扫描文件
//! - `store`   — `library.json` 读写、根索引重建、完成度与过期判断
//! - `matcher` — 文件名与远端卷的匹配
//! - `scanner` — 目录/压缩包扫描、标题识别、目录导入

pub mod matcher;
pub mod models;
pub mod scanner;
pub mod store;
