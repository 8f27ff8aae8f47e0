//! 站点访问与页面解析。
//!
//! 子模块：
//! - `transport` — HTTP 传输抽象（reqwest 实现 + 测试用脚本实现）
//! - `network`   — 多镜像客户端：重试、切换、限速、流式下载
//! - `parser`    — 内联脚本/页面正则解析
//! - `models`    — 详情、卷、搜索结果、用户状态
//! - `comic`     — 漫画详情与卷列表
//! - `search`    — 搜索与分类浏览
//! - `auth`      — 登录与会话校验

pub mod auth;
pub mod comic;
pub mod models;
pub mod network;
pub mod parser;
pub mod search;
pub mod transport;
