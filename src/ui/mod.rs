//! 交互层入口。
//!
//! 目前只有命令行一套实现。

pub mod cli;
